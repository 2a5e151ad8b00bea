pub mod lifecycle;
pub mod status;

#[cfg(test)]
mod fake;

pub use lifecycle::*;
pub use status::*;

// Chain lifecycle for nfdhcpd-managed NICs
