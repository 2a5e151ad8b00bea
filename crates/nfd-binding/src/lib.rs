pub mod binding;
pub mod reader;

pub use binding::*;
pub use reader::*;

// nfdhcpd binding files (one per managed NIC)
