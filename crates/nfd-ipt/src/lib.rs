pub mod command;
pub mod parser;
pub mod store;

pub use command::*;
pub use parser::*;
pub use store::*;

// iptables rule store: command builder, `-S` dump parser and snapshots
