pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod lock;
pub mod model;
pub mod validator;

pub use config::*;
pub use error::*;
pub use executor::*;
pub use filter::*;
pub use lock::*;
pub use model::*;
pub use validator::*;

// Shared model, configuration and plumbing for the nfdhcpd VNM driver
