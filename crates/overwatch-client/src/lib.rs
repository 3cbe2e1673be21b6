pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;

pub use bridge::*;
pub use config::*;
pub use error::*;
pub use gateway::*;
