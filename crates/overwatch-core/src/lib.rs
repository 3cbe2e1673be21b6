pub mod dispatcher;
pub mod immunize;
pub mod policy;
pub mod refresh;
pub mod runner;
pub mod scan;
pub mod state;
pub mod store;
pub mod suppressor;
pub mod update;
pub mod verifier;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testkit;

pub use dispatcher::*;
pub use immunize::*;
pub use policy::*;
pub use refresh::*;
pub use runner::*;
pub use scan::*;
pub use state::*;
pub use store::*;
pub use suppressor::*;
pub use update::*;
pub use verifier::*;
pub use watchdog::*;
