pub mod actor;
pub mod alert;
pub mod event;
pub mod flagged;
pub mod scope;

pub use actor::*;
pub use alert::*;
pub use event::*;
pub use flagged::*;
pub use scope::*;
