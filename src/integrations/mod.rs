pub mod email;
pub mod servicenow;

pub use email::*;
pub use servicenow::*;
