pub mod captions;
pub mod input;
pub mod output;

pub use captions::*;
pub use input::*;
pub use output::*;
