pub mod approval;
pub mod draft;
pub mod transcript;

pub use approval::*;
pub use draft::*;
pub use transcript::*;
