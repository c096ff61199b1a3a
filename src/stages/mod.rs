pub mod approval;
pub mod generate;

pub use approval::*;
pub use generate::*;
