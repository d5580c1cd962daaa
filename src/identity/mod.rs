pub mod masking;
pub mod resolver;

pub use masking::*;
pub use resolver::*;
