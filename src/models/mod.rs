pub mod attribution;
pub mod paragraph;
pub mod recency;
pub mod record;
pub mod window;

pub use attribution::*;
pub use paragraph::*;
pub use recency::*;
pub use record::*;
pub use window::*;
