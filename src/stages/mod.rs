pub mod pipeline;
pub mod progress;
pub mod stage1_attribute;
pub mod stage2_render;

pub use pipeline::*;
pub use progress::*;
pub use stage1_attribute::*;
pub use stage2_render::*;
