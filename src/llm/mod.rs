pub mod anthropic;
pub mod backend;
pub mod client;
pub mod gemini;
pub mod grammar;
pub mod kobold;
pub mod prompts;
pub mod retry;
pub mod validation;

pub use anthropic::*;
pub use backend::*;
pub use client::*;
pub use gemini::*;
pub use grammar::*;
pub use kobold::*;
pub use prompts::*;
pub use retry::*;
pub use validation::*;
