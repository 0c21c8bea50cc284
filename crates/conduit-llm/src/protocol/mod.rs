//! Provider wire formats

pub mod anthropic;
pub mod gemini;
pub mod openai;
