pub mod from_gemini;
pub mod sanitize;
pub mod to_gemini;

pub use sanitize::{rewrite_tool_schema, sanitize_for_model_family, sanitize_gemini_inbound};
