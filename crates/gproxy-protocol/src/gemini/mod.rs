pub mod generate_content;
pub mod list_models;
pub mod shared;
pub mod types;

pub use shared::*;
