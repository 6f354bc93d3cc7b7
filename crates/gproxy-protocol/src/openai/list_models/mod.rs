pub mod response;

pub use response::{ListModelsResponse, ListObjectType};

#[derive(Debug, Clone, Default)]
pub struct ListModelsRequest;
