use serde::{Deserialize, Serialize};

pub use crate::gemini::generate_content::types::*;
pub use crate::gemini::generate_content::{
    GenerateContentPath, GenerateContentRequest, GenerateContentRequestBody,
    GenerateContentResponse,
};
pub use crate::gemini::list_models::{ListModelsQuery, ListModelsRequest, ListModelsResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub name: String,
    pub base_model_id: String,
    pub version: String,
    pub display_name: String,
    pub description: String,
    pub input_token_limit: u32,
    pub output_token_limit: u32,
    pub supported_generation_methods: Vec<String>,
}
