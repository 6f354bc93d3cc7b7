use serde::{Deserialize, Serialize};

pub use crate::openai::create_chat_completions::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody, CreateChatCompletionResponse,
    CreateChatCompletionStreamResponse, StopConfiguration,
};
pub use crate::openai::list_models::ListModelsResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelObjectType {
    #[serde(rename = "model")]
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Model {
    pub id: String,
    pub object: ModelObjectType,
    pub created: i64,
    pub owned_by: String,
}
