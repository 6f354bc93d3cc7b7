pub mod response;
pub mod stream;

pub use response::transform_response;
pub use stream::GeminiToOpenAIChatCompletionStreamState;
