use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use gproxy_common::ErrorWireFormat;
use gproxy_core::{AppState, ProxyBody, ProxyResponse, RequestHandler};
use gproxy_protocol::gemini::list_models::response::ListModelsResponse as GeminiListModelsResponse;
use gproxy_protocol::gemini::types::Model as GeminiModel;
use gproxy_protocol::openai::list_models::response::{ListModelsResponse, ListObjectType};
use gproxy_protocol::openai::types::{Model as OpenAiModel, ModelObjectType};
use tokio_stream::wrappers::ReceiverStream;

use crate::auth;

/// The handful of Gemini models this deployment advertises. A real AI Studio
/// account can see more, but the proxy only needs to list what it can
/// actually dispatch through `generateContent`.
const SUPPORTED_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

pub async fn openai_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err((status, payload)) = auth::authenticate(&state, &headers, ErrorWireFormat::OpenAi) {
        return json_error_response(status, payload);
    }
    let handler = RequestHandler::new(state);
    to_axum_response(handler.serve_openai_chat(&body).await)
}

pub async fn openai_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err((status, payload)) = auth::authenticate(&state, &headers, ErrorWireFormat::OpenAi) {
        return json_error_response(status, payload);
    }
    let response = ListModelsResponse {
        object: ListObjectType::List,
        data: SUPPORTED_MODELS
            .iter()
            .map(|id| OpenAiModel {
                id: id.to_string(),
                object: ModelObjectType::Model,
                created: 0,
                owned_by: "google".to_string(),
            })
            .collect(),
    };
    axum::Json(response).into_response()
}

pub async fn gemini_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err((status, payload)) = auth::authenticate(&state, &headers, ErrorWireFormat::Gemini) {
        return json_error_response(status, payload);
    }
    let response = GeminiListModelsResponse {
        models: SUPPORTED_MODELS
            .iter()
            .map(|id| GeminiModel {
                name: format!("models/{id}"),
                base_model_id: id.to_string(),
                version: "001".to_string(),
                display_name: id.to_string(),
                description: String::new(),
                input_token_limit: 1_048_576,
                output_token_limit: 65_536,
                supported_generation_methods: vec!["generateContent".to_string()],
            })
            .collect(),
        next_page_token: None,
    };
    axum::Json(response).into_response()
}

/// Handles both `:generateContent` and `:streamGenerateContent`, split out of
/// the single `{model}:{action}` path segment Gemini's wire format uses.
pub async fn gemini_generate_content(
    State(state): State<Arc<AppState>>,
    Path((_version, model_action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err((status, payload)) = auth::authenticate(&state, &headers, ErrorWireFormat::Gemini) {
        return json_error_response(status, payload);
    }
    let Some((model, action)) = model_action.split_once(':') else {
        return (StatusCode::NOT_FOUND, "unknown gemini action").into_response();
    };
    let wants_stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => return (StatusCode::NOT_FOUND, "unknown gemini action").into_response(),
    };
    let handler = RequestHandler::new(state);
    to_axum_response(handler.serve_gemini_native(model, &body, wants_stream).await)
}

fn json_error_response(status: u16, payload: Bytes) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED));
    if let Some(headers) = builder.headers_mut() {
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    }
    builder
        .body(Body::from(payload))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn to_axum_response(resp: ProxyResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    if let Some(headers) = builder.headers_mut() {
        headers.insert(header::CONTENT_TYPE, resp.content_type.parse().unwrap());
        if resp.content_type == "text/event-stream" {
            headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
            headers.insert("x-accel-buffering", "no".parse().unwrap());
        }
    }
    let body = match resp.body {
        ProxyBody::Bytes(bytes) => Body::from(bytes),
        ProxyBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Body::from_stream(stream)
        }
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_core::ProxyBody as CoreProxyBody;
    use tokio::sync::mpsc;

    #[test]
    fn supported_models_list_is_non_empty_and_stable() {
        assert_eq!(
            SUPPORTED_MODELS,
            ["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.5-flash-lite"]
        );
    }

    #[tokio::test]
    async fn to_axum_response_sets_sse_headers_only_for_event_stream() {
        let (_tx, rx) = mpsc::channel::<Bytes>(1);
        let streamed = ProxyResponse {
            status: 200,
            content_type: "text/event-stream",
            body: CoreProxyBody::Stream(rx),
        };
        let response = to_axum_response(streamed);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );

        let buffered = ProxyResponse {
            status: 404,
            content_type: "application/json",
            body: CoreProxyBody::Bytes(Bytes::from_static(b"{}")),
        };
        let response = to_axum_response(buffered);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::CACHE_CONTROL).is_none());
    }

    #[test]
    fn json_error_response_falls_back_on_unknown_status() {
        let response = json_error_response(429, Bytes::from_static(b"{\"error\":\"rate limited\"}"));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
