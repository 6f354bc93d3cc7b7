use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Streaming strategy for a single dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Forward upstream bytes to the client as they arrive.
    Real,
    /// Buffer the whole upstream body and emit it as a single frame.
    Fake,
}

impl Default for StreamingMode {
    fn default() -> Self {
        StreamingMode::Real
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorEventType {
    Request,
    CancelRequest,
    SetLogLevel,
}

impl Default for DescriptorEventType {
    fn default() -> Self {
        DescriptorEventType::Request
    }
}

/// Frame sent from the bridge down to the in-page client agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub request_id: String,
    #[serde(default)]
    pub event_type: DescriptorEventType,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_b64: Option<String>,
    #[serde(default)]
    pub is_generative: bool,
    #[serde(default)]
    pub streaming_mode: StreamingMode,
    /// Only set when event_type is set_log_level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl RequestDescriptor {
    pub fn cancel(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            event_type: DescriptorEventType::CancelRequest,
            method: String::new(),
            path: String::new(),
            url: None,
            query_params: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            body_b64: None,
            is_generative: false,
            streaming_mode: StreamingMode::Real,
            log_level: None,
        }
    }

    pub fn set_log_level(level: impl Into<String>) -> Self {
        Self {
            request_id: String::new(),
            event_type: DescriptorEventType::SetLogLevel,
            method: String::new(),
            path: String::new(),
            url: None,
            query_params: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            body_b64: None,
            is_generative: false,
            streaming_mode: StreamingMode::Real,
            log_level: Some(level.into()),
        }
    }
}

/// Frame sent up from the in-page client agent through the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamEvent {
    Handshake,
    ResponseHeaders {
        request_id: String,
        status: u16,
        headers: HashMap<String, String>,
    },
    Chunk {
        request_id: String,
        data: String,
    },
    StreamClose {
        request_id: String,
    },
    Error {
        request_id: String,
        status: u16,
        message: String,
    },
}

impl UpstreamEvent {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            UpstreamEvent::Handshake => None,
            UpstreamEvent::ResponseHeaders { request_id, .. }
            | UpstreamEvent::Chunk { request_id, .. }
            | UpstreamEvent::StreamClose { request_id }
            | UpstreamEvent::Error { request_id, .. } => Some(request_id.as_str()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::StreamClose { .. } | UpstreamEvent::Error { .. })
    }
}
