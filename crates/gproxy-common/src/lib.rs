use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > environment > built-in default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub api_keys: Vec<String>,
    pub auth_dir: String,
    pub browser_binary: Option<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub switch_on_uses: u32,
    pub failure_threshold: u32,
    pub immediate_switch_status_codes: Vec<u16>,
}

/// Optional layer used for merging global config from CLI/env sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_keys: Option<Vec<String>>,
    pub auth_dir: Option<String>,
    pub browser_binary: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub switch_on_uses: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub immediate_switch_status_codes: Option<Vec<u16>>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.api_keys.is_some() {
            self.api_keys = other.api_keys;
        }
        if other.auth_dir.is_some() {
            self.auth_dir = other.auth_dir;
        }
        if other.browser_binary.is_some() {
            self.browser_binary = other.browser_binary;
        }
        if other.max_retries.is_some() {
            self.max_retries = other.max_retries;
        }
        if other.retry_delay_ms.is_some() {
            self.retry_delay_ms = other.retry_delay_ms;
        }
        if other.switch_on_uses.is_some() {
            self.switch_on_uses = other.switch_on_uses;
        }
        if other.failure_threshold.is_some() {
            self.failure_threshold = other.failure_threshold;
        }
        if other.immediate_switch_status_codes.is_some() {
            self.immediate_switch_status_codes = other.immediate_switch_status_codes;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            api_keys: self.api_keys.unwrap_or_default(),
            auth_dir: self.auth_dir.unwrap_or_else(|| "./auth".to_string()),
            browser_binary: self.browser_binary,
            max_retries: self.max_retries.unwrap_or(3),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(2000),
            switch_on_uses: self.switch_on_uses.unwrap_or(0),
            failure_threshold: self.failure_threshold.unwrap_or(0),
            immediate_switch_status_codes: self
                .immediate_switch_status_codes
                .unwrap_or_else(|| vec![429, 503]),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            api_keys: Some(value.api_keys),
            auth_dir: Some(value.auth_dir),
            browser_binary: value.browser_binary,
            max_retries: Some(value.max_retries),
            retry_delay_ms: Some(value.retry_delay_ms),
            switch_on_uses: Some(value.switch_on_uses),
            failure_threshold: Some(value.failure_threshold),
            immediate_switch_status_codes: Some(value.immediate_switch_status_codes),
        }
    }
}

/// Process-wide toggles mutated by the admin surface and read on every request.
/// Held as independently swappable cells rather than bundled into `GlobalConfig`
/// so a flag flip never requires cloning the whole config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingModeFlag {
    Real,
    Fake,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuntimeFlagsSnapshot {
    pub streaming_mode: StreamingModeFlag,
    pub force_thinking: bool,
    pub force_web_search: bool,
    pub force_url_context: bool,
}

pub struct RuntimeFlags {
    streaming_mode: ArcSwap<StreamingModeFlag>,
    force_thinking: ArcSwap<bool>,
    force_web_search: ArcSwap<bool>,
    force_url_context: ArcSwap<bool>,
}

impl RuntimeFlags {
    pub fn new(
        streaming_mode: StreamingModeFlag,
        force_thinking: bool,
        force_web_search: bool,
        force_url_context: bool,
    ) -> Self {
        Self {
            streaming_mode: ArcSwap::from_pointee(streaming_mode),
            force_thinking: ArcSwap::from_pointee(force_thinking),
            force_web_search: ArcSwap::from_pointee(force_web_search),
            force_url_context: ArcSwap::from_pointee(force_url_context),
        }
    }

    pub fn snapshot(&self) -> RuntimeFlagsSnapshot {
        RuntimeFlagsSnapshot {
            streaming_mode: *self.streaming_mode.load_full(),
            force_thinking: *self.force_thinking.load_full(),
            force_web_search: *self.force_web_search.load_full(),
            force_url_context: *self.force_url_context.load_full(),
        }
    }

    pub fn streaming_mode(&self) -> StreamingModeFlag {
        *self.streaming_mode.load_full()
    }

    pub fn force_thinking(&self) -> bool {
        *self.force_thinking.load_full()
    }

    pub fn force_web_search(&self) -> bool {
        *self.force_web_search.load_full()
    }

    pub fn force_url_context(&self) -> bool {
        *self.force_url_context.load_full()
    }

    pub fn apply(&self, patch: RuntimeFlagsPatch) {
        if let Some(mode) = patch.streaming_mode {
            self.streaming_mode.store(Arc::new(mode));
        }
        if let Some(value) = patch.force_thinking {
            self.force_thinking.store(Arc::new(value));
        }
        if let Some(value) = patch.force_web_search {
            self.force_web_search.store(Arc::new(value));
        }
        if let Some(value) = patch.force_url_context {
            self.force_url_context.store(Arc::new(value));
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeFlagsPatch {
    pub streaming_mode: Option<StreamingModeFlag>,
    pub force_thinking: Option<bool>,
    pub force_web_search: Option<bool>,
    pub force_url_context: Option<bool>,
}

/// The single error taxonomy threaded through dispatch, the bridge and the
/// converter. `anyhow::Error` is reserved for the bootstrap boundary, where
/// failures are unrecoverable and a context chain matters more than a variant.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("auth rejected")]
    AuthRejected,
    #[error("upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },
    #[error("upstream timed out")]
    UpstreamTimeout,
    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),
    #[error("browser is restarting")]
    BrowserRestarting,
    #[error("duplex channel disconnected")]
    Disconnected,
    #[error("request canceled")]
    Canceled,
    #[error("no identity available")]
    NoIdentityAvailable,
    #[error("format error: {0}")]
    FormatError(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::AuthRejected => StatusCode::UNAUTHORIZED,
            ProxyError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BrowserUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BrowserRestarting => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Disconnected => StatusCode::BAD_GATEWAY,
            ProxyError::Canceled => StatusCode::BAD_GATEWAY,
            ProxyError::NoIdentityAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::FormatError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// True when this failure should trigger immediate identity rotation,
    /// independent of the configured immediate-switch status code set.
    pub fn forces_switch(&self) -> bool {
        matches!(self, ProxyError::BrowserUnavailable(_) | ProxyError::Disconnected)
    }

    /// True when the dispatch loop should retry after this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProxyError::BadRequest(_) | ProxyError::AuthRejected | ProxyError::Canceled
        )
    }

    pub fn body_json(&self, wire: ErrorWireFormat) -> Bytes {
        let message = self.to_string();
        let body = match wire {
            ErrorWireFormat::OpenAi => serde_json::json!({
                "error": {
                    "message": message,
                    "type": self.error_type(),
                    "code": self.status().as_u16(),
                }
            }),
            ErrorWireFormat::Gemini => serde_json::json!({
                "error": {
                    "code": self.status().as_u16(),
                    "message": message,
                    "status": self.status().canonical_reason().unwrap_or("UNKNOWN"),
                }
            }),
        };
        Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "invalid_request_error",
            ProxyError::AuthRejected => "authentication_error",
            ProxyError::UpstreamStatus { .. } => "upstream_error",
            ProxyError::UpstreamTimeout => "timeout_error",
            ProxyError::BrowserUnavailable(_) | ProxyError::BrowserRestarting => {
                "browser_unavailable_error"
            }
            ProxyError::Disconnected => "disconnected_error",
            ProxyError::Canceled => "canceled_error",
            ProxyError::NoIdentityAvailable => "no_identity_error",
            ProxyError::FormatError(_) => "format_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorWireFormat {
    OpenAi,
    Gemini,
}
