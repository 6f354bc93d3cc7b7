use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gproxy_bridge::QueueHandle;
use gproxy_common::{ErrorWireFormat, ProxyError, RuntimeFlagsSnapshot, StreamingModeFlag};
use gproxy_protocol::duplex::{
    DescriptorEventType, RequestDescriptor, StreamingMode as DuplexStreamingMode, UpstreamEvent,
};
use gproxy_protocol::gemini::generate_content::request::{
    GenerateContentPath, GenerateContentRequest as GeminiGenerateContentRequest,
    GenerateContentRequestBody,
};
use gproxy_protocol::gemini::generate_content::types::{
    GoogleSearch, ThinkingConfig, Tool as GeminiTool, UrlContext,
};
use gproxy_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody,
};
use gproxy_protocol::sse::{SseParser, format_sse_data};
use gproxy_transform::generate_content::{
    from_gemini, sanitize_for_model_family, sanitize_gemini_inbound, to_gemini,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;

pub enum ProxyBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct ProxyResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: ProxyBody,
}

impl ProxyResponse {
    fn buffered(status: u16, content_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body: ProxyBody::Bytes(Bytes::from(bytes)),
        }
    }

    fn error(err: &ProxyError, wire: ErrorWireFormat) -> Self {
        Self {
            status: err.status().as_u16(),
            content_type: "application/json",
            body: ProxyBody::Bytes(err.body_json(wire)),
        }
    }
}

/// Single orchestrator for both wire formats. All concurrency above the
/// bridge itself is coordinated here: retries, identity rotation, and the
/// translation between Gemini's wire shape and whichever format the client
/// spoke.
pub struct RequestHandler {
    state: Arc<AppState>,
    http_client: wreq::Client,
}

impl RequestHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            http_client: wreq::Client::new(),
        }
    }

    pub async fn serve_openai_chat(&self, raw_body: &[u8]) -> ProxyResponse {
        let body: CreateChatCompletionRequestBody = match serde_json::from_slice(raw_body) {
            Ok(body) => body,
            Err(err) => {
                return ProxyResponse::error(
                    &ProxyError::BadRequest(err.to_string()),
                    ErrorWireFormat::OpenAi,
                );
            }
        };
        let wants_stream = body.stream.unwrap_or(false);
        let model = body.model.clone();

        let mut gemini_request =
            to_gemini::transform_request(CreateChatCompletionRequest { body }, &self.http_client)
                .await;
        sanitize_for_model_family(&mut gemini_request);
        self.apply_force_flags(&mut gemini_request);

        match self.dispatch_with_retry(gemini_request, &model, wants_stream).await {
            Ok((_status, handle)) => self.render_openai(handle, wants_stream).await,
            Err(err) => ProxyResponse::error(&err, ErrorWireFormat::OpenAi),
        }
    }

    pub async fn serve_gemini_native(
        &self,
        model: &str,
        raw_body: &[u8],
        wants_stream: bool,
    ) -> ProxyResponse {
        let body: GenerateContentRequestBody = match serde_json::from_slice(raw_body) {
            Ok(body) => body,
            Err(err) => {
                return ProxyResponse::error(
                    &ProxyError::BadRequest(err.to_string()),
                    ErrorWireFormat::Gemini,
                );
            }
        };
        let mut request = GeminiGenerateContentRequest {
            path: GenerateContentPath {
                model: model.to_string(),
            },
            body,
        };
        sanitize_gemini_inbound(&mut request);

        match self.dispatch_with_retry(request, model, wants_stream).await {
            Ok((status, handle)) => self.render_passthrough(status, handle).await,
            Err(err) => ProxyResponse::error(&err, ErrorWireFormat::Gemini),
        }
    }

    pub async fn switch_to_next(&self) -> Result<(), ProxyError> {
        self.perform_switch(None).await
    }

    pub async fn switch_to(&self, index: u32) -> Result<(), ProxyError> {
        self.perform_switch(Some(index)).await
    }

    fn apply_force_flags(&self, request: &mut GeminiGenerateContentRequest) {
        let flags: RuntimeFlagsSnapshot = self.state.flags.snapshot();

        if flags.force_thinking {
            let config = request
                .body
                .generation_config
                .get_or_insert_with(Default::default);
            let thinking = config.thinking_config.get_or_insert(ThinkingConfig {
                include_thoughts: true,
                thinking_budget: 0,
                thinking_level: None,
            });
            thinking.include_thoughts = true;
        }

        if flags.force_web_search || flags.force_url_context {
            let tools = request.body.tools.get_or_insert_with(Vec::new);
            if flags.force_web_search && !tools.iter().any(|tool| tool.google_search.is_some()) {
                tools.push(GeminiTool {
                    function_declarations: None,
                    google_search_retrieval: None,
                    code_execution: None,
                    google_search: Some(GoogleSearch {
                        time_range_filter: None,
                    }),
                    computer_use: None,
                    url_context: None,
                    file_search: None,
                    google_maps: None,
                });
            }
            if flags.force_url_context && !tools.iter().any(|tool| tool.url_context.is_some()) {
                tools.push(GeminiTool {
                    function_declarations: None,
                    google_search_retrieval: None,
                    code_execution: None,
                    google_search: None,
                    computer_use: None,
                    url_context: Some(UrlContext {}),
                    file_search: None,
                    google_maps: None,
                });
            }
        }
    }

    /// Steps 2-5, 8 of the dispatch loop: ensure the browser is up, send the
    /// descriptor, await the first frame, and retry/switch on a failure that
    /// occurs before any bytes reach the client. Once `response_headers`
    /// arrives the caller owns the queue for the remainder of the stream;
    /// failures past that point are not retried since a response may already
    /// be in flight to the HTTP client.
    async fn dispatch_with_retry(
        &self,
        gemini_request: GeminiGenerateContentRequest,
        model: &str,
        wants_stream: bool,
    ) -> Result<(u16, QueueHandle), ProxyError> {
        let config = self.state.global.load_full();
        let body_json = serde_json::to_string(&gemini_request.body)
            .map_err(|err| ProxyError::FormatError(err.to_string()))?;

        let mut attempt = 0u32;
        loop {
            self.ensure_browser_ready().await?;

            let request_id = Uuid::new_v4().to_string();
            let streaming_mode = match self.state.flags.streaming_mode() {
                StreamingModeFlag::Real => DuplexStreamingMode::Real,
                StreamingModeFlag::Fake => DuplexStreamingMode::Fake,
            };
            let descriptor = build_descriptor(
                request_id.clone(),
                model,
                &body_json,
                wants_stream,
                streaming_mode,
            );

            let outcome = self.dispatch_once(descriptor).await;
            match outcome {
                Ok(DispatchOutcome::Headers(status, handle)) => {
                    if config.immediate_switch_status_codes.contains(&status) {
                        self.state.bridge.cancel(&request_id).await;
                        let err = ProxyError::UpstreamStatus {
                            status,
                            message: "immediate-switch status code".to_string(),
                        };
                        self.on_attempt_failed(&err).await;
                        if attempt >= config.max_retries {
                            return Err(err);
                        }
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                        continue;
                    }
                    return Ok((status, handle));
                }
                Err(err) => {
                    self.on_attempt_failed(&err).await;
                    if attempt >= config.max_retries || !err.is_retryable() {
                        return Err(err);
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn dispatch_once(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<DispatchOutcome, ProxyError> {
        let mut handle = self.state.bridge.dispatch(descriptor).await?;
        match self.state.bridge.next_event(&mut handle).await? {
            Some(UpstreamEvent::ResponseHeaders { status, .. }) => {
                Ok(DispatchOutcome::Headers(status, handle))
            }
            Some(UpstreamEvent::Error { status, message, .. }) => {
                Err(ProxyError::UpstreamStatus { status, message })
            }
            Some(_) => Err(ProxyError::FormatError(
                "upstream sent a body frame before response headers".to_string(),
            )),
            None => Err(ProxyError::Disconnected),
        }
    }

    async fn on_attempt_failed(&self, err: &ProxyError) {
        let failures = self.state.cursor.record_failure();
        let config = self.state.global.load();
        let immediate_switch = matches!(
            err,
            ProxyError::UpstreamStatus { status, .. }
                if config.immediate_switch_status_codes.contains(status)
        );
        if err.forces_switch()
            || immediate_switch
            || (config.failure_threshold > 0 && failures >= config.failure_threshold)
        {
            let _ = self.perform_switch(None).await;
        }
    }

    async fn ensure_browser_ready(&self) -> Result<(), ProxyError> {
        if self.state.is_system_busy() {
            return Err(ProxyError::BrowserRestarting);
        }
        if self.state.bridge.status().await == gproxy_bridge::BrowserStatus::Ready {
            return Ok(());
        }
        if self.state.bridge.status().await == gproxy_bridge::BrowserStatus::Down {
            let registry = self.state.identities.load_full();
            let index = self
                .state
                .cursor
                .activate_first(&registry)
                .await
                .ok_or(ProxyError::NoIdentityAvailable)?;
            self.state
                .bridge
                .start(index)
                .await
                .map_err(|err| ProxyError::BrowserUnavailable(err.to_string()))?;
        }
        self.await_ready().await
    }

    /// The Client Agent dials back over the duplex socket asynchronously
    /// after Chrome launches; poll rather than block the launch call on it.
    async fn await_ready(&self) -> Result<(), ProxyError> {
        const POLL_INTERVAL: Duration = Duration::from_millis(200);
        const READY_TIMEOUT: Duration = Duration::from_secs(30);
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            match self.state.bridge.status().await {
                gproxy_bridge::BrowserStatus::Ready => return Ok(()),
                gproxy_bridge::BrowserStatus::Down => {
                    return Err(ProxyError::BrowserUnavailable(
                        "browser process exited before becoming ready".to_string(),
                    ));
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProxyError::BrowserUnavailable(
                    "timed out waiting for client agent to connect".to_string(),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Runs the rotation state machine (§4.5) to completion: `Active -> Switching`,
    /// restart the browser with the next identity, retrying candidates up to
    /// one full cycle before giving up and falling back to `Idle`.
    async fn perform_switch(&self, explicit: Option<u32>) -> Result<(), ProxyError> {
        self.state.set_system_busy(true);
        let result = self.perform_switch_inner(explicit).await;
        self.state.set_system_busy(false);
        result
    }

    async fn perform_switch_inner(&self, explicit: Option<u32>) -> Result<(), ProxyError> {
        let registry = self.state.identities.load_full();
        let Some(mut target) = self.state.cursor.begin_switch(&registry, explicit).await else {
            return Err(ProxyError::NoIdentityAvailable);
        };

        loop {
            for request_id in self.state.bridge.queue().drain() {
                self.state.bridge.queue().deliver(UpstreamEvent::Error {
                    request_id,
                    status: 503,
                    message: "identity rotation in progress".to_string(),
                });
            }

            match self.state.bridge.restart(target).await {
                Ok(()) => {
                    self.state.cursor.complete_switch().await;
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(index = target, %err, "failed to launch identity, trying next");
                    match self.state.cursor.retry_switch(&registry).await {
                        Some(next) => target = next,
                        None => return Err(ProxyError::BrowserUnavailable(err.to_string())),
                    }
                }
            }
        }
    }

    async fn render_openai(&self, mut handle: QueueHandle, wants_stream: bool) -> ProxyResponse {
        if wants_stream {
            self.render_openai_stream(handle)
        } else {
            let mut parser = SseParser::new();
            let mut last_response: Option<
                gproxy_protocol::gemini::generate_content::response::GenerateContentResponse,
            > = None;
            loop {
                match self.state.bridge.next_event(&mut handle).await {
                    Ok(Some(UpstreamEvent::Chunk { data, .. })) => {
                        for event in parser.push_str(&data) {
                            if let Ok(response) =
                                serde_json::from_str(&event.data)
                            {
                                last_response = Some(response);
                            }
                        }
                    }
                    Ok(Some(UpstreamEvent::StreamClose { .. })) | Ok(None) => break,
                    Ok(Some(UpstreamEvent::Error { status, message, .. })) => {
                        return ProxyResponse::error(
                            &ProxyError::UpstreamStatus { status, message },
                            ErrorWireFormat::OpenAi,
                        );
                    }
                    Ok(Some(UpstreamEvent::ResponseHeaders { .. })) => continue,
                    Ok(Some(UpstreamEvent::Handshake)) => continue,
                    Err(err) => {
                        return ProxyResponse::error(&err, ErrorWireFormat::OpenAi);
                    }
                }
            }
            for event in parser.finish() {
                if let Ok(response) = serde_json::from_str(&event.data) {
                    last_response = Some(response);
                }
            }
            self.state.cursor.record_success();
            self.maybe_trigger_usage_switch();

            match last_response {
                Some(gemini_response) => {
                    let response = from_gemini::transform_response(gemini_response);
                    match serde_json::to_vec(&response) {
                        Ok(bytes) => ProxyResponse::buffered(200, "application/json", bytes),
                        Err(err) => ProxyResponse::error(
                            &ProxyError::FormatError(err.to_string()),
                            ErrorWireFormat::OpenAi,
                        ),
                    }
                }
                None => ProxyResponse::error(
                    &ProxyError::FormatError("upstream closed without a response body".to_string()),
                    ErrorWireFormat::OpenAi,
                ),
            }
        }
    }

    fn render_openai_stream(&self, mut handle: QueueHandle) -> ProxyResponse {
        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let bridge = self.state.bridge.clone();
        let cursor = self.state.cursor.clone();

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut translator = from_gemini::GeminiToOpenAIChatCompletionStreamState::new();
            let mut failed = false;

            loop {
                match bridge.next_event(&mut handle).await {
                    Ok(Some(UpstreamEvent::Chunk { data, .. })) => {
                        for event in parser.push_str(&data) {
                            emit_translated_chunks(&event.data, &mut translator, &tx).await;
                        }
                    }
                    Ok(Some(UpstreamEvent::StreamClose { .. })) | Ok(None) => break,
                    Ok(Some(UpstreamEvent::Error { .. })) => {
                        failed = true;
                        break;
                    }
                    Ok(Some(UpstreamEvent::ResponseHeaders { .. })) => continue,
                    Ok(Some(UpstreamEvent::Handshake)) => continue,
                    Err(_) => {
                        failed = true;
                        break;
                    }
                }
            }
            for event in parser.finish() {
                emit_translated_chunks(&event.data, &mut translator, &tx).await;
            }
            if failed {
                cursor.record_failure();
            } else {
                cursor.record_success();
            }
            let _ = tx
                .send(Bytes::from_static(gproxy_protocol::sse::SSE_DONE.as_bytes()))
                .await;
        });

        self.maybe_trigger_usage_switch();
        ProxyResponse {
            status: 200,
            content_type: "text/event-stream",
            body: ProxyBody::Stream(rx),
        }
    }

    async fn render_passthrough(&self, status: u16, mut handle: QueueHandle) -> ProxyResponse {
        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let bridge = self.state.bridge.clone();
        let cursor = self.state.cursor.clone();

        tokio::spawn(async move {
            let mut failed = false;
            loop {
                match bridge.next_event(&mut handle).await {
                    Ok(Some(UpstreamEvent::Chunk { data, .. })) => {
                        if tx.send(Bytes::from(data.into_bytes())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(UpstreamEvent::StreamClose { .. })) | Ok(None) => break,
                    Ok(Some(UpstreamEvent::Error { .. })) => {
                        failed = true;
                        break;
                    }
                    Ok(Some(UpstreamEvent::ResponseHeaders { .. })) => continue,
                    Ok(Some(UpstreamEvent::Handshake)) => continue,
                    Err(_) => {
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                cursor.record_failure();
            } else {
                cursor.record_success();
            }
        });

        self.maybe_trigger_usage_switch();
        ProxyResponse {
            status,
            content_type: "application/json",
            body: ProxyBody::Stream(rx),
        }
    }

    /// Step 7: a successful response may push `usageCount` over the
    /// configured threshold. The switch itself runs in the background so it
    /// never delays the response already handed to the client.
    fn maybe_trigger_usage_switch(&self) {
        let threshold = self.state.global.load().switch_on_uses;
        if threshold == 0 || self.state.cursor.usage_count() < threshold {
            return;
        }
        let state = self.state.clone();
        tokio::spawn(async move {
            let handler = RequestHandler::new(state);
            let _ = handler.perform_switch(None).await;
        });
    }
}

enum DispatchOutcome {
    Headers(u16, QueueHandle),
}

fn build_descriptor(
    request_id: String,
    model: &str,
    body_json: &str,
    wants_stream: bool,
    streaming_mode: DuplexStreamingMode,
) -> RequestDescriptor {
    let action = if wants_stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let mut query_params = HashMap::new();
    if wants_stream {
        query_params.insert("alt".to_string(), "sse".to_string());
    }

    RequestDescriptor {
        request_id,
        event_type: DescriptorEventType::Request,
        method: "POST".to_string(),
        path: format!("/v1beta/models/{model}:{action}"),
        url: None,
        query_params,
        headers: HashMap::new(),
        body: Some(body_json.to_string()),
        body_b64: None,
        is_generative: true,
        streaming_mode,
        log_level: None,
    }
}

async fn emit_translated_chunks(
    event_data: &str,
    translator: &mut from_gemini::GeminiToOpenAIChatCompletionStreamState,
    tx: &mpsc::Sender<Bytes>,
) {
    let Ok(response) = serde_json::from_str(event_data) else {
        return;
    };
    for chunk in translator.transform_response(response) {
        let Ok(json) = serde_json::to_string(&chunk) else {
            continue;
        };
        if tx.send(Bytes::from(format_sse_data(&json))).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_descriptor_non_streaming_has_no_alt_param() {
        let descriptor = build_descriptor(
            "req-1".to_string(),
            "gemini-2.5-pro",
            "{}",
            false,
            DuplexStreamingMode::Real,
        );
        assert_eq!(descriptor.path, "/v1beta/models/gemini-2.5-pro:generateContent");
        assert!(!descriptor.query_params.contains_key("alt"));
        assert_eq!(descriptor.method, "POST");
        assert!(descriptor.is_generative);
    }

    #[test]
    fn build_descriptor_streaming_requests_sse() {
        let descriptor = build_descriptor(
            "req-2".to_string(),
            "gemini-2.5-flash",
            "{\"contents\":[]}",
            true,
            DuplexStreamingMode::Fake,
        );
        assert_eq!(
            descriptor.path,
            "/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
        assert_eq!(descriptor.query_params.get("alt"), Some(&"sse".to_string()));
        assert_eq!(descriptor.body, Some("{\"contents\":[]}".to_string()));
    }

    #[tokio::test]
    async fn emit_translated_chunks_ignores_malformed_json() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);
        let mut translator = from_gemini::GeminiToOpenAIChatCompletionStreamState::new();
        emit_translated_chunks("not json", &mut translator, &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
