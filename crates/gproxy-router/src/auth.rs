use axum::http::HeaderMap;
use gproxy_common::{ErrorWireFormat, ProxyError};
use gproxy_core::AppState;

/// Extracts the presented API key from either header form the spec accepts
/// and checks it against the configured list. Framework-specific glue around
/// the framework-agnostic [`gproxy_core::check_api_key`].
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    wire: ErrorWireFormat,
) -> Result<(), (u16, bytes::Bytes)> {
    let presented = bearer_token(headers).or_else(|| goog_api_key(headers));
    let configured = &state.global.load().api_keys;
    gproxy_core::check_api_key(configured, presented.as_deref())
        .map_err(|err: ProxyError| (err.status().as_u16(), err.body_json(wire)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn goog_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-goog-api-key")?
        .to_str()
        .ok()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-abc"),
        );
        assert_eq!(bearer_token(&headers), Some("sk-abc".to_string()));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn goog_api_key_reads_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static("sk-xyz"));
        assert_eq!(goog_api_key(&headers), Some("sk-xyz".to_string()));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn neither_header_present_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(goog_api_key(&headers), None);
    }
}
