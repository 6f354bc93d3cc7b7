use gproxy_common::ProxyError;

/// Checks a presented API key against the configured comma-separated list.
/// Framework-agnostic on purpose: header extraction (Bearer token vs
/// `x-goog-api-key`) is the HTTP surface's job, not the dispatch loop's.
pub fn check_api_key(configured: &[String], presented: Option<&str>) -> Result<(), ProxyError> {
    let Some(key) = presented else {
        return Err(ProxyError::AuthRejected);
    };
    if configured.iter().any(|candidate| candidate == key) {
        Ok(())
    } else {
        Err(ProxyError::AuthRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_key_passes() {
        let configured = vec!["abc".to_string(), "def".to_string()];
        assert!(check_api_key(&configured, Some("def")).is_ok());
    }

    #[test]
    fn missing_key_is_rejected() {
        let configured = vec!["abc".to_string()];
        assert!(matches!(
            check_api_key(&configured, None),
            Err(ProxyError::AuthRejected)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let configured = vec!["abc".to_string()];
        assert!(matches!(
            check_api_key(&configured, Some("nope")),
            Err(ProxyError::AuthRejected)
        ));
    }
}
