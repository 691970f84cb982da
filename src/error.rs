use thiserror::Error;

/// Main error type for the gateway.
///
/// The variants follow the failure classes the request handlers care about:
/// configuration problems are fatal at startup, upstream-transient failures
/// are retried and then surfaced as empty responses, semantic rejections
/// (blackout, no match) are recorded and never retried, and malformed
/// upstream data only degrades the option that needed it.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("media {0} is blacked out")]
    Blackout(String),

    #[error("no matching broadcast: {0}")]
    NoMatch(String),

    #[error("malformed upstream data: {0}")]
    Malformed(String),

    #[error("encoder process error: {0}")]
    Encoder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Whether the failure is a permanent verdict from upstream rather than
    /// something a retry could fix.
    pub fn is_semantic(&self) -> bool {
        matches!(self, GatewayError::Blackout(_) | GatewayError::NoMatch(_))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::Blackout("123456".to_string());
        assert_eq!(err.to_string(), "media 123456 is blacked out");
        assert!(err.is_semantic());

        let err = GatewayError::Upstream("timeout".to_string());
        assert!(!err.is_semantic());
    }
}
