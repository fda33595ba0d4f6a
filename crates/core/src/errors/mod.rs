//! Error types and Result alias for the market-data subsystem

use thiserror::Error;

/// Main error type shared by every coinfeed crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed URL or parameters. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connectivity problem or timeout
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Payload shape mismatch. Never served from cache.
    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether this error may be recovered by serving a cached response.
    ///
    /// Rate limiting counts as a transport failure for fallback purposes.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::RateLimited { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Error::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            Error::Decoding(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decoding(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transport() {
        assert!(Error::RateLimited { retry_after_secs: Some(30) }.is_transport());
        assert!(Error::Transport("timed out".into()).is_transport());
    }

    #[test]
    fn test_decoding_never_eligible_for_fallback() {
        assert!(!Error::Decoding("missing field `id`".into()).is_transport());
        assert!(!Error::NotFound("bitcoin".into()).is_transport());
        assert!(!Error::InvalidRequest("bad url".into()).is_transport());
    }

    #[test]
    fn test_serde_error_maps_to_decoding() {
        let err = serde_json::from_str::<Vec<u32>>("{").unwrap_err();
        assert!(matches!(Error::from(err), Error::Decoding(_)));
    }
}
