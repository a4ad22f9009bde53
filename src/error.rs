use crate::pipeline::upserter::RunStats;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Archive could not be opened: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream returned status {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to {what} after {attempts} attempt(s): {source}")]
    Fetch {
        what: String,
        attempts: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Error budget exceeded: {errors} recovered failures (max {max})")]
    ErrorBudgetExceeded {
        errors: usize,
        max: usize,
        stats: RunStats,
    },

    #[error("Store error: {message}")]
    Store { message: String },
}

impl SyncError {
    /// Whether another attempt of the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            SyncError::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            SyncError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        SyncError::Store { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        let err = SyncError::UpstreamStatus { status: 503, url: "https://example.test".to_string() };
        assert!(err.is_transient());
        let err = SyncError::UpstreamStatus { status: 429, url: "https://example.test".to_string() };
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_errors_are_fatal() {
        let err = SyncError::UpstreamStatus { status: 404, url: "https://example.test".to_string() };
        assert!(!err.is_transient());
        assert!(!SyncError::store("constraint failed").is_transient());
    }

    #[test]
    fn test_timeouts_are_transient() {
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_transient());
    }
}
