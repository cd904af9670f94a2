use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("OPML error: {0}")]
    Opml(#[from] opml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Completion service returned HTTP {status}: {body}")]
    CompletionStatus { status: u16, body: String },

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a pipeline step that hit this error is worth another attempt.
    ///
    /// Transport failures, timeouts, any non-2xx fetch response, and
    /// 5xx/429 answers from the completion service are transient. Bad input,
    /// unparseable documents and missing configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.is_body()
                    || e
                        .status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(true)
            }
            AppError::HttpStatus { .. } => true,
            AppError::CompletionStatus { status, .. } => *status >= 500 || *status == 429,
            AppError::Timeout(_) => true,
            AppError::Database(_) | AppError::Sqlite(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_status_errors_are_retryable() {
        let err = AppError::HttpStatus {
            status: 404,
            url: "https://example.com".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn completion_errors_retry_only_on_server_side_status() {
        let rate_limited = AppError::CompletionStatus {
            status: 429,
            body: "slow down".into(),
        };
        let unauthorized = AppError::CompletionStatus {
            status: 401,
            body: "bad key".into(),
        };
        assert!(rate_limited.is_retryable());
        assert!(!unauthorized.is_retryable());
        assert!(!AppError::Completion("no API key".into()).is_retryable());
    }

    #[test]
    fn input_errors_are_fatal() {
        assert!(!AppError::Extraction("empty".into()).is_retryable());
        assert!(!AppError::InvalidInput("missing url".into()).is_retryable());
        assert!(!AppError::NotFound("item 3".into()).is_retryable());
    }
}
