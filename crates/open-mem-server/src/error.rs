// crates/open-mem-server/src/error.rs
// Standardized error types for open-mem

use thiserror::Error;

/// Main error type for the open-mem library
#[derive(Error, Debug)]
pub enum MemError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("corrupt row skipped: {0}")]
    DataCorruption(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using MemError
pub type Result<T> = std::result::Result<T, MemError>;

impl MemError {
    /// Whether a retry with backoff could plausibly succeed.
    ///
    /// Only [`MemError::Transient`] qualifies; everything else surfaces
    /// immediately (caller fault, corrupt data, hard provider rejection).
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemError::Transient(_))
    }

    /// Structured error code for the tool-call response envelope.
    pub fn tool_code(&self) -> &'static str {
        match self {
            MemError::Validation(_) => "VALIDATION_ERROR",
            MemError::NotFound(_) => "NOT_FOUND",
            MemError::Conflict(_) => "CONFLICT",
            _ => "INTERNAL",
        }
    }
}

impl From<String> for MemError {
    fn from(s: String) -> Self {
        MemError::Other(s)
    }
}

impl From<tokio::task::JoinError> for MemError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            MemError::Cancelled
        } else {
            MemError::Other(err.to_string())
        }
    }
}

impl From<MemError> for String {
    fn from(err: MemError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(MemError::Transient("503".into()).is_retryable());
        assert!(!MemError::Validation("bad".into()).is_retryable());
        assert!(!MemError::NotFound("x".into()).is_retryable());
        assert!(!MemError::Cancelled.is_retryable());
    }

    #[test]
    fn tool_codes_map_taxonomy() {
        assert_eq!(MemError::Validation("v".into()).tool_code(), "VALIDATION_ERROR");
        assert_eq!(MemError::NotFound("n".into()).tool_code(), "NOT_FOUND");
        assert_eq!(MemError::Conflict("c".into()).tool_code(), "CONFLICT");
        assert_eq!(MemError::Other("o".into()).tool_code(), "INTERNAL");
        assert_eq!(MemError::Cancelled.tool_code(), "INTERNAL");
    }
}
