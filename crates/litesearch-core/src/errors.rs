use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid document: {0}")]
    Validation(String),
    #[error("query syntax error at {position} near `{fragment}`: {message}")]
    QuerySyntax {
        fragment: String,
        position: usize,
        message: String,
    },
    // accounting no longer matches document content
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn query_syntax(fragment: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            fragment: fragment.into(),
            position,
            message: message.into(),
        }
    }

    /// Caller-facing conditions; everything else is an internal failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::AlreadyExists(_) | Self::Validation(_) | Self::QuerySyntax { .. }
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
