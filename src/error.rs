use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Application error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// The idempotency token is malformed; the request is rejected before any
    /// store interaction.
    #[error("invalid idempotency key: {0}")]
    InvalidKey(String),

    /// The claim store could not be reached. The coordinator's configured
    /// failure policy decides whether the request proceeds uncoordinated.
    #[error("claim store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// The wrapped operation itself failed after the claim was won.
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for store transport failures, where the fail-open/fail-closed
    /// policy applies.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    pub fn store_unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        AppError::StoreUnavailable(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_classification() {
        let err = AppError::StoreUnavailable(anyhow::anyhow!("connection refused"));
        assert!(err.is_store_unavailable());

        let err = AppError::InvalidKey("empty token".to_string());
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::InvalidKey("token exceeds 255 bytes".to_string());
        assert_eq!(
            err.to_string(),
            "invalid idempotency key: token exceeds 255 bytes"
        );
    }
}
