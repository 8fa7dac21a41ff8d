use tracing::{error, warn};

/// Error taxonomy shared by every connector handler
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Invalid order {0}")]
    InvalidOrder(String),
    #[error("Invalid next token: {0}")]
    InvalidToken(String),
    #[error("Snowflake operation failed: {0}")]
    SnowflakeError(String),
    #[error("Secrets Manager operation failed: {0}")]
    SecretsError(String),
    #[error("S3 operation failed: {0}")]
    S3Error(String),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectorError {
    /// True for errors raised before any external call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidOrder(_) | Self::InvalidToken(_)
        )
    }

    /// True for failures reported by Snowflake, Secrets Manager or S3.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::SnowflakeError(_) | Self::SecretsError(_) | Self::S3Error(_)
        )
    }

    /// Log a failure on its way out of a handler.
    pub fn logged(self) -> Self {
        if self.is_validation() {
            warn!("Rejected request: {}", self);
        } else if self.is_external() {
            error!("Upstream service failure: {}", self);
        } else {
            error!("Request failed: {}", self);
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectorError::InvalidOrder("SIDEWAYS".to_string());
        assert_eq!(err.to_string(), "Invalid order SIDEWAYS");

        let err = ConnectorError::S3Error("denied".to_string());
        assert!(err.to_string().contains("S3 operation failed"));
    }

    #[test]
    fn test_error_classification() {
        assert!(ConnectorError::InvalidToken("{}".to_string()).is_validation());
        assert!(ConnectorError::Validation("x".to_string()).is_validation());
        assert!(!ConnectorError::SnowflakeError("x".to_string()).is_validation());

        assert!(ConnectorError::SnowflakeError("x".to_string()).is_external());
        assert!(!ConnectorError::DataIntegrity("x".to_string()).is_external());
    }
}
