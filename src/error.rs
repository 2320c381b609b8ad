use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the financial core
#[derive(Error, Debug)]
pub enum FinError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    // Ledger errors
    #[error("Insufficient balance for {user_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        user_id: String,
        requested: Decimal,
        available: Decimal,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // External collaborator errors
    #[error("Order execution failed: {0}")]
    Execution(String),

    #[error("Referral lookup failed: {0}")]
    Referral(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl FinError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        FinError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        FinError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Errors caused by the caller's request rather than by the system.
    ///
    /// The administrative boundary maps these to client errors and
    /// everything else to server errors.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FinError::Validation(_)
                | FinError::RiskLimitExceeded(_)
                | FinError::NotFound { .. }
                | FinError::InsufficientBalance { .. }
                | FinError::InvalidStateTransition { .. }
        )
    }
}

/// Result type alias for FinError
pub type Result<T> = std::result::Result<T, FinError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_error_classification() {
        assert!(FinError::Validation("bad".into()).is_client_error());
        assert!(FinError::not_found("order", "o-1").is_client_error());
        assert!(FinError::InsufficientBalance {
            user_id: "u1".into(),
            requested: dec!(10),
            available: dec!(5),
        }
        .is_client_error());

        assert!(!FinError::Execution("venue down".into()).is_client_error());
        assert!(!FinError::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = FinError::transition("completed", "retrying");
        assert_eq!(
            err.to_string(),
            "Invalid state transition: from completed to retrying"
        );
    }
}
