//! Error types for the admin engine
//!
//! Only configuration and store failures surface as errors. Malformed request
//! input is dropped by the query layer and callback failures are contained by
//! the rendering dispatcher.

use thiserror::Error;

/// Errors that can occur while registering entities or executing queries
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdminError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unknown_entity(msg: impl Into<String>) -> Self {
        Self::UnknownEntity(msg.into())
    }

    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Whether this error was raised while building configuration, as opposed
    /// to talking to the store
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::UnknownEntity(_) | Self::InvalidIdentifier(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;
