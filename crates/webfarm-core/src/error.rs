use thiserror::Error;

/// Core error type for web farm operations.
#[derive(Error, Debug)]
pub enum FarmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Message channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Web farm node {node} did not pick a free polling interval after {attempts} attempts")]
    Negotiation { node: String, attempts: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for FarmError {
    fn from(e: serde_json::Error) -> Self {
        FarmError::Serialization(e.to_string())
    }
}

/// Result type alias using FarmError.
pub type Result<T> = std::result::Result<T, FarmError>;
