//! Error types for the Gitlink core library.

use thiserror::Error;

use crate::installation::ValidationErrors;

/// Core error type for the installation flow.
#[derive(Error, Debug)]
pub enum GitlinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid installation form: {0}")]
    Validation(ValidationErrors),

    /// The OAuth provider refused the authorization or the token exchange.
    #[error("{0}")]
    Authorization(String),

    /// Non-2xx response from the GitLab REST API.
    #[error("GitLab API error (HTTP {status})")]
    Api {
        status: u16,
        body: Option<serde_json::Value>,
    },

    #[error("Unexpected GitLab response: {0}")]
    InvalidResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid external id: {0}")]
    InvalidExternalId(String),
}

impl GitlinkError {
    /// Returns the `message` field of an API error body, if there is one.
    ///
    /// GitLab sometimes returns a structured message (field -> errors); those
    /// are rendered as compact JSON.
    pub fn api_message(&self) -> Option<String> {
        match self {
            GitlinkError::Api {
                body: Some(body), ..
            } => match body.get("message")? {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
            _ => None,
        }
    }
}

/// Result type alias for Gitlink operations.
pub type Result<T> = std::result::Result<T, GitlinkError>;
