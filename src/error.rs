use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported format: {0}. Supported formats: txt, json, vtt, srt")]
    UnsupportedFormat(String),

    #[error("Failed to parse transcript: {0}")]
    Parse(String),

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{provider} call failed: {message}")]
    ProviderCallFailed { provider: String, message: String },

    #[error("Invalid approval token")]
    InvalidToken,

    #[error("Approval token has expired")]
    TokenExpired,

    #[error("This approval request has already been processed")]
    AlreadyResolved,

    #[error("A newer approval request exists for this test script")]
    Superseded,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration invalid: {}", .0.join("; "))]
    ConfigurationInvalid(Vec<String>),

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ProviderCallFailed {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }
}
