use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarborError {
    #[error("Unauthorized: '{caller}' may not perform {op}")]
    Unauthorized { op: String, caller: String },
    #[error("Invalid chain: '{0}' is not in the registry allow-list")]
    InvalidChain(String),
    #[error("Unknown chain: '{chain_id}' is not present on agreement {agreement}")]
    UnknownChain { agreement: String, chain_id: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Registry already initialized")]
    AlreadyInitialized,
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },
    #[error("Payload too large for {op}: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { op: String, size: usize, limit: usize },
    #[error("Agreement {agreement} is currently adopted by {adopters} adopter(s)")]
    AgreementInUse { agreement: String, adopters: usize },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl HarborError {
    /// Stable machine-readable code surfaced by the CLI envelope.
    pub fn code(&self) -> &'static str {
        match self {
            HarborError::Unauthorized { .. } => "unauthorized",
            HarborError::InvalidChain(_) => "invalid_chain",
            HarborError::UnknownChain { .. } => "unknown_chain",
            HarborError::NotFound(_) => "not_found",
            HarborError::AlreadyInitialized => "already_initialized",
            HarborError::InvalidInput { .. } => "invalid_input",
            HarborError::PayloadTooLarge { .. } => "payload_too_large",
            HarborError::AgreementInUse { .. } => "agreement_in_use",
            HarborError::Config(_) => "config",
            HarborError::RusqliteError(_) => "storage",
            HarborError::IoError(_) => "io",
            HarborError::SerdeError(_) => "serialization",
        }
    }

    pub(crate) fn invalid_input(field: &str, reason: impl Into<String>) -> Self {
        HarborError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
