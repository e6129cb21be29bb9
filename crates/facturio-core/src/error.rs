//! Error type shared by all Facturio crates.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FacturioError>;

/// Failure taxonomy for the billing core.
///
/// `Validation` is rejected synchronously and never persisted.
/// `Rejected` covers precondition failures on an existing record
/// (already sent, cancelled, attempt limit). Idempotency conflicts are
/// not errors at all — they surface as outcomes in the run summary.
#[derive(Debug, Error)]
pub enum FacturioError {
    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("render: {0}")]
    Render(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FacturioError {
    /// Short machine-readable kind, used in JSON failure bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Transport(_) => "transport",
            Self::Render(_) => "render",
            Self::NotFound(_) => "not_found",
            Self::Rejected(_) => "rejected",
            Self::Io(_) => "io",
        }
    }
}
