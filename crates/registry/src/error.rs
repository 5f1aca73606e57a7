use std::io;
use thiserror::Error;

/// Errors surfaced by registry projections.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Reading a registry document from disk failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The registry document could not be parsed.
    #[error("malformed registry document: {0}")]
    Parse(#[from] serde_json::Error),
    /// The document parsed but violates a structural rule.
    #[error("invalid registry document: {0}")]
    Invalid(String),
}
