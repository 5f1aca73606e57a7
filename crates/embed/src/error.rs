use std::io;
use thiserror::Error;

/// Errors surfaced by embedding backends and the admission gate.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Lexical backend used before `fit` and with no persisted artifacts.
    #[error("lexical backend not fitted")]
    NotFitted,
    /// The bounded embedding queue is saturated. Callers may retry.
    #[error("embedding queue saturated")]
    Overloaded,
    /// Model or tokenizer assets are missing or inconsistent.
    #[error("invalid embedding config: {0}")]
    InvalidConfig(String),
    /// Filesystem failures while loading or persisting artifacts.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Tokenizer or runtime inference failure. Possibly transient.
    #[error("inference failure: {0}")]
    Inference(String),
    /// A transient failure persisted through the full retry schedule.
    #[error("embedding failed after {attempts} attempts: {message}")]
    Failed { attempts: u32, message: String },
}

impl EmbedError {
    /// Whether the gate should retry this failure.
    pub fn transient(&self) -> bool {
        matches!(self, EmbedError::Inference(_) | EmbedError::Io(_))
    }
}
