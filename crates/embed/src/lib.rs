//! # KPATH Embedding Providers
//!
//! Turns text into fixed-dimension, L2-normalized vectors. Three backends
//! share one contract:
//!
//! - **Neural** ([`OnnxBackend`]) — a local ONNX transformer (reference
//!   model `bge-small-en-v1.5`, 384 dims). Batched, thread-safe via a
//!   per-thread session cache.
//! - **Lexical** ([`LexicalBackend`]) — TF-IDF over the fitted corpus
//!   reduced by truncated SVD. Exists so the system runs without the ML
//!   stack; must be fitted before use and persists its artifacts under the
//!   model directory.
//! - **Hashed** ([`HashedBackend`]) — deterministic hash-derived vectors
//!   for tests and offline smoke runs.
//!
//! The backend is selected once at startup; its [`ModelId`] is recorded in
//! every index snapshot so an incompatible snapshot is rebuilt instead of
//! silently mixed.
//!
//! Request-path calls go through [`EmbedGate`], which bounds concurrent
//! embedding work (saturation surfaces [`EmbedError::Overloaded`]), runs
//! the blocking inference off the async path, and retries transient
//! failures with exponential backoff (100 ms, 400 ms, 1.6 s).

mod config;
mod error;
mod gate;
mod hashed;
mod lexical;
mod normalize;
mod onnx;
mod retry;
mod session;

pub use crate::config::{BackendKind, EmbedConfig};
pub use crate::error::EmbedError;
pub use crate::gate::EmbedGate;
pub use crate::hashed::HashedBackend;
pub use crate::lexical::LexicalBackend;
pub use crate::onnx::OnnxBackend;
pub use crate::retry::RetryPolicy;

use std::fmt;
use std::sync::Arc;

/// Identifies the vector space a backend produces. Snapshots record this
/// and refuse to load under a different identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    pub name: String,
    pub dim: usize,
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}d)", self.name, self.dim)
    }
}

/// The embedding contract. `embed` is blocking (CPU or GPU inference);
/// callers on the async path go through [`EmbedGate`].
///
/// All returned vectors have exactly `dim()` components and are
/// L2-normalized. `fit` is a no-op for corpus-independent backends.
pub trait EmbeddingBackend: Send + Sync {
    fn id(&self) -> ModelId;

    fn dim(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    fn fit(&self, _corpus: &[String]) -> Result<(), EmbedError> {
        Ok(())
    }
}

/// Construct the configured backend. Called once at startup.
pub fn build_backend(cfg: &EmbedConfig) -> Result<Arc<dyn EmbeddingBackend>, EmbedError> {
    let backend: Arc<dyn EmbeddingBackend> = match cfg.backend {
        BackendKind::Neural => Arc::new(OnnxBackend::new(cfg)?),
        BackendKind::Lexical => Arc::new(LexicalBackend::open(cfg)?),
        BackendKind::Hashed => Arc::new(HashedBackend::new(cfg.neural_dim)),
    };
    tracing::info!(model = %backend.id(), "embedding backend ready");
    Ok(backend)
}
