use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::{EmbedError, EmbeddingBackend, ModelId, RetryPolicy};

/// Bounded admission in front of an embedding backend.
///
/// Inference is a blocking CPU/GPU step, so each admitted call runs on the
/// blocking pool while the caller suspends. Admission is capped at
/// `queue_depth` concurrent calls; a saturated gate fails fast with
/// [`EmbedError::Overloaded`] instead of queueing unboundedly. Transient
/// backend failures are retried on the backoff schedule; the permit is held
/// across retries since the work still occupies a slot.
pub struct EmbedGate {
    backend: Arc<dyn EmbeddingBackend>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl EmbedGate {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, queue_depth: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(queue_depth)),
            retry,
        }
    }

    pub fn id(&self) -> ModelId {
        self.backend.id()
    }

    pub fn dim(&self) -> usize {
        self.backend.dim()
    }

    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        let _permit = self
            .permits
            .try_acquire()
            .map_err(|_| EmbedError::Overloaded)?;

        let mut attempt: u32 = 0;
        loop {
            let backend = self.backend.clone();
            let batch = texts.clone();
            let result = tokio::task::spawn_blocking(move || backend.embed(&batch))
                .await
                .map_err(|e| EmbedError::Inference(format!("embedding task failed: {e}")))?;
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "transient embed failure, retrying");
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(e) if e.transient() => {
                    return Err(EmbedError::Failed {
                        attempts: attempt + 1,
                        message: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fit the backend on a rebuild corpus. Not retried: a fit failure
    /// aborts the rebuild and the prior snapshot stays authoritative.
    pub async fn fit(&self, corpus: Vec<String>) -> Result<(), EmbedError> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.fit(&corpus))
            .await
            .map_err(|e| EmbedError::Inference(format!("fit task failed: {e}")))?
    }
}
