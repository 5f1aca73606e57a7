use embed::{build_backend, BackendKind, EmbedConfig, EmbedGate, RetryPolicy};
use index::SnapshotStore;
use registry::RegistryReader;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use crate::manager::SearchManager;
use crate::planner::QueryPlanner;
use crate::shaper::ResponseShaper;
use crate::SearchError;

/// Core configuration, read from the environment. Unset or malformed
/// values fall back to the documented defaults with a warning; the search
/// core should come up usable even under a partial environment.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub backend: BackendKind,
    /// Lexical SVD dimension; the neural backend fixes its own.
    pub embedding_dim: usize,
    pub index_dir: PathBuf,
    pub model_dir: PathBuf,
    pub query_lru_size: usize,
    pub query_timeout_ms: u64,
    pub embed_queue_depth: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Neural,
            embedding_dim: 64,
            index_dir: PathBuf::from("data/indexes"),
            model_dir: PathBuf::from("data/models"),
            query_lru_size: 1024,
            query_timeout_ms: 30_000,
            embed_queue_depth: 256,
        }
    }
}

impl CoreConfig {
    /// Read `EMBEDDING_BACKEND`, `EMBEDDING_DIM`, `INDEX_DIR`, `MODEL_DIR`,
    /// `QUERY_LRU_SIZE`, `QUERY_TIMEOUT_MS`, and `EMBED_QUEUE_DEPTH`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: parsed_env("EMBEDDING_BACKEND", defaults.backend),
            embedding_dim: parsed_env("EMBEDDING_DIM", defaults.embedding_dim),
            index_dir: env::var("INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_dir),
            model_dir: env::var("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            query_lru_size: parsed_env("QUERY_LRU_SIZE", defaults.query_lru_size),
            query_timeout_ms: parsed_env("QUERY_TIMEOUT_MS", defaults.query_timeout_ms),
            embed_queue_depth: parsed_env("EMBED_QUEUE_DEPTH", defaults.embed_queue_depth),
        }
    }

    pub fn embed_config(&self) -> EmbedConfig {
        EmbedConfig {
            backend: self.backend,
            lexical_dim: self.embedding_dim,
            model_dir: self.model_dir.clone(),
            queue_depth: self.embed_queue_depth,
            ..EmbedConfig::default()
        }
    }

    pub fn query_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.query_timeout_ms)
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparseable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// The wired search core: one manager, one planner, one shaper, sharing
/// the registry handle and the embedding gate.
#[derive(Clone)]
pub struct SearchStack {
    pub manager: Arc<SearchManager>,
    pub planner: Arc<QueryPlanner>,
    pub shaper: Arc<ResponseShaper>,
}

/// Build the search core from configuration. The embedding backend is
/// constructed exactly once here; everything downstream shares it.
pub fn build_stack(
    core: &CoreConfig,
    registry: Arc<dyn RegistryReader>,
) -> Result<SearchStack, SearchError> {
    let backend = build_backend(&core.embed_config())?;
    let gate = Arc::new(EmbedGate::new(
        backend,
        core.embed_queue_depth,
        RetryPolicy::default(),
    ));
    let store = SnapshotStore::new(&core.index_dir);
    let manager = Arc::new(SearchManager::new(registry.clone(), gate, store));
    let planner = Arc::new(QueryPlanner::new(manager.clone(), core.query_lru_size));
    let shaper = Arc::new(ResponseShaper::new(registry));
    Ok(SearchStack {
        manager,
        planner,
        shaper,
    })
}
