//! Umbrella crate for the KPATH semantic discovery service.
//!
//! KPATH answers natural-language queries with the most relevant internal
//! services and tools from a registry, ranked by semantic similarity and
//! enriched with the orchestration metadata an agent needs to invoke them
//! without a second lookup.
//!
//! The pipeline crates re-exported here:
//!
//! - `registry` — read-only projection over the external service registry.
//! - `compose` — deterministic embedding-text composition and query
//!   normalization.
//! - `embed` — embedding backends (ONNX neural, lexical TF-IDF/SVD
//!   fallback) behind a bounded admission gate.
//! - `index` — the flat dense vector index and its atomic snapshot format.
//! - `search` — index lifecycle, the five-mode query planner, and the
//!   budgeted response shaper.
//! - `server` — the HTTP facade under `/api/v1/search`.
//!
//! ## Quick start
//!
//! ```no_run
//! use kpath::{build_stack, CoreConfig, SearchMode, SearchRequest, StaticRegistry};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), kpath::SearchError> {
//! let registry = Arc::new(StaticRegistry::from_json_file("registry.json").unwrap());
//! let stack = build_stack(&CoreConfig::from_env(), registry)?;
//! stack.manager.build_all().await?;
//!
//! let req = SearchRequest::new("process a credit card payment", SearchMode::ToolsOnly)?;
//! let results = stack.planner.search(&req, None).await?;
//! let envelope = stack.shaper.shape(&req, &results, 0)?;
//! println!("{}", serde_json::to_string_pretty(&envelope).unwrap());
//! # Ok(())
//! # }
//! ```

pub use compose::{
    normalize_query, service_text, tool_text, QueryTextError, COMPOSE_VERSION, MAX_QUERY_BYTES,
};
pub use embed::{
    build_backend, BackendKind, EmbedConfig, EmbedError, EmbedGate, EmbeddingBackend,
    HashedBackend, LexicalBackend, ModelId, OnnxBackend, RetryPolicy,
};
pub use index::{
    CapabilityTag, EntryPayload, IndexError, SearchHit, SnapshotError, SnapshotMeta,
    SnapshotStore, VectorIndex,
};
pub use registry::{
    Capability, ExampleCalls, RegistryError, RegistryReader, ServiceRecord, ServiceStatus,
    StaticRegistry, ToolRecord,
};
pub use search::{
    build_stack, BuildState, CoreConfig, EntityKind, Evidence, QueryPlanner, RankedResult,
    ResponseMode, ResponseShaper, SearchEnvelope, SearchError, SearchManager, SearchMode,
    SearchRequest, SearchStack, SearchStatus, EMBED_BATCH, SERVICES_SNAPSHOT, TOOLS_SNAPSHOT,
};
pub use server::{build_router, start_server, ServerConfig, ServerState};
