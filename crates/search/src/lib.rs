//! # KPATH Search Core
//!
//! The subsystem behind `/api/v1/search`: owns the two vector indexes,
//! plans queries across them, and shapes ranked results into budgeted
//! response envelopes.
//!
//! - [`SearchManager`] is the lifecycle owner of the services and tools
//!   indexes. Readers take an atomic pointer to the current index and keep
//!   it for the duration of one search; writers (rebuilds and upserts)
//!   build a replacement off to the side and publish it with a pointer
//!   swap, so a query issued during a rebuild is answered entirely from
//!   the pre-rebuild snapshot.
//! - [`QueryPlanner`] implements the five search modes, merges and
//!   re-ranks heterogeneous hits, applies domain/capability filters and
//!   the `min_score` threshold, and caches query vectors in a SHA-256
//!   keyed LRU.
//! - [`ResponseShaper`] projects ranked results into `full` / `compact` /
//!   `minimal` shapes under hard per-result token budgets, emitting detail
//!   links for the fields it leaves out.
//!
//! Errors follow one taxonomy ([`SearchError`]) with a stable wire code
//! and a retryability flag; the HTTP layer maps them to statuses without
//! inspecting messages.

mod config;
mod error;
mod manager;
mod planner;
mod shaper;
mod types;

pub use crate::config::{build_stack, CoreConfig, SearchStack};
pub use crate::error::SearchError;
pub use crate::manager::{BuildState, SearchManager, EMBED_BATCH, SERVICES_SNAPSHOT, TOOLS_SNAPSHOT};
pub use crate::planner::QueryPlanner;
pub use crate::shaper::{ResponseShaper, SearchEnvelope};
pub use crate::types::{
    EntityKind, Evidence, RankedResult, ResponseMode, SearchMode, SearchRequest, SearchStatus,
};
