use arc_swap::ArcSwap;
use chrono::{DateTime, SecondsFormat, Utc};
use compose::{service_text, tool_text, COMPOSE_VERSION};
use embed::EmbedGate;
use index::{
    CapabilityTag, EntryPayload, SearchHit, SnapshotStore, VectorIndex,
};
use registry::{RegistryReader, ServiceRecord, ToolRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Mutex};

use crate::{SearchError, SearchStatus};

pub const SERVICES_SNAPSHOT: &str = "services";
pub const TOOLS_SNAPSHOT: &str = "tools";

/// Records are embedded in batches of this size during rebuilds.
pub const EMBED_BATCH: usize = 64;

/// Index lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Uninitialized,
    Loading,
    Ready,
    Rebuilding,
    Failed,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Uninitialized => "uninitialized",
            BuildState::Loading => "loading",
            BuildState::Ready => "ready",
            BuildState::Rebuilding => "rebuilding",
            BuildState::Failed => "failed",
        }
    }
}

/// One publishable index: the atomic current pointer plus the single-writer
/// guard for incremental mutations.
struct IndexCell {
    current: ArcSwap<VectorIndex>,
    writer: Mutex<()>,
}

impl IndexCell {
    fn new(index: VectorIndex) -> Self {
        Self {
            current: ArcSwap::from_pointee(index),
            writer: Mutex::new(()),
        }
    }
}

/// Lifecycle owner of the services and tools indexes.
///
/// Readers load the current pointer and keep it for one call; rebuilds
/// construct fresh indexes off to the side and publish them with a swap.
/// At most one build runs at a time: a second `build_all` issued while one
/// is in flight waits for it and adopts its outcome instead of building
/// again.
pub struct SearchManager {
    registry: Arc<dyn RegistryReader>,
    embedder: Arc<EmbedGate>,
    services: IndexCell,
    tools: IndexCell,
    store: SnapshotStore,
    state_tx: watch::Sender<BuildState>,
    build_lock: Mutex<()>,
    build_gen: AtomicU64,
    last_error: RwLock<Option<String>>,
    last_built_at: RwLock<Option<DateTime<Utc>>>,
}

impl SearchManager {
    pub fn new(
        registry: Arc<dyn RegistryReader>,
        embedder: Arc<EmbedGate>,
        store: SnapshotStore,
    ) -> Self {
        let model = embedder.id();
        let (state_tx, _) = watch::channel(BuildState::Uninitialized);
        Self {
            registry,
            services: IndexCell::new(VectorIndex::new(model.name.clone(), model.dim)),
            tools: IndexCell::new(VectorIndex::new(model.name, model.dim)),
            embedder,
            store,
            state_tx,
            build_lock: Mutex::new(()),
            build_gen: AtomicU64::new(0),
            last_error: RwLock::new(None),
            last_built_at: RwLock::new(None),
        }
    }

    pub fn state(&self) -> BuildState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildState> {
        self.state_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<dyn RegistryReader> {
        &self.registry
    }

    fn set_state(&self, state: BuildState) {
        self.state_tx.send_replace(state);
    }

    fn record_error(&self, error: &SearchError) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = Some(error.to_string());
        }
    }

    fn last_error_string(&self) -> String {
        self.last_error
            .read()
            .ok()
            .and_then(|e| e.clone())
            .unwrap_or_else(|| "build failed".into())
    }

    /// Attempt to restore both indexes from disk. Any miss or mismatch
    /// leaves the manager in `Loading`; the caller is expected to schedule
    /// a background [`build_all`](Self::build_all).
    pub fn load_snapshots(&self) -> Result<(), SearchError> {
        self.set_state(BuildState::Loading);
        let model = self.embedder.id();
        let load = |name: &str| {
            self.store
                .load(name, &model.name, model.dim, COMPOSE_VERSION)
        };
        match (load(SERVICES_SNAPSHOT), load(TOOLS_SNAPSHOT)) {
            (Ok((services, svc_meta)), Ok((tools, _))) => {
                self.services.current.store(Arc::new(services));
                self.tools.current.store(Arc::new(tools));
                if let Ok(mut slot) = self.last_built_at.write() {
                    *slot = DateTime::parse_from_rfc3339(&svc_meta.built_at)
                        .ok()
                        .map(|t| t.with_timezone(&Utc));
                }
                self.set_state(BuildState::Ready);
                tracing::info!(
                    svc_count = self.services.current.load().len(),
                    tool_count = self.tools.current.load().len(),
                    "indexes restored from snapshot"
                );
                Ok(())
            }
            (svc, tools) => {
                let errors: Vec<_> = [svc.err(), tools.err()].into_iter().flatten().collect();
                let mismatch = errors
                    .iter()
                    .any(|e| matches!(e, index::SnapshotError::Incompatible(_)));
                let reason = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                tracing::warn!(reason = %reason, "snapshot load failed, rebuild required");
                if mismatch {
                    Err(SearchError::ModelMismatch(reason))
                } else {
                    Err(SearchError::IndexNotReady)
                }
            }
        }
    }

    /// Full rebuild of both indexes: iterate the registry, compose, fit
    /// (lexical), embed in batches, populate, persist, publish. Idempotent;
    /// concurrent calls coalesce onto the in-flight build.
    pub async fn build_all(&self) -> Result<(), SearchError> {
        self.build_guarded(true, true, true).await
    }

    pub async fn rebuild_services(&self) -> Result<(), SearchError> {
        self.build_guarded(true, false, false).await
    }

    pub async fn rebuild_tools(&self) -> Result<(), SearchError> {
        self.build_guarded(false, true, false).await
    }

    async fn build_guarded(
        &self,
        services: bool,
        tools: bool,
        fit: bool,
    ) -> Result<(), SearchError> {
        let entry_gen = self.build_gen.load(Ordering::Acquire);
        let _guard = self.build_lock.lock().await;
        if self.build_gen.load(Ordering::Acquire) != entry_gen {
            // A build finished while we waited for the lock; adopt its
            // outcome instead of building again.
            return match self.state() {
                BuildState::Ready | BuildState::Rebuilding => Ok(()),
                _ => Err(SearchError::Internal(self.last_error_string())),
            };
        }

        let prior = self.state();
        let had_index = matches!(prior, BuildState::Ready | BuildState::Rebuilding);
        self.set_state(if had_index {
            BuildState::Rebuilding
        } else {
            BuildState::Loading
        });

        let result = self.build_inner(services, tools, fit).await;
        self.build_gen.fetch_add(1, Ordering::Release);
        match &result {
            Ok(()) => {
                if let Ok(mut slot) = self.last_error.write() {
                    *slot = None;
                }
                if let Ok(mut slot) = self.last_built_at.write() {
                    *slot = Some(Utc::now());
                }
                self.set_state(BuildState::Ready);
            }
            Err(e) => {
                self.record_error(e);
                // The prior index remains authoritative after a failed
                // rebuild; only an initial build failure blocks queries.
                self.set_state(if had_index {
                    BuildState::Ready
                } else {
                    BuildState::Failed
                });
            }
        }
        result
    }

    async fn build_inner(
        &self,
        build_services: bool,
        build_tools: bool,
        fit: bool,
    ) -> Result<(), SearchError> {
        let services = self.registry.active_services()?;
        let tools = self.registry.active_tools()?;
        let parent_names: HashMap<i64, &str> = services
            .iter()
            .map(|s| (s.id, s.name.as_str()))
            .collect();

        let service_texts: Vec<String> = services.iter().map(service_text).collect();
        let tool_texts: Vec<String> = tools
            .iter()
            .map(|t| tool_text(t, parent_names.get(&t.service_id).copied().unwrap_or("")))
            .collect();

        if fit {
            let mut corpus = service_texts.clone();
            corpus.extend(tool_texts.iter().cloned());
            self.embedder.fit(corpus).await?;
        }

        // Identifier is read after fitting: the lexical backend's id
        // depends on the fitted vocabulary.
        let model = self.embedder.id();
        let built_at = Utc::now();

        if build_services {
            let vectors = self.embed_batched(&service_texts).await?;
            let mut index = VectorIndex::new(model.name.clone(), model.dim);
            for (service, vector) in services.iter().zip(vectors) {
                index.add(service.id, vector, service_payload(service))?;
            }
            self.store
                .write(SERVICES_SNAPSHOT, &index, COMPOSE_VERSION, built_at)?;
            // The writer lock makes publication mutually exclusive with
            // in-flight upserts; the registry re-read above already
            // absorbed anything they wrote.
            let _w = self.services.writer.lock().await;
            self.services.current.store(Arc::new(index));
        }

        if build_tools {
            let vectors = self.embed_batched(&tool_texts).await?;
            let mut index = VectorIndex::new(model.name.clone(), model.dim);
            for (tool, vector) in tools.iter().zip(vectors) {
                index.add(tool.id, vector, tool_payload(tool))?;
            }
            self.store
                .write(TOOLS_SNAPSHOT, &index, COMPOSE_VERSION, built_at)?;
            let _w = self.tools.writer.lock().await;
            self.tools.current.store(Arc::new(index));
        }

        tracing::info!(
            svc_count = self.services.current.load().len(),
            tool_count = self.tools.current.load().len(),
            model = %model,
            "index build complete"
        );
        Ok(())
    }

    async fn embed_batched(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            vectors.extend(self.embedder.embed(batch.to_vec()).await?);
        }
        Ok(vectors)
    }

    /// Embed one query string through the shared gate.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.embedder.embed(vec![text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SearchError::Internal("embedder returned no vector".into()))
    }

    /// Re-read one service from the registry and upsert it. An absent or
    /// no-longer-active record turns into a delete (with tool cascade).
    pub async fn upsert_service(&self, id: i64) -> Result<(), SearchError> {
        match self.registry.service(id)? {
            Some(service) if service.is_active() => {
                let text = service_text(&service);
                let vector = self.embed_query(&text).await?;
                let _w = self.services.writer.lock().await;
                let mut next = VectorIndex::clone(&self.services.current.load());
                next.replace(id, vector, service_payload(&service))?;
                self.services.current.store(Arc::new(next));
                Ok(())
            }
            _ => self.delete_service(id).await,
        }
    }

    /// Re-read one tool from the registry and upsert it. Inactive tools and
    /// tools of inactive services are removed instead.
    pub async fn upsert_tool(&self, id: i64) -> Result<(), SearchError> {
        let record = self.registry.tool(id)?;
        let tool = match record {
            Some(t) if t.is_active => t,
            _ => return self.delete_tool(id).await,
        };
        let parent = match self.registry.service(tool.service_id)? {
            Some(p) if p.is_active() => p,
            _ => return self.delete_tool(id).await,
        };
        let text = tool_text(&tool, &parent.name);
        let vector = self.embed_query(&text).await?;
        let _w = self.tools.writer.lock().await;
        let mut next = VectorIndex::clone(&self.tools.current.load());
        next.replace(id, vector, tool_payload(&tool))?;
        self.tools.current.store(Arc::new(next));
        Ok(())
    }

    /// Remove a service and cascade over its tools. Idempotent.
    pub async fn delete_service(&self, id: i64) -> Result<(), SearchError> {
        {
            let _w = self.services.writer.lock().await;
            let mut next = VectorIndex::clone(&self.services.current.load());
            next.remove(id);
            self.services.current.store(Arc::new(next));
        }
        let _w = self.tools.writer.lock().await;
        let current = self.tools.current.load();
        let orphans: Vec<i64> = current
            .entries()
            .filter(|(_, p)| p.parent_id == Some(id))
            .map(|(tool_id, _)| tool_id)
            .collect();
        if !orphans.is_empty() {
            let mut next = VectorIndex::clone(&current);
            for tool_id in orphans {
                next.remove(tool_id);
            }
            self.tools.current.store(Arc::new(next));
        }
        Ok(())
    }

    pub async fn delete_tool(&self, id: i64) -> Result<(), SearchError> {
        let _w = self.tools.writer.lock().await;
        let mut next = VectorIndex::clone(&self.tools.current.load());
        next.remove(id);
        self.tools.current.store(Arc::new(next));
        Ok(())
    }

    fn ensure_queryable(&self, index: &VectorIndex) -> Result<(), SearchError> {
        match self.state() {
            BuildState::Ready | BuildState::Rebuilding if !index.is_empty() => Ok(()),
            _ => Err(SearchError::IndexNotReady),
        }
    }

    pub fn search_services(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let index = self.services.current.load();
        self.ensure_queryable(&index)?;
        Ok(index.search(query, k)?)
    }

    pub fn search_tools(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let index = self.tools.current.load();
        self.ensure_queryable(&index)?;
        Ok(index.search(query, k)?)
    }

    /// Payload of a service currently in the live index.
    pub fn service_payload(&self, id: i64) -> Option<EntryPayload> {
        self.services.current.load().payload(id).cloned()
    }

    pub fn status(&self) -> SearchStatus {
        let state = self.state();
        let services = self.services.current.load();
        let tools = self.tools.current.load();
        let model = self.embedder.id();
        SearchStatus {
            built: matches!(state, BuildState::Ready | BuildState::Rebuilding),
            state: state.as_str().to_owned(),
            svc_count: services.len(),
            tool_count: tools.len(),
            model: model.name,
            dim: model.dim,
            last_built_at: self
                .last_built_at
                .read()
                .ok()
                .and_then(|t| *t)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
        }
    }
}

fn service_payload(service: &ServiceRecord) -> EntryPayload {
    EntryPayload {
        name: service.name.clone(),
        description: service.description.clone(),
        parent_id: None,
        domains: service.domains.clone(),
        capabilities: service
            .capabilities
            .iter()
            .map(|c| CapabilityTag {
                name: c.name.clone(),
                description: c.description.clone(),
            })
            .collect(),
    }
}

fn tool_payload(tool: &ToolRecord) -> EntryPayload {
    EntryPayload {
        name: tool.tool_name.clone(),
        description: tool.tool_description.clone(),
        parent_id: Some(tool.service_id),
        domains: Vec::new(),
        capabilities: Vec::new(),
    }
}
