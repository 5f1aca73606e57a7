use dashmap::DashMap;
use registry::RegistryReader;
use search::{build_stack, BuildState, CoreConfig, SearchStack};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

static PROMETHEUS: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

/// Shared application state: the wired search core plus telemetry plumbing.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<dyn RegistryReader>,
    pub stack: SearchStack,
    pub query_timeout: Duration,
    /// Per-caller query counters, surfaced through logs and metrics.
    pub query_counts: Arc<DashMap<String, u64>>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        core: &CoreConfig,
        registry: Arc<dyn RegistryReader>,
    ) -> ServerResult<Self> {
        let stack = build_stack(core, registry.clone()).map_err(ServerError::Search)?;
        Ok(Self {
            config: Arc::new(config),
            registry,
            stack,
            query_timeout: core.query_timeout(),
            query_counts: Arc::new(DashMap::new()),
            started_at: Instant::now(),
        })
    }

    /// Load snapshots; if that fails, kick off a background full build and
    /// serve `IndexNotReady` in the meantime.
    pub fn initialize(self: &Arc<Self>) {
        if self.stack.manager.load_snapshots().is_ok() {
            return;
        }
        let state = self.clone();
        tokio::spawn(async move {
            if let Err(e) = state.stack.manager.build_all().await {
                tracing::error!(error = %e, "background index build failed");
            }
        });
    }

    pub fn is_ready(&self) -> bool {
        matches!(
            self.stack.manager.state(),
            BuildState::Ready | BuildState::Rebuilding
        )
    }

    pub fn count_query(&self, caller_id: &str) {
        *self.query_counts.entry(caller_id.to_owned()).or_insert(0) += 1;
    }

    /// Process-wide Prometheus recorder; `None` when installation failed
    /// (another recorder already registered, e.g. in tests).
    pub fn prometheus() -> Option<&'static PrometheusHandle> {
        PROMETHEUS
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "prometheus recorder not installed");
                    None
                }
            })
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embed::BackendKind;
    use registry::StaticRegistry;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, Arc<ServerState>) {
        let dir = TempDir::new().unwrap();
        let core = CoreConfig {
            backend: BackendKind::Hashed,
            index_dir: dir.path().join("indexes"),
            model_dir: dir.path().join("models"),
            ..Default::default()
        };
        let state =
            ServerState::new(ServerConfig::default(), &core, Arc::new(StaticRegistry::new()))
                .unwrap();
        (dir, Arc::new(state))
    }

    #[tokio::test]
    async fn fresh_state_is_not_ready() {
        let (_dir, state) = test_state();
        assert!(!state.is_ready());
    }

    #[test]
    fn query_counts_accumulate_per_caller() {
        let (_dir, state) = test_state();
        state.count_query("agent-a");
        state.count_query("agent-a");
        state.count_query("agent-b");
        assert_eq!(*state.query_counts.get("agent-a").unwrap(), 2);
        assert_eq!(*state.query_counts.get("agent-b").unwrap(), 1);
    }
}
