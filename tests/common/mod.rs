//! Shared fixtures: a small but realistic registry and stack builders for
//! the lexical and hashed backends.

#![allow(dead_code)]

use kpath::{
    build_stack, BackendKind, CoreConfig, EmbedError, EmbedGate, EmbeddingBackend, HashedBackend,
    ModelId, RegistryReader, RetryPolicy, SearchManager, SearchStack, SnapshotStore,
    StaticRegistry,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const REGISTRY_DOC: &str = r#"[
  {
    "id": 1,
    "name": "PaymentGatewayAPI",
    "description": "Payment processing and refunds. Accepts credit card and bank transfer payment methods.",
    "status": "active",
    "endpoint": "https://payments.internal/api",
    "auth_type": "api_key",
    "domains": ["Finance", "Payments"],
    "orchestration_metadata": {"retry_policy": "exponential", "max_retries": 3},
    "capabilities": [
      {"id": 100, "name": "payment_processing", "description": "payment processing for customer orders"}
    ],
    "tools": [
      {
        "id": 10,
        "tool_name": "process_payment",
        "tool_description": "Process a credit card payment",
        "input_schema": {"amount": {}, "card": {}},
        "output_schema": {"status": {}},
        "example_calls": {"basic": {"amount": 25}},
        "tool_version": "1.2.0"
      },
      {
        "id": 11,
        "tool_name": "refund_payment",
        "tool_description": "Refund a settled payment to the original card",
        "input_schema": {"payment_id": {}},
        "output_schema": {"status": {}}
      }
    ]
  },
  {
    "id": 2,
    "name": "CustomerDataAPI",
    "description": "Customer profile data management. Retrieve and update customer profile records.",
    "status": "active",
    "endpoint": "https://customers.internal/api",
    "auth_type": "oauth2",
    "domains": ["CRM"],
    "capabilities": [
      {"id": 200, "name": "profile_lookup", "description": "retrieve customer profile data by id or email"}
    ],
    "tools": [
      {
        "id": 20,
        "tool_name": "get_customer",
        "tool_description": "Retrieve a customer profile record",
        "input_schema": {"customer_id": {}},
        "output_schema": {"profile": {}}
      }
    ]
  },
  {
    "id": 3,
    "name": "InventoryManagementAPI",
    "description": "Inventory tracking across warehouses with live availability.",
    "status": "active",
    "endpoint": "https://inventory.internal/api",
    "auth_type": "api_key",
    "domains": ["Logistics"],
    "capabilities": [
      {"id": 300, "name": "stock_tracking", "description": "track stock levels per warehouse"}
    ],
    "tools": [
      {
        "id": 30,
        "tool_name": "check_inventory",
        "tool_description": "Check stock levels for a product",
        "input_schema": {"sku": {}},
        "output_schema": {"stock": {}},
        "example_calls": [{"sku": "A-100"}]
      },
      {
        "id": 31,
        "tool_name": "update_stock",
        "tool_description": "Adjust stock counts after a delivery",
        "input_schema": {"sku": {}, "delta": {}},
        "output_schema": {"stock": {}}
      }
    ]
  },
  {
    "id": 4,
    "name": "NotificationAPI",
    "description": "Outbound notifications over email and sms channels.",
    "status": "active",
    "endpoint": "https://notify.internal/api",
    "auth_type": "api_key",
    "domains": ["Communications"],
    "capabilities": [
      {"id": 400, "name": "email_delivery", "description": "send email notification messages to customers"}
    ],
    "tools": [
      {
        "id": 40,
        "tool_name": "send_email",
        "tool_description": "Send an email notification to a customer",
        "input_schema": {"to": {}, "subject": {}, "body": {}},
        "output_schema": {"delivered": {}}
      }
    ]
  },
  {
    "id": 5,
    "name": "ReportingAPI",
    "description": "Financial reporting and business analytics dashboards.",
    "status": "active",
    "endpoint": "https://reports.internal/api",
    "auth_type": "bearer",
    "domains": ["Finance"],
    "capabilities": [
      {"id": 500, "name": "reporting", "description": "generate financial reporting summaries"}
    ],
    "tools": [
      {
        "id": 50,
        "tool_name": "generate_report",
        "tool_description": "Generate a financial reporting summary",
        "input_schema": {"period": {}},
        "output_schema": {"report": {}}
      }
    ]
  },
  {
    "id": 6,
    "name": "CampaignAnalyticsAPI",
    "description": "Marketing campaign reporting and attribution.",
    "status": "active",
    "endpoint": "https://campaigns.internal/api",
    "auth_type": "api_key",
    "domains": ["Marketing"],
    "capabilities": [
      {"id": 600, "name": "campaign_reporting", "description": "campaign reporting and attribution metrics"}
    ],
    "tools": []
  },
  {
    "id": 7,
    "name": "LegacyLedgerAPI",
    "description": "Deprecated ledger service, do not use.",
    "status": "deprecated",
    "domains": ["Finance"],
    "tools": [
      {"id": 70, "tool_name": "post_entry", "tool_description": "Post a ledger entry"}
    ]
  }
]"#;

pub fn fixture_registry() -> Arc<StaticRegistry> {
    Arc::new(StaticRegistry::from_json_str(REGISTRY_DOC).expect("fixture registry parses"))
}

/// A stack plus the temp dirs keeping its snapshots and model artifacts
/// alive for the duration of a test.
pub struct TestStack {
    pub stack: SearchStack,
    pub registry: Arc<StaticRegistry>,
    pub core: CoreConfig,
    _dir: TempDir,
}

pub fn core_config(dir: &TempDir, backend: BackendKind) -> CoreConfig {
    CoreConfig {
        backend,
        embedding_dim: 32,
        index_dir: dir.path().join("indexes"),
        model_dir: dir.path().join("models"),
        ..Default::default()
    }
}

pub fn lexical_stack() -> TestStack {
    stack_with(BackendKind::Lexical)
}

pub fn hashed_stack() -> TestStack {
    stack_with(BackendKind::Hashed)
}

fn stack_with(backend: BackendKind) -> TestStack {
    let dir = TempDir::new().expect("temp dir");
    let registry = fixture_registry();
    let core = core_config(&dir, backend);
    let stack = build_stack(&core, registry.clone()).expect("stack builds");
    TestStack {
        stack,
        registry,
        core,
        _dir: dir,
    }
}

/// Hashed backend with a configurable per-batch delay and an embed call
/// counter, for exercising read-during-rebuild and coalescing.
pub struct SlowBackend {
    inner: HashedBackend,
    delay: std::time::Duration,
    pub embed_calls: AtomicU32,
    pub fit_calls: AtomicU32,
}

impl SlowBackend {
    pub fn new(dim: usize, delay: std::time::Duration) -> Self {
        Self {
            inner: HashedBackend::new(dim),
            delay,
            embed_calls: AtomicU32::new(0),
            fit_calls: AtomicU32::new(0),
        }
    }
}

impl EmbeddingBackend for SlowBackend {
    fn id(&self) -> ModelId {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.embed(texts)
    }

    fn fit(&self, _corpus: &[String]) -> Result<(), EmbedError> {
        self.fit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A backend that fails on demand, for exercising the retry and failure
/// surfaces. Starts failing immediately unless switched healthy first.
pub struct FailingBackend {
    inner: HashedBackend,
    failing: std::sync::atomic::AtomicBool,
}

impl FailingBackend {
    pub fn new(dim: usize) -> Self {
        Self {
            inner: HashedBackend::new(dim),
            failing: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl EmbeddingBackend for FailingBackend {
    fn id(&self) -> ModelId {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbedError::Inference("synthetic failure".into()));
        }
        self.inner.embed(texts)
    }
}

/// Registry wrapper with interior mutability so tests can simulate
/// registry churn between upserts.
pub struct SharedRegistry {
    inner: std::sync::RwLock<StaticRegistry>,
}

impl SharedRegistry {
    pub fn from_fixture() -> Arc<Self> {
        Arc::new(Self {
            inner: std::sync::RwLock::new(
                StaticRegistry::from_json_str(REGISTRY_DOC).expect("fixture registry parses"),
            ),
        })
    }

    pub fn update(&self, mutate: impl FnOnce(&mut StaticRegistry)) {
        let mut guard = self.inner.write().expect("registry lock");
        mutate(&mut guard);
    }
}

impl kpath::RegistryReader for SharedRegistry {
    fn active_services(&self) -> Result<Vec<kpath::ServiceRecord>, kpath::RegistryError> {
        self.inner.read().expect("registry lock").active_services()
    }

    fn active_tools(&self) -> Result<Vec<kpath::ToolRecord>, kpath::RegistryError> {
        self.inner.read().expect("registry lock").active_tools()
    }

    fn service(&self, id: i64) -> Result<Option<kpath::ServiceRecord>, kpath::RegistryError> {
        self.inner.read().expect("registry lock").service(id)
    }

    fn tool(&self, id: i64) -> Result<Option<kpath::ToolRecord>, kpath::RegistryError> {
        self.inner.read().expect("registry lock").tool(id)
    }
}

/// Assemble a manager around an arbitrary backend, bypassing
/// `build_stack` so tests can instrument the embedding path.
pub fn manager_with_backend(
    backend: Arc<dyn EmbeddingBackend>,
    queue_depth: usize,
) -> (Arc<SearchManager>, TempDir) {
    manager_with_parts(backend, queue_depth, fixture_registry())
}

pub fn manager_with_parts(
    backend: Arc<dyn EmbeddingBackend>,
    queue_depth: usize,
    registry: Arc<dyn kpath::RegistryReader>,
) -> (Arc<SearchManager>, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let gate = Arc::new(EmbedGate::new(
        backend,
        queue_depth,
        RetryPolicy {
            max_retries: 1,
            base_delay_ms: 1,
            multiplier: 1.0,
            max_delay_ms: 1,
        },
    ));
    let store = SnapshotStore::new(dir.path().join("indexes"));
    let manager = Arc::new(SearchManager::new(registry, gate, store));
    (manager, dir)
}
