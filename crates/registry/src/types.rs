use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle status of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Active,
    Inactive,
    Deprecated,
}

/// A tagged function of a service, used for filtering and for the
/// `capabilities` search mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// An invokable capability provider as projected from the registry, with
/// capabilities and domains pre-joined.
///
/// The orchestration blobs are opaque to the search core; they flow through
/// to `full`-mode responses untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interaction_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_protocol: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_recommendations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_capabilities: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_patterns: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_details: Option<Value>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl ServiceRecord {
    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }
}

/// Example invocations attached to a tool. The registry stores these as
/// either a keyed map or a bare list depending on who wrote the record;
/// both shapes must deserialize without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExampleCalls {
    Keyed(BTreeMap<String, Value>),
    Listed(Vec<Value>),
}

impl ExampleCalls {
    pub fn len(&self) -> usize {
        match self {
            ExampleCalls::Keyed(m) => m.len(),
            ExampleCalls::Listed(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in sorted order for keyed examples; `None` for lists.
    pub fn sorted_keys(&self) -> Option<Vec<&str>> {
        match self {
            // BTreeMap iteration is already key-ordered.
            ExampleCalls::Keyed(m) => Some(m.keys().map(String::as_str).collect()),
            ExampleCalls::Listed(_) => None,
        }
    }
}

/// A single invokable operation of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: i64,
    /// Parent service id. Defaults so nested registry documents can omit it;
    /// the loader fixes it up to the enclosing service.
    #[serde(default)]
    pub service_id: i64,
    pub tool_name: String,
    #[serde(default)]
    pub tool_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_calls: Option<ExampleCalls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}
