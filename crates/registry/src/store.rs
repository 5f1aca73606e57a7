use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::RegistryError;
use crate::reader::RegistryReader;
use crate::types::{ServiceRecord, ToolRecord};

/// In-memory registry projection.
///
/// Backs the demo binary and the test suite, and doubles as the reference
/// implementation of [`RegistryReader`] for anyone wiring a real registry
/// behind the trait. Loadable from a JSON array of services, each optionally
/// carrying a nested `tools` array:
///
/// ```json
/// [
///   {
///     "id": 1, "name": "PaymentGatewayAPI", "status": "active",
///     "domains": ["Finance"],
///     "tools": [{"id": 10, "tool_name": "process_payment"}]
///   }
/// ]
/// ```
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    services: Vec<ServiceRecord>,
    tools: Vec<ToolRecord>,
}

#[derive(Deserialize)]
struct ServiceDoc {
    #[serde(flatten)]
    record: ServiceRecord,
    #[serde(default)]
    tools: Vec<ToolRecord>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(doc: &str) -> Result<Self, RegistryError> {
        let docs: Vec<ServiceDoc> = serde_json::from_str(doc)?;
        let mut registry = Self::new();
        let mut seen_services = HashSet::new();
        let mut seen_tools = HashSet::new();
        for ServiceDoc { record, tools } in docs {
            if !seen_services.insert(record.id) {
                return Err(RegistryError::Invalid(format!(
                    "duplicate service id {}",
                    record.id
                )));
            }
            let parent_id = record.id;
            registry.services.push(record);
            for mut tool in tools {
                tool.service_id = parent_id;
                if !seen_tools.insert(tool.id) {
                    return Err(RegistryError::Invalid(format!(
                        "duplicate tool id {}",
                        tool.id
                    )));
                }
                registry.tools.push(tool);
            }
        }
        Ok(registry)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let doc = std::fs::read_to_string(path)?;
        Self::from_json_str(&doc)
    }

    /// Add a service record directly (test and demo plumbing).
    pub fn push_service(&mut self, service: ServiceRecord) {
        self.services.push(service);
    }

    /// Add a tool record directly. `service_id` must already be set.
    pub fn push_tool(&mut self, tool: ToolRecord) {
        self.tools.push(tool);
    }

    /// Replace or remove a service in place, simulating registry churn.
    pub fn set_service(&mut self, service: ServiceRecord) {
        self.services.retain(|s| s.id != service.id);
        self.services.push(service);
    }

    pub fn remove_service(&mut self, id: i64) {
        self.services.retain(|s| s.id != id);
        self.tools.retain(|t| t.service_id != id);
    }

    fn service_is_active(&self, id: i64) -> bool {
        self.services.iter().any(|s| s.id == id && s.is_active())
    }
}

impl RegistryReader for StaticRegistry {
    fn active_services(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(self
            .services
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    fn active_tools(&self) -> Result<Vec<ToolRecord>, RegistryError> {
        Ok(self
            .tools
            .iter()
            .filter(|t| t.is_active && self.service_is_active(t.service_id))
            .cloned()
            .collect())
    }

    fn service(&self, id: i64) -> Result<Option<ServiceRecord>, RegistryError> {
        Ok(self.services.iter().find(|s| s.id == id).cloned())
    }

    fn tool(&self, id: i64) -> Result<Option<ToolRecord>, RegistryError> {
        Ok(self.tools.iter().find(|t| t.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceStatus;

    const DOC: &str = r#"[
        {
            "id": 1,
            "name": "PaymentGatewayAPI",
            "description": "Handles payments",
            "status": "active",
            "domains": ["Finance"],
            "tools": [
                {"id": 10, "tool_name": "process_payment"},
                {"id": 11, "tool_name": "refund_payment", "is_active": false}
            ]
        },
        {
            "id": 2,
            "name": "LegacyBillingAPI",
            "status": "deprecated",
            "tools": [{"id": 20, "tool_name": "bill_customer"}]
        }
    ]"#;

    #[test]
    fn loads_nested_document_and_fixes_parent_ids() {
        let reg = StaticRegistry::from_json_str(DOC).unwrap();
        let tool = reg.tool(10).unwrap().unwrap();
        assert_eq!(tool.service_id, 1);
    }

    #[test]
    fn active_services_excludes_deprecated() {
        let reg = StaticRegistry::from_json_str(DOC).unwrap();
        let services = reg.active_services().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "PaymentGatewayAPI");
    }

    #[test]
    fn active_tools_excludes_inactive_and_orphaned() {
        let reg = StaticRegistry::from_json_str(DOC).unwrap();
        let tools = reg.active_tools().unwrap();
        // refund_payment is inactive, bill_customer's parent is deprecated.
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_name, "process_payment");
    }

    #[test]
    fn point_lookups_ignore_status() {
        let reg = StaticRegistry::from_json_str(DOC).unwrap();
        let legacy = reg.service(2).unwrap().unwrap();
        assert_eq!(legacy.status, ServiceStatus::Deprecated);
        assert!(reg.tool(999).unwrap().is_none());
    }

    #[test]
    fn duplicate_service_id_rejected() {
        let doc = r#"[{"id": 1, "name": "A"}, {"id": 1, "name": "B"}]"#;
        assert!(matches!(
            StaticRegistry::from_json_str(doc),
            Err(RegistryError::Invalid(_))
        ));
    }
}
