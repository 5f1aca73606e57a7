use crate::error::RegistryError;
use crate::types::{ServiceRecord, ToolRecord};

/// The read contract the search core consumes.
///
/// This trait is the only place that touches the registry. Implementations
/// must uphold the indexing invariants themselves: `active_services` yields
/// only `status = active` services, and `active_tools` yields only
/// `is_active` tools whose parent service is active.
///
/// Point lookups back the `/tools/{id}/*` detail endpoints and the response
/// shaper; they return records regardless of status so detail pages keep
/// working for entities that were live when indexed.
pub trait RegistryReader: Send + Sync {
    /// Active services with capabilities and domains pre-joined.
    fn active_services(&self) -> Result<Vec<ServiceRecord>, RegistryError>;

    /// Active tools of active services, parent reference included.
    fn active_tools(&self) -> Result<Vec<ToolRecord>, RegistryError>;

    fn service(&self, id: i64) -> Result<Option<ServiceRecord>, RegistryError>;

    fn tool(&self, id: i64) -> Result<Option<ToolRecord>, RegistryError>;
}
