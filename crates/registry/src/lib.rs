//! # KPATH Registry Projection
//!
//! Read-only view over the external service registry. The registry itself
//! (CRUD, auth, users) lives outside this repository; the search core only
//! consumes the projection defined here.
//!
//! The crate exposes:
//!
//! - The record types the indexer and response shaper work with:
//!   [`ServiceRecord`], [`ToolRecord`], [`Capability`], [`ExampleCalls`].
//! - [`RegistryReader`], the single seam through which the rest of the
//!   system reads registry state. Every other crate takes records by value.
//! - [`StaticRegistry`], an in-memory implementation loadable from a JSON
//!   document, used by the demo binary and the test suite.
//!
//! Two invariants are enforced at the reader boundary rather than at each
//! call site: only `active` services are ever yielded, and only active
//! tools whose parent service is active are yielded.

mod error;
mod reader;
mod store;
mod types;

pub use crate::error::RegistryError;
pub use crate::reader::RegistryReader;
pub use crate::store::StaticRegistry;
pub use crate::types::{Capability, ExampleCalls, ServiceRecord, ServiceStatus, ToolRecord};
