//! # KPATH Text Composition
//!
//! Deterministically assembles the text blob that gets embedded for each
//! entity type, and normalizes incoming query text.
//!
//! Composition is a pure function of the record: same record, same string,
//! byte for byte. Field weighting is done by repetition (the entity name is
//! emitted three times so name matches dominate description matches).
//! Absent fields are skipped rather than emitted empty, so two records that
//! differ only in an unset optional field compose identically.
//!
//! Any change to the composition rules is a breaking change for existing
//! indexes: bump [`COMPOSE_VERSION`] and every snapshot built under the old
//! rule will be discarded and rebuilt.

use registry::{ServiceRecord, ToolRecord};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Recorded in snapshot metadata; a mismatch forces a full reindex.
pub const COMPOSE_VERSION: &str = "compose-v1";

/// Longest accepted query, in bytes, after trimming.
pub const MAX_QUERY_BYTES: usize = 1024;

/// Errors from query-text normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryTextError {
    #[error("query is empty after trimming")]
    Empty,
    #[error("query is {0} bytes, limit is {MAX_QUERY_BYTES}")]
    TooLong(usize),
}

/// Embedding text for a service: name ×3, description, capability
/// descriptions, domains.
pub fn service_text(service: &ServiceRecord) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for _ in 0..3 {
        parts.push(&service.name);
    }
    if !service.description.is_empty() {
        parts.push(&service.description);
    }
    for capability in &service.capabilities {
        if !capability.description.is_empty() {
            parts.push(&capability.description);
        }
    }
    for domain in &service.domains {
        if !domain.is_empty() {
            parts.push(domain);
        }
    }
    parts.join(" ")
}

/// Embedding text for a tool: tool_name ×3, description, example-call keys
/// (or count for list-shaped examples), schema top-level keys, parent
/// service name once.
pub fn tool_text(tool: &ToolRecord, parent_name: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for _ in 0..3 {
        parts.push(tool.tool_name.clone());
    }
    if !tool.tool_description.is_empty() {
        parts.push(tool.tool_description.clone());
    }
    if let Some(examples) = &tool.example_calls {
        match examples.sorted_keys() {
            Some(keys) => parts.extend(keys.into_iter().map(str::to_owned)),
            None => parts.push(examples.len().to_string()),
        }
    }
    for schema in [&tool.input_schema, &tool.output_schema] {
        if let Some(obj) = schema.as_ref().and_then(|s| s.as_object()) {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            parts.extend(keys.into_iter().cloned());
        }
    }
    if !parent_name.is_empty() {
        parts.push(parent_name.to_owned());
    }
    parts.join(" ")
}

/// Trim, NFC-normalize, and bounds-check query text.
pub fn normalize_query(raw: &str) -> Result<String, QueryTextError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QueryTextError::Empty);
    }
    let normalized: String = trimmed.nfc().collect();
    if normalized.len() > MAX_QUERY_BYTES {
        return Err(QueryTextError::TooLong(normalized.len()));
    }
    Ok(normalized)
}
