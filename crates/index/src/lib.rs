//! # KPATH Vector Index
//!
//! An in-memory dense vector store with top-k nearest-neighbor search and
//! an atomic snapshot format for crash-safe restarts.
//!
//! The index is flat: a scored linear scan over the live rows. That is the
//! right design point for corpora up to the low tens of thousands of
//! entries; swapping in an ANN structure is a capacity change, not a
//! contract change. Vectors are stored L2-normalized so cosine similarity
//! reduces to a dot product, and scores are rescaled from `[-1, 1]` into
//! `[0, 1]`. Equal scores break ties toward the lower external id so
//! search output is fully deterministic.
//!
//! Mutation never happens in place under a reader: the owner clones the
//! index, applies the change, and atomically publishes the new copy
//! (read-copy-update). `remove` therefore just tombstones the row; the
//! tombstones disappear with the next full rebuild.

mod snapshot;

pub use crate::snapshot::{SnapshotMeta, SnapshotStore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from index mutation and search.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("duplicate external id {0}")]
    DuplicateId(i64),
    #[error("dimension mismatch: index is {expected}, vector is {got}")]
    DimMismatch { expected: usize, got: usize },
}

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot not found: {0}")]
    Missing(String),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("incompatible snapshot: {0}")]
    Incompatible(String),
}

/// A capability tag carried in the payload for post-search filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTag {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The small per-entry struct needed to rank and filter a result without
/// another registry read. Heavier projections (orchestration blobs,
/// schemas) are looked up at shaping time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parent service id for tool entries; `None` for services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityTag>,
}

/// One search hit: external id, rescaled score, payload copy.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: i64,
    pub score: f32,
    pub payload: EntryPayload,
}

#[derive(Debug, Clone)]
struct Row {
    id: i64,
    vector: Vec<f32>,
    payload: EntryPayload,
}

/// Flat dense vector index. See the crate docs for the concurrency and
/// scoring contract.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_name: String,
    dim: usize,
    rows: Vec<Option<Row>>,
    id_to_row: HashMap<i64, usize>,
}

impl VectorIndex {
    pub fn new(model_name: impl Into<String>, dim: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dim,
            rows: Vec::new(),
            id_to_row: HashMap::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model_name
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of live (non-tombstoned) entries.
    pub fn len(&self) -> usize {
        self.id_to_row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_row.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.id_to_row.contains_key(&id)
    }

    pub fn payload(&self, id: i64) -> Option<&EntryPayload> {
        let row = *self.id_to_row.get(&id)?;
        self.rows[row].as_ref().map(|r| &r.payload)
    }

    /// Iterate live `(id, payload)` pairs in row order.
    pub fn entries(&self) -> impl Iterator<Item = (i64, &EntryPayload)> {
        self.rows
            .iter()
            .filter_map(|r| r.as_ref().map(|row| (row.id, &row.payload)))
    }

    pub fn add(
        &mut self,
        id: i64,
        vector: Vec<f32>,
        payload: EntryPayload,
    ) -> Result<(), IndexError> {
        if self.id_to_row.contains_key(&id) {
            return Err(IndexError::DuplicateId(id));
        }
        let vector = self.normalized(vector)?;
        let row = self.rows.len();
        self.rows.push(Some(Row {
            id,
            vector,
            payload,
        }));
        self.id_to_row.insert(id, row);
        Ok(())
    }

    /// Idempotent: removing an absent id succeeds. The row is tombstoned,
    /// not compacted; rebuilds start from an empty index anyway.
    pub fn remove(&mut self, id: i64) {
        if let Some(row) = self.id_to_row.remove(&id) {
            self.rows[row] = None;
        }
    }

    /// Upsert semantics: replaces the entry if present, adds it otherwise.
    pub fn replace(
        &mut self,
        id: i64,
        vector: Vec<f32>,
        payload: EntryPayload,
    ) -> Result<(), IndexError> {
        let vector = self.normalized(vector)?;
        if let Some(&row) = self.id_to_row.get(&id) {
            self.rows[row] = Some(Row {
                id,
                vector,
                payload,
            });
            return Ok(());
        }
        let row = self.rows.len();
        self.rows.push(Some(Row {
            id,
            vector,
            payload,
        }));
        self.id_to_row.insert(id, row);
        Ok(())
    }

    /// Top-`k` entries by descending score; ties broken by lower id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let query = self.normalized(query.to_vec())?;
        let mut hits: Vec<SearchHit> = self
            .rows
            .iter()
            .flatten()
            .map(|row| {
                let cosine: f32 = row.vector.iter().zip(&query).map(|(a, b)| a * b).sum();
                SearchHit {
                    id: row.id,
                    score: ((cosine + 1.0) / 2.0).clamp(0.0, 1.0),
                    payload: row.payload.clone(),
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Live rows in row order, for snapshot writing.
    pub(crate) fn live_rows(&self) -> impl Iterator<Item = (i64, &[f32], &EntryPayload)> {
        self.rows
            .iter()
            .flatten()
            .map(|row| (row.id, row.vector.as_slice(), &row.payload))
    }

    fn normalized(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
        if norm_sq > 0.0 && (norm_sq - 1.0).abs() > 1e-6 {
            let inv = norm_sq.sqrt().recip();
            for x in &mut vector {
                *x *= inv;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str) -> EntryPayload {
        EntryPayload {
            name: name.into(),
            description: String::new(),
            parent_id: None,
            domains: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    fn small_index() -> VectorIndex {
        let mut idx = VectorIndex::new("test-model", 3);
        idx.add(1, vec![1.0, 0.0, 0.0], payload("a")).unwrap();
        idx.add(2, vec![0.0, 1.0, 0.0], payload("b")).unwrap();
        idx.add(3, vec![0.0, 0.0, 1.0], payload("c")).unwrap();
        idx
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let mut idx = small_index();
        assert!(matches!(
            idx.add(1, vec![1.0, 0.0, 0.0], payload("dup")),
            Err(IndexError::DuplicateId(1))
        ));
    }

    #[test]
    fn add_rejects_wrong_dimension() {
        let mut idx = small_index();
        assert!(matches!(
            idx.add(9, vec![1.0, 0.0], payload("short")),
            Err(IndexError::DimMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut idx = small_index();
        idx.remove(2);
        idx.remove(2);
        idx.remove(999);
        assert_eq!(idx.len(), 2);
        assert!(!idx.contains(2));
    }

    #[test]
    fn replace_upserts() {
        let mut idx = small_index();
        idx.replace(1, vec![0.0, 1.0, 0.0], payload("a2")).unwrap();
        idx.replace(42, vec![1.0, 0.0, 0.0], payload("new")).unwrap();
        assert_eq!(idx.len(), 4);
        assert_eq!(idx.payload(1).unwrap().name, "a2");
        assert_eq!(idx.payload(42).unwrap().name, "new");
    }

    #[test]
    fn search_scores_rescaled_to_unit_interval() {
        let idx = small_index();
        let hits = idx.search(&[1.0, 0.0, 0.0], 3).unwrap();
        // Identical vector: cosine 1 → score 1. Orthogonal: cosine 0 → 0.5.
        assert_eq!(hits[0].id, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn search_orders_by_score_then_lower_id() {
        let idx = small_index();
        // Equidistant from rows 2 and 3; id 2 must come first.
        let hits = idx.search(&[0.0, 1.0, 1.0], 3).unwrap();
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[1].id, 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let idx = small_index();
        assert!(matches!(
            idx.search(&[1.0, 0.0], 3),
            Err(IndexError::DimMismatch { .. })
        ));
    }

    #[test]
    fn search_skips_tombstones() {
        let mut idx = small_index();
        idx.remove(1);
        let hits = idx.search(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.id != 1));
    }

    #[test]
    fn search_twice_is_identical() {
        let idx = small_index();
        let q = [0.3, 0.5, 0.2];
        let first = idx.search(&q, 3).unwrap();
        let second = idx.search(&q, 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn vectors_are_stored_normalized() {
        let mut idx = VectorIndex::new("test-model", 2);
        idx.add(1, vec![3.0, 4.0], payload("long")).unwrap();
        // A unit query along the same direction must score cosine 1.
        let hits = idx.search(&[0.6, 0.8], 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
