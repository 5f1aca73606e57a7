//! Atomic on-disk snapshots of a [`VectorIndex`].
//!
//! Two files per index under the store directory:
//!
//! - `<name>.vec` — a 32-byte header (`KPVX` magic, format version, dtype,
//!   dim as u16 LE, count as u32 LE; the remaining bytes are reserved pad)
//!   followed by `count * dim * 4` bytes of little-endian IEEE-754 floats,
//!   stored L2-normalized.
//! - `<name>.meta.json` — model identifier, dim, count, composition
//!   version, id map, payload map, and build timestamp.
//!
//! Both files are written to `.tmp` siblings, fsynced, and renamed into
//! place, so a reader loading mid-write sees either the old snapshot or the
//! new one, never a mix. On load, the recorded model identifier and
//! composition version must match the caller's; any difference is an
//! `Incompatible` error and the caller schedules a rebuild instead of
//! silently mixing vector spaces.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::{EntryPayload, SnapshotError, VectorIndex};

const MAGIC: [u8; 4] = *b"KPVX";
const FORMAT_VERSION: u8 = 1;
const DTYPE_F32: u8 = 1;
const HEADER_LEN: usize = 32;

/// Sidecar metadata persisted next to the vector blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub model_name: String,
    pub dim: usize,
    pub count: usize,
    pub compose_version: String,
    /// External ids in blob row order.
    pub id_map: Vec<i64>,
    /// Payloads aligned with `id_map`.
    pub payload_map: Vec<EntryPayload>,
    pub built_at: String,
}

/// Snapshot reader/writer rooted at one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn vec_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.vec"))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.meta.json"))
    }

    /// Persist `index` under `name`, atomically. Tombstones are compacted
    /// out of the written blob.
    pub fn write(
        &self,
        name: &str,
        index: &VectorIndex,
        compose_version: &str,
        built_at: DateTime<Utc>,
    ) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let mut id_map = Vec::with_capacity(index.len());
        let mut payload_map = Vec::with_capacity(index.len());
        let mut blob = Vec::with_capacity(HEADER_LEN + index.len() * index.dim() * 4);
        blob.extend_from_slice(&header(index.dim(), index.len())?);
        for (id, vector, payload) in index.live_rows() {
            id_map.push(id);
            payload_map.push(payload.clone());
            for value in vector {
                blob.extend_from_slice(&value.to_le_bytes());
            }
        }

        let meta = SnapshotMeta {
            model_name: index.model().to_owned(),
            dim: index.dim(),
            count: id_map.len(),
            compose_version: compose_version.to_owned(),
            id_map,
            payload_map,
            built_at: built_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| SnapshotError::Corrupt(format!("meta encode failed: {e}")))?;

        // Blob first, then meta: a crash between the two renames leaves a
        // blob/meta pair that fails the count cross-check and is rebuilt.
        write_atomic(&self.vec_path(name), &blob)?;
        write_atomic(&self.meta_path(name), &meta_bytes)?;
        tracing::debug!(name, count = meta.count, dim = meta.dim, "snapshot written");
        Ok(())
    }

    /// Load the `name` snapshot, verifying structural integrity and
    /// compatibility with the caller's model identifier and composition
    /// version.
    pub fn load(
        &self,
        name: &str,
        expected_model: &str,
        expected_dim: usize,
        expected_compose_version: &str,
    ) -> Result<(VectorIndex, SnapshotMeta), SnapshotError> {
        let meta_path = self.meta_path(name);
        let vec_path = self.vec_path(name);
        if !meta_path.is_file() || !vec_path.is_file() {
            return Err(SnapshotError::Missing(name.to_owned()));
        }

        let meta: SnapshotMeta = serde_json::from_slice(&fs::read(&meta_path)?)
            .map_err(|e| SnapshotError::Corrupt(format!("meta decode failed: {e}")))?;

        if meta.model_name != expected_model || meta.dim != expected_dim {
            return Err(SnapshotError::Incompatible(format!(
                "snapshot is {} ({}d), current backend is {} ({}d)",
                meta.model_name, meta.dim, expected_model, expected_dim
            )));
        }
        if meta.compose_version != expected_compose_version {
            return Err(SnapshotError::Incompatible(format!(
                "snapshot composed under {}, current rule is {}",
                meta.compose_version, expected_compose_version
            )));
        }
        if meta.id_map.len() != meta.count || meta.payload_map.len() != meta.count {
            return Err(SnapshotError::Corrupt(
                "id/payload maps disagree with recorded count".into(),
            ));
        }

        let mut blob = Vec::new();
        File::open(&vec_path)?.read_to_end(&mut blob)?;
        let (dim, count) = parse_header(&blob)?;
        if dim != meta.dim || count != meta.count {
            return Err(SnapshotError::Corrupt(format!(
                "blob header ({dim}d, {count} rows) disagrees with meta ({}d, {} rows)",
                meta.dim, meta.count
            )));
        }
        let expected_len = HEADER_LEN + count * dim * 4;
        if blob.len() != expected_len {
            return Err(SnapshotError::Corrupt(format!(
                "blob is {} bytes, expected {expected_len}",
                blob.len()
            )));
        }

        let mut index = VectorIndex::new(meta.model_name.clone(), dim);
        let floats = &blob[HEADER_LEN..];
        for (row, (&id, payload)) in meta.id_map.iter().zip(&meta.payload_map).enumerate() {
            let start = row * dim * 4;
            let vector: Vec<f32> = floats[start..start + dim * 4]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            index
                .add(id, vector, payload.clone())
                .map_err(|e| SnapshotError::Corrupt(format!("row {row}: {e}")))?;
        }
        Ok((index, meta))
    }

    /// Whether both snapshot files exist (no compatibility check).
    pub fn exists(&self, name: &str) -> bool {
        self.vec_path(name).is_file() && self.meta_path(name).is_file()
    }
}

fn header(dim: usize, count: usize) -> Result<[u8; HEADER_LEN], SnapshotError> {
    let dim16 = u16::try_from(dim)
        .map_err(|_| SnapshotError::Corrupt(format!("dimension {dim} exceeds u16")))?;
    let count32 = u32::try_from(count)
        .map_err(|_| SnapshotError::Corrupt(format!("count {count} exceeds u32")))?;
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    header[4] = FORMAT_VERSION;
    header[5] = DTYPE_F32;
    header[6..8].copy_from_slice(&dim16.to_le_bytes());
    header[8..12].copy_from_slice(&count32.to_le_bytes());
    // Bytes 12..32 are reserved.
    Ok(header)
}

fn parse_header(blob: &[u8]) -> Result<(usize, usize), SnapshotError> {
    if blob.len() < HEADER_LEN {
        return Err(SnapshotError::Corrupt("blob shorter than header".into()));
    }
    if blob[..4] != MAGIC {
        return Err(SnapshotError::Corrupt("bad magic".into()));
    }
    if blob[4] != FORMAT_VERSION {
        return Err(SnapshotError::Incompatible(format!(
            "blob format version {} (supported: {FORMAT_VERSION})",
            blob[4]
        )));
    }
    if blob[5] != DTYPE_F32 {
        return Err(SnapshotError::Corrupt(format!("unknown dtype {}", blob[5])));
    }
    let dim = u16::from_le_bytes([blob[6], blob[7]]) as usize;
    let count = u32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]) as usize;
    Ok((dim, count))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(dir) = path.parent() {
        // Persist the rename itself.
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CapabilityTag;
    use tempfile::TempDir;

    fn payload(name: &str) -> EntryPayload {
        EntryPayload {
            name: name.into(),
            description: format!("{name} description"),
            parent_id: Some(7),
            domains: vec!["Finance".into()],
            capabilities: vec![CapabilityTag {
                name: "pay".into(),
                description: "process payments".into(),
            }],
        }
    }

    fn sample_index() -> VectorIndex {
        let mut idx = VectorIndex::new("test-model", 4);
        idx.add(3, vec![1.0, 0.0, 0.0, 0.0], payload("c")).unwrap();
        idx.add(1, vec![0.0, 1.0, 0.0, 0.0], payload("a")).unwrap();
        idx.add(2, vec![0.5, 0.5, 0.5, 0.5], payload("b")).unwrap();
        idx
    }

    #[test]
    fn round_trip_preserves_search_results() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let index = sample_index();
        store
            .write("services", &index, "compose-v1", Utc::now())
            .unwrap();

        let (loaded, meta) = store
            .load("services", "test-model", 4, "compose-v1")
            .unwrap();
        assert_eq!(meta.count, 3);

        let q = [0.2, 0.9, 0.1, 0.0];
        assert_eq!(index.search(&q, 3).unwrap(), loaded.search(&q, 3).unwrap());
    }

    #[test]
    fn tombstones_compacted_on_write() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let mut index = sample_index();
        index.remove(2);
        store
            .write("services", &index, "compose-v1", Utc::now())
            .unwrap();
        let (loaded, meta) = store
            .load("services", "test-model", 4, "compose-v1")
            .unwrap();
        assert_eq!(meta.count, 2);
        assert!(!loaded.contains(2));
    }

    #[test]
    fn model_mismatch_is_incompatible() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write("tools", &sample_index(), "compose-v1", Utc::now())
            .unwrap();
        assert!(matches!(
            store.load("tools", "other-model", 4, "compose-v1"),
            Err(SnapshotError::Incompatible(_))
        ));
        assert!(matches!(
            store.load("tools", "test-model", 8, "compose-v1"),
            Err(SnapshotError::Incompatible(_))
        ));
    }

    #[test]
    fn compose_version_mismatch_is_incompatible() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write("tools", &sample_index(), "compose-v1", Utc::now())
            .unwrap();
        assert!(matches!(
            store.load("tools", "test-model", 4, "compose-v2"),
            Err(SnapshotError::Incompatible(_))
        ));
    }

    #[test]
    fn missing_snapshot_reports_missing() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.load("nope", "test-model", 4, "compose-v1"),
            Err(SnapshotError::Missing(_))
        ));
    }

    #[test]
    fn truncated_blob_reports_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write("services", &sample_index(), "compose-v1", Utc::now())
            .unwrap();
        let blob_path = dir.path().join("services.vec");
        let blob = fs::read(&blob_path).unwrap();
        fs::write(&blob_path, &blob[..blob.len() - 4]).unwrap();
        assert!(matches!(
            store.load("services", "test-model", 4, "compose-v1"),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn header_layout_is_32_bytes_little_endian() {
        let h = header(384, 1234).unwrap();
        assert_eq!(&h[..4], b"KPVX");
        assert_eq!(h[4], 1);
        assert_eq!(h[5], 1);
        assert_eq!(u16::from_le_bytes([h[6], h[7]]), 384);
        assert_eq!(u32::from_le_bytes([h[8], h[9], h[10], h[11]]), 1234);
        assert_eq!(h.len(), 32);
    }
}
