use crate::normalize::l2_normalize_in_place;
use crate::{EmbedError, EmbeddingBackend, ModelId};

/// Deterministic hash-derived vectors. No semantics, but stable: the same
/// text always maps to the same unit vector, which is all the index,
/// snapshot, and server tests need.
pub struct HashedBackend {
    dim: usize,
}

impl HashedBackend {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let h = fxhash::hash64(text.as_bytes());
        let mut v = vec![0.0f32; self.dim];
        for (idx, value) in v.iter_mut().enumerate() {
            *value = ((h >> (idx % 32)) as f32 * 0.0001 + idx as f32 * 0.001).sin();
        }
        l2_normalize_in_place(&mut v);
        v
    }
}

impl EmbeddingBackend for HashedBackend {
    fn id(&self) -> ModelId {
        ModelId {
            name: "hashed-stub".into(),
            dim: self.dim,
        }
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_vector() {
        let backend = HashedBackend::new(16);
        let a = backend.embed(&["hello".into()]).unwrap();
        let b = backend.embed(&["hello".into()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_different_vector() {
        let backend = HashedBackend::new(16);
        let out = backend.embed(&["hello".into(), "world".into()]).unwrap();
        assert_ne!(out[0], out[1]);
    }

    #[test]
    fn vectors_are_unit_length() {
        let backend = HashedBackend::new(32);
        let out = backend.embed(&["anything at all".into()]).unwrap();
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
