use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::normalize::l2_normalize_in_place;
use crate::{EmbedConfig, EmbedError, EmbeddingBackend, ModelId};

const ARTIFACT_FILE: &str = "lexical.json";
const POWER_ITERATIONS: usize = 60;

/// TF-IDF over the fitted corpus, reduced by truncated SVD.
///
/// Not a production backend; it exists so the system runs end to end
/// without the ML stack. `fit` derives the vocabulary, IDF table, and SVD
/// projection from the current documents and persists them under the model
/// directory; a process restart reloads the artifacts so queries keep
/// projecting into the same space as the persisted index snapshots.
///
/// The identifier carries a digest of the fitted vocabulary. A refit over a
/// changed corpus produces a different identifier, which fails the snapshot
/// compatibility check and forces the rebuild that keeps index and model
/// consistent.
pub struct LexicalBackend {
    dim: usize,
    artifact_path: PathBuf,
    state: RwLock<Option<LexicalModel>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LexicalModel {
    dim: usize,
    /// Term → vocabulary slot. BTreeMap keeps the serialized artifact
    /// stable across fits of the same corpus.
    vocab: BTreeMap<String, usize>,
    idf: Vec<f32>,
    /// Row-major `vocab_len × dim` projection (right singular vectors).
    projection: Vec<f32>,
    digest: String,
}

impl LexicalBackend {
    /// Open the backend, reloading persisted artifacts when present.
    pub fn open(cfg: &EmbedConfig) -> Result<Self, EmbedError> {
        let artifact_path = cfg.model_dir.join(ARTIFACT_FILE);
        let state = match fs::read_to_string(&artifact_path) {
            Ok(doc) => {
                let model: LexicalModel = serde_json::from_str(&doc)
                    .map_err(|e| EmbedError::InvalidConfig(format!("bad lexical artifact: {e}")))?;
                if model.dim != cfg.lexical_dim {
                    tracing::warn!(
                        artifact_dim = model.dim,
                        configured_dim = cfg.lexical_dim,
                        "discarding lexical artifact with mismatched dimension"
                    );
                    None
                } else {
                    Some(model)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(EmbedError::Io(e)),
        };
        Ok(Self {
            dim: cfg.lexical_dim,
            artifact_path,
            state: RwLock::new(state),
        })
    }

    fn persist(&self, model: &LexicalModel) -> Result<(), EmbedError> {
        if let Some(dir) = self.artifact_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.artifact_path.with_extension("json.tmp");
        let doc = serde_json::to_vec(model)
            .map_err(|e| EmbedError::InvalidConfig(format!("artifact encode failed: {e}")))?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&doc)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.artifact_path)?;
        Ok(())
    }

    fn project(&self, model: &LexicalModel, text: &str) -> Vec<f32> {
        let vocab_len = model.idf.len();
        let mut weights: HashMap<usize, f32> = HashMap::new();
        for token in tokenize(text) {
            if let Some(&slot) = model.vocab.get(token.as_str()) {
                *weights.entry(slot).or_insert(0.0) += model.idf[slot];
            }
        }
        let mut sparse: Vec<(usize, f32)> = weights.into_iter().collect();
        let norm_sq: f32 = sparse.iter().map(|(_, w)| w * w).sum();
        if norm_sq > 0.0 {
            let inv = norm_sq.sqrt().recip();
            for (_, w) in &mut sparse {
                *w *= inv;
            }
        }
        let mut out = vec![0.0f32; self.dim];
        for (slot, w) in sparse {
            let row = &model.projection[slot * self.dim..(slot + 1) * self.dim];
            debug_assert!(slot < vocab_len);
            for (acc, &p) in out.iter_mut().zip(row) {
                *acc += w * p;
            }
        }
        l2_normalize_in_place(&mut out);
        out
    }
}

impl EmbeddingBackend for LexicalBackend {
    fn id(&self) -> ModelId {
        let name = match self.state.read().ok().and_then(|s| {
            s.as_ref().map(|m| format!("lexical-tfidf-svd-v1+{}", m.digest))
        }) {
            Some(name) => name,
            None => "lexical-tfidf-svd-v1".into(),
        };
        ModelId {
            name,
            dim: self.dim,
        }
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let guard = self
            .state
            .read()
            .map_err(|_| EmbedError::Inference("lexical state poisoned".into()))?;
        let model = guard.as_ref().ok_or(EmbedError::NotFitted)?;
        Ok(texts.iter().map(|t| self.project(model, t)).collect())
    }

    fn fit(&self, corpus: &[String]) -> Result<(), EmbedError> {
        let model = fit_model(corpus, self.dim)?;
        self.persist(&model)?;
        let mut guard = self
            .state
            .write()
            .map_err(|_| EmbedError::Inference("lexical state poisoned".into()))?;
        *guard = Some(model);
        Ok(())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

fn fit_model(corpus: &[String], dim: usize) -> Result<LexicalModel, EmbedError> {
    if corpus.is_empty() {
        return Err(EmbedError::InvalidConfig(
            "cannot fit lexical model on an empty corpus".into(),
        ));
    }

    let docs: Vec<Vec<String>> = corpus.iter().map(|t| tokenize(t)).collect();

    let mut df: BTreeMap<String, usize> = BTreeMap::new();
    for doc in &docs {
        let mut seen: Vec<&String> = doc.iter().collect();
        seen.sort();
        seen.dedup();
        for term in seen {
            *df.entry(term.clone()).or_insert(0) += 1;
        }
    }

    let vocab: BTreeMap<String, usize> = df
        .keys()
        .enumerate()
        .map(|(slot, term)| (term.clone(), slot))
        .collect();
    let n_docs = docs.len();
    let idf: Vec<f32> = df
        .values()
        .map(|&count| ((1.0 + n_docs as f32) / (1.0 + count as f32)).ln() + 1.0)
        .collect();

    // Dense doc-term matrix of L2-normalized TF-IDF rows. Acceptable for
    // the corpus sizes this backend serves; the neural backend owns scale.
    let vocab_len = vocab.len();
    let mut matrix = Array2::<f32>::zeros((n_docs, vocab_len));
    for (row, doc) in docs.iter().enumerate() {
        for token in doc {
            let slot = vocab[token];
            matrix[[row, slot]] += idf[slot];
        }
        let norm_sq: f32 = matrix.row(row).iter().map(|x| x * x).sum();
        if norm_sq > 0.0 {
            let inv = norm_sq.sqrt().recip();
            matrix.row_mut(row).mapv_inplace(|x| x * inv);
        }
    }

    let projection = truncated_svd(matrix, vocab_len, dim);
    let digest = vocab_digest(&vocab, &idf);

    Ok(LexicalModel {
        dim,
        vocab,
        idf,
        projection,
        digest,
    })
}

/// Top-`dim` right singular vectors by power iteration with deflation.
/// Initialization is hash-seeded so fitting the same corpus twice yields
/// the same projection bit for bit.
fn truncated_svd(mut matrix: Array2<f32>, vocab_len: usize, dim: usize) -> Vec<f32> {
    let n_docs = matrix.nrows();
    let components = dim.min(vocab_len).min(n_docs);
    let mut projection = vec![0.0f32; vocab_len * dim];

    for comp in 0..components {
        let mut v = seeded_unit_vector(vocab_len, comp);
        for _ in 0..POWER_ITERATIONS {
            let u: Array1<f32> = matrix.dot(&v);
            let mut next: Array1<f32> = matrix.t().dot(&u);
            let norm: f32 = next.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-9 {
                break;
            }
            next.mapv_inplace(|x| x / norm);
            v = next;
        }
        let u: Array1<f32> = matrix.dot(&v);
        let sigma: f32 = u.iter().map(|x| x * x).sum::<f32>().sqrt();
        if sigma < 1e-7 {
            break;
        }
        for (slot, &value) in v.iter().enumerate() {
            projection[slot * dim + comp] = value;
        }
        // Deflate: remove the found component so the next iteration
        // converges to the next singular vector.
        for row in 0..n_docs {
            let scale = u[row];
            for slot in 0..vocab_len {
                matrix[[row, slot]] -= scale * v[slot];
            }
        }
    }
    projection
}

fn seeded_unit_vector(len: usize, component: usize) -> Array1<f32> {
    let mut v = Array1::<f32>::zeros(len);
    for (i, x) in v.iter_mut().enumerate() {
        let h = fxhash::hash64(&(component as u64, i as u64));
        *x = ((h >> 11) as f32 / (1u64 << 53) as f32) - 0.5;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    v
}

fn vocab_digest(vocab: &BTreeMap<String, usize>, idf: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for term in vocab.keys() {
        hasher.update(term.as_bytes());
        hasher.update([0u8]);
    }
    for weight in idf {
        hasher.update(weight.to_le_bytes());
    }
    let digest = hasher.finalize();
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}
