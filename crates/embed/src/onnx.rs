use onnxruntime::ndarray::{Array, Array2};
use std::collections::HashSet;
use tokenizers::Tokenizer;

use crate::normalize::l2_normalize_in_place;
use crate::session::{with_assets, AssetPaths, InferenceAssets};
use crate::{EmbedConfig, EmbedError, EmbeddingBackend, ModelId};

/// Local transformer backend. Tokenizes a batch, pads to the longest
/// sequence, runs the ONNX session, and mean-pools token embeddings with
/// attention-mask weighting when the model emits token-level output.
pub struct OnnxBackend {
    assets: AssetPaths,
    model_name: String,
    dim: usize,
    max_sequence_length: usize,
}

impl OnnxBackend {
    pub fn new(cfg: &EmbedConfig) -> Result<Self, EmbedError> {
        if !cfg.model_path.is_file() {
            return Err(EmbedError::InvalidConfig(format!(
                "model file not found: {}",
                cfg.model_path.display()
            )));
        }
        if !cfg.tokenizer_path.is_file() {
            return Err(EmbedError::InvalidConfig(format!(
                "tokenizer file not found: {}",
                cfg.tokenizer_path.display()
            )));
        }
        Ok(Self {
            assets: AssetPaths {
                model: cfg.model_path.clone(),
                tokenizer: cfg.tokenizer_path.clone(),
            },
            model_name: cfg.model_name.clone(),
            dim: cfg.neural_dim,
            max_sequence_length: cfg.max_sequence_length,
        })
    }

    fn run_batch(
        &self,
        assets: &InferenceAssets,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let (encoded, max_len) =
            encode_batch(&assets.tokenizer, texts, self.max_sequence_length)?;
        let masks: Vec<Vec<i64>> = encoded.iter().map(|d| d.mask.clone()).collect();
        let (input_ids, attn_mask) = build_padded_arrays(encoded, max_len)?;
        let raw = run_inference(assets, input_ids, attn_mask)?;
        self.pool_outputs(raw, &masks, max_len)
    }

    /// The exported model may emit either sentence vectors `(batch, dim)`
    /// or token vectors `(batch, seq, dim)`; pool the latter.
    fn pool_outputs(
        &self,
        per_doc: Vec<Vec<f32>>,
        masks: &[Vec<i64>],
        seq_len: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(per_doc.len());
        for (row, mask) in per_doc.into_iter().zip(masks) {
            let mut vector = if row.len() == self.dim {
                row
            } else if row.len() == seq_len * self.dim {
                mean_pool(&row, mask, seq_len, self.dim)
            } else {
                return Err(EmbedError::Inference(format!(
                    "unexpected model output width {} for dim {}",
                    row.len(),
                    self.dim
                )));
            };
            l2_normalize_in_place(&mut vector);
            out.push(vector);
        }
        Ok(out)
    }
}

impl EmbeddingBackend for OnnxBackend {
    fn id(&self) -> ModelId {
        ModelId {
            name: self.model_name.clone(),
            dim: self.dim,
        }
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_assets(&self.assets, |assets| self.run_batch(assets, texts))
    }
}

struct EncodedDoc {
    ids: Vec<i64>,
    mask: Vec<i64>,
}

fn encode_batch(
    tokenizer: &Tokenizer,
    texts: &[String],
    max_sequence_length: usize,
) -> Result<(Vec<EncodedDoc>, usize), EmbedError> {
    let mut encoded = Vec::with_capacity(texts.len());
    let mut max_len = 0usize;
    for text in texts {
        let encoding = tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| EmbedError::Inference(e.to_string()))?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let mut mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&x| x as i64)
            .collect();
        if ids.len() > max_sequence_length {
            ids.truncate(max_sequence_length);
            mask.truncate(max_sequence_length);
        }
        max_len = max_len.max(ids.len());
        encoded.push(EncodedDoc { ids, mask });
    }
    Ok((encoded, max_len.max(1)))
}

fn build_padded_arrays(
    encoded: Vec<EncodedDoc>,
    seq_len: usize,
) -> Result<(Array2<i64>, Array2<i64>), EmbedError> {
    let batch = encoded.len();
    let mut id_storage = Vec::with_capacity(batch * seq_len);
    let mut mask_storage = Vec::with_capacity(batch * seq_len);
    for EncodedDoc { ids, mask } in encoded {
        if ids.len() != mask.len() {
            return Err(EmbedError::Inference(
                "tokenizer produced mismatched id/mask lengths".into(),
            ));
        }
        let pad = seq_len.saturating_sub(ids.len());
        id_storage.extend(ids);
        mask_storage.extend(mask);
        id_storage.extend(std::iter::repeat(0).take(pad));
        mask_storage.extend(std::iter::repeat(0).take(pad));
    }
    let input_ids = Array::from_shape_vec((batch, seq_len), id_storage)
        .map_err(|e| EmbedError::Inference(e.to_string()))?;
    let attn_mask = Array::from_shape_vec((batch, seq_len), mask_storage)
        .map_err(|e| EmbedError::Inference(e.to_string()))?;
    Ok((input_ids, attn_mask))
}

/// Feed the padded batch through the session and split the output back
/// into one row per document.
///
/// Inputs are bound in whatever order the model declares them. BERT-style
/// exports want `input_ids` and `attention_mask` and sometimes
/// `token_type_ids` (all zeros for single-segment embedding); anything
/// else means the export is not a sentence encoder we know how to drive.
fn run_inference(
    assets: &InferenceAssets,
    input_ids: Array2<i64>,
    attn_mask: Array2<i64>,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let (batch, seq_len) = input_ids.dim();
    let mut session = assets.session.borrow_mut();

    let declared: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
    let mut seen = HashSet::new();
    let mut feeds = Vec::with_capacity(declared.len());
    for name in &declared {
        if !seen.insert(name.as_str()) {
            return Err(EmbedError::InvalidConfig(format!(
                "model declares input '{name}' more than once"
            )));
        }
        feeds.push(match name.as_str() {
            "input_ids" => input_ids.clone().into_dyn(),
            "attention_mask" => attn_mask.clone().into_dyn(),
            "token_type_ids" => Array2::<i64>::zeros((batch, seq_len)).into_dyn(),
            other => {
                return Err(EmbedError::Inference(format!(
                    "unsupported model input '{other}'"
                )))
            }
        });
    }
    if feeds.is_empty() {
        return Err(EmbedError::Inference("model declares no inputs".into()));
    }

    let outputs = session
        .run::<i64, f32, _>(feeds)
        .map_err(|e| EmbedError::Inference(e.to_string()))?;
    let tensor = outputs
        .first()
        .ok_or_else(|| EmbedError::Inference("model produced no outputs".into()))?;

    if batch == 0 {
        return Ok(Vec::new());
    }
    let total = tensor.len();
    if total == 0 {
        return Ok(vec![Vec::new(); batch]);
    }
    if total % batch != 0 {
        return Err(EmbedError::Inference(format!(
            "model output of {total} values does not divide across batch {batch}"
        )));
    }

    let width = total / batch;
    let mut rows = Vec::with_capacity(batch);
    let mut row = Vec::with_capacity(width);
    for value in tensor.iter() {
        row.push(*value);
        if row.len() == width {
            rows.push(std::mem::replace(&mut row, Vec::with_capacity(width)));
        }
    }
    Ok(rows)
}

/// Attention-mask-weighted mean over the token axis.
fn mean_pool(tokens: &[f32], mask: &[i64], seq_len: usize, dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    let mut count = 0.0f32;
    for (t, chunk) in tokens.chunks(dim).enumerate().take(seq_len) {
        if mask.get(t).copied().unwrap_or(0) == 0 {
            continue;
        }
        for (acc, &x) in pooled.iter_mut().zip(chunk) {
            *acc += x;
        }
        count += 1.0;
    }
    if count > 0.0 {
        for x in &mut pooled {
            *x /= count;
        }
    }
    pooled
}
