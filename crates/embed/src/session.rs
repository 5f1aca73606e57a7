use once_cell::sync::OnceCell;
use onnxruntime::{environment::Environment, session::Session};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tokenizers::Tokenizer;

use crate::EmbedError;

/// Cache key: the full asset identity of a neural backend. The model and
/// tokenizer files travel as a pair; keying on both keeps two backends
/// that happen to share a model file but not a tokenizer from silently
/// swapping tokenizers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AssetPaths {
    pub(crate) model: PathBuf,
    pub(crate) tokenizer: PathBuf,
}

/// Everything one thread needs to embed: the tokenizer plus a live ONNX
/// session. Sessions are not `Sync`, so each worker thread loads its own
/// copy on first use and reuses it for every later batch; the blocking
/// pool keeps threads alive long enough for this to pay off.
pub(crate) struct InferenceAssets {
    pub(crate) tokenizer: Tokenizer,
    pub(crate) session: RefCell<Session<'static>>,
}

static ORT_RUNTIME: OnceCell<Environment> = OnceCell::new();

thread_local! {
    static LOADED: RefCell<HashMap<AssetPaths, Rc<InferenceAssets>>> =
        RefCell::new(HashMap::new());
}

/// Run `work` against this thread's cached assets for `paths`, loading
/// them first if this thread has never embedded with this pair.
pub(crate) fn with_assets<R>(
    paths: &AssetPaths,
    work: impl FnOnce(&InferenceAssets) -> Result<R, EmbedError>,
) -> Result<R, EmbedError> {
    let assets = LOADED.with(|cache| -> Result<Rc<InferenceAssets>, EmbedError> {
        if let Some(hit) = cache.borrow().get(paths) {
            return Ok(hit.clone());
        }
        let loaded = Rc::new(load_assets(paths)?);
        cache.borrow_mut().insert(paths.clone(), loaded.clone());
        Ok(loaded)
    })?;
    work(&assets)
}

fn load_assets(paths: &AssetPaths) -> Result<InferenceAssets, EmbedError> {
    let tokenizer = Tokenizer::from_file(&paths.tokenizer)
        .map_err(|e| EmbedError::InvalidConfig(format!("tokenizer load failed: {e}")))?;
    let runtime = ORT_RUNTIME.get_or_try_init(|| {
        Environment::builder()
            .with_name("kpath-embed")
            .build()
            .map_err(|e| EmbedError::Inference(e.to_string()))
    })?;
    let session = runtime
        .new_session_builder()
        .and_then(|builder| builder.with_model_from_file(paths.model.clone()))
        .map_err(|e| EmbedError::Inference(e.to_string()))?;
    Ok(InferenceAssets {
        tokenizer,
        session: RefCell::new(session),
    })
}
