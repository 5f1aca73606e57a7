use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::retry::RetryPolicy;

/// Which backend to run. Selected once at process startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Neural,
    Lexical,
    Hashed,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "neural" => Ok(BackendKind::Neural),
            "lexical" => Ok(BackendKind::Lexical),
            "hashed" => Ok(BackendKind::Hashed),
            other => Err(format!("unknown embedding backend '{other}'")),
        }
    }
}

/// Backend selection plus the knobs each backend reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedConfig {
    pub backend: BackendKind,
    /// Friendly label recorded in the neural [`ModelId`](crate::ModelId).
    pub model_name: String,
    /// ONNX model file for the neural backend.
    pub model_path: PathBuf,
    /// `tokenizer.json` for the neural backend.
    pub tokenizer_path: PathBuf,
    /// Output dimension of the neural model (and of the hashed stub).
    pub neural_dim: usize,
    /// SVD target dimension for the lexical backend.
    pub lexical_dim: usize,
    /// Where the lexical backend persists its fitted artifacts.
    pub model_dir: PathBuf,
    /// Tokenized sequences beyond this are truncated before inference.
    pub max_sequence_length: usize,
    /// Admission bound in front of the backend.
    pub queue_depth: usize,
    pub retry: RetryPolicy,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Neural,
            model_name: "bge-small-en-v1.5".into(),
            model_path: PathBuf::from("./models/bge-small-en-v1.5/onnx/model.onnx"),
            tokenizer_path: PathBuf::from("./models/bge-small-en-v1.5/tokenizer.json"),
            neural_dim: 384,
            lexical_dim: 64,
            model_dir: PathBuf::from("data/models"),
            max_sequence_length: 512,
            queue_depth: 256,
            retry: RetryPolicy::default(),
        }
    }
}
