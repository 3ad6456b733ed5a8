//! Model file caching.
//!
//! Model files live under `<root>/<model_id>/`. Files missing from the
//! cache are downloaded from the HuggingFace Hub when the network is
//! permitted.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::EmbeddingError;

/// Files whose presence means a directory "has" the model.
pub const MARKER_FILES: &[&str] = &["config.json", "tokenizer.json"];

/// Files the Candle backend needs to build the encoder.
pub const MODEL_FILES: &[&str] = &["config.json", "tokenizer.json", "model.safetensors"];

/// Model cache location for one model.
#[derive(Debug, Clone)]
pub struct ModelCache {
    /// Root directory (cache or bundled asset directory)
    pub root: PathBuf,
    /// Model repository ID
    pub model_id: String,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>, model_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            model_id: model_id.into(),
        }
    }

    /// `<root>/<model_id>`; a namespaced id becomes nested directories.
    pub fn model_dir(&self) -> PathBuf {
        self.root.join(&self.model_id)
    }

    /// Check that every file the encoder needs is present.
    pub fn is_complete(&self) -> bool {
        let model_dir = self.model_dir();
        MODEL_FILES.iter().all(|f| model_dir.join(f).exists())
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.model_dir().join(filename)
    }
}

/// Whether `<dir>/<model_id>/` contains both marker files.
pub fn has_model(dir: &Path, model_id: &str) -> bool {
    let model_dir = dir.join(model_id);
    MARKER_FILES.iter().all(|f| model_dir.join(f).is_file())
}

/// Paths to model files
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

/// Get model files, downloading missing ones when `allow_download` is set.
///
/// Returns paths to config.json, tokenizer.json, and model.safetensors.
pub fn get_or_download_model(
    cache: &ModelCache,
    allow_download: bool,
) -> Result<ModelPaths, EmbeddingError> {
    let model_dir = cache.model_dir();

    if cache.is_complete() {
        debug!(path = ?model_dir, "Using cached model");
    } else if allow_download {
        info!(repo = %cache.model_id, "Downloading model files...");
        download_model_files(cache)?;
    } else {
        let missing: Vec<&str> = MODEL_FILES
            .iter()
            .copied()
            .filter(|f| !cache.file_path(f).exists())
            .collect();
        return Err(EmbeddingError::ModelNotFound(format!(
            "{} missing {:?} (network disabled)",
            model_dir.display(),
            missing
        )));
    }

    Ok(ModelPaths {
        config: model_dir.join("config.json"),
        tokenizer: model_dir.join("tokenizer.json"),
        weights: model_dir.join("model.safetensors"),
    })
}

/// Download missing model files from HuggingFace Hub
fn download_model_files(cache: &ModelCache) -> Result<(), EmbeddingError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
    let repo = api.model(cache.model_id.clone());

    std::fs::create_dir_all(cache.model_dir())?;

    for filename in MODEL_FILES {
        let dest_path = cache.file_path(filename);
        if dest_path.exists() {
            continue;
        }
        info!(file = filename, "Downloading...");
        let source_path = repo
            .get(filename)
            .map_err(|e| EmbeddingError::Download(format!("{}: {}", filename, e)))?;

        std::fs::copy(&source_path, &dest_path)?;
        debug!(file = filename, "Downloaded to {:?}", dest_path);
    }

    Ok(())
}
