//! Model source resolution.
//!
//! Decides, once per load attempt, which directory the backend loads
//! from and whether it may use the network:
//! 1. user cache already has the model -> cache, network allowed
//! 2. bundled asset directory has it -> bundled, offline only
//! 3. neither -> cache, network allowed (download)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::has_model;

/// Where the loaded model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Bundled,
    Cache,
    /// Not resolved yet
    #[default]
    Unknown,
}

/// Decision record for one load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSourceResolution {
    pub effective_dir: PathBuf,
    pub local_files_only: bool,
    pub source: ModelSource,
    /// True when neither directory had the model and it will be fetched.
    pub needs_download: bool,
}

/// Resolve where to load `model_id` from.
pub fn resolve_model_source(
    model_id: &str,
    cache_dir: &Path,
    bundled_dir: Option<&Path>,
) -> ModelSourceResolution {
    if has_model(cache_dir, model_id) {
        debug!(dir = ?cache_dir, "Model found in cache");
        return ModelSourceResolution {
            effective_dir: cache_dir.to_path_buf(),
            local_files_only: false,
            source: ModelSource::Cache,
            needs_download: false,
        };
    }

    if let Some(bundled) = bundled_dir {
        if has_model(bundled, model_id) {
            debug!(dir = ?bundled, "Model found in bundled assets");
            return ModelSourceResolution {
                effective_dir: bundled.to_path_buf(),
                local_files_only: true,
                source: ModelSource::Bundled,
                needs_download: false,
            };
        }
    }

    debug!(dir = ?cache_dir, "Model not found locally, download permitted");
    ModelSourceResolution {
        effective_dir: cache_dir.to_path_buf(),
        local_files_only: false,
        source: ModelSource::Cache,
        needs_download: true,
    }
}
