//! Model backend capability.
//!
//! The lifecycle controller never depends on a concrete inference
//! library. A [`ModelBackend`] turns a model identifier plus
//! [`LoadOptions`] into an [`InferenceHandle`]; the handle turns text into
//! an [`InferenceOutput`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use prizm_types::PrecisionMode;

use crate::error::EmbeddingError;

/// Options passed to [`ModelBackend::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub precision: PrecisionMode,
    /// Directory holding `<model_id>/` with the model files.
    pub cache_dir: PathBuf,
    /// Never touch the network when set.
    pub local_files_only: bool,
}

/// Token pooling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    /// Mean over non-padding tokens
    #[default]
    Mean,
    /// First ([CLS]) token
    Cls,
}

/// Options passed to [`InferenceHandle::infer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceOptions {
    pub pooling: Pooling,
    /// L2-normalize the pooled vector.
    pub normalize: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            normalize: true,
        }
    }
}

/// Raw inference result.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    /// Flat vector data
    pub data: Vec<f32>,
    /// Tensor shape, e.g. `[1, 384]`, when the backend reports one
    pub shape: Option<Vec<usize>>,
}

impl InferenceOutput {
    pub fn new(data: Vec<f32>, shape: Option<Vec<usize>>) -> Self {
        Self { data, shape }
    }

    /// Output dimensionality from the last shape axis.
    pub fn dimension(&self) -> Option<usize> {
        self.shape.as_ref().and_then(|s| s.last().copied())
    }
}

/// A loaded model that can run inference.
#[async_trait]
pub trait InferenceHandle: Send + Sync {
    /// Embed one text.
    async fn infer(
        &self,
        text: &str,
        options: &InferenceOptions,
    ) -> Result<InferenceOutput, EmbeddingError>;

    /// Release backend resources. Optional; defaults to a no-op.
    async fn release(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

/// Something that can load embedding models.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
    ) -> Result<Arc<dyn InferenceHandle>, EmbeddingError>;
}
