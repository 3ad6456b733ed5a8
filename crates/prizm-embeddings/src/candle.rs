//! Candle-based embedding backend.
//!
//! Loads a BERT sentence encoder (all-MiniLM-L6-v2 by default, 384
//! dimensions) from safetensors and runs it on the CPU. Loading and
//! inference are CPU-bound and run on the blocking thread pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use prizm_types::PrecisionMode;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::backend::{
    InferenceHandle, InferenceOptions, InferenceOutput, LoadOptions, ModelBackend, Pooling,
};
use crate::cache::{get_or_download_model, ModelCache, ModelPaths};
use crate::error::EmbeddingError;
use crate::model::normalize;

/// Embedding dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length
pub const MAX_SEQ_LENGTH: usize = 256;

/// Candle BERT sentence encoder.
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl CandleEmbedder {
    /// Load from explicit file paths
    pub fn load_from_paths(
        paths: &ModelPaths,
        dtype: DType,
        model_id: &str,
    ) -> Result<Self, EmbeddingError> {
        info!(model = %model_id, ?dtype, "Loading embedding model...");

        // CPU only; GPU devices can be added behind feature flags
        let device = Device::Cpu;

        let config = read_config(&paths.config)?;
        let hidden_size = config.hidden_size;

        let tokenizer = Tokenizer::from_file(&paths.tokenizer)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[paths.weights.clone()], dtype, &device)?
        };

        let model = BertModel::load(vb, &config)?;

        info!(
            dim = hidden_size,
            max_seq = MAX_SEQ_LENGTH,
            "Model loaded successfully"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: hidden_size,
        })
    }

    /// Encode texts into pooled vectors of shape `[texts.len(), dim]`.
    pub fn encode(
        &self,
        texts: &[&str],
        pooling: Pooling,
        normalize_output: bool,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(count = texts.len(), "Embedding batch");

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(MAX_SEQ_LENGTH);

        let mut input_ids: Vec<u32> = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask: Vec<u32> = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let truncated_len = ids.len().min(max_len);

            input_ids.extend_from_slice(&ids[..truncated_len]);
            attention_mask.extend_from_slice(&mask[..truncated_len]);
            // Pad to max_len
            input_ids.extend(std::iter::repeat(0).take(max_len - truncated_len));
            attention_mask.extend(std::iter::repeat(0).take(max_len - truncated_len));
        }

        let batch_size = texts.len();
        let input_ids = Tensor::from_vec(input_ids, (batch_size, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(attention_mask, (batch_size, max_len), &self.device)?;
        let token_type_ids = Tensor::zeros_like(&input_ids)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?
            .to_dtype(DType::F32)?;

        let pooled = match pooling {
            Pooling::Mean => mean_pooling(&output, &attention_mask)?,
            Pooling::Cls => output.i((.., 0))?,
        };

        let pooled_vec: Vec<Vec<f32>> = pooled.to_vec2()?;
        let vectors = pooled_vec
            .into_iter()
            .map(|v| {
                if normalize_output {
                    normalize(v)
                } else {
                    v
                }
            })
            .collect::<Vec<_>>();

        debug!(count = vectors.len(), dim = self.dimension, "Batch complete");
        Ok(vectors)
    }
}

fn read_config(path: &Path) -> Result<BertConfig, EmbeddingError> {
    let config_str = std::fs::read_to_string(path)?;
    serde_json::from_str(&config_str)
        .map_err(|e| EmbeddingError::ModelNotFound(format!("Invalid config: {}", e)))
}

/// Mean pooling over token embeddings (excluding padding)
fn mean_pooling(embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor, EmbeddingError> {
    let mask = attention_mask
        .unsqueeze(2)?
        .broadcast_as(embeddings.shape())?
        .to_dtype(DType::F32)?;

    let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;

    // Number of real tokens, clamped to avoid division by zero
    let mask_sum = mask.sum(1)?.clamp(1e-9, f64::MAX)?;

    Ok(sum.broadcast_div(&mask_sum)?)
}

/// Map a precision mode onto a Candle dtype.
pub fn dtype_for(precision: PrecisionMode) -> Result<DType, EmbeddingError> {
    if precision.is_quantized() {
        return Err(EmbeddingError::UnsupportedPrecision(format!(
            "{} (candle BERT loads fp32/fp16 safetensors only)",
            precision
        )));
    }
    Ok(match precision {
        PrecisionMode::Fp16 => DType::F16,
        _ => DType::F32,
    })
}

/// Inference handle over a loaded [`CandleEmbedder`].
pub struct CandleHandle {
    embedder: Arc<CandleEmbedder>,
}

impl CandleHandle {
    pub fn new(embedder: CandleEmbedder) -> Self {
        Self {
            embedder: Arc::new(embedder),
        }
    }
}

#[async_trait]
impl InferenceHandle for CandleHandle {
    async fn infer(
        &self,
        text: &str,
        options: &InferenceOptions,
    ) -> Result<InferenceOutput, EmbeddingError> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let options = *options;

        let vector = tokio::task::spawn_blocking(move || {
            embedder
                .encode(&[text.as_str()], options.pooling, options.normalize)?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::InvalidInput("empty batch result".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Task(e.to_string()))??;

        let dim = vector.len();
        Ok(InferenceOutput::new(vector, Some(vec![1, dim])))
    }
}

/// [`ModelBackend`] that loads BERT encoders with Candle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleBackend;

impl CandleBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelBackend for CandleBackend {
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
    ) -> Result<Arc<dyn InferenceHandle>, EmbeddingError> {
        let dtype = dtype_for(options.precision)?;
        let cache = ModelCache::new(&options.cache_dir, model_id);
        let allow_download = !options.local_files_only;

        let embedder = tokio::task::spawn_blocking(move || {
            let paths = get_or_download_model(&cache, allow_download)?;
            CandleEmbedder::load_from_paths(&paths, dtype, &cache.model_id)
        })
        .await
        .map_err(|e| EmbeddingError::Task(e.to_string()))??;

        Ok(Arc::new(CandleHandle::new(embedder)))
    }
}
