//! Embedding provider registration contract.
//!
//! The controller registers itself with a downstream memory-indexing
//! collaborator at init time and clears the registration on dispose or
//! load failure.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceError;

/// Turns text into a vector. Must stay callable for as long as it is
/// registered, including while the model is still loading.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

/// A collaborator that accepts an embedding provider.
pub trait ProviderRegistry: Send + Sync {
    fn register_provider(&self, provider: Arc<dyn EmbeddingProvider>);

    fn clear_provider(&self);
}
