//! Memory index with fail-open embedding.
//!
//! Every save is stored. A vector is attached only when a provider is
//! registered and answers within the embed timeout; everything else is
//! counted and the memory is kept text-only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prizm_embeddings::{cosine_similarity, EmbeddingProvider, ProviderRegistry};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::MemoryIndexError;

/// Upper bound on one embed call made by the index. Longer than the
/// service's own load deadline so a save issued during a load sees the
/// load's outcome.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(130);

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRecord {
    /// ULID string
    pub id: String,
    pub content: String,
    pub vector: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn has_vector(&self) -> bool {
        self.vector.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub score: f32,
    pub mode: SearchMode,
}

/// Save and search counters.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    pub saved_with_vector: AtomicU64,
    pub saved_no_provider: AtomicU64,
    pub saved_embed_error: AtomicU64,
    pub saved_embed_timeout: AtomicU64,
    pub searches_semantic: AtomicU64,
    pub searches_keyword: AtomicU64,
}

impl IndexMetrics {
    pub fn snapshot(&self) -> IndexMetricsSnapshot {
        IndexMetricsSnapshot {
            saved_with_vector: self.saved_with_vector.load(Ordering::Relaxed),
            saved_no_provider: self.saved_no_provider.load(Ordering::Relaxed),
            saved_embed_error: self.saved_embed_error.load(Ordering::Relaxed),
            saved_embed_timeout: self.saved_embed_timeout.load(Ordering::Relaxed),
            searches_semantic: self.searches_semantic.load(Ordering::Relaxed),
            searches_keyword: self.searches_keyword.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexMetricsSnapshot {
    pub saved_with_vector: u64,
    pub saved_no_provider: u64,
    pub saved_embed_error: u64,
    pub saved_embed_timeout: u64,
    pub searches_semantic: u64,
    pub searches_keyword: u64,
}

impl IndexMetricsSnapshot {
    /// Memories stored without a vector, for any reason.
    pub fn saved_without_vector(&self) -> u64 {
        self.saved_no_provider + self.saved_embed_error + self.saved_embed_timeout
    }

    pub fn total_saved(&self) -> u64 {
        self.saved_with_vector + self.saved_without_vector()
    }
}

/// Why an embed attempt produced no vector.
enum Skipped {
    NoProvider,
    Error(String),
    Timeout,
}

/// In-process memory store.
pub struct MemoryIndex {
    provider: RwLock<Option<Arc<dyn EmbeddingProvider>>>,
    records: RwLock<Vec<MemoryRecord>>,
    embed_timeout: Duration,
    metrics: Arc<IndexMetrics>,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::with_embed_timeout(DEFAULT_EMBED_TIMEOUT)
    }

    pub fn with_embed_timeout(embed_timeout: Duration) -> Self {
        Self {
            provider: RwLock::new(None),
            records: RwLock::new(Vec::new()),
            embed_timeout,
            metrics: Arc::new(IndexMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<IndexMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn has_provider(&self) -> bool {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryIndexError> {
        let id = Ulid::from_string(id)
            .map_err(|e| MemoryIndexError::InvalidId(format!("{}: {}", id, e)))?
            .to_string();
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>, Skipped> {
        let provider = self
            .provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Skipped::NoProvider)?;

        match timeout(self.embed_timeout, provider.embed(text)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(Skipped::Error(e.to_string())),
            Err(_) => Err(Skipped::Timeout),
        }
    }

    /// Store a memory, with a vector when the provider can produce one.
    pub async fn save(&self, content: &str) -> Result<MemoryRecord, MemoryIndexError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryIndexError::EmptyContent);
        }

        let vector = match self.try_embed(content).await {
            Ok(vector) => {
                self.metrics
                    .saved_with_vector
                    .fetch_add(1, Ordering::Relaxed);
                Some(vector)
            }
            Err(Skipped::NoProvider) => {
                self.metrics
                    .saved_no_provider
                    .fetch_add(1, Ordering::Relaxed);
                debug!("No embedding provider, memory saved without embedding");
                None
            }
            Err(Skipped::Error(e)) => {
                self.metrics
                    .saved_embed_error
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Embedding failed, memory saved without embedding");
                None
            }
            Err(Skipped::Timeout) => {
                self.metrics
                    .saved_embed_timeout
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    timeout_ms = self.embed_timeout.as_millis() as u64,
                    "Embedding timed out, memory saved without embedding"
                );
                None
            }
        };

        let record = MemoryRecord {
            id: Ulid::new().to_string(),
            content: content.to_string(),
            vector,
            created_at: Utc::now(),
        };
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        debug!(id = %record.id, embedded = record.has_vector(), "Memory saved");
        Ok(record)
    }

    /// Best `top_k` memories for `query`.
    ///
    /// Ranks by cosine similarity when the query can be embedded and at
    /// least one memory has a vector; otherwise by keyword overlap.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let records = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let semantic = if records.iter().any(MemoryRecord::has_vector) {
            self.try_embed(query).await.ok()
        } else {
            None
        };

        let mut hits: Vec<SearchHit> = match semantic {
            Some(query_vec) => {
                self.metrics
                    .searches_semantic
                    .fetch_add(1, Ordering::Relaxed);
                records
                    .into_iter()
                    .filter_map(|record| {
                        let score = cosine_similarity(&query_vec, record.vector.as_deref()?);
                        Some(SearchHit {
                            record,
                            score,
                            mode: SearchMode::Semantic,
                        })
                    })
                    .collect()
            }
            None => {
                self.metrics
                    .searches_keyword
                    .fetch_add(1, Ordering::Relaxed);
                let terms: Vec<String> = query
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect();
                records
                    .into_iter()
                    .filter_map(|record| {
                        let score = keyword_score(&terms, &record.content);
                        (score > 0.0).then_some(SearchHit {
                            record,
                            score,
                            mode: SearchMode::Keyword,
                        })
                    })
                    .collect()
            }
        };

        // Highest score first; newest first among ties.
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.record.id.cmp(&a.record.id))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Fraction of query terms contained in `content`, case-insensitive.
fn keyword_score(terms: &[String], content: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let content = content.to_lowercase();
    let matched = terms.iter().filter(|t| content.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}

impl ProviderRegistry for MemoryIndex {
    fn register_provider(&self, provider: Arc<dyn EmbeddingProvider>) {
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        debug!("Embedding provider registered with memory index");
    }

    fn clear_provider(&self) {
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Embedding provider cleared from memory index");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prizm_embeddings::{LifecycleState, ServiceError};

    struct FixedProvider;

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            // Two axes: "cat"-ness and "code"-ness.
            let t = text.to_lowercase();
            let cat = if t.contains("cat") { 1.0 } else { 0.0 };
            let code = if t.contains("rust") || t.contains("code") { 1.0 } else { 0.0 };
            Ok(vec![cat, code, 0.1])
        }
    }

    struct NotReadyProvider;

    #[async_trait]
    impl EmbeddingProvider for NotReadyProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            Err(ServiceError::ModelNotReady(LifecycleState::Error))
        }
    }

    struct StuckProvider;

    #[async_trait]
    impl EmbeddingProvider for StuckProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_save_without_provider_fails_open() {
        let index = MemoryIndex::new();
        let record = index.save("buy milk").await.unwrap();
        assert!(record.vector.is_none());
        assert_eq!(index.len(), 1);

        let m = index.metrics().snapshot();
        assert_eq!(m.saved_no_provider, 1);
        assert_eq!(m.saved_without_vector(), 1);
        assert_eq!(m.total_saved(), 1);
    }

    #[tokio::test]
    async fn test_save_with_provider_attaches_vector() {
        let index = MemoryIndex::new();
        index.register_provider(Arc::new(FixedProvider));
        let record = index.save("my cat likes boxes").await.unwrap();
        assert_eq!(record.vector, Some(vec![1.0, 0.0, 0.1]));
        assert_eq!(index.metrics().snapshot().saved_with_vector, 1);
    }

    #[tokio::test]
    async fn test_provider_error_fails_open() {
        let index = MemoryIndex::new();
        index.register_provider(Arc::new(NotReadyProvider));
        let record = index.save("anything").await.unwrap();
        assert!(!record.has_vector());
        assert_eq!(index.metrics().snapshot().saved_embed_error, 1);
    }

    #[tokio::test]
    async fn test_provider_timeout_fails_open() {
        let index = MemoryIndex::with_embed_timeout(Duration::from_millis(20));
        index.register_provider(Arc::new(StuckProvider));
        let record = index.save("slow").await.unwrap();
        assert!(!record.has_vector());
        assert_eq!(index.metrics().snapshot().saved_embed_timeout, 1);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let index = MemoryIndex::new();
        assert_eq!(index.save("   ").await, Err(MemoryIndexError::EmptyContent));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_search_ranks_by_cosine() {
        let index = MemoryIndex::new();
        index.register_provider(Arc::new(FixedProvider));
        index.save("the cat sat on the mat").await.unwrap();
        index.save("rust code review").await.unwrap();

        let hits = index.search("where is the cat", 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].mode, SearchMode::Semantic);
        assert_eq!(hits[0].record.content, "the cat sat on the mat");
        assert_eq!(index.metrics().snapshot().searches_semantic, 1);
    }

    #[tokio::test]
    async fn test_keyword_fallback_after_provider_cleared() {
        let index = MemoryIndex::new();
        index.register_provider(Arc::new(FixedProvider));
        index.save("the cat sat on the mat").await.unwrap();
        index.clear_provider();
        assert!(!index.has_provider());
        index.save("Rust Borrow Checker notes").await.unwrap();

        let hits = index.search("borrow checker", 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].mode, SearchMode::Keyword);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(index.metrics().snapshot().searches_keyword, 1);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let index = MemoryIndex::new();
        let record = index.save("remember this").await.unwrap();
        assert_eq!(index.get(&record.id).unwrap(), Some(record));
        assert_eq!(index.get(&Ulid::new().to_string()).unwrap(), None);
        assert!(matches!(
            index.get("not-a-ulid"),
            Err(MemoryIndexError::InvalidId(_))
        ));
    }

    #[test]
    fn test_keyword_score_fraction() {
        let terms = vec!["red".to_string(), "apple".to_string()];
        assert_eq!(keyword_score(&terms, "A RED car"), 0.5);
        assert_eq!(keyword_score(&terms, "red apple pie"), 1.0);
        assert_eq!(keyword_score(&[], "anything"), 0.0);
    }
}
