//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use prizm_embeddings::{
    EmbeddingError, EmbeddingProvider, InferenceHandle, InferenceOptions, InferenceOutput,
    LoadOptions, ModelBackend, ProviderRegistry, WARMUP_TEXT,
};
use prizm_types::EmbeddingSettings;

/// Counters and recordings shared between a mock backend and its handles.
#[derive(Default)]
pub struct Probe {
    pub loads: AtomicUsize,
    pub warmups: AtomicUsize,
    pub releases: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub entered: Mutex<Vec<String>>,
    pub load_options: Mutex<Vec<LoadOptions>>,
}

impl Probe {
    pub fn entered(&self) -> Vec<String> {
        self.entered.lock().unwrap().clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn last_load_options(&self) -> Option<LoadOptions> {
        self.load_options.lock().unwrap().last().cloned()
    }
}

enum LoadBehavior {
    Succeed,
    /// Fail this many loads, then succeed.
    FailTimes(AtomicUsize),
    Hang,
}

/// Backend whose loads and inferences are scripted by the test.
pub struct MockBackend {
    pub probe: Arc<Probe>,
    behavior: LoadBehavior,
    load_delay: Duration,
    release_delay: Duration,
    shape: Option<Vec<usize>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            behavior: LoadBehavior::Succeed,
            load_delay: Duration::ZERO,
            release_delay: Duration::ZERO,
            shape: Some(vec![1, 8]),
            gate: None,
        }
    }

    pub fn failing() -> Self {
        Self::failing_times(usize::MAX)
    }

    pub fn failing_times(n: usize) -> Self {
        Self {
            behavior: LoadBehavior::FailTimes(AtomicUsize::new(n)),
            ..Self::new()
        }
    }

    pub fn hanging() -> Self {
        Self {
            behavior: LoadBehavior::Hang,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Make every handle release take `delay`.
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub fn without_shape(mut self) -> Self {
        self.shape = None;
        self
    }

    /// Block every non-warm-up inference until the test adds a permit.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn load(
        &self,
        _model_id: &str,
        options: &LoadOptions,
    ) -> Result<Arc<dyn InferenceHandle>, EmbeddingError> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        self.probe
            .load_options
            .lock()
            .unwrap()
            .push(options.clone());

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        match &self.behavior {
            LoadBehavior::Succeed => {}
            LoadBehavior::Hang => std::future::pending::<()>().await,
            LoadBehavior::FailTimes(remaining) => {
                let left = remaining.load(Ordering::SeqCst);
                if left > 0 {
                    remaining.store(left - 1, Ordering::SeqCst);
                    return Err(EmbeddingError::ModelNotFound("missing weights".to_string()));
                }
            }
        }

        Ok(Arc::new(MockHandle {
            probe: Arc::clone(&self.probe),
            release_delay: self.release_delay,
            shape: self.shape.clone(),
            gate: self.gate.clone(),
        }))
    }
}

struct MockHandle {
    probe: Arc<Probe>,
    release_delay: Duration,
    shape: Option<Vec<usize>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockHandle {
    fn output(&self, text: &str) -> InferenceOutput {
        let dim = self
            .shape
            .as_ref()
            .and_then(|s| s.last().copied())
            .unwrap_or(8);
        InferenceOutput::new(vec![text.len() as f32; dim], self.shape.clone())
    }
}

#[async_trait]
impl InferenceHandle for MockHandle {
    async fn infer(
        &self,
        text: &str,
        _options: &InferenceOptions,
    ) -> Result<InferenceOutput, EmbeddingError> {
        if text == WARMUP_TEXT {
            self.probe.warmups.fetch_add(1, Ordering::SeqCst);
            return Ok(self.output(text));
        }

        self.probe.entered.lock().unwrap().push(text.to_string());
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        if text.contains("boom") {
            return Err(EmbeddingError::Backend("forward pass exploded".to_string()));
        }
        Ok(self.output(text))
    }

    async fn release(&self) -> Result<(), EmbeddingError> {
        if !self.release_delay.is_zero() {
            tokio::time::sleep(self.release_delay).await;
        }
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry that remembers the current provider and counts calls.
#[derive(Default)]
pub struct RecordingRegistry {
    provider: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
    pub registrations: AtomicUsize,
    pub clears: AtomicUsize,
}

impl RecordingRegistry {
    pub fn current(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        self.provider.lock().unwrap().clone()
    }
}

impl ProviderRegistry for RecordingRegistry {
    fn register_provider(&self, provider: Arc<dyn EmbeddingProvider>) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        *self.provider.lock().unwrap() = Some(provider);
    }

    fn clear_provider(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.provider.lock().unwrap() = None;
    }
}

/// Settings pointing at a fresh temporary cache directory.
pub fn test_settings(max_concurrency: usize) -> (TempDir, EmbeddingSettings) {
    let dir = TempDir::new().unwrap();
    let settings = EmbeddingSettings {
        cache_dir: dir.path().join("cache").to_string_lossy().to_string(),
        model: "acme/mini-encoder".to_string(),
        max_concurrency,
        ..Default::default()
    };
    (dir, settings)
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
