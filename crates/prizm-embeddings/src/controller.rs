//! Embedding model lifecycle controller.
//!
//! Owns one embedding model instance from load to dispose:
//! - resolves the model source and loads it under a deadline
//! - probes the output dimension with a single warm-up inference
//! - admits inference calls through a bounded FIFO queue
//! - tracks latency and error statistics
//! - registers itself as the embedding provider of the memory index
//!
//! Load failures never escape [`EmbeddingController::init`]; the service
//! stays up in the `error` state and callers save memories without
//! vectors. Recovery is an explicit [`EmbeddingController::reset`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use prizm_types::{EmbeddingSettings, PrecisionMode};

use crate::admission::InferenceSlotQueue;
use crate::backend::{InferenceHandle, InferenceOptions, LoadOptions, ModelBackend};
use crate::error::ServiceError;
use crate::provider::{EmbeddingProvider, ProviderRegistry};
use crate::source::{resolve_model_source, ModelSource};
use crate::state::LifecycleState;
use crate::stats::{StatsSnapshot, StatsWindow};
use crate::status::{bytes_to_mb, process_memory_bytes, EmbeddingStatus};

/// Probe text for the warm-up inference.
pub const WARMUP_TEXT: &str = "warmup";

/// Dimension assumed when the backend reports no output shape.
pub const DEFAULT_DIMENSION: usize = crate::candle::EMBEDDING_DIM;

type SharedLoad = Shared<BoxFuture<'static, Result<(), ServiceError>>>;

/// Mutable model state. Guarded by a std mutex that is never held
/// across an `.await`.
struct Lifecycle {
    state: LifecycleState,
    settings: EmbeddingSettings,
    handle: Option<Arc<dyn InferenceHandle>>,
    dimension: usize,
    source: ModelSource,
    /// Bumped on every dispose; a load started in an older generation
    /// must not publish its result.
    generation: u64,
    next_load_id: u64,
    in_flight: Option<(u64, SharedLoad)>,
    ready_at: Option<DateTime<Utc>>,
    load_duration_ms: Option<u64>,
    model_memory_mb: Option<f64>,
}

struct ControllerInner {
    lifecycle: Mutex<Lifecycle>,
    slots: Arc<InferenceSlotQueue>,
    stats: Mutex<StatsWindow>,
    backend: Arc<dyn ModelBackend>,
    registry: Option<Arc<dyn ProviderRegistry>>,
}

/// Lifecycle and concurrency controller for the local embedding model.
///
/// Cheap to clone; clones share the same model. The application wiring
/// creates one per process.
#[derive(Clone)]
pub struct EmbeddingController {
    inner: Arc<ControllerInner>,
}

impl EmbeddingController {
    /// Create a controller with no downstream registry.
    pub fn new(settings: EmbeddingSettings, backend: Arc<dyn ModelBackend>) -> Self {
        Self::build(settings, backend, None)
    }

    /// Create a controller that registers itself as embedding provider
    /// with `registry` on init.
    pub fn with_registry(
        settings: EmbeddingSettings,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Self {
        Self::build(settings, backend, Some(registry))
    }

    fn build(
        settings: EmbeddingSettings,
        backend: Arc<dyn ModelBackend>,
        registry: Option<Arc<dyn ProviderRegistry>>,
    ) -> Self {
        let slots = Arc::new(InferenceSlotQueue::new(settings.max_concurrency));
        Self {
            inner: Arc::new(ControllerInner {
                lifecycle: Mutex::new(Lifecycle {
                    state: LifecycleState::Idle,
                    settings,
                    handle: None,
                    dimension: 0,
                    source: ModelSource::Unknown,
                    generation: 0,
                    next_load_id: 0,
                    in_flight: None,
                    ready_at: None,
                    load_duration_ms: None,
                    model_memory_mb: None,
                }),
                slots,
                stats: Mutex::new(StatsWindow::new()),
                backend,
                registry,
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn stats_window(&self) -> MutexGuard<'_, StatsWindow> {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the service: register the provider and load the model.
    ///
    /// Never fails. When disabled the controller stays `idle`; when the
    /// load fails it ends up in `error` with the provider cleared.
    pub async fn init(&self) {
        let settings = {
            let lc = self.lifecycle();
            match lc.state {
                LifecycleState::Ready => {
                    debug!(model = %lc.settings.model, "Embedding model already initialized");
                    return;
                }
                LifecycleState::Disposing => {
                    debug!(model = %lc.settings.model, "Embedding model disposing, init skipped");
                    return;
                }
                _ => {}
            }
            lc.settings.clone()
        };

        if !settings.enabled {
            info!(model = %settings.model, "Local embeddings disabled by configuration");
            return;
        }

        let cache_dir = settings.cache_path();
        if let Err(e) = tokio::fs::create_dir_all(&cache_dir).await {
            warn!(path = ?cache_dir, error = %e, "Failed to create model cache directory");
        }

        self.inner.slots.set_max_concurrency(settings.max_concurrency);
        self.register_provider();

        match self.ensure_loaded().await {
            Ok(()) => {
                debug!(model = %settings.model, "Embedding service initialized");
            }
            Err(ServiceError::Disposed) => {
                debug!(model = %settings.model, "Embedding service disposed during init");
                // A dispose that started before our registration could not
                // clear it. A newer init owns the registration once the
                // state is loading or ready again.
                let superseded = matches!(
                    self.state(),
                    LifecycleState::Loading | LifecycleState::Ready
                );
                if !superseded {
                    self.clear_provider();
                }
            }
            Err(e) => {
                error!(
                    model = %settings.model,
                    error = %e,
                    "Embedding model failed to load, continuing without vectors"
                );
                self.clear_provider();
            }
        }
    }

    /// Load the model unless it is loaded or loading.
    ///
    /// Concurrent callers share one load: a second call while a load is
    /// in flight waits for the same outcome instead of starting another.
    pub async fn ensure_loaded(&self) -> Result<(), ServiceError> {
        let load = {
            let mut lc = self.lifecycle();
            if !lc.settings.enabled {
                return Err(ServiceError::ModelDisabled);
            }
            match lc.state {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::Disposing => return Err(ServiceError::Disposed),
                _ => {}
            }

            let existing = lc.in_flight.as_ref().map(|(_, load)| load.clone());
            match existing {
                Some(load) => load,
                None => {
                    if !lc.state.can_transition_to(LifecycleState::Loading) {
                        return Err(ServiceError::ModelNotReady(lc.state));
                    }
                    lc.state = LifecycleState::Loading;
                    lc.next_load_id += 1;
                    let load_id = lc.next_load_id;
                    let load = self.spawn_load(load_id, lc.generation, lc.settings.clone());
                    lc.in_flight = Some((load_id, load.clone()));
                    load
                }
            }
        };

        load.await
    }

    fn spawn_load(&self, load_id: u64, generation: u64, settings: EmbeddingSettings) -> SharedLoad {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let _guard = InFlightGuard {
                controller: this.clone(),
                load_id,
                generation,
            };
            this.run_load(generation, settings).await
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ServiceError::ModelLoadFailure(format!(
                    "load task failed: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared()
    }

    async fn run_load(
        &self,
        generation: u64,
        settings: EmbeddingSettings,
    ) -> Result<(), ServiceError> {
        let started = Instant::now();
        let resolution = resolve_model_source(
            &settings.model,
            &settings.cache_path(),
            settings.bundled_path().as_deref(),
        );

        {
            let mut lc = self.lifecycle();
            if lc.generation == generation {
                lc.source = resolution.source;
            }
        }

        info!(
            model = %settings.model,
            precision = %settings.precision,
            source = ?resolution.source,
            dir = ?resolution.effective_dir,
            local_files_only = resolution.local_files_only,
            download = resolution.needs_download,
            "Loading embedding model"
        );

        let options = LoadOptions {
            precision: settings.precision,
            cache_dir: resolution.effective_dir.clone(),
            local_files_only: resolution.local_files_only,
        };
        let memory_before = process_memory_bytes();

        let outcome = self.load_and_warm_up(&settings, &options).await;

        let (handle, dimension) = match outcome {
            Ok(loaded) => loaded,
            Err(err) => {
                let current = {
                    let mut lc = self.lifecycle();
                    let current = lc.generation == generation;
                    if current {
                        lc.state = LifecycleState::Error;
                    }
                    current
                };
                if !current {
                    debug!(
                        model = %settings.model,
                        error = %err,
                        "Load of a disposed model failed"
                    );
                    return Err(ServiceError::Disposed);
                }
                self.stats_window().set_last_error(err.to_string());
                error!(model = %settings.model, error = %err, "Embedding model load failed");
                return Err(err);
            }
        };

        let load_duration_ms = started.elapsed().as_millis() as u64;
        let model_memory_mb = match (memory_before, process_memory_bytes()) {
            (Some(before), Some(after)) => Some(bytes_to_mb(after as f64 - before as f64)),
            _ => None,
        };

        let published = {
            let mut lc = self.lifecycle();
            if lc.generation == generation {
                lc.handle = Some(Arc::clone(&handle));
                lc.dimension = dimension;
                lc.ready_at = Some(Utc::now());
                lc.load_duration_ms = Some(load_duration_ms);
                lc.model_memory_mb = model_memory_mb;
                lc.state = LifecycleState::Ready;
                true
            } else {
                false
            }
        };

        if !published {
            warn!(
                model = %settings.model,
                "Embedding service disposed during load, discarding model"
            );
            if let Err(e) = handle.release().await {
                warn!(error = %e, "Failed to release discarded model");
            }
            return Err(ServiceError::Disposed);
        }

        info!(
            model = %settings.model,
            dimension,
            load_ms = load_duration_ms,
            memory_delta_mb = ?model_memory_mb,
            "Embedding model ready"
        );
        Ok(())
    }

    /// Steps 2-3 of a load: backend load under the deadline, then one
    /// warm-up inference to learn the output dimension.
    async fn load_and_warm_up(
        &self,
        settings: &EmbeddingSettings,
        options: &LoadOptions,
    ) -> Result<(Arc<dyn InferenceHandle>, usize), ServiceError> {
        let timeout_ms = settings.load_timeout_ms;
        let handle = match timeout(
            Duration::from_millis(timeout_ms),
            self.inner.backend.load(&settings.model, options),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(ServiceError::ModelLoadFailure(e.to_string())),
            Err(_) => return Err(ServiceError::ModelLoadTimeout { timeout_ms }),
        };

        match handle.infer(WARMUP_TEXT, &InferenceOptions::default()).await {
            Ok(probe) => {
                let dimension = probe.dimension().unwrap_or(DEFAULT_DIMENSION);
                debug!(dimension, "Warm-up inference complete");
                Ok((handle, dimension))
            }
            Err(e) => {
                if let Err(release_err) = handle.release().await {
                    warn!(error = %release_err, "Failed to release model after warm-up failure");
                }
                Err(ServiceError::ModelLoadFailure(format!(
                    "warm-up inference failed: {}",
                    e
                )))
            }
        }
    }

    /// Embed one text.
    ///
    /// Waits for an in-flight load, then for a free inference slot.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let pending = {
            let lc = self.lifecycle();
            match (&lc.state, &lc.in_flight) {
                (LifecycleState::Loading, Some((_, load))) => Some(load.clone()),
                _ => None,
            }
        };
        if let Some(load) = pending {
            // The outcome shows up in the state checked below.
            let _ = load.await;
        }

        let (handle, generation) = {
            let lc = self.lifecycle();
            match (lc.state, &lc.handle) {
                (LifecycleState::Ready, Some(handle)) => (Arc::clone(handle), lc.generation),
                (state, _) => return Err(ServiceError::ModelNotReady(state)),
            }
        };

        let _permit = self.inner.slots.acquire().await?;

        // The model may have been swapped while this caller waited.
        {
            let lc = self.lifecycle();
            if lc.generation != generation {
                return Err(ServiceError::ModelNotReady(lc.state));
            }
        }
        let started = Instant::now();

        match handle.infer(text, &InferenceOptions::default()).await {
            Ok(output) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.stats_window()
                    .record_success(text.chars().count(), latency_ms);
                trace!(chars = text.len(), latency_ms, "Embedded text");
                Ok(output.data)
            }
            Err(e) => {
                let err = ServiceError::InferenceFailure(e.to_string());
                self.stats_window().record_error(err.to_string());
                warn!(error = %e, "Embedding inference failed");
                Err(err)
            }
        }
    }

    /// Embed texts one after another through the same admission queue.
    /// Output order matches input order; the first failure aborts.
    pub async fn embed_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text.as_ref()).await?);
        }
        Ok(vectors)
    }

    /// Release the model and return to `idle`. Idempotent.
    ///
    /// Callers queued for a slot are rejected with
    /// [`ServiceError::Disposed`]; callers already running finish normally.
    pub async fn dispose(&self) {
        let (handle, previous) = {
            let mut lc = self.lifecycle();
            match lc.state {
                LifecycleState::Idle | LifecycleState::Disposing => return,
                _ => {}
            }
            let previous = lc.state;
            lc.state = LifecycleState::Disposing;
            lc.generation += 1;
            lc.in_flight = None;
            (lc.handle.take(), previous)
        };

        self.clear_provider();
        let rejected = self.inner.slots.drain();

        if let Some(handle) = handle {
            if let Err(e) = handle.release().await {
                warn!(error = %e, "Failed to release embedding model");
            }
        }

        {
            let mut lc = self.lifecycle();
            lc.dimension = 0;
            lc.ready_at = None;
            lc.load_duration_ms = None;
            lc.model_memory_mb = None;
            lc.state = LifecycleState::Idle;
        }

        info!(previous = %previous, rejected_waiters = rejected, "Embedding model disposed");
    }

    /// Dispose, clear statistics, optionally switch precision, then init.
    pub async fn reset(&self, precision: Option<PrecisionMode>) {
        self.dispose().await;
        self.reset_stats();
        if let Some(precision) = precision {
            let mut lc = self.lifecycle();
            info!(from = %lc.settings.precision, to = %precision, "Switching embedding precision");
            lc.settings.precision = precision;
        }
        self.init().await;
    }

    pub fn reset_stats(&self) {
        self.stats_window().reset();
    }

    fn register_provider(&self) {
        if let Some(registry) = &self.inner.registry {
            registry.register_provider(Arc::new(RegisteredProvider {
                inner: Arc::downgrade(&self.inner),
            }));
            debug!("Registered embedding provider");
        }
    }

    fn clear_provider(&self) {
        if let Some(registry) = &self.inner.registry {
            registry.clear_provider();
            debug!("Cleared embedding provider");
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().state
    }

    /// Output dimension, 0 unless ready.
    pub fn dimension(&self) -> usize {
        self.lifecycle().dimension
    }

    pub fn model_name(&self) -> String {
        self.lifecycle().settings.model.clone()
    }

    pub fn precision(&self) -> PrecisionMode {
        self.lifecycle().settings.precision
    }

    pub fn is_enabled(&self) -> bool {
        self.lifecycle().settings.enabled
    }

    pub fn active_inferences(&self) -> usize {
        self.inner.slots.active()
    }

    pub fn queued_inferences(&self) -> usize {
        self.inner.slots.queued()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats_window().snapshot()
    }

    /// Full status payload, including process memory.
    pub fn status(&self) -> EmbeddingStatus {
        let stats = self.stats();
        let lc = self.lifecycle();
        EmbeddingStatus {
            state: lc.state,
            model_name: lc.settings.model.clone(),
            dimension: lc.dimension,
            enabled: lc.settings.enabled,
            precision: lc.settings.precision,
            source: lc.source,
            stats,
            cache_dir: lc.settings.cache_path().to_string_lossy().to_string(),
            model_memory_mb: lc.model_memory_mb,
            process_memory_mb: process_memory_bytes().map(|b| bytes_to_mb(b as f64)),
            up_since_ms: lc.ready_at.map(|t| t.timestamp_millis()),
            load_duration_ms: lc.load_duration_ms,
            active_inferences: self.inner.slots.active(),
            queued_inferences: self.inner.slots.queued(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingController {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        EmbeddingController::embed(self, text).await
    }
}

/// Provider handed to the registry. Holds a weak reference so the
/// registration never keeps a disposed controller alive.
struct RegisteredProvider {
    inner: Weak<ControllerInner>,
}

#[async_trait]
impl EmbeddingProvider for RegisteredProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        match self.inner.upgrade() {
            Some(inner) => EmbeddingController { inner }.embed(text).await,
            None => Err(ServiceError::Disposed),
        }
    }
}

/// Clears the in-flight load slot when the load task ends, however it ends.
struct InFlightGuard {
    controller: EmbeddingController,
    load_id: u64,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let abandoned = {
            let mut lc = self.controller.lifecycle();
            if matches!(&lc.in_flight, Some((id, _)) if *id == self.load_id) {
                lc.in_flight = None;
            }
            // Task ended without reaching ready or error (panic or abort).
            let abandoned =
                lc.generation == self.generation && lc.state == LifecycleState::Loading;
            if abandoned {
                lc.state = LifecycleState::Error;
            }
            abandoned
        };
        if abandoned {
            self.controller
                .stats_window()
                .set_last_error("model load task aborted");
        }
    }
}
