//! Command implementations.
//!
//! Every command follows the same startup:
//! 1. Load configuration and apply CLI overrides
//! 2. Initialize logging (stderr, so stdout stays machine-readable)
//! 3. Wire the embedding controller to the memory index and init it

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

use prizm_embeddings::{
    CandleBackend, EmbeddingController, LifecycleState, ModelBackend, ProviderRegistry,
};
use prizm_memory::MemoryIndex;
use prizm_types::Settings;

use crate::cli::EmbeddingOverrides;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    overrides: &EmbeddingOverrides,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    apply_overrides(&mut settings, log_level_override, overrides)?;
    Ok(settings)
}

pub fn apply_overrides(
    settings: &mut Settings,
    log_level_override: Option<&str>,
    overrides: &EmbeddingOverrides,
) -> Result<()> {
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    if let Some(precision) = overrides.precision {
        settings.embedding.precision = precision;
    }
    if let Some(max) = overrides.max_concurrency {
        settings.embedding.max_concurrency = max;
    }
    if let Some(model) = &overrides.model {
        settings.embedding.model = model.clone();
    }
    if overrides.no_embeddings {
        settings.embedding.enabled = false;
    }

    if let Err(e) = settings.embedding.validate() {
        bail!("Invalid embedding settings: {}", e);
    }
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Embedding controller registered with a fresh memory index.
pub struct Service {
    pub controller: EmbeddingController,
    pub index: Arc<MemoryIndex>,
}

impl Service {
    pub fn new(settings: &Settings, backend: Arc<dyn ModelBackend>) -> Self {
        let index = Arc::new(MemoryIndex::new());
        let controller = EmbeddingController::with_registry(
            settings.embedding.clone(),
            backend,
            Arc::clone(&index) as Arc<dyn ProviderRegistry>,
        );
        Self { controller, index }
    }

    pub async fn start(&self) {
        self.controller.init().await;
    }

    pub async fn shutdown(&self) {
        self.controller.dispose().await;
    }
}

/// One line of `embed` output.
#[derive(Debug, Serialize)]
pub struct EmbedLine {
    pub text: String,
    pub dimension: usize,
    pub vector: Vec<f32>,
}

/// Embed `texts` in order through a started service.
pub async fn embed_texts(service: &Service, texts: &[String]) -> Result<Vec<EmbedLine>> {
    let state = service.controller.state();
    if state != LifecycleState::Ready {
        let reason = service
            .controller
            .stats()
            .last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "embeddings disabled".to_string());
        bail!("Embedding model not ready (state: {}): {}", state, reason);
    }

    let mut lines = Vec::with_capacity(texts.len());
    for text in texts {
        let vector = service
            .controller
            .embed(text)
            .await
            .with_context(|| format!("Failed to embed {:?}", text))?;
        lines.push(EmbedLine {
            text: text.clone(),
            dimension: vector.len(),
            vector,
        });
    }
    Ok(lines)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Load the model and serve until interrupted.
pub async fn run_start(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    overrides: &EmbeddingOverrides,
) -> Result<()> {
    let settings = load_settings(config_path, log_level_override, overrides)?;
    init_logging(&settings.log_level)?;

    info!("Prizm embedding service starting...");
    info!("Configuration:");
    info!("  Model: {}", settings.embedding.model);
    info!("  Precision: {}", settings.embedding.precision);
    info!("  Cache dir: {}", settings.embedding.cache_path().display());
    info!("  Max concurrency: {}", settings.embedding.max_concurrency);
    info!("  Log level: {}", settings.log_level);

    let service = Service::new(&settings, Arc::new(CandleBackend::new()));
    service.start().await;

    let status = service.controller.status();
    info!(
        state = %status.state,
        dimension = status.dimension,
        source = ?status.source,
        "Embedding service up"
    );

    shutdown_signal().await;
    service.shutdown().await;
    info!("Prizm embedding service stopped");
    Ok(())
}

/// Load the model and print its status as pretty JSON.
pub async fn run_status(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    overrides: &EmbeddingOverrides,
) -> Result<()> {
    let settings = load_settings(config_path, log_level_override, overrides)?;
    init_logging(&settings.log_level)?;

    let service = Service::new(&settings, Arc::new(CandleBackend::new()));
    service.start().await;

    let json = serde_json::to_string_pretty(&service.controller.status())
        .context("Failed to serialize status")?;
    println!("{}", json);

    service.shutdown().await;
    Ok(())
}

/// Embed texts and print one JSON object per line.
pub async fn run_embed(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    overrides: &EmbeddingOverrides,
    texts: &[String],
) -> Result<()> {
    let settings = load_settings(config_path, log_level_override, overrides)?;
    init_logging(&settings.log_level)?;

    let service = Service::new(&settings, Arc::new(CandleBackend::new()));
    service.start().await;

    let result = embed_texts(&service, texts).await;
    service.shutdown().await;

    for line in result? {
        println!(
            "{}",
            serde_json::to_string(&line).context("Failed to serialize embedding")?
        );
    }
    Ok(())
}
