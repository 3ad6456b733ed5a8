//! Configuration loading for Prizm.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/prizm/config.toml`
//! (any format the `config` crate understands is accepted).
//! Missing fields fall back to their per-field defaults.

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PrizmError;

/// Numeric precision the embedding model weights are loaded with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionMode {
    /// 4-bit quantized weights
    Q4,
    /// 8-bit quantized weights
    Q8,
    /// Half precision floats
    Fp16,
    /// Full precision floats
    #[default]
    Fp32,
}

impl PrecisionMode {
    /// Canonical lowercase name, as used in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecisionMode::Q4 => "q4",
            PrecisionMode::Q8 => "q8",
            PrecisionMode::Fp16 => "fp16",
            PrecisionMode::Fp32 => "fp32",
        }
    }

    /// Whether weights in this mode are integer-quantized.
    pub fn is_quantized(&self) -> bool {
        matches!(self, PrecisionMode::Q4 | PrecisionMode::Q8)
    }
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrecisionMode {
    type Err = PrizmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "q4" | "int4" => Ok(PrecisionMode::Q4),
            "q8" | "int8" => Ok(PrecisionMode::Q8),
            "fp16" | "half" => Ok(PrecisionMode::Fp16),
            "fp32" | "full" => Ok(PrecisionMode::Fp32),
            other => Err(PrizmError::InvalidInput(format!(
                "unknown precision mode '{}' (expected q4, q8, fp16 or fp32)",
                other
            ))),
        }
    }
}

/// Configuration for the local embedding service.
///
/// When `enabled` is false the service stays idle and memories are
/// saved without vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Load the embedding model at startup (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HuggingFace model identifier, also the sub-directory name under
    /// the cache and bundled directories.
    #[serde(default = "default_model")]
    pub model: String,

    /// User cache directory for downloaded model files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Offline asset directory shipped alongside the application.
    #[serde(default)]
    pub bundled_dir: Option<String>,

    /// Numeric precision mode.
    #[serde(default)]
    pub precision: PrecisionMode,

    /// Maximum number of inference calls admitted at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a single model load (ms).
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_cache_dir() -> String {
    ProjectDirs::from("", "", "prizm")
        .map(|p| p.cache_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from(".cache").join("prizm").join("models"))
        .to_string_lossy()
        .to_string()
}

fn default_max_concurrency() -> usize {
    1
}

fn default_load_timeout_ms() -> u64 {
    120_000
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_model(),
            cache_dir: default_cache_dir(),
            bundled_dir: None,
            precision: PrecisionMode::default(),
            max_concurrency: default_max_concurrency(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl EmbeddingSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be > 0".to_string());
        }
        if self.load_timeout_ms == 0 {
            return Err("load_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }

    /// Cache directory with `~` expanded.
    pub fn cache_path(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }

    /// Bundled asset directory with `~` expanded, if configured.
    pub fn bundled_path(&self) -> Option<PathBuf> {
        self.bundled_dir.as_deref().map(expand_home)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/prizm/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (PRIZM__*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, PrizmError> {
        let config_dir = ProjectDirs::from("", "", "prizm")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| PrizmError::Config(e.to_string()))?
            .set_default("embedding.model", default_model())
            .map_err(|e| PrizmError::Config(e.to_string()))?
            .set_default("embedding.cache_dir", default_cache_dir())
            .map_err(|e| PrizmError::Config(e.to_string()))?
            .set_default("embedding.max_concurrency", default_max_concurrency() as i64)
            .map_err(|e| PrizmError::Config(e.to_string()))?
            .set_default("embedding.load_timeout_ms", default_load_timeout_ms() as i64)
            .map_err(|e| PrizmError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: PRIZM__LOG_LEVEL, PRIZM__EMBEDDING__PRECISION, ...
        builder = builder.add_source(
            Environment::with_prefix("PRIZM")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| PrizmError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| PrizmError::Config(e.to_string()))?;

        settings
            .embedding
            .validate()
            .map_err(PrizmError::Config)?;

        Ok(settings)
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert!(settings.embedding.enabled);
        assert_eq!(settings.embedding.max_concurrency, 1);
        assert_eq!(settings.embedding.load_timeout_ms, 120_000);
        assert!(settings.embedding.cache_dir.contains("prizm"));
    }

    #[test]
    fn test_embedding_settings_validation() {
        let mut config = EmbeddingSettings::default();
        assert!(config.validate().is_ok());

        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        config.max_concurrency = 2;
        config.load_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.load_timeout_ms = 10;
        config.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_precision_parse_and_display() {
        assert_eq!("q4".parse::<PrecisionMode>().unwrap(), PrecisionMode::Q4);
        assert_eq!("INT8".parse::<PrecisionMode>().unwrap(), PrecisionMode::Q8);
        assert_eq!("half".parse::<PrecisionMode>().unwrap(), PrecisionMode::Fp16);
        assert_eq!(PrecisionMode::Fp32.to_string(), "fp32");
        assert!("fp64".parse::<PrecisionMode>().is_err());
        assert!(PrecisionMode::Q8.is_quantized());
        assert!(!PrecisionMode::Fp16.is_quantized());
    }

    #[test]
    fn test_embedding_settings_partial_json() {
        let decoded: EmbeddingSettings =
            serde_json::from_str(r#"{"precision": "fp16", "enabled": false}"#).unwrap();
        assert!(!decoded.enabled);
        assert_eq!(decoded.precision, PrecisionMode::Fp16);
        assert_eq!(decoded.max_concurrency, 1);
        assert!(decoded.bundled_dir.is_none());
    }

    #[test]
    fn test_load_from_cli_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prizm.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\
             [embedding]\n\
             precision = \"fp16\"\n\
             max_concurrency = 3\n\
             bundled_dir = \"/opt/prizm/models\""
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.embedding.precision, PrecisionMode::Fp16);
        assert_eq!(settings.embedding.max_concurrency, 3);
        assert_eq!(
            settings.embedding.bundled_path(),
            Some(PathBuf::from("/opt/prizm/models"))
        );
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[embedding]\nmax_concurrency = 0\n").unwrap();

        let result = Settings::load(Some(path.to_str().unwrap()));
        assert!(matches!(result, Err(PrizmError::Config(_))));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(dirs) = BaseDirs::new() {
            assert_eq!(expand_home("~/models"), dirs.home_dir().join("models"));
        }
    }
}
