//! Status payload for health checks and operational tooling.

use serde::Serialize;

use prizm_types::PrecisionMode;

use crate::source::ModelSource;
use crate::state::LifecycleState;
use crate::stats::StatsSnapshot;

/// Point-in-time view of the embedding service.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStatus {
    pub state: LifecycleState,
    pub model_name: String,
    pub dimension: usize,
    pub enabled: bool,
    pub precision: PrecisionMode,
    pub source: ModelSource,
    pub stats: StatsSnapshot,
    pub cache_dir: String,
    /// Resident-set growth across the last load (best effort, may be noisy)
    pub model_memory_mb: Option<f64>,
    /// Current process resident set size
    pub process_memory_mb: Option<f64>,
    /// Unix epoch ms of the last transition to ready
    pub up_since_ms: Option<i64>,
    pub load_duration_ms: Option<u64>,
    pub active_inferences: usize,
    pub queued_inferences: usize,
}

/// Resident set size of the current process in bytes.
///
/// Only available on Linux (`/proc/self/status`); `None` elsewhere.
pub fn process_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kb * 1024)
}

pub(crate) fn bytes_to_mb(bytes: f64) -> f64 {
    (bytes / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
