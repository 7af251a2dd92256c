use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Rolling-statistics and hysteresis tunables for the noise state monitor.
///
/// The threshold names keep their historical pairing: `low_threshold` gates
/// the quiet-to-noisy transition and `high_threshold` gates noisy-to-quiet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Short-term averaging window in seconds
    pub sta_window_secs: f64,
    /// Long-term averaging window in seconds
    pub lta_window_secs: f64,
    /// Retention horizon of the sorted percentile window in seconds
    pub min_max_window_secs: f64,
    /// Cadence of power readings in seconds
    pub update_interval_secs: f64,
    /// Percentile taken as the top of the recent dynamic range
    pub max_power_percentile: f32,
    /// Percentile taken as the bottom of the recent dynamic range
    pub min_power_percentile: f32,
    /// Noisy state is left when the normalized energy drops below this
    pub high_threshold: f32,
    /// Quiet state is left when the normalized energy rises above this
    pub low_threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sta_window_secs: 0.2,
            lta_window_secs: 10.0,
            min_max_window_secs: 10.0,
            update_interval_secs: 0.05,
            max_power_percentile: 0.90,
            min_power_percentile: 0.05,
            high_threshold: 0.3,
            low_threshold: 0.7,
        }
    }
}

/// Timing knobs for the transcription decision loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Warm-up delay before the first scheduling cycle, in seconds
    pub transcribe_delay_secs: f64,
    /// Quiet gap after the latest noisy interval before escalating the
    /// model tier, in seconds
    pub model_upgrade_delay_secs: f64,
    /// Back-off between cycles when a guard condition fails, in milliseconds
    pub retry_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            transcribe_delay_secs: 1.0,
            model_upgrade_delay_secs: 0.5,
            retry_interval_ms: 100,
        }
    }
}

/// Inference engine configuration shared by all model tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the per-tier GGML model files.
    /// Defaults to ~/.cache/sotto/models when unset.
    pub models_dir: Option<PathBuf>,
    /// Language for transcription
    pub language: String,
    /// Number of inference threads
    pub threads: usize,
    /// Whether to offload inference to the GPU
    pub gpu_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            language: "en".to_string(),
            threads: 4,
            gpu_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Directory the per-tier model files are loaded from.
    pub fn resolve_models_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.models_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var("HOME").with_context(|| "Failed to get HOME directory")?;
        Ok(PathBuf::from(home).join(".cache/sotto/models"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
}

/// Read the application configuration, falling back to defaults when the
/// file is absent or malformed.
pub fn read_app_config(path: &Path) -> AppConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse config, using defaults");
                AppConfig::default()
            }
        },
        Err(e) => {
            debug!(error = %e, path = %path.display(), "no config file, using defaults");
            AppConfig::default()
        }
    }
}
