//! Application configuration for castlefinder.
//!
//! User config lives at `~/.castlefinder/castlefinder.toml`.
//! CLI flags (and their env vars) override config file values, which
//! override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CastleFinderError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "castlefinder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".castlefinder";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "castles.db";

// ---------------------------------------------------------------------------
// Config structs (matching castlefinder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where castles are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Worker pools and batching.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Shared HTTP transport.
    #[serde(default)]
    pub http: HttpConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. Empty means `~/.castlefinder/castles.db`.
    #[serde(default)]
    pub db_path: String,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Share of available cores given to collection tasks.
    #[serde(default = "default_collection_share")]
    pub collection_share: f64,

    /// Share of available cores given to extraction workers.
    #[serde(default = "default_extraction_share")]
    pub extraction_share: f64,

    /// Explicit collection pool size, overriding the share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_workers: Option<usize>,

    /// Explicit extraction pool size, overriding the share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_workers: Option<usize>,

    /// Capacity of every bounded channel in the pipeline.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Number of enriched castles reconciled and saved together.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Overall deadline for one run, in seconds.
    #[serde(default = "default_run_timeout")]
    pub timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            collection_share: default_collection_share(),
            extraction_share: default_extraction_share(),
            collection_workers: None,
            extraction_workers: None,
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
            timeout_secs: default_run_timeout(),
        }
    }
}

fn default_collection_share() -> f64 {
    0.3
}
fn default_extraction_share() -> f64 {
    0.7
}
fn default_channel_capacity() -> usize {
    64
}
fn default_batch_size() -> usize {
    10
}
fn default_run_timeout() -> u64 {
    300
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Maximum idle connections kept per host.
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_idle_per_host: default_max_idle(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_http_timeout() -> u64 {
    10
}
fn default_max_idle() -> usize {
    100
}
fn default_user_agent() -> String {
    concat!("castlefinder/", env!("CARGO_PKG_VERSION")).into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, derived from settings + available parallelism)
// ---------------------------------------------------------------------------

/// Runtime pool sizing for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Collection tasks allowed to run at once.
    pub collection_workers: usize,
    /// Extraction workers pulling candidates.
    pub extraction_workers: usize,
    /// Capacity of every bounded channel.
    pub channel_capacity: usize,
}

impl PipelineConfig {
    /// Derive pool sizes from `cores`; explicit overrides win and every
    /// pool gets at least one worker.
    pub fn from_parallelism(cores: usize, settings: &PipelineSettings) -> Self {
        let share = |fraction: f64| ((cores as f64 * fraction).floor() as usize).max(1);
        Self {
            collection_workers: settings
                .collection_workers
                .unwrap_or_else(|| share(settings.collection_share))
                .max(1),
            extraction_workers: settings
                .extraction_workers
                .unwrap_or_else(|| share(settings.extraction_share))
                .max(1),
            channel_capacity: settings.channel_capacity.max(1),
        }
    }

    /// Same as [`from_parallelism`](Self::from_parallelism) using the
    /// machine's available parallelism.
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::from_parallelism(cores, settings)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.castlefinder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CastleFinderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.castlefinder/castlefinder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CastleFinderError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CastleFinderError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CastleFinderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CastleFinderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CastleFinderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database path: explicit override, then the config file,
/// then `~/.castlefinder/castles.db`.
pub fn resolve_db_path(config: &AppConfig, override_path: Option<&str>) -> Result<PathBuf> {
    let chosen = override_path
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or_else(|| Some(config.storage.db_path.trim()).filter(|p| !p.is_empty()));

    match chosen {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Check that the configuration can drive a run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let p = &config.pipeline;
    for (name, share) in [
        ("collection_share", p.collection_share),
        ("extraction_share", p.extraction_share),
    ] {
        if !(share > 0.0 && share <= 1.0) {
            return Err(CastleFinderError::config(format!(
                "pipeline.{name} must be in (0, 1], got {share}"
            )));
        }
    }
    if p.batch_size == 0 {
        return Err(CastleFinderError::config("pipeline.batch_size must be at least 1"));
    }
    if p.timeout_secs == 0 {
        return Err(CastleFinderError::config("pipeline.timeout_secs must be at least 1"));
    }
    Ok(())
}
