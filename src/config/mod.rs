//! Configuration module for framepipe
//!
//! This module handles the pipeline configuration file:
//! - Acquisition: which source to open and how its output channel behaves
//! - Processing: which transform to run, batch size, execution mode
//! - Logging: filter directives and an optional log directory
//! - Consumer: cadence of the demo host's display loop
//!
//! Every field has a default, so an empty file is a valid configuration
//! (a synthetic source feeding an in-thread identity transform).
//!
//! # Config Location
//!
//! The default file lives in the platform configuration directory:
//! - **Linux**: `~/.config/framepipe/pipeline.toml`
//! - **macOS**: `~/Library/Application Support/framepipe/pipeline.toml`
//! - **Windows**: `%APPDATA%\framepipe\pipeline.toml`
//!
//! # Example
//!
//! ```toml
//! [acquisition]
//! capacity = 16
//! drop_count = 4
//!
//! [acquisition.source]
//! kind = "synthetic"
//! params = { rows = 480, cols = 640, fps = 50.0 }
//!
//! [processing]
//! batch_size = 4
//! mode = "isolated"
//!
//! [processing.transform]
//! kind = "mean"
//!
//! [processing.isolated]
//! shared_region = true
//! region_shape = { rows = 480, cols = 640 }
//! ```

use crate::error::{PipelineError, Result};
use crate::types::{ComponentConfig, FrameShape};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform config dir
pub const APP_DIR: &str = "framepipe";

/// Config filename
pub const CONFIG_FILE: &str = "pipeline.toml";

/// Default channel capacity between acquisition and processing
pub const DEFAULT_CAPACITY: usize = 16;

/// Default number of batches sent to an isolated worker before waiting for results
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

/// Default grace period for an isolated worker to exit on its own
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2000;

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_one() -> usize {
    1
}

// ==================== Acquisition ====================

/// Source and output channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Output channel capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Frames evicted per overflow event
    #[serde(default = "default_one")]
    pub drop_count: usize,

    /// Also feed an auxiliary channel (e.g. for a recorder)
    #[serde(default)]
    pub auxiliary: bool,

    /// Auxiliary channel capacity
    #[serde(default = "default_capacity")]
    pub auxiliary_capacity: usize,

    /// Source kind and parameters
    #[serde(default = "default_source")]
    pub source: ComponentConfig,
}

fn default_source() -> ComponentConfig {
    ComponentConfig::new("synthetic")
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            capacity: DEFAULT_CAPACITY,
            drop_count: 1,
            auxiliary: false,
            auxiliary_capacity: DEFAULT_CAPACITY,
        }
    }
}

// ==================== Processing ====================

/// Where the transform runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Dedicated thread in this process
    #[default]
    InThread,
    /// Separate worker process
    Isolated,
}

/// Isolated worker process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolatedConfig {
    /// Worker executable (default: `frame-worker` next to the current executable)
    #[serde(default)]
    pub worker_path: Option<PathBuf>,

    /// Return results through a shared memory region instead of the pipe
    #[serde(default)]
    pub shared_region: bool,

    /// Batches sent ahead of results (always 1 with `shared_region`)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Grace period before the worker is killed on stop
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Largest output frame the shared region must hold
    #[serde(default = "default_region_shape")]
    pub region_shape: FrameShape,
}

fn default_region_shape() -> FrameShape {
    FrameShape::new(1080, 1920)
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl Default for IsolatedConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            shared_region: false,
            region_shape: default_region_shape(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl IsolatedConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Transform and processing worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Run a processing stage at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Frames combined per transform invocation
    #[serde(default = "default_one")]
    pub batch_size: usize,

    /// Output channel capacity
    #[serde(default = "default_capacity")]
    pub output_capacity: usize,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Transform kind and parameters
    #[serde(default = "default_transform")]
    pub transform: ComponentConfig,

    #[serde(default)]
    pub isolated: IsolatedConfig,
}

fn default_transform() -> ComponentConfig {
    ComponentConfig::new("identity")
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transform: default_transform(),
            batch_size: 1,
            output_capacity: DEFAULT_CAPACITY,
            mode: ExecutionMode::InThread,
            isolated: IsolatedConfig::default(),
        }
    }
}

// ==================== Logging & Consumer ====================

/// Logging settings for the binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Also write a daily-rolling log file here
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_filter() -> String {
    "info,framepipe=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
        }
    }
}

/// Demo host display loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Interval between polls of the newest output
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stop after this many seconds (run until Ctrl-C if absent)
    #[serde(default)]
    pub run_for_secs: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    33
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            run_for_secs: None,
        }
    }
}

// ==================== Pipeline Config ====================

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl PipelineConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| PipelineError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        let acq = &self.acquisition;
        if acq.capacity == 0 {
            return Err(PipelineError::Config("acquisition.capacity must be at least 1".into()));
        }
        if acq.drop_count == 0 {
            return Err(PipelineError::Config("acquisition.drop_count must be at least 1".into()));
        }
        if acq.auxiliary && acq.auxiliary_capacity == 0 {
            return Err(PipelineError::Config(
                "acquisition.auxiliary_capacity must be at least 1".into(),
            ));
        }

        let proc = &self.processing;
        if !proc.enabled {
            return Ok(());
        }
        if proc.batch_size == 0 {
            return Err(PipelineError::Config("processing.batch_size must be at least 1".into()));
        }
        if proc.output_capacity == 0 {
            return Err(PipelineError::Config(
                "processing.output_capacity must be at least 1".into(),
            ));
        }
        if proc.mode == ExecutionMode::Isolated {
            let iso = &proc.isolated;
            if iso.max_in_flight == 0 {
                return Err(PipelineError::Config(
                    "processing.isolated.max_in_flight must be at least 1".into(),
                ));
            }
            if iso.shared_region {
                if cfg!(not(unix)) {
                    return Err(PipelineError::Config(
                        "shared regions are only supported on unix".into(),
                    ));
                }
                if iso.region_shape.is_empty() {
                    return Err(PipelineError::Config(
                        "processing.isolated.region_shape must not be empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
