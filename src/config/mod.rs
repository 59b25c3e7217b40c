//! Configuration module for cvinfer-rs
//!
//! A single `EngineConfig` carries every tunable the engine reads at startup:
//! queue capacity, node pool width and poll interval, logging, and the demo
//! pipeline parameters. Every section is `#[serde(default)]`, so a config
//! file only needs the keys it wants to override.
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory:
//! - **Linux**: `~/.config/cvinfer-rs/engine.toml`
//! - **macOS**: `~/Library/Application Support/cvinfer-rs/engine.toml`
//! - **Windows**: `%APPDATA%\cvinfer-rs\engine.toml`
//!
//! Files ending in `.json` are read and written as JSON; anything else is TOML.
//!
//! # Example
//!
//! ```ignore
//! use cvinfer_rs::config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let options = NodeOptions::from(&config);
//! ```

use crate::error::{CvInferError, Result};
use crate::pipeline::queue::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "cvinfer-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Default node pool width
pub const DEFAULT_POOL_WIDTH: usize = 1;

/// Default run-loop poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

// ==================== Sections ====================

/// Queue settings applied to every queue the engine creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum items per queue before the oldest is evicted
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Node settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Worker threads per node
    pub pool_width: usize,
    /// How often a waiting run-loop re-checks its running flag
    pub poll_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pool_width: DEFAULT_POOL_WIDTH,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
    /// Directory for daily-rolling log files; console only when unset
    pub file_dir: Option<PathBuf>,
    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file_dir: None,
            file_prefix: APP_ID.to_string(),
        }
    }
}

/// Parameters for the bundled counter pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Frames emitted by the source
    pub frames: u64,
    /// Increment stages between source and sink
    pub stages: usize,
    /// Delay between source frames in milliseconds
    pub frame_interval_ms: u64,
    /// Upper bound on how long the demo runs
    pub max_run_secs: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 1000,
            stages: 4,
            frame_interval_ms: 1,
            max_run_secs: 10,
        }
    }
}

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub node: NodeConfig,
    pub logging: LoggingConfig,
    pub demo: DemoConfig,
}

impl EngineConfig {
    /// Load config from a file (TOML, or JSON for `.json` files)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CvInferError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                CvInferError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                CvInferError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location, returning defaults when the
    /// file is missing or invalid
    pub fn load_or_default() -> Self {
        let Some(path) = config_path() else {
            tracing::warn!("Could not determine config directory, using defaults");
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to a file, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CvInferError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| CvInferError::Config(format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| CvInferError::Config(format!("Failed to serialize config: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            CvInferError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(CvInferError::Config(
                "queue.capacity must be at least 1".to_string(),
            ));
        }
        if self.node.pool_width == 0 {
            return Err(CvInferError::Config(
                "node.pool_width must be at least 1".to_string(),
            ));
        }
        if self.node.poll_interval_ms == 0 {
            return Err(CvInferError::Config(
                "node.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.queue.capacity, 100_000);
        assert_eq!(config.node.pool_width, 1);
        assert_eq!(config.node.poll_interval_ms, 5);
        assert_eq!(config.logging.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("[node]\npool_width = 4\n").unwrap();
        assert_eq!(config.node.pool_width, 4);
        assert_eq!(config.node.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_json_serialization() {
        let mut config = EngineConfig::default();
        config.demo.stages = 7;
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.demo.stages, 7);
    }

    #[test]
    fn test_validate_rejects_zero_width() {
        let mut config = EngineConfig::default();
        config.node.pool_width = 0;
        assert!(matches!(config.validate(), Err(CvInferError::Config(_))));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("engine")), ConfigFormat::Toml);
    }
}
