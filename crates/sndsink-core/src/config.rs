//! Output sink configuration.
//!
//! Configuration is read from `config.json` in the platform config directory
//! (for example `~/.config/sndsink/config.json` on Linux). Every field has a
//! default, so a missing file or a partial document is fine.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result, StreamParams};

/// Bytes staged per feeding cycle.
pub const DEFAULT_BLOCK_BYTES: usize = 4096;

/// Device-side buffering target in milliseconds.
pub const DEFAULT_BUFFER_MS: u32 = 200;

/// Upper bound on waiting for a device to drain before closing it anyway.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

const CONFIG_FILE: &str = "config.json";

/// Configuration for an output sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SinkConfig {
    /// Case-insensitive substring of the output device name; `None` picks the
    /// host default.
    pub device: Option<String>,
    /// Parameters requested from the device.
    pub params: StreamParams,
    /// Size of the stream buffer in bytes.
    pub block_bytes: usize,
    /// Device-side buffering target.
    pub buffer_ms: u32,
    /// Maximum time spent draining before the device is closed.
    pub drain_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            params: StreamParams::default(),
            block_bytes: DEFAULT_BLOCK_BYTES,
            buffer_ms: DEFAULT_BUFFER_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl SinkConfig {
    /// Path of the default configuration file, if the platform has a config
    /// directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sndsink").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load the default configuration file, falling back to defaults when it
    /// does not exist.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.params
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        if self.block_bytes < self.params.bytes_per_frame() {
            return Err(Error::Config(format!(
                "block_bytes ({}) is smaller than one frame ({} bytes)",
                self.block_bytes,
                self.params.bytes_per_frame()
            )));
        }
        if self.buffer_ms == 0 {
            return Err(Error::Config("buffer_ms must be non-zero".into()));
        }
        if self.drain_timeout_ms == 0 {
            return Err(Error::Config("drain_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}
