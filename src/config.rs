// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{DEFAULT_COPROCESSOR_CORES, DEFAULT_LOCAL_STORE_SIZE, DEFAULT_POLL_INTERVAL};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// What the compositor does when a job fails during a frame
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ProtocolErrorPolicy {
    /// Log the failure, skip the frame and keep going
    #[default]
    DropFrame,
    /// Return the failure to the caller
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coprocessor cores available to the pipeline
    pub coprocessor_cores: usize,
    /// Local store bytes per context
    pub local_store_size: usize,
    /// Upper bound for a single mailbox wait; unbounded when unset
    pub mailbox_timeout_ms: Option<u64>,
    /// Busy-poll slice while waiting on a mailbox
    pub poll_interval_us: u64,
    /// Handling of lifecycle and protocol failures during a frame
    pub protocol_error_policy: ProtocolErrorPolicy,
    /// Keep the scaler resident instead of running it once per frame
    pub scaler_keep_alive: bool,
    pub converter_keep_alive: bool,
    pub writer_keep_alive: bool,
    /// Flip between two framebuffer targets when the device has room for them
    pub double_buffering: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coprocessor_cores: DEFAULT_COPROCESSOR_CORES,
            local_store_size: DEFAULT_LOCAL_STORE_SIZE,
            mailbox_timeout_ms: None,
            poll_interval_us: DEFAULT_POLL_INTERVAL.as_micros() as u64,
            protocol_error_policy: ProtocolErrorPolicy::default(),
            scaler_keep_alive: false,
            converter_keep_alive: true,
            writer_keep_alive: true,
            double_buffering: true,
        }
    }
}

impl Config {
    /// Default config location (`<config dir>/spu-video/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spu-video").join("config.json"))
    }

    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: shown.clone(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: shown.clone(),
            source,
        })?;
        info!(path = %shown, "Loaded configuration");
        Ok(config)
    }

    /// Load from `path` (or the default location); a missing file gives defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }

    pub fn mailbox_timeout(&self) -> Option<Duration> {
        self.mailbox_timeout_ms.map(Duration::from_millis)
    }
}
