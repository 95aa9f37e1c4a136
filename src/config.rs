//! Bridge configuration.
//!
//! Everything has a default, so an empty JSON object (or no configuration at all)
//! yields a working setup.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::constants::{COLORSPACE_HINT_PROPERTY, CONFIG_ENV_VAR, DEFAULT_SETTLE_DELAY_MS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Explicit engine shared library. When absent the platform names are probed.
    pub library_path: Option<PathBuf>,
    /// Engine options applied in order before the engine is initialized.
    pub engine_options: Vec<(String, String)>,
    pub hwdec: String,
    /// Engine log level requested at init (`no`, `fatal`, `error`, `warn`, `info`, `v`, `debug`, `trace`).
    pub log_level: String,
    pub settle_delay_ms: u64,
    pub flip_y: bool,
    /// HDR passthrough with tone-mapping fallback; toggled at runtime through `hdr-enabled`.
    pub hdr_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let options = [
            ("keep-open", "yes"),
            ("idle", "yes"),
            ("input-default-bindings", "no"),
            ("input-vo-keyboard", "no"),
            ("osc", "no"),
            ("terminal", "no"),
        ];
        Self {
            library_path: None,
            engine_options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            hwdec: "auto".to_string(),
            log_level: "v".to_string(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            flip_y: true,
            hdr_enabled: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse bridge configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Reads the file named by `MEDIA_BRIDGE_CONFIG`, or falls back to defaults
    /// when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                let path = PathBuf::from(path);
                info!("[Config] Loading {}", path.display());
                Self::from_file(&path)
            }
            None => {
                debug!("[Config] {} not set, using defaults", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Whether a session starts with HDR output. A colorspace hint given
    /// directly in `engine_options` wins over `hdr_enabled`.
    pub fn hdr_output(&self) -> bool {
        self.engine_options
            .iter()
            .rev()
            .find(|(name, _)| name == COLORSPACE_HINT_PROPERTY)
            .map_or(self.hdr_enabled, |(_, value)| is_truthy(value))
    }

    /// Sets or replaces a single engine option, keeping its original position.
    pub fn set_engine_option(&mut self, name: &str, value: &str) {
        match self.engine_options.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.engine_options.push((name.to_string(), value.to_string())),
        }
    }
}

/// Flag spelling accepted for boolean-ish string properties.
pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}
