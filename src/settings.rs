use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

const DEBUG_CAPTURE_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture_interval_ms: u64,
    pub capture_timeout_ms: u64,
    pub event_buffer: usize,
    /// Perceptual-hash distance below which a frame counts as unchanged and is
    /// not analysed. `None` analyses every frame.
    pub change_threshold: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture_interval_ms: 2_000,
            capture_timeout_ms: 10_000,
            event_buffer: 256,
            change_threshold: None,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file. A missing file yields defaults and so
    /// does a malformed one, with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!("Ignoring malformed settings in {}: {err}", path.display());
            Self::default()
        }))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    /// `LOOKOUT_CAPTURE_INTERVAL_MS` sets the interval; `LOOKOUT_DEBUG=1` (or
    /// `true`) shortens it for interactive debugging.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var("LOOKOUT_CAPTURE_INTERVAL_MS").ok().as_deref(),
            std::env::var("LOOKOUT_DEBUG").ok().as_deref(),
        )
    }

    fn with_overrides(mut self, interval: Option<&str>, debug: Option<&str>) -> Self {
        let debug_mode = debug
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.capture_interval_ms = DEBUG_CAPTURE_INTERVAL_MS;
        }

        if let Some(raw) = interval {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.capture_interval_ms = ms,
                _ => warn!("Ignoring invalid LOOKOUT_CAPTURE_INTERVAL_MS value '{raw}'"),
            }
        }
        self
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms.max(1))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms.max(1))
    }
}
