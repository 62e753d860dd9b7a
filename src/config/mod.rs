//! Configuration management for synthctl
//!
//! Handles loading, parsing, and hot-reloading of the YAML configuration.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::message_log::DEFAULT_CAPACITY;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Parameter table CSV; the embedded Digitakt table when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

/// MIDI port configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Input port id, index, or name substring selected at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
    /// Send parameter writes as NRPN where the parameter has a number
    #[serde(default)]
    pub nrpn_mode: bool,
    /// How often the port list is re-enumerated to spot hotplug
    #[serde(default = "default_hotplug_poll_ms")]
    pub hotplug_poll_ms: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// Message log configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
    /// Label notes on the Digitakt's MIDI-track and auto channels
    #[serde(default)]
    pub vendor_note_names: bool,
    /// Also write tracing output to a daily file in the logs directory
    #[serde(default)]
    pub file: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input_port: None,
            output_port: None,
            nrpn_mode: false,
            hotplug_poll_ms: default_hotplug_poll_ms(),
            client_name: default_client_name(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
            vendor_note_names: false,
            file: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to load config: {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty file is a valid, all-default config
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.log.capacity == 0 {
            anyhow::bail!("log.capacity must be at least 1");
        }
        if self.midi.hotplug_poll_ms < 50 {
            anyhow::bail!(
                "midi.hotplug_poll_ms must be at least 50 (got {})",
                self.midi.hotplug_poll_ms
            );
        }
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        for (key, pattern) in [
            ("input_port", &self.midi.input_port),
            ("output_port", &self.midi.output_port),
        ] {
            if matches!(pattern, Some(p) if p.trim().is_empty()) {
                anyhow::bail!("midi.{} cannot be an empty string", key);
            }
        }
        Ok(())
    }

    /// Parameter CSV path, relative paths resolved against the config file
    pub fn parameters_path(&self, config_path: &Path) -> Option<PathBuf> {
        self.parameters
            .as_ref()
            .map(|p| resolve_relative(config_path, p))
    }

    pub fn snapshot_path(&self, config_path: &Path) -> Option<PathBuf> {
        self.snapshot_path
            .as_ref()
            .map(|p| resolve_relative(config_path, p))
    }
}

fn resolve_relative(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

// Default value functions
fn default_hotplug_poll_ms() -> u64 { 1000 }
fn default_client_name() -> String { "synthctl".to_string() }
fn default_log_capacity() -> usize { DEFAULT_CAPACITY }
