//! Application path management for portable and installed modes.
//!
//! - **Dev mode** (debug builds): `config.yaml` in the current directory wins.
//! - **Portable mode**: a `.portable` marker next to the executable keeps
//!   everything in that directory.
//! - **Installed mode** (default): config under the platform config dir,
//!   snapshots and logs under the data dir, both in a `synthctl` folder.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used under the platform config/data dirs
const APP_NAME: &str = "synthctl";

/// Application paths for config, snapshots, and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Default parameter snapshot file
    pub snapshot: PathBuf,
    /// Directory for rolling tracing log files
    pub logs_dir: PathBuf,
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] Running in DEV mode (config.yaml found in {})", cwd.display());
                return Self::portable(&cwd);
            }
        }

        if exe_dir.join(".portable").exists() {
            return Self::portable(&exe_dir);
        }

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| exe_dir.clone())
            .join(APP_NAME);
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| exe_dir.clone())
            .join(APP_NAME);

        Self {
            config: config_dir.join("config.yaml"),
            snapshot: data_dir.join("snapshot.json"),
            logs_dir: data_dir.join("logs"),
            is_portable: false,
        }
    }

    /// Everything rooted in one directory
    pub fn portable(base: &Path) -> Self {
        Self {
            config: base.join("config.yaml"),
            snapshot: base.join("snapshot.json"),
            logs_dir: base.join("logs"),
            is_portable: true,
        }
    }

    /// Paths for an explicit `--config` file; snapshots and logs sit beside it
    pub fn for_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let base = config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            snapshot: base.join("snapshot.json"),
            logs_dir: base.join("logs"),
            config,
            is_portable: true,
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the config parent and logs directories
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [self.base_dir(), self.logs_dir.clone()] {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }
}
