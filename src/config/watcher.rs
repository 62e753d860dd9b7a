//! Configuration file watcher for hot-reload support
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a new file and renaming it over the old one still
//! trigger a reload. A burst of events collapses into a single reload, and a
//! reload whose contents equal the running config is not forwarded.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppConfig;

/// Quiet period after the last file event before the file is read
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Delivers each changed, valid config
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Watch `config_path`, starting from the config currently in use.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config_path: impl Into<PathBuf>, current: AppConfig) -> Result<Self> {
        let config_path = config_path.into();
        let file_name = config_path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("Not a config file path: {}", config_path.display()))?;
        let dir = match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify calls back on its own thread
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, &file_name) => {
                debug!("Config file event: {:?}", event.kind);
                let _ = event_tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!("Config watch error: {}", e),
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(reload_loop(config_path.clone(), current, event_rx, tx));

        info!("Watching {} for changes", config_path.display());
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next changed config; `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

async fn reload_loop(
    path: PathBuf,
    mut current: AppConfig,
    mut events: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<AppConfig>,
) {
    while events.recv().await.is_some() {
        if !settle(&mut events).await {
            return;
        }

        match AppConfig::load(&path).await {
            Ok(config) if config == current => {
                debug!("{} rewritten without changes", path.display());
            }
            Ok(config) => {
                info!("Configuration reloaded from {}", path.display());
                current = config.clone();
                if tx.send(config).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Config reload failed, keeping current settings: {:#}", e),
        }
    }
}

/// Swallow events until none arrives for [`DEBOUNCE`]; false once the
/// watcher has been dropped
async fn settle(events: &mut mpsc::UnboundedReceiver<()>) -> bool {
    loop {
        match tokio::time::timeout(DEBOUNCE, events.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => return false,
            Err(_) => return true,
        }
    }
}
