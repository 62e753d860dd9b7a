//! Parameter value snapshots
//!
//! Saves the current value of every parameter (and each group's channel) to
//! a JSON file and restores it later.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use super::ParameterTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub title: String,
    pub channel: u8,
    /// Parameter id => value
    pub parameters: BTreeMap<String, u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Timestamp of snapshot creation (milliseconds since epoch)
    pub timestamp: u64,
    /// Version of the snapshot format
    pub version: String,
    pub groups: BTreeMap<String, GroupSnapshot>,
}

impl ParameterSnapshot {
    /// Current snapshot format version
    pub const VERSION: &'static str = "1.0.0";

    pub fn from_table(table: &ParameterTable) -> Self {
        let groups = table
            .groups()
            .iter()
            .map(|group| {
                let parameters = group
                    .parameters
                    .iter()
                    .map(|p| (p.id.clone(), p.value()))
                    .collect();
                (
                    group.key.clone(),
                    GroupSnapshot {
                        title: group.title.clone(),
                        channel: group.channel(),
                        parameters,
                    },
                )
            })
            .collect();

        Self {
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            version: Self::VERSION.to_string(),
            groups,
        }
    }

    /// Apply the snapshot to a table.
    ///
    /// Unknown groups and ids are skipped; values are clamped to each
    /// parameter's range. Returns the number of values restored.
    pub fn restore_into(&self, table: &mut ParameterTable) -> usize {
        let mut restored = 0;
        for (key, snapshot) in &self.groups {
            let Some(group) = table.group_mut(key) else {
                warn!("Snapshot group '{}' not in parameter table, skipping", key);
                continue;
            };
            group.set_channel(snapshot.channel);

            for (id, value) in &snapshot.parameters {
                match group.parameters.iter_mut().find(|p| &p.id == id) {
                    Some(param) => {
                        param.set(*value as i32);
                        restored += 1;
                    }
                    None => debug!("Snapshot parameter '{}.{}' unknown, skipping", key, id),
                }
            }
        }
        restored
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize parameter snapshot")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;

        Ok(())
    }

    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

        serde_json::from_str(&json).context("Failed to parse parameter snapshot JSON")
    }
}
