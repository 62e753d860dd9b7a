//! Parameter table
//!
//! Parses a CSV table of named synth parameters, grouped by section, each
//! mapped to a MIDI channel and a CC and/or NRPN number. The default table
//! for the Digitakt is embedded in the binary.

pub mod snapshot;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::midi::{MAX_14BIT, MAX_7BIT, MAX_CHANNEL};

pub use snapshot::ParameterSnapshot;

/// Default embedded CSV content
pub const DEFAULT_CSV: &str = include_str!("../../docs/digitakt-parameters.csv");

/// How a parameter is presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Knob,
    Slider,
    Toggle,
}

/// Wire target of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// MIDI channel (0-15)
    pub channel: u8,
    pub cc: Option<u8>,
    pub nrpn: Option<u16>,
}

/// A named, range-limited synth parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub id: String,
    pub name: String,
    pub kind: ControlKind,
    pub target: Target,
    pub min: u16,
    pub max: u16,
    pub default: u16,
    value: u16,
}

impl Parameter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ControlKind,
        target: Target,
        (min, max, default): (u16, u16, u16),
    ) -> Result<Self> {
        let id = id.into();

        if target.cc.is_none() && target.nrpn.is_none() {
            bail!("Parameter '{}' needs a cc or nrpn number", id);
        }
        if target.channel > MAX_CHANNEL {
            bail!("Parameter '{}': channel {} out of range", id, target.channel);
        }
        if let Some(cc) = target.cc {
            if cc > MAX_7BIT {
                bail!("Parameter '{}': cc {} out of range", id, cc);
            }
            if max > MAX_7BIT as u16 {
                bail!("Parameter '{}': max {} does not fit a CC value", id, max);
            }
        }
        if let Some(nrpn) = target.nrpn {
            if nrpn > MAX_14BIT {
                bail!("Parameter '{}': nrpn {} out of range", id, nrpn);
            }
        }
        if min > max || max > MAX_14BIT {
            bail!("Parameter '{}': invalid range {}..={}", id, min, max);
        }

        let mut param = Self {
            id,
            name: name.into(),
            kind,
            target,
            min,
            max,
            default,
            value: min,
        };
        param.set(default as i32);
        Ok(param)
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    /// Store a value clamped to [min, max], returning the stored value
    pub fn set(&mut self, value: i32) -> u16 {
        self.value = value.clamp(self.min as i32, self.max as i32) as u16;
        self.value
    }

    pub fn reset(&mut self) {
        self.value = self.default.clamp(self.min, self.max);
    }
}

/// A titled section of parameters sharing a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGroup {
    pub key: String,
    pub title: String,
    channel: u8,
    /// Channel the group was loaded with
    loaded_channel: u8,
    pub parameters: Vec<Parameter>,
}

impl ParameterGroup {
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Move the whole group to another channel
    pub fn set_channel(&mut self, channel: u8) {
        let channel = channel.min(MAX_CHANNEL);
        self.channel = channel;
        for param in &mut self.parameters {
            param.target.channel = channel;
        }
    }
}

/// CSV row
#[derive(Debug, Deserialize)]
struct ParameterRow {
    group: String,
    group_title: String,
    channel: u8,
    id: String,
    name: String,
    kind: ControlKind,
    min: u16,
    max: u16,
    default: u16,
    cc: Option<u8>,
    nrpn: Option<u16>,
}

/// All parameters, addressed as `group.id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    groups: Vec<ParameterGroup>,
}

impl ParameterTable {
    /// The embedded Digitakt table
    pub fn default_table() -> Result<Self> {
        Self::load_from_string(DEFAULT_CSV)
    }

    /// Load a table from a CSV file
    pub async fn load_from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let csv_content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read parameter CSV: {}", path.display()))?;

        Self::parse_csv(&csv_content)
            .with_context(|| format!("Invalid parameter CSV: {}", path.display()))
    }

    pub fn load_from_string(csv_content: &str) -> Result<Self> {
        Self::parse_csv(csv_content)
    }

    fn parse_csv(csv_content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(csv_content.as_bytes());
        let mut table = Self::default();

        for (line, result) in reader.deserialize().enumerate() {
            let row: ParameterRow =
                result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;

            let target = Target {
                channel: row.channel,
                cc: row.cc,
                nrpn: row.nrpn,
            };
            let param = Parameter::new(
                row.id,
                row.name,
                row.kind,
                target,
                (row.min, row.max, row.default),
            )
            .with_context(|| format!("Invalid parameter in group '{}'", row.group))?;
            table.insert(&row.group, &row.group_title, row.channel, param)?;
        }

        info!(
            "Loaded {} parameters in {} groups",
            table.len(),
            table.groups.len()
        );
        Ok(table)
    }

    /// Append a parameter to a group, creating the group on first use.
    ///
    /// The parameter takes the group's channel; a group never mixes channels
    /// and never holds two parameters with the same id.
    pub fn insert(
        &mut self,
        group_key: &str,
        title: &str,
        channel: u8,
        mut param: Parameter,
    ) -> Result<()> {
        let index = match self.groups.iter().position(|g| g.key == group_key) {
            Some(index) => index,
            None => {
                if channel > MAX_CHANNEL {
                    bail!("Group '{}': channel {} out of range", group_key, channel);
                }
                self.groups.push(ParameterGroup {
                    key: group_key.to_string(),
                    title: title.to_string(),
                    channel,
                    loaded_channel: channel,
                    parameters: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[index];

        if group.channel != channel {
            bail!(
                "Group '{}' mixes channels {} and {}",
                group.key,
                group.channel,
                channel
            );
        }
        if group.parameters.iter().any(|p| p.id == param.id) {
            bail!("Duplicate parameter '{}.{}'", group.key, param.id);
        }

        param.target.channel = channel;
        group.parameters.push(param);
        Ok(())
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    pub fn group_mut(&mut self, key: &str) -> Option<&mut ParameterGroup> {
        self.groups.iter_mut().find(|g| g.key == key)
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.parameters.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a parameter by `group.id`
    pub fn get(&self, key: &str) -> Option<&Parameter> {
        let (group, id) = key.split_once('.')?;
        self.groups
            .iter()
            .find(|g| g.key == group)?
            .parameters
            .iter()
            .find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Parameter> {
        let (group, id) = key.split_once('.')?;
        self.group_mut(group)?
            .parameters
            .iter_mut()
            .find(|p| p.id == id)
    }

    /// Parameters listening to a CC on a channel
    pub fn by_cc_mut(&mut self, channel: u8, cc: u8) -> impl Iterator<Item = &mut Parameter> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.parameters.iter_mut())
            .filter(move |p| p.target.channel == channel && p.target.cc == Some(cc))
    }

    /// Parameters listening to an NRPN number on a channel
    pub fn by_nrpn_mut(
        &mut self,
        channel: u8,
        nrpn: u16,
    ) -> impl Iterator<Item = &mut Parameter> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.parameters.iter_mut())
            .filter(move |p| p.target.channel == channel && p.target.nrpn == Some(nrpn))
    }

    pub fn reset_all(&mut self) {
        for group in &mut self.groups {
            for param in &mut group.parameters {
                param.reset();
            }
        }
    }

    /// Copy current values from a previous table, matching by `group.id`.
    /// Used when the table is reloaded.
    ///
    /// A group moved off its loaded channel (by a snapshot restore) stays
    /// on the channel it was moved to.
    pub fn carry_values_from(&mut self, previous: &ParameterTable) {
        let mut carried = 0;
        for group in &mut self.groups {
            let Some(old_group) = previous.groups.iter().find(|g| g.key == group.key) else {
                continue;
            };
            if old_group.channel != old_group.loaded_channel {
                group.set_channel(old_group.channel);
            }
            for param in &mut group.parameters {
                if let Some(old) = old_group.parameters.iter().find(|p| p.id == param.id) {
                    param.set(old.value() as i32);
                    carried += 1;
                }
            }
        }
        debug!("Carried {} parameter values into reloaded table", carried);
    }
}
