use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::motion::MoveDistance;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Operator-tunable connection and jog defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalibrationSettings {
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub connect_poll_interval_ms: u64,
    pub default_move_distance: MoveDistance,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            port: 5000,
            connect_timeout_ms: 40_000,
            connect_poll_interval_ms: 500,
            default_move_distance: MoveDistance::Fine,
        }
    }
}

impl CalibrationSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CalibrationSettings>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing file yields defaults; an
    /// unreadable one is an error, an unparsable one is logged and replaced
    /// by defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("ignoring invalid settings in {}: {}", path.display(), err);
                CalibrationSettings::default()
            })
        } else {
            CalibrationSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> CalibrationSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: CalibrationSettings) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: CalibrationSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", self.path.display()))?;
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &CalibrationSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
