//! Store settings: `<root>/roster.yaml`.
//!
//! A missing file yields [`StoreSettings::default`]. Writes use the same
//! atomic `.tmp` + rename pattern as the directory backend.
//!
//! Every function has an explicit-root form; [`default_root`] resolves
//! `~/.roster` for callers that do not pass one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use roster_core::StorageLayout;

use crate::backoff::BackoffPolicy;
use crate::error::SettingsError;

pub const SETTINGS_FILE: &str = "roster.yaml";

/// Backoff parameters as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub max_ms: u64,
    #[serde(default)]
    pub jitter: f64,
}

impl BackoffSettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
            self.jitter,
        )
    }
}

/// Tunables of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub layout: StorageLayout,
    /// Conflict retries per call before `ExhaustedRetries`.
    pub max_retries: u32,
    pub conflict_backoff: BackoffSettings,
    /// Backend-failure retries per call before `BackendUnavailable`.
    pub max_unavailable_retries: u32,
    pub unavailable_backoff: BackoffSettings,
    /// Budget of each individual backend call.
    pub timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            layout: StorageLayout::Distributed,
            max_retries: 5,
            conflict_backoff: BackoffSettings {
                base_ms: 50,
                max_ms: 2_000,
                jitter: 0.5,
            },
            max_unavailable_retries: 3,
            unavailable_backoff: BackoffSettings {
                base_ms: 200,
                max_ms: 5_000,
                jitter: 0.5,
            },
            timeout_ms: 10_000,
        }
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `<root>/roster.yaml`
pub fn settings_path_at(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

/// `~/.roster`
pub fn default_root() -> Result<PathBuf, SettingsError> {
    dirs::home_dir()
        .map(|home| home.join(".roster"))
        .ok_or(SettingsError::HomeNotFound)
}

/// Load settings for the store at `root`; defaults when the file is absent.
pub fn load_at(root: &Path) -> Result<StoreSettings, SettingsError> {
    let path = settings_path_at(root);
    if !path.exists() {
        return Ok(StoreSettings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| SettingsError::Parse { path, source: e })
}

/// Atomically save settings for the store at `root`, creating `root` if needed.
pub fn save_at(root: &Path, settings: &StoreSettings) -> Result<(), SettingsError> {
    std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    let path = settings_path_at(root);
    let tmp = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.into(),
        source,
    }
}
