use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DEFAULT_MAX_STEPS;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SafetyPolicy {
    pub require_confirm_risky: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self { require_confirm_risky: true }
    }
}

/// User preferences. Fields missing from the stored file take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_key: String,
    pub provider: String,
    pub model: String,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub safety: SafetyPolicy,
    pub max_steps: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
            safety: SafetyPolicy::default(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let settings: Settings = serde_json::from_reader(reader)?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    serde_json::to_writer_pretty(file, settings)?;
    Ok(())
}

/// `<config dir>/webcursor/settings.json`, falling back to the working
/// directory when the platform has no config dir.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("webcursor"))
        .unwrap_or_default()
        .join(SETTINGS_FILE)
}

/// Settings file plus an in-memory copy shared by the control panel and the
/// reasoning client.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let current = load_settings(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    /// Store that never touches disk until [`save`](Self::save) is called.
    pub fn in_memory(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(settings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings wholesale and persist them.
    pub fn save(&self, settings: Settings) -> Result<(), SettingsError> {
        save_settings(&self.path, &settings)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = settings;
        Ok(())
    }
}
