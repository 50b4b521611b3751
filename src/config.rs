use anyhow::{anyhow, Result};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::timestamps::DEFAULT_DISPLAY_OFFSET_MINUTES;

pub const ENV_PROJECT_URL: &str = "VM_PROJECT_URL";
pub const ENV_ANON_KEY: &str = "VM_ANON_KEY";
pub const ENV_DISPLAY_OFFSET: &str = "VM_DISPLAY_OFFSET_MINUTES";

const APP_DIR: &str = "volunteer-messenger";
const CONFIG_FILE: &str = "config.json";

/// Where the hosted backend lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub project_url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
    #[serde(default = "default_offset")]
    pub display_offset_minutes: i32,
    #[serde(default = "default_toast_seconds")]
    pub toast_seconds: u64,
}

fn default_offset() -> i32 {
    DEFAULT_DISPLAY_OFFSET_MINUTES
}

fn default_toast_seconds() -> u64 {
    4
}

/// Display settings used when no backend config is needed (demo mode).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayConfig {
    pub offset_minutes: i32,
    pub toast_seconds: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            offset_minutes: default_offset(),
            toast_seconds: default_toast_seconds(),
        }
    }
}

impl AppConfig {
    pub fn display(&self) -> DisplayConfig {
        DisplayConfig {
            offset_minutes: self.display_offset_minutes,
            toast_seconds: self.toast_seconds,
        }
    }

    /// Environment first, then the config file. `None` when neither is present.
    pub fn load() -> Result<Option<Self>> {
        if let Some(config) = Self::from_env()? {
            info!("Using backend configuration from environment");
            return Ok(Some(config));
        }
        Self::load_from(&config_dir()?.join(CONFIG_FILE))
    }

    pub fn from_env() -> Result<Option<Self>> {
        let (Ok(project_url), Ok(anon_key)) = (std::env::var(ENV_PROJECT_URL), std::env::var(ENV_ANON_KEY)) else {
            return Ok(None);
        };
        let display_offset_minutes = match std::env::var(ENV_DISPLAY_OFFSET) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("{} must be an integer number of minutes: {}", ENV_DISPLAY_OFFSET, e))?,
            Err(_) => default_offset(),
        };
        Ok(Some(AppConfig {
            backend: BackendConfig { project_url, anon_key },
            display_offset_minutes,
            toast_seconds: default_toast_seconds(),
        }))
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        info!("Loaded backend configuration from {}", path.display());
        Ok(Some(config))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `dir` instead of the platform config directory. First call wins.
pub fn set_config_dir_override(dir: PathBuf) {
    if CONFIG_DIR_OVERRIDE.set(dir).is_err() {
        log::warn!("Config directory override already set, ignoring");
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = match CONFIG_DIR_OVERRIDE.get() {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join(APP_DIR),
    };
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"project_url": "https://x.supabase.co", "anon_key": "k"}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.backend.project_url, "https://x.supabase.co");
        assert_eq!(config.display_offset_minutes, 360);
        assert_eq!(config.toast_seconds, 4);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load_from(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            backend: BackendConfig { project_url: "http://localhost:54321".into(), anon_key: "a".into() },
            display_offset_minutes: 0,
            toast_seconds: 10,
        };
        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap(), Some(config));
    }
}
