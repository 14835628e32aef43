use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "games.db";
pub const DEFAULT_HELP_URL: &str = "https://www.discord.gg/k5HBFXqtCB";

#[cfg(windows)]
pub const DEFAULT_EXECUTABLE_SUFFIX: &str = ".exe";
#[cfg(not(windows))]
pub const DEFAULT_EXECUTABLE_SUFFIX: &str = ".x86_64";

/// User-tunable settings, read from `settings.json` in the config directory.
///
/// Every field is optional in the file; missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub scan_roots: Vec<PathBuf>,
    pub executable_suffix: String,
    pub help_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            scan_roots: default_scan_roots(),
            executable_suffix: DEFAULT_EXECUTABLE_SUFFIX.to_string(),
            help_url: DEFAULT_HELP_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the settings file if there is one. A file that fails to parse is
    /// logged and ignored so a typo never keeps the launcher from starting.
    pub fn load() -> Self {
        let Some(dirs) = project_dirs() else {
            warn!("cannot determine config directory, using defaults");
            return Self::default();
        };

        let path = dirs.config_dir().join(SETTINGS_FILE_NAME);
        match Self::load_from(&path) {
            Ok(Some(config)) => {
                info!("loaded settings from {}", path.display());
                config
            }
            Ok(None) => Self::default(),
            Err(err) => {
                warn!("ignoring settings: {err:#}");
                Self::default()
            }
        }
    }

    /// Reads `path`, returning `None` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(config.normalized()))
    }

    /// A blank suffix would match every file, so it falls back to the default.
    fn normalized(mut self) -> Self {
        let suffix = self.executable_suffix.trim();
        self.executable_suffix = if suffix.is_empty() {
            warn!("executable_suffix is empty, using {DEFAULT_EXECUTABLE_SUFFIX}");
            DEFAULT_EXECUTABLE_SUFFIX.to_string()
        } else {
            suffix.to_string()
        };
        self
    }

    /// Where the catalog lives: the configured path or `<data dir>/games.db`.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = project_dirs().context("Cannot determine project dirs")?;
        Ok(dirs.data_dir().join(DATABASE_FILE_NAME))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "GameShelf", "game_shelf")
}

#[cfg(windows)]
fn default_scan_roots() -> Vec<PathBuf> {
    [
        "C:/Program Files",
        "C:/Program Files (x86)",
        "C:/Games",
        "D:/Games",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(not(windows))]
fn default_scan_roots() -> Vec<PathBuf> {
    let Some(base) = directories::BaseDirs::new() else {
        return Vec::new();
    };
    vec![
        base.home_dir().join("Games"),
        base.data_dir().join("Steam").join("steamapps").join("common"),
    ]
}
