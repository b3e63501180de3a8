// ⚙️ Configuration - TOML file + CLI/env overrides
//
//   database = "/var/lib/trackerid/trackerid.db"
//   parks = "https://parks.example.org/parks.json"
//   fetch_timeout_secs = 15
//   server_addr = "0.0.0.0:3000"

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding cached packs
    pub database: PathBuf,

    /// Park registry location (file path or URL)
    pub parks: String,

    pub fetch_timeout_secs: u64,

    pub server_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            parks: "parks.json".into(),
            fetch_timeout_secs: 15,
            server_addr: "0.0.0.0:3000".into(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the platform config file when `None`.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = config_path();
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(Error::Config("fetch_timeout_secs must be > 0".into()));
        }
        if self.parks.trim().is_empty() {
            return Err(Error::Config("parks location must not be empty".into()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "trackerid", "trackerid")
}

/// Platform config file (`~/.config/trackerid/config.toml` on Linux)
pub fn config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("trackerid.toml"))
}

/// Platform data dir database (`~/.local/share/trackerid/trackerid.db` on Linux)
pub fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("trackerid.db"))
        .unwrap_or_else(|| PathBuf::from("trackerid.db"))
}
