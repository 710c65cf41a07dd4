use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// On-disk settings. The file keeps the legacy layout: a single `[Settings]`
/// section with `SteamCMDPath` and `DestinationFolder` keys.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(rename = "Settings", default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(rename = "SteamCMDPath", default = "program_dir")]
    pub steamcmd_dir: PathBuf,
    #[serde(rename = "DestinationFolder", default)]
    pub destination_folder: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steamcmd_dir: program_dir(),
            destination_folder: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads the config from `path` (default: `config.toml` next to the
    /// executable). A missing file is replaced by defaults and persisted
    /// immediately; missing keys fall back per field.
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let resolved_path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(default_config_path);

        if resolved_path.exists() {
            let content = fs::read_to_string(&resolved_path).map_err(|source| ConfigError::Io {
                path: resolved_path.clone(),
                source,
            })?;
            let config =
                toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
                    path: resolved_path.clone(),
                    source,
                })?;
            Ok((config, resolved_path))
        } else {
            let config = Config::default();
            config.save(&resolved_path)?;
            Ok((config, resolved_path))
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let serialized =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Directory holding the running executable, falling back to the current
/// directory. The legacy tool kept both the config file and SteamCMD here.
pub fn program_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_config_path() -> PathBuf {
    program_dir().join(CONFIG_FILE_NAME)
}
