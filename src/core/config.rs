/*
 * Application configuration: where the shortcuts file, the catalog and the sync
 * state live, and the tunables of the sync passes. Stored as `config.json` in the
 * per-user local configuration directory.
 *
 * `ConfigManagerOperations` abstracts the storage so callers and tests can swap it;
 * `CoreConfigManager` is the file-backed implementation built on
 * `path_utils::get_base_app_config_local_dir`.
 */
use crate::core::app_id::DEFAULT_LAUNCH_SCHEME;
use crate::core::exe_discovery::DEFAULT_SCAN_DEPTH;
use crate::core::path_utils;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "ShortcutSync";
pub const DEFAULT_SOURCE_TAG: &str = "Steam Shortcuts";
pub const DEFAULT_DEBOUNCE_DELAY_MS: u64 = 2000;

const CONFIG_FILENAME: &str = "config.json";
const CATALOG_FILENAME: &str = "catalog.json";
const STATE_FILENAME: &str = "sync_state.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Serde(serde_json::Error),
    NoConfigDirectory,
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Serde(e) => write!(f, "Configuration file is malformed: {e}"),
            ConfigError::NoConfigDirectory => {
                write!(f, "Could not determine the configuration directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Serde(e) => Some(e),
            ConfigError::NoConfigDirectory => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// The external launcher's shortcuts file. No sensible default exists.
    pub shortcuts_path: Option<PathBuf>,
    /// Defaults to `catalog.json` next to the config file.
    pub catalog_path: Option<PathBuf>,
    /// Defaults to `sync_state.json` next to the config file.
    pub state_path: Option<PathBuf>,
    pub launch_scheme: String,
    pub source_tag: String,
    pub debounce_delay_ms: u64,
    pub discovery_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            shortcuts_path: None,
            catalog_path: None,
            state_path: None,
            launch_scheme: DEFAULT_LAUNCH_SCHEME.to_string(),
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            debounce_delay_ms: DEFAULT_DEBOUNCE_DELAY_MS,
            discovery_depth: DEFAULT_SCAN_DEPTH,
        }
    }
}

impl SyncConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn catalog_path_in(&self, config_dir: &Path) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| config_dir.join(CATALOG_FILENAME))
    }

    pub fn state_path_in(&self, config_dir: &Path) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| config_dir.join(STATE_FILENAME))
    }
}

pub trait ConfigManagerOperations: Send + Sync {
    fn config_dir(&self, app_name: &str) -> Result<PathBuf>;
    fn load_config(&self, app_name: &str) -> Result<SyncConfig>;
    fn save_config(&self, app_name: &str, config: &SyncConfig) -> Result<()>;
}

pub struct CoreConfigManager {
    config_dir_override: Option<PathBuf>,
}

impl CoreConfigManager {
    pub fn new() -> Self {
        CoreConfigManager {
            config_dir_override: None,
        }
    }

    /*
     * A manager that ignores the platform directory and uses `dir` instead, for the
     * `--config-dir` flag and for tests.
     */
    pub fn with_config_dir(dir: &Path) -> Self {
        CoreConfigManager {
            config_dir_override: Some(dir.to_path_buf()),
        }
    }
}

impl Default for CoreConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManagerOperations for CoreConfigManager {
    fn config_dir(&self, app_name: &str) -> Result<PathBuf> {
        match &self.config_dir_override {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Ok(dir.clone())
            }
            None => path_utils::get_base_app_config_local_dir(app_name)
                .ok_or(ConfigError::NoConfigDirectory),
        }
    }

    /*
     * Loads `config.json`. A missing file yields the defaults; a present but
     * unreadable or malformed file is an error rather than a silent reset.
     */
    fn load_config(&self, app_name: &str) -> Result<SyncConfig> {
        let file_path = self.config_dir(app_name)?.join(CONFIG_FILENAME);
        if !file_path.exists() {
            log::debug!("CoreConfigManager: {file_path:?} does not exist; using defaults.");
            return Ok(SyncConfig::default());
        }
        let reader = BufReader::new(File::open(&file_path)?);
        let config: SyncConfig = serde_json::from_reader(reader)?;
        log::debug!("CoreConfigManager: Loaded configuration from {file_path:?}.");
        Ok(config)
    }

    fn save_config(&self, app_name: &str, config: &SyncConfig) -> Result<()> {
        let file_path = self.config_dir(app_name)?.join(CONFIG_FILENAME);
        let mut writer = BufWriter::new(File::create(&file_path)?);
        serde_json::to_writer_pretty(&mut writer, config)?;
        writer.flush()?;
        log::debug!("CoreConfigManager: Saved configuration to {file_path:?}.");
        Ok(())
    }
}
