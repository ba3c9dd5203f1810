/*
 * Persisted pairing state between the shortcuts file and the catalog.
 *
 * `IdentifierMapping` associates a shortcut's 32-bit app id (stored as its decimal
 * string) with a catalog record id; `recorded_executables` remembers the executable
 * each catalog record was last exported or imported with, so that a URL-only catalog
 * record can later be mapped back to a file. Both are plain string maps because the
 * host settings store is a string key/value store. Entries are never pruned: a stale
 * entry is only consulted when its catalog id still resolves.
 *
 * Passes work on immutable `SyncState` snapshots and return the entries they want to
 * add; the coordinator merges and persists them once per pass.
 */
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub enum StateError {
    Io(io::Error),
    Serde(serde_json::Error),
}

impl From<io::Error> for StateError {
    fn from(err: io::Error) -> Self {
        StateError::Io(err)
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serde(err)
    }
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Io(e) => write!(f, "Sync state I/O error: {e}"),
            StateError::Serde(e) => write!(f, "Sync state serialization error: {e}"),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Io(e) => Some(e),
            StateError::Serde(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierMapping {
    entries: BTreeMap<String, String>,
}

impl IdentifierMapping {
    pub fn new() -> Self {
        IdentifierMapping::default()
    }

    pub fn from_raw(entries: BTreeMap<String, String>) -> Self {
        IdentifierMapping { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /*
     * The raw stored catalog id for an app id, exactly as persisted. Callers must
     * still check that it resolves; it may be empty or dangling.
     */
    pub fn catalog_id_for(&self, app_id: u32) -> Option<&str> {
        self.entries.get(&app_id.to_string()).map(String::as_str)
    }

    /*
     * Reverse lookup. Keys that do not parse as u32 are skipped with a debug log;
     * when several app ids point at the same record the numerically lowest wins so
     * the result is deterministic.
     */
    pub fn app_id_for(&self, catalog_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .filter(|(_, value)| value.as_str() == catalog_id)
            .filter_map(|(key, _)| match key.parse::<u32>() {
                Ok(id) => Some(id),
                Err(_) => {
                    log::debug!("IdentifierMapping: Skipping malformed key '{key}'.");
                    None
                }
            })
            .min()
    }

    pub fn contains_catalog_id(&self, catalog_id: &str) -> bool {
        self.entries.values().any(|v| v == catalog_id)
    }

    pub fn insert(&mut self, app_id: u32, catalog_id: &str) {
        self.entries.insert(app_id.to_string(), catalog_id.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub id_mapping: IdentifierMapping,
    #[serde(default)]
    pub recorded_executables: BTreeMap<String, String>,
}

impl SyncState {
    pub fn recorded_executable(&self, catalog_id: &str) -> Option<&str> {
        self.recorded_executables
            .get(catalog_id)
            .map(String::as_str)
            .filter(|exe| !exe.trim().is_empty())
    }

    /*
     * Returns a new snapshot with `changes` applied on top of this one.
     */
    pub fn merged(&self, changes: &StateChanges) -> SyncState {
        let mut next = self.clone();
        for (app_id, catalog_id) in &changes.mappings {
            next.id_mapping.insert(*app_id, catalog_id);
        }
        for (catalog_id, exe) in &changes.executables {
            next.recorded_executables
                .insert(catalog_id.clone(), exe.clone());
        }
        next
    }
}

/*
 * Entries a reconciliation pass wants to record.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChanges {
    pub mappings: Vec<(u32, String)>,
    pub executables: Vec<(String, String)>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty() && self.executables.is_empty()
    }

    pub fn record(&mut self, app_id: u32, catalog_id: &str, exe: &str) {
        self.mappings.push((app_id, catalog_id.to_string()));
        if !exe.trim().is_empty() {
            self.executables
                .push((catalog_id.to_string(), exe.to_string()));
        }
    }
}

pub trait SettingsStoreOperations: Send + Sync {
    fn load_state(&self) -> Result<SyncState>;
    fn save_state(&self, state: &SyncState) -> Result<()>;
}

/*
 * JSON file store. A missing file is an empty state.
 */
pub struct CoreSettingsStore {
    path: PathBuf,
}

impl CoreSettingsStore {
    pub fn new(path: &Path) -> Self {
        CoreSettingsStore {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStoreOperations for CoreSettingsStore {
    fn load_state(&self) -> Result<SyncState> {
        if !self.path.exists() {
            log::debug!("CoreSettingsStore: {:?} does not exist; empty state.", self.path);
            return Ok(SyncState::default());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let state: SyncState = serde_json::from_reader(reader)?;
        log::debug!(
            "CoreSettingsStore: Loaded {} id mappings from {:?}.",
            state.id_mapping.len(),
            self.path
        );
        Ok(state)
    }

    fn save_state(&self, state: &SyncState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        log::debug!(
            "CoreSettingsStore: Saved {} id mappings to {:?}.",
            state.id_mapping.len(),
            self.path
        );
        Ok(())
    }
}

/*
 * Volatile store for hosts that persist settings themselves, and for tests.
 */
#[derive(Default)]
pub struct MemorySettingsStore {
    state: Mutex<SyncState>,
}

impl MemorySettingsStore {
    pub fn new(state: SyncState) -> Self {
        MemorySettingsStore {
            state: Mutex::new(state),
        }
    }
}

impl SettingsStoreOperations for MemorySettingsStore {
    fn load_state(&self) -> Result<SyncState> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save_state(&self, state: &SyncState) -> Result<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        Ok(())
    }
}
