/*
 * The library catalog as seen by this crate: a set of `CatalogRecord`s owned by an
 * external application. `CatalogOperations` is the query/update surface the
 * reconciliation passes depend on; `CoreCatalog` is a concrete implementation backed
 * by a JSON file (or nothing, for in-memory use) that the CLI and tests drive.
 */
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub enum CatalogError {
    Io(io::Error),
    Serde(serde_json::Error),
    NotFound(String),
}

impl From<io::Error> for CatalogError {
    fn from(err: io::Error) -> Self {
        CatalogError::Io(err)
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Serde(err)
    }
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "Catalog I/O error: {e}"),
            CatalogError::Serde(e) => write!(f, "Catalog serialization error: {e}"),
            CatalogError::NotFound(id) => write!(f, "Catalog record not found: {id}"),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Io(e) => Some(e),
            CatalogError::Serde(e) => Some(e),
            CatalogError::NotFound(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    File,
    Url,
    Emulator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchAction {
    pub kind: ActionKind,
    /// Executable path, URL, or (for emulators) the emulator executable.
    pub target: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub is_primary: bool,
}

impl LaunchAction {
    pub fn file(target: &str, working_dir: &str, arguments: &str) -> Self {
        LaunchAction {
            kind: ActionKind::File,
            target: target.to_string(),
            working_dir: working_dir.to_string(),
            arguments: arguments.to_string(),
            is_primary: true,
        }
    }

    pub fn url(target: &str) -> Self {
        LaunchAction {
            kind: ActionKind::Url,
            target: target.to_string(),
            working_dir: String::new(),
            arguments: String::new(),
            is_primary: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Opaque id assigned by the catalog.
    #[serde(default)]
    pub id: String,
    /// Source-specific game id (for records this integration created: the shortcut key).
    #[serde(default)]
    pub game_id: String,
    pub name: String,
    /// Tag of the library plugin the record originates from.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub actions: Vec<LaunchAction>,
    #[serde(default)]
    pub install_dir: Option<String>,
    #[serde(default)]
    pub is_installed: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CatalogRecord {
    pub fn new(name: &str, source: &str) -> Self {
        CatalogRecord {
            id: String::new(),
            game_id: String::new(),
            name: name.to_string(),
            source: source.to_string(),
            actions: Vec::new(),
            install_dir: None,
            is_installed: false,
            hidden: false,
            tags: Vec::new(),
        }
    }

    pub fn name_matches(&self, other: &str) -> bool {
        names_equal(&self.name, other)
    }

    pub fn install_dir(&self) -> Option<&str> {
        self.install_dir
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/*
 * Case-insensitive, whitespace-trimmed display name comparison.
 */
pub fn names_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

pub trait CatalogOperations: Send + Sync {
    fn list(&self) -> Result<Vec<CatalogRecord>>;
    fn get(&self, id: &str) -> Result<Option<CatalogRecord>>;
    /*
     * Adds a record and returns the id the catalog assigned to it. A non-empty id on
     * the incoming record is kept.
     */
    fn add(&self, record: CatalogRecord) -> Result<String>;
    fn update(&self, record: CatalogRecord) -> Result<()>;

    fn list_by_source(&self, source: &str) -> Result<Vec<CatalogRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.source == source)
            .collect())
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<CatalogRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.name_matches(name))
            .collect())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    records: Vec<CatalogRecord>,
}

pub struct CoreCatalog {
    path: Option<PathBuf>,
    state: Mutex<CatalogFile>,
}

impl CoreCatalog {
    pub fn in_memory() -> Self {
        CoreCatalog {
            path: None,
            state: Mutex::new(CatalogFile::default()),
        }
    }

    pub fn with_records(records: Vec<CatalogRecord>) -> Self {
        let catalog = CoreCatalog::in_memory();
        {
            let mut state = catalog.lock_state();
            for record in records {
                Self::insert_locked(&mut state, record);
            }
        }
        catalog
    }

    /*
     * Opens a JSON-backed catalog. A missing file starts an empty catalog that is
     * created on the first write.
     */
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let file: CatalogFile = serde_json::from_reader(reader)?;
            log::debug!(
                "CoreCatalog: Loaded {} records from {path:?}.",
                file.records.len()
            );
            file
        } else {
            log::debug!("CoreCatalog: {path:?} does not exist; starting empty.");
            CatalogFile::default()
        };
        Ok(CoreCatalog {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, CatalogFile> {
        self.state.lock().unwrap_or_else(|e| {
            log::warn!("CoreCatalog: State mutex poisoned; continuing.");
            e.into_inner()
        })
    }

    fn insert_locked(state: &mut CatalogFile, mut record: CatalogRecord) -> String {
        if record.id.is_empty() {
            state.next_id += 1;
            record.id = format!("{:08}", state.next_id);
        }
        let id = record.id.clone();
        state.records.push(record);
        id
    }

    fn persist_locked(&self, state: &CatalogFile) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        log::trace!(
            "CoreCatalog: Persisted {} records to {path:?}.",
            state.records.len()
        );
        Ok(())
    }
}

impl CatalogOperations for CoreCatalog {
    fn list(&self) -> Result<Vec<CatalogRecord>> {
        Ok(self.lock_state().records.clone())
    }

    fn get(&self, id: &str) -> Result<Option<CatalogRecord>> {
        Ok(self
            .lock_state()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    fn add(&self, record: CatalogRecord) -> Result<String> {
        let mut state = self.lock_state();
        let id = Self::insert_locked(&mut state, record);
        self.persist_locked(&state)?;
        log::debug!("CoreCatalog: Added record {id}.");
        Ok(id)
    }

    fn update(&self, record: CatalogRecord) -> Result<()> {
        let mut state = self.lock_state();
        let slot = state
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| CatalogError::NotFound(record.id.clone()))?;
        *slot = record;
        self.persist_locked(&state)
    }
}
