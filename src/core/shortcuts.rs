/*
 * Maps the generic key/value tree of the external launcher's shortcuts file onto
 * `ShortcutRecord`s and back, and owns reading and writing that file.
 *
 * File layout: a root tree with one key `shortcuts`, whose children are keyed by
 * stringified zero-based indices in insertion order, each a per-record tree. Field
 * lookup on read is case-insensitive with exact casing preferred; writes always use
 * the canonical casing. Fields this crate does not model are carried through in
 * `extra_fields` so that a read-modify-write cycle never drops them.
 */
use crate::core::app_id;
use crate::core::kv_binary::{self, FormatError, KvTree, KvValue};
use crate::core::path_utils;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const SHORTCUTS_ROOT_KEY: &str = "shortcuts";

const KEY_APP_ID: &str = "appid";
const KEY_APP_NAME: &str = "appname";
const KEY_EXE: &str = "exe";
const KEY_START_DIR: &str = "StartDir";
const KEY_ICON: &str = "icon";
const KEY_SHORTCUT_PATH: &str = "ShortcutPath";
const KEY_LAUNCH_OPTIONS: &str = "LaunchOptions";
const KEY_IS_HIDDEN: &str = "IsHidden";
const KEY_ALLOW_DESKTOP_CONFIG: &str = "AllowDesktopConfig";
const KEY_ALLOW_OVERLAY: &str = "AllowOverlay";
const KEY_OPEN_VR: &str = "OpenVR";
const KEY_TAGS: &str = "tags";

const KNOWN_KEYS: [&str; 12] = [
    KEY_APP_ID,
    KEY_APP_NAME,
    KEY_EXE,
    KEY_START_DIR,
    KEY_ICON,
    KEY_SHORTCUT_PATH,
    KEY_LAUNCH_OPTIONS,
    KEY_IS_HIDDEN,
    KEY_ALLOW_DESKTOP_CONFIG,
    KEY_ALLOW_OVERLAY,
    KEY_OPEN_VR,
    KEY_TAGS,
];

#[derive(Debug)]
pub enum ShortcutFileError {
    Io(io::Error),
    Format(FormatError),
    Layout(String),
}

impl From<io::Error> for ShortcutFileError {
    fn from(err: io::Error) -> Self {
        ShortcutFileError::Io(err)
    }
}

impl From<FormatError> for ShortcutFileError {
    fn from(err: FormatError) -> Self {
        ShortcutFileError::Format(err)
    }
}

impl std::fmt::Display for ShortcutFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShortcutFileError::Io(e) => write!(f, "Shortcuts file I/O error: {e}"),
            ShortcutFileError::Format(e) => write!(f, "Malformed shortcuts file: {e}"),
            ShortcutFileError::Layout(msg) => write!(f, "Unexpected shortcuts file layout: {msg}"),
        }
    }
}

impl std::error::Error for ShortcutFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShortcutFileError::Io(e) => Some(e),
            ShortcutFileError::Format(e) => Some(e),
            ShortcutFileError::Layout(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShortcutFileError>;

/*
 * One entry of the shortcuts file. `app_id` is zero when the file carries none.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortcutRecord {
    pub app_name: String,
    pub exe: String,
    pub start_dir: String,
    pub icon: String,
    pub shortcut_path: String,
    pub launch_options: String,
    pub app_id: u32,
    pub is_hidden: bool,
    pub allow_desktop_config: bool,
    pub allow_overlay: bool,
    pub open_vr: bool,
    pub tags: Vec<String>,
    #[serde(skip)]
    pub extra_fields: KvTree,
}

impl Default for ShortcutRecord {
    fn default() -> Self {
        ShortcutRecord {
            app_name: String::new(),
            exe: String::new(),
            start_dir: String::new(),
            icon: String::new(),
            shortcut_path: String::new(),
            launch_options: String::new(),
            app_id: 0,
            is_hidden: false,
            allow_desktop_config: true,
            allow_overlay: true,
            open_vr: false,
            tags: Vec::new(),
            extra_fields: KvTree::new(),
        }
    }
}

fn read_string(tree: &KvTree, key: &str) -> String {
    match tree.get_ignore_case(key) {
        Some(KvValue::String(s)) => s.clone(),
        Some(KvValue::Int32(v)) => v.to_string(),
        _ => String::new(),
    }
}

fn read_bool(tree: &KvTree, key: &str, default: bool) -> bool {
    match tree.get_ignore_case(key) {
        Some(KvValue::Int32(v)) => *v != 0,
        Some(KvValue::String(s)) => matches!(s.trim(), "1" | "true" | "True"),
        _ => default,
    }
}

fn read_index_list(tree: &KvTree) -> Vec<String> {
    tree.iter()
        .filter_map(|(_, value)| value.as_str().map(str::to_string))
        .collect()
}

fn index_list(values: &[String]) -> KvTree {
    let mut tree = KvTree::new();
    for (i, value) in values.iter().enumerate() {
        tree.insert(i.to_string(), value.as_str());
    }
    tree
}

impl ShortcutRecord {
    /*
     * Creates a shortcut for a new pairing. The exe is stored quoted, the way the
     * external launcher writes it, and the app id is derived from exactly that text.
     */
    pub fn new(app_name: &str, exe: &str, start_dir: &str, launch_options: &str) -> Self {
        let exe = path_utils::quote(exe);
        let start_dir = if start_dir.trim().is_empty() {
            String::new()
        } else {
            path_utils::quote(start_dir)
        };
        ShortcutRecord {
            app_id: app_id::derive_app_id(&exe, app_name),
            app_name: app_name.to_string(),
            exe,
            start_dir,
            launch_options: launch_options.to_string(),
            ..ShortcutRecord::default()
        }
    }

    pub fn from_tree(tree: &KvTree) -> Self {
        let app_id = tree
            .get_ignore_case(KEY_APP_ID)
            .and_then(KvValue::as_i32)
            .map(|v| v as u32)
            .unwrap_or(0);

        let tags = tree
            .get_ignore_case(KEY_TAGS)
            .and_then(KvValue::as_tree)
            .map(read_index_list)
            .unwrap_or_default();

        let mut extra_fields = KvTree::new();
        for (key, value) in tree.iter() {
            if !KNOWN_KEYS.iter().any(|known| known.eq_ignore_ascii_case(key)) {
                extra_fields.insert(key, value.clone());
            }
        }

        ShortcutRecord {
            app_name: read_string(tree, KEY_APP_NAME),
            exe: read_string(tree, KEY_EXE),
            start_dir: read_string(tree, KEY_START_DIR),
            icon: read_string(tree, KEY_ICON),
            shortcut_path: read_string(tree, KEY_SHORTCUT_PATH),
            launch_options: read_string(tree, KEY_LAUNCH_OPTIONS),
            app_id,
            is_hidden: read_bool(tree, KEY_IS_HIDDEN, false),
            allow_desktop_config: read_bool(tree, KEY_ALLOW_DESKTOP_CONFIG, true),
            allow_overlay: read_bool(tree, KEY_ALLOW_OVERLAY, true),
            open_vr: read_bool(tree, KEY_OPEN_VR, false),
            tags,
            extra_fields,
        }
    }

    pub fn to_tree(&self) -> KvTree {
        let mut tree = KvTree::new();
        tree.insert(KEY_APP_ID, self.app_id as i32);
        tree.insert(KEY_APP_NAME, self.app_name.as_str());
        tree.insert(KEY_EXE, self.exe.as_str());
        tree.insert(KEY_START_DIR, self.start_dir.as_str());
        tree.insert(KEY_ICON, self.icon.as_str());
        tree.insert(KEY_SHORTCUT_PATH, self.shortcut_path.as_str());
        tree.insert(KEY_LAUNCH_OPTIONS, self.launch_options.as_str());
        tree.insert(KEY_IS_HIDDEN, i32::from(self.is_hidden));
        tree.insert(KEY_ALLOW_DESKTOP_CONFIG, i32::from(self.allow_desktop_config));
        tree.insert(KEY_ALLOW_OVERLAY, i32::from(self.allow_overlay));
        tree.insert(KEY_OPEN_VR, i32::from(self.open_vr));
        for (key, value) in self.extra_fields.iter() {
            tree.insert(key, value.clone());
        }
        tree.insert(KEY_TAGS, index_list(&self.tags));
        tree
    }

    pub fn exe_path(&self) -> &str {
        path_utils::unquote(&self.exe)
    }

    pub fn start_dir_path(&self) -> &str {
        path_utils::unquote(&self.start_dir)
    }

    /*
     * The stored id, or the one the external launcher would derive when none is stored.
     */
    pub fn effective_app_id(&self) -> u32 {
        if self.app_id != 0 {
            self.app_id
        } else {
            app_id::derive_app_id(&self.exe, &self.app_name)
        }
    }

    pub fn stable_content_id(&self) -> String {
        app_id::stable_content_id(self.exe_path(), &self.app_name)
    }
}

pub fn records_from_tree(root: &KvTree) -> Result<Vec<ShortcutRecord>> {
    let Some(value) = root.get_ignore_case(SHORTCUTS_ROOT_KEY) else {
        if root.is_empty() {
            return Ok(Vec::new());
        }
        return Err(ShortcutFileError::Layout(format!(
            "missing '{SHORTCUTS_ROOT_KEY}' key"
        )));
    };
    let Some(list) = value.as_tree() else {
        return Err(ShortcutFileError::Layout(format!(
            "'{SHORTCUTS_ROOT_KEY}' is not a nested tree"
        )));
    };

    let mut records = Vec::with_capacity(list.len());
    for (index, entry) in list.iter() {
        match entry.as_tree() {
            Some(record_tree) => records.push(ShortcutRecord::from_tree(record_tree)),
            None => log::warn!("Shortcuts: Ignoring non-tree entry at index '{index}'."),
        }
    }
    Ok(records)
}

pub fn records_to_tree(records: &[ShortcutRecord]) -> KvTree {
    let mut list = KvTree::new();
    for (i, record) in records.iter().enumerate() {
        list.insert(i.to_string(), record.to_tree());
    }
    let mut root = KvTree::new();
    root.insert(SHORTCUTS_ROOT_KEY, list);
    root
}

/*
 * Reads every record from a shortcuts file. A missing file is an empty list, since
 * the external launcher only creates it once the first shortcut exists.
 */
pub fn read_shortcuts_file(path: &Path) -> Result<Vec<ShortcutRecord>> {
    if !path.exists() {
        log::debug!("Shortcuts: File {path:?} does not exist; treating as empty.");
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    let root = kv_binary::decode(&bytes)?;
    let records = records_from_tree(&root)?;
    log::debug!("Shortcuts: Read {} records from {path:?}.", records.len());
    Ok(records)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .share_mode(0)
        .open(path)
}

#[cfg(not(windows))]
fn open_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/*
 * Writes the full record list. The bytes are encoded in memory first, written to a
 * fresh sibling file opened exclusively, synced, and then renamed over the target,
 * so a failure at any point leaves the previous file intact.
 */
pub fn write_shortcuts_file(path: &Path, records: &[ShortcutRecord]) -> Result<()> {
    let bytes = kv_binary::encode(&records_to_tree(records))?;
    let temp_path = temp_sibling(path);
    if temp_path.exists() {
        log::warn!("Shortcuts: Removing stale temporary file {temp_path:?}.");
        fs::remove_file(&temp_path)?;
    }

    let write_result = (|| -> io::Result<()> {
        let mut file = open_exclusive(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = write_result {
        log::error!("Shortcuts: Failed to write {path:?}: {e}");
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        return Err(e.into());
    }
    log::debug!(
        "Shortcuts: Wrote {} records ({} bytes) to {path:?}.",
        records.len(),
        bytes.len()
    );
    Ok(())
}
