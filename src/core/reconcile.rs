/*
 * Import and export passes between the shortcuts file and the catalog.
 *
 * Planning is pure: `plan_import` and `plan_export` take immutable snapshots (the
 * shortcuts read from disk, the catalog listing, the persisted `SyncState`) and
 * return what should change. `Reconciler` wraps them with I/O: it reads the
 * snapshots, applies the plan, writes the shortcuts file and persists the state,
 * all while holding one lock so only a single pass touches the file at a time.
 */
use crate::core::app_id;
use crate::core::catalog::{CatalogError, CatalogOperations, CatalogRecord, LaunchAction};
use crate::core::exe_discovery::ExecutableDiscoveryOperations;
use crate::core::launch_target::{
    LaunchTarget, LaunchTargetChain, ManualSelectionOperations, ResolveRequest, SkipReason,
};
use crate::core::matcher::{self, MatchContext};
use crate::core::path_utils;
use crate::core::shortcuts::{self, ShortcutFileError, ShortcutRecord};
use crate::core::sync_state::{SettingsStoreOperations, StateChanges, StateError, SyncState};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum SyncError {
    ShortcutFile(ShortcutFileError),
    Catalog(CatalogError),
    State(StateError),
}

impl From<ShortcutFileError> for SyncError {
    fn from(err: ShortcutFileError) -> Self {
        SyncError::ShortcutFile(err)
    }
}

impl From<CatalogError> for SyncError {
    fn from(err: CatalogError) -> Self {
        SyncError::Catalog(err)
    }
}

impl From<StateError> for SyncError {
    fn from(err: StateError) -> Self {
        SyncError::State(err)
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::ShortcutFile(e) => write!(f, "Sync failed: {e}"),
            SyncError::Catalog(e) => write!(f, "Sync failed: {e}"),
            SyncError::State(e) => write!(f, "Sync failed: {e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::ShortcutFile(e) => Some(e),
            SyncError::Catalog(e) => Some(e),
            SyncError::State(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/*
 * The collaborators and settings a `Reconciler` works with, assembled once by the host.
 */
pub struct SyncContext {
    pub catalog: Arc<dyn CatalogOperations>,
    pub settings: Arc<dyn SettingsStoreOperations>,
    pub discovery: Arc<dyn ExecutableDiscoveryOperations>,
    pub manual_selection: Option<Arc<dyn ManualSelectionOperations>>,
    pub shortcuts_path: PathBuf,
    /// Source tag of catalog records this integration creates.
    pub source_tag: String,
    pub launch_scheme: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub created: usize,
    /// Shortcuts that already have a catalog counterpart.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub catalog_id: String,
    pub name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportOutcome {
    pub created: usize,
    pub updated: usize,
    /// Paired shortcuts that already matched the catalog record.
    pub unchanged: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl ExportOutcome {
    pub fn changed_file(&self) -> bool {
        self.created > 0 || self.updated > 0
    }
}

#[derive(Debug, Clone)]
pub struct PlannedImport {
    /// Effective app id of the shortcut the record was minted from.
    pub app_id: u32,
    pub exe: String,
    pub record: CatalogRecord,
}

#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub to_create: Vec<PlannedImport>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExportPlan {
    /// The complete new contents of the shortcuts file.
    pub shortcuts: Vec<ShortcutRecord>,
    pub outcome: ExportOutcome,
    pub changes: StateChanges,
}

/*
 * Catalog-side key for a shortcut: its decimal app id when the file carries one,
 * otherwise the content hash.
 */
pub fn catalog_key(shortcut: &ShortcutRecord) -> String {
    if shortcut.app_id != 0 {
        shortcut.app_id.to_string()
    } else {
        shortcut.stable_content_id()
    }
}

fn record_from_shortcut(shortcut: &ShortcutRecord, key: String, ctx: &MatchContext<'_>) -> CatalogRecord {
    let mut record = CatalogRecord::new(shortcut.app_name.trim(), ctx.own_source);
    record.game_id = key;
    record.actions.push(LaunchAction::url(&app_id::launch_url(
        ctx.launch_scheme,
        shortcut.effective_app_id(),
    )));
    let start_dir = shortcut.start_dir_path();
    if !start_dir.is_empty() {
        record.install_dir = Some(start_dir.to_string());
    }
    record.is_installed = true;
    record.hidden = shortcut.is_hidden;
    record.tags = shortcut.tags.clone();
    record
}

/*
 * Mints a catalog record for every shortcut that has no counterpart yet. Shortcuts
 * sharing a key with one already minted in this pass are skipped too, so repeated
 * entries in the file cannot produce duplicates.
 */
pub fn plan_import(shortcuts: &[ShortcutRecord], ctx: &MatchContext<'_>) -> ImportPlan {
    let mut plan = ImportPlan::default();
    let mut minted_keys: HashSet<String> = HashSet::new();
    for shortcut in shortcuts {
        if shortcut.app_name.trim().is_empty() {
            log::debug!("Reconcile: Ignoring shortcut without a name ({:?}).", shortcut.exe);
            plan.skipped += 1;
            continue;
        }
        if let Some(found) = matcher::find_match(shortcut, ctx) {
            log::trace!(
                "Reconcile: '{}' already in catalog as '{}'.",
                shortcut.app_name,
                found.record.id
            );
            plan.skipped += 1;
            continue;
        }
        let key = catalog_key(shortcut);
        if !minted_keys.insert(key.clone()) {
            plan.skipped += 1;
            continue;
        }
        plan.to_create.push(PlannedImport {
            app_id: shortcut.effective_app_id(),
            exe: shortcut.exe_path().to_string(),
            record: record_from_shortcut(shortcut, key, ctx),
        });
    }
    plan
}

fn exe_key(exe: &str, start_dir: &str) -> String {
    path_utils::normalize_exe_path(exe, None, Some(start_dir), path_utils::env_lookup)
}

/*
 * Finds the shortcut a catalog record should update: by its mapped app id, then by
 * the id the target would derive, then by name plus executable. Each shortcut pairs
 * with at most one record per pass.
 */
fn find_paired_shortcut(
    shortcuts: &[ShortcutRecord],
    claimed: &[bool],
    record: &CatalogRecord,
    mapped_id: Option<u32>,
    target: &LaunchTarget,
) -> Option<usize> {
    let free = |i: &usize| !claimed[*i];
    if let Some(id) = mapped_id {
        if let Some(i) = (0..shortcuts.len())
            .filter(free)
            .find(|&i| shortcuts[i].effective_app_id() == id)
        {
            return Some(i);
        }
    }
    let derived = app_id::derive_app_id(&path_utils::quote(&target.exe), record.name.trim());
    if let Some(i) = (0..shortcuts.len())
        .filter(free)
        .find(|&i| shortcuts[i].effective_app_id() == derived)
    {
        return Some(i);
    }
    let wanted = exe_key(&target.exe, &target.start_dir);
    (0..shortcuts.len()).filter(free).find(|&i| {
        let s = &shortcuts[i];
        record.name_matches(&s.app_name) && exe_key(s.exe_path(), s.start_dir_path()) == wanted
    })
}

/*
 * Writes `target` into an existing shortcut. The shortcut keeps its app id so
 * artwork and collections attached to it in the external launcher survive. Returns
 * whether anything changed.
 */
fn apply_target(shortcut: &mut ShortcutRecord, name: &str, target: &LaunchTarget) -> bool {
    let app_id = shortcut.effective_app_id();
    let exe = path_utils::quote(&target.exe);
    let start_dir = if target.start_dir.trim().is_empty() {
        String::new()
    } else {
        path_utils::quote(&target.start_dir)
    };
    let changed = shortcut.app_id != app_id
        || shortcut.app_name != name
        || shortcut.exe != exe
        || shortcut.start_dir != start_dir
        || shortcut.launch_options != target.arguments;
    shortcut.app_id = app_id;
    shortcut.app_name = name.to_string();
    shortcut.exe = exe;
    shortcut.start_dir = start_dir;
    shortcut.launch_options = target.arguments.clone();
    changed
}

/*
 * Plans the new shortcuts file for `records`. A record listed more than once is
 * exported only the first time, keeping the pairing one to one within the pass.
 */
pub fn plan_export(
    records: &[CatalogRecord],
    existing: &[ShortcutRecord],
    state: &SyncState,
    chain: &LaunchTargetChain,
    launch_scheme: &str,
) -> ExportPlan {
    let mut shortcuts = existing.to_vec();
    let mut claimed = vec![false; shortcuts.len()];
    let mut outcome = ExportOutcome::default();
    let mut changes = StateChanges::default();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for record in records {
        if !seen_ids.insert(record.id.as_str()) {
            log::debug!("Reconcile: '{}' listed twice; exporting it once.", record.id);
            continue;
        }
        let request = ResolveRequest {
            record,
            existing_shortcuts: existing,
            state,
            launch_scheme,
        };
        let target = match chain.resolve(&request) {
            Ok(target) => target,
            Err(reason) => {
                log::info!("Reconcile: Skipping '{}' ({reason}).", record.name);
                outcome.skipped.push(SkippedRecord {
                    catalog_id: record.id.clone(),
                    name: record.name.clone(),
                    reason,
                });
                continue;
            }
        };
        let name = record.name.trim();
        let mapped_id = state.id_mapping.app_id_for(&record.id);

        let app_id = match find_paired_shortcut(&shortcuts, &claimed, record, mapped_id, &target) {
            Some(index) => {
                claimed[index] = true;
                if apply_target(&mut shortcuts[index], name, &target) {
                    outcome.updated += 1;
                } else {
                    outcome.unchanged += 1;
                }
                shortcuts[index].app_id
            }
            None => {
                let mut shortcut =
                    ShortcutRecord::new(name, &target.exe, &target.start_dir, &target.arguments);
                if let Some(id) = mapped_id {
                    shortcut.app_id = id;
                }
                let id = shortcut.app_id;
                shortcuts.push(shortcut);
                claimed.push(true);
                outcome.created += 1;
                id
            }
        };
        changes.record(app_id, &record.id, &target.exe);
    }

    ExportPlan {
        shortcuts,
        outcome,
        changes,
    }
}

pub struct Reconciler {
    context: SyncContext,
    chain: LaunchTargetChain,
    file_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(context: SyncContext) -> Self {
        let chain = LaunchTargetChain::new(
            Arc::clone(&context.discovery),
            context.manual_selection.clone(),
        );
        Reconciler {
            context,
            chain,
            file_lock: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    fn lock_file(&self) -> std::sync::MutexGuard<'_, ()> {
        self.file_lock.lock().unwrap_or_else(|e| {
            log::warn!("Reconcile: File lock poisoned by an earlier panic; continuing.");
            e.into_inner()
        })
    }

    fn match_context<'a>(
        &'a self,
        catalog: &'a [CatalogRecord],
        state: &'a SyncState,
    ) -> MatchContext<'a> {
        MatchContext {
            catalog,
            mapping: &state.id_mapping,
            own_source: &self.context.source_tag,
            launch_scheme: &self.context.launch_scheme,
        }
    }

    fn save_changes(&self, state: &SyncState, changes: &StateChanges) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.context.settings.save_state(&state.merged(changes))?;
        Ok(())
    }

    /*
     * Adds a catalog record for every shortcut in the file that the catalog does not
     * represent yet, and remembers the pairing.
     */
    pub fn run_import(&self) -> Result<ImportOutcome> {
        let _guard = self.lock_file();
        let shortcuts = shortcuts::read_shortcuts_file(&self.context.shortcuts_path)?;
        let catalog = self.context.catalog.list()?;
        let state = self.context.settings.load_state()?;

        let plan = plan_import(&shortcuts, &self.match_context(&catalog, &state));
        let mut changes = StateChanges::default();
        for planned in plan.to_create {
            let name = planned.record.name.clone();
            let id = self.context.catalog.add(planned.record)?;
            log::debug!("Reconcile: Imported '{name}' as catalog record {id}.");
            changes.record(planned.app_id, &id, &planned.exe);
        }
        let outcome = ImportOutcome {
            created: changes.mappings.len(),
            skipped: plan.skipped,
        };
        self.save_changes(&state, &changes)?;
        log::info!(
            "Reconcile: Import finished: {} created, {} skipped.",
            outcome.created,
            outcome.skipped
        );
        Ok(outcome)
    }

    /*
     * Exports the given catalog records. An unknown id fails the whole pass before
     * anything is written.
     */
    pub fn run_export(&self, catalog_ids: &[String]) -> Result<ExportOutcome> {
        let mut records = Vec::with_capacity(catalog_ids.len());
        let mut requested: HashSet<&str> = HashSet::new();
        for id in catalog_ids {
            if !requested.insert(id.as_str()) {
                continue;
            }
            match self.context.catalog.get(id)? {
                Some(record) => records.push(record),
                None => return Err(CatalogError::NotFound(id.clone()).into()),
            }
        }
        self.export_records(&records)
    }

    /*
     * Exports every record this integration owns: records carrying its source tag and
     * records already paired with a shortcut.
     */
    pub fn export_integration_records(&self) -> Result<ExportOutcome> {
        let state = self.context.settings.load_state()?;
        let records: Vec<CatalogRecord> = self
            .context
            .catalog
            .list()?
            .into_iter()
            .filter(|r| {
                r.source == self.context.source_tag || state.id_mapping.contains_catalog_id(&r.id)
            })
            .collect();
        self.export_records(&records)
    }

    fn export_records(&self, records: &[CatalogRecord]) -> Result<ExportOutcome> {
        let _guard = self.lock_file();
        let existing = shortcuts::read_shortcuts_file(&self.context.shortcuts_path)?;
        let state = self.context.settings.load_state()?;

        let plan = plan_export(
            records,
            &existing,
            &state,
            &self.chain,
            &self.context.launch_scheme,
        );
        if plan.outcome.changed_file() {
            shortcuts::write_shortcuts_file(&self.context.shortcuts_path, &plan.shortcuts)?;
        }
        self.save_changes(&state, &plan.changes)?;
        log::info!(
            "Reconcile: Export finished: {} created, {} updated, {} unchanged, {} skipped.",
            plan.outcome.created,
            plan.outcome.updated,
            plan.outcome.unchanged,
            plan.outcome.skipped.len()
        );
        Ok(plan.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{ActionKind, CoreCatalog};
    use crate::core::exe_discovery::DiscoveryOutcome;
    use crate::core::sync_state::MemorySettingsStore;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    const OWN: &str = "Steam Shortcuts";

    struct MockDiscovery {
        found: Mutex<Option<PathBuf>>,
    }

    impl ExecutableDiscoveryOperations for MockDiscovery {
        fn discover(&self, _install_dir: &Path, _display_name: &str) -> DiscoveryOutcome {
            match self.found.lock().unwrap().clone() {
                Some(path) => DiscoveryOutcome::Found(path),
                None => DiscoveryOutcome::NotFound,
            }
        }
    }

    struct FailingSettingsStore {
        saves: Mutex<usize>,
    }

    impl SettingsStoreOperations for FailingSettingsStore {
        fn load_state(&self) -> crate::core::sync_state::Result<SyncState> {
            Ok(SyncState::default())
        }

        fn save_state(&self, _state: &SyncState) -> crate::core::sync_state::Result<()> {
            *self.saves.lock().unwrap() += 1;
            Err(StateError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only settings",
            )))
        }
    }

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        catalog: Arc<CoreCatalog>,
        settings: Arc<MemorySettingsStore>,
        reconciler: Reconciler,
    }

    fn fixture(records: Vec<CatalogRecord>, shortcuts: &[ShortcutRecord]) -> Fixture {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shortcuts.vdf");
        if !shortcuts.is_empty() {
            shortcuts::write_shortcuts_file(&path, shortcuts).unwrap();
        }
        let catalog = Arc::new(CoreCatalog::with_records(records));
        let settings = Arc::new(MemorySettingsStore::default());
        let reconciler = Reconciler::new(SyncContext {
            catalog: catalog.clone(),
            settings: settings.clone(),
            discovery: Arc::new(MockDiscovery {
                found: Mutex::new(None),
            }),
            manual_selection: None,
            shortcuts_path: path.clone(),
            source_tag: OWN.to_string(),
            launch_scheme: "steam".to_string(),
        });
        Fixture {
            _dir: dir,
            path,
            catalog,
            settings,
            reconciler,
        }
    }

    fn file_record(name: &str, source: &str, exe: &str) -> CatalogRecord {
        let mut record = CatalogRecord::new(name, source);
        record.actions.push(LaunchAction::file(exe, "", ""));
        record
    }

    #[test]
    fn test_import_is_idempotent() -> Result<()> {
        let shortcuts = vec![
            ShortcutRecord::new("Foo", "/games/foo/foo", "/games/foo", ""),
            ShortcutRecord::new("Bar", "/games/bar/bar", "/games/bar", ""),
        ];
        let fx = fixture(Vec::new(), &shortcuts);

        let first = fx.reconciler.run_import()?;
        assert_eq!(first, ImportOutcome { created: 2, skipped: 0 });
        let second = fx.reconciler.run_import()?;
        assert_eq!(second, ImportOutcome { created: 0, skipped: 2 });
        assert_eq!(fx.catalog.list()?.len(), 2);

        let state = fx.settings.load_state()?;
        let foo = fx.catalog.find_by_name("Foo")?.remove(0);
        assert_eq!(state.id_mapping.catalog_id_for(shortcuts[0].app_id), Some(foo.id.as_str()));
        assert_eq!(state.recorded_executable(&foo.id), Some("/games/foo/foo"));
        assert_eq!(foo.source, OWN);
        assert_eq!(foo.game_id, shortcuts[0].app_id.to_string());
        assert_eq!(foo.actions[0].kind, ActionKind::Url);
        Ok(())
    }

    #[test]
    fn test_import_skips_games_owned_by_other_sources() -> Result<()> {
        let shortcuts = vec![ShortcutRecord::new("Foo", "/games/foo/foo", "", "")];
        let fx = fixture(vec![CatalogRecord::new("foo", "GOG")], &shortcuts);
        let outcome = fx.reconciler.run_import()?;
        assert_eq!(outcome, ImportOutcome { created: 0, skipped: 1 });
        Ok(())
    }

    #[test]
    fn test_plan_import_uses_content_id_without_app_id_and_dedupes() {
        let mut a = ShortcutRecord::new("Foo", "/games/foo/foo", "", "");
        a.app_id = 0;
        let b = a.clone();
        let mapping = Default::default();
        let ctx = MatchContext {
            catalog: &[],
            mapping: &mapping,
            own_source: OWN,
            launch_scheme: "steam",
        };
        let plan = plan_import(&[a.clone(), b], &ctx);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.to_create[0].record.game_id, a.stable_content_id());
        assert_eq!(plan.to_create[0].app_id, a.effective_app_id());
    }

    #[test]
    fn test_export_creates_then_reports_unchanged() -> Result<()> {
        let fx = fixture(vec![file_record("Foo", "GOG", "/games/foo/foo")], &[]);
        let id = fx.catalog.list()?[0].id.clone();

        let outcome = fx.reconciler.run_export(std::slice::from_ref(&id))?;
        assert_eq!(outcome.created, 1);
        let written = shortcuts::read_shortcuts_file(&fx.path)?;
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].exe, "\"/games/foo/foo\"");
        assert_eq!(written[0].start_dir, "\"/games/foo\"");

        let state = fx.settings.load_state()?;
        assert_eq!(state.id_mapping.app_id_for(&id), Some(written[0].app_id));

        let again = fx.reconciler.run_export(std::slice::from_ref(&id))?;
        assert_eq!((again.created, again.updated, again.unchanged), (0, 0, 1));
        Ok(())
    }

    #[test]
    fn test_export_of_repeated_id_creates_one_shortcut() -> Result<()> {
        let fx = fixture(vec![file_record("Foo", "GOG", "/games/foo/foo")], &[]);
        let id = fx.catalog.list()?[0].id.clone();

        let outcome = fx.reconciler.run_export(&[id.clone(), id.clone()])?;
        assert_eq!((outcome.created, outcome.updated), (1, 0));
        let written = shortcuts::read_shortcuts_file(&fx.path)?;
        assert_eq!(written.len(), 1);
        assert_eq!(fx.settings.load_state()?.id_mapping.len(), 1);
        Ok(())
    }

    #[test]
    fn test_plan_export_skips_repeated_records() {
        let record = file_record("Foo", "GOG", "/games/foo/foo");
        let chain = LaunchTargetChain::new(
            Arc::new(MockDiscovery {
                found: Mutex::new(None),
            }),
            None,
        );
        let plan = plan_export(
            &[record.clone(), record],
            &[],
            &SyncState::default(),
            &chain,
            "steam",
        );
        assert_eq!(plan.outcome.created, 1);
        assert_eq!(plan.shortcuts.len(), 1);
    }

    #[test]
    fn test_export_updates_in_place_and_keeps_app_id() -> Result<()> {
        let fx = fixture(vec![file_record("Foo", "GOG", "/games/foo/foo")], &[]);
        let mut record = fx.catalog.list()?.remove(0);
        fx.reconciler.run_export(std::slice::from_ref(&record.id))?;
        let original_id = shortcuts::read_shortcuts_file(&fx.path)?[0].app_id;

        record.name = "Foo: Definitive".to_string();
        record.actions = vec![LaunchAction::file("/games/foo/foo64", "", "-dx12")];
        fx.catalog.update(record.clone())?;

        let outcome = fx.reconciler.run_export(std::slice::from_ref(&record.id))?;
        assert_eq!((outcome.created, outcome.updated), (0, 1));
        let written = shortcuts::read_shortcuts_file(&fx.path)?;
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].app_id, original_id);
        assert_eq!(written[0].app_name, "Foo: Definitive");
        assert_eq!(written[0].launch_options, "-dx12");
        Ok(())
    }

    #[test]
    fn test_export_new_shortcut_takes_mapped_id() -> Result<()> {
        let fx = fixture(vec![file_record("Foo", "GOG", "/games/foo/foo")], &[]);
        let id = fx.catalog.list()?[0].id.clone();
        let mut state = SyncState::default();
        state.id_mapping.insert(0x8000_1234, &id);
        fx.settings.save_state(&state)?;

        fx.reconciler.run_export(std::slice::from_ref(&id))?;
        assert_eq!(shortcuts::read_shortcuts_file(&fx.path)?[0].app_id, 0x8000_1234);
        Ok(())
    }

    #[test]
    fn test_export_skip_leaves_file_untouched() -> Result<()> {
        let fx = fixture(vec![CatalogRecord::new("Nothing", "GOG")], &[]);
        let id = fx.catalog.list()?[0].id.clone();
        let outcome = fx.reconciler.run_export(std::slice::from_ref(&id))?;
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::NoInstallDirectory);
        assert_eq!(outcome.skipped[0].catalog_id, id);
        assert!(!fx.path.exists());
        Ok(())
    }

    #[test]
    fn test_export_preserves_unrelated_shortcuts() -> Result<()> {
        let mut other = ShortcutRecord::new("Emulator Frontend", "/opt/frontend", "", "");
        other.extra_fields.insert("LastPlayTime", 1_700_000_000i32);
        let fx = fixture(
            vec![file_record("Foo", "GOG", "/games/foo/foo")],
            std::slice::from_ref(&other),
        );
        let id = fx.catalog.list()?[0].id.clone();
        fx.reconciler.run_export(&[id])?;

        let written = shortcuts::read_shortcuts_file(&fx.path)?;
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], other);
        Ok(())
    }

    #[test]
    fn test_import_then_export_is_stable() -> Result<()> {
        let shortcuts = vec![ShortcutRecord::new("Foo", "/games/foo/foo", "/games/foo", "-x")];
        let fx = fixture(Vec::new(), &shortcuts);
        fx.reconciler.run_import()?;

        let outcome = fx.reconciler.export_integration_records()?;
        assert_eq!((outcome.created, outcome.updated, outcome.unchanged), (0, 0, 1));
        assert_eq!(shortcuts::read_shortcuts_file(&fx.path)?, shortcuts);
        Ok(())
    }

    #[test]
    fn test_integration_records_include_mapped_foreign_records() -> Result<()> {
        let fx = fixture(
            vec![
                file_record("Mapped", "GOG", "/games/mapped/m"),
                file_record("Foreign", "GOG", "/games/foreign/f"),
            ],
            &[],
        );
        let mapped_id = fx.catalog.find_by_name("Mapped")?.remove(0).id;
        let mut state = SyncState::default();
        state.id_mapping.insert(0x8000_0042, &mapped_id);
        fx.settings.save_state(&state)?;

        let outcome = fx.reconciler.export_integration_records()?;
        assert_eq!(outcome.created, 1);
        let written = shortcuts::read_shortcuts_file(&fx.path)?;
        assert_eq!(written[0].app_name, "Mapped");
        Ok(())
    }

    #[test]
    fn test_plan_export_pairs_one_to_one() {
        let records = vec![
            file_record("Foo", "GOG", "/games/foo/foo"),
            file_record("Foo", "Epic", "/games/foo2/foo"),
        ];
        let existing = vec![ShortcutRecord::new("Foo", "/games/foo/foo", "/games/foo", "")];
        let chain = LaunchTargetChain::new(
            Arc::new(MockDiscovery {
                found: Mutex::new(None),
            }),
            None,
        );
        let plan = plan_export(&records, &existing, &SyncState::default(), &chain, "steam");
        assert_eq!((plan.outcome.created, plan.outcome.unchanged), (1, 1));
        assert_eq!(plan.shortcuts.len(), 2);
        assert_eq!(plan.shortcuts[1].exe_path(), "/games/foo2/foo");
    }

    #[test]
    fn test_concurrent_import_and_export_lose_nothing() -> Result<()> {
        const IMPORTED: usize = 6;
        const OWNED: usize = 6;
        for _ in 0..10 {
            let shortcuts: Vec<ShortcutRecord> = (0..IMPORTED)
                .map(|i| {
                    ShortcutRecord::new(
                        &format!("Imported {i}"),
                        &format!("/games/imp{i}/imp"),
                        &format!("/games/imp{i}"),
                        "",
                    )
                })
                .collect();
            let owned: Vec<CatalogRecord> = (0..OWNED)
                .map(|i| file_record(&format!("Owned {i}"), OWN, &format!("/games/own{i}/own")))
                .collect();
            let fx = fixture(owned, &shortcuts);

            let (import, export) = std::thread::scope(|scope| {
                let import = scope.spawn(|| fx.reconciler.run_import());
                let export = scope.spawn(|| fx.reconciler.export_integration_records());
                (import.join().unwrap(), export.join().unwrap())
            });
            assert_eq!(import?.created, IMPORTED);
            export?;

            let written = shortcuts::read_shortcuts_file(&fx.path)?;
            assert_eq!(written.len(), IMPORTED + OWNED);
            let app_ids: HashSet<u32> = written.iter().map(|s| s.app_id).collect();
            assert_eq!(app_ids.len(), IMPORTED + OWNED);

            let catalog = fx.catalog.list()?;
            assert_eq!(catalog.len(), IMPORTED + OWNED);
            let state = fx.settings.load_state()?;
            assert_eq!(state.id_mapping.len(), IMPORTED + OWNED);
            for record in &catalog {
                let app_id = state.id_mapping.app_id_for(&record.id);
                assert!(app_id.is_some_and(|id| app_ids.contains(&id)), "{}", record.name);
            }
        }
        Ok(())
    }

    #[test]
    fn test_unknown_export_id_fails_before_writing() {
        let fx = fixture(Vec::new(), &[]);
        let result = fx.reconciler.run_export(&["missing".to_string()]);
        assert!(matches!(
            result,
            Err(SyncError::Catalog(CatalogError::NotFound(_)))
        ));
        assert!(!fx.path.exists());
    }

    #[test]
    fn test_state_failure_surfaces_as_sync_error() {
        let dir = tempdir().unwrap();
        let settings = Arc::new(FailingSettingsStore {
            saves: Mutex::new(0),
        });
        let reconciler = Reconciler::new(SyncContext {
            catalog: Arc::new(CoreCatalog::with_records(vec![file_record(
                "Foo", OWN, "/games/foo/foo",
            )])),
            settings: settings.clone(),
            discovery: Arc::new(MockDiscovery {
                found: Mutex::new(None),
            }),
            manual_selection: None,
            shortcuts_path: dir.path().join("shortcuts.vdf"),
            source_tag: OWN.to_string(),
            launch_scheme: "steam".to_string(),
        });
        let result = reconciler.export_integration_records();
        assert!(matches!(result, Err(SyncError::State(StateError::Io(_)))));
        assert_eq!(*settings.saves.lock().unwrap(), 1);
    }

    #[test]
    fn test_discovery_feeds_export() -> Result<()> {
        let mut record = CatalogRecord::new("Foo", "GOG");
        record.install_dir = Some("/games/foo".to_string());
        record.is_installed = true;
        let fx = fixture(vec![record], &[]);
        let id = fx.catalog.list()?[0].id.clone();

        let reconciler = Reconciler::new(SyncContext {
            catalog: fx.catalog.clone(),
            settings: fx.settings.clone(),
            discovery: Arc::new(MockDiscovery {
                found: Mutex::new(Some(PathBuf::from("/games/foo/bin/foo"))),
            }),
            manual_selection: None,
            shortcuts_path: fx.path.clone(),
            source_tag: OWN.to_string(),
            launch_scheme: "steam".to_string(),
        });
        let outcome = reconciler.run_export(std::slice::from_ref(&id))?;
        assert_eq!(outcome.created, 1);
        let written = shortcuts::read_shortcuts_file(&fx.path)?;
        assert_eq!(written[0].exe_path(), "/games/foo/bin/foo");
        assert_eq!(written[0].start_dir_path(), "/games/foo/bin");
        Ok(())
    }
}
