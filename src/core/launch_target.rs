/*
 * Resolves the executable a catalog record should be exported with.
 *
 * Resolution is an ordered chain of strategies, each answering `Resolved`,
 * `NotApplicable` or `NeedsUserInput`:
 *   file action -> emulator action -> launch URL -> install-dir discovery -> manual pick.
 * The first `Resolved` wins. `NeedsUserInput` does not stop the chain; it is handed to
 * the later strategies (only the manual pick consumes it) and, if nothing resolves,
 * its reason becomes the skip reason reported for the record.
 */
use crate::core::app_id;
use crate::core::catalog::{ActionKind, CatalogRecord, LaunchAction};
use crate::core::exe_discovery::{DiscoveryOutcome, ExecutableDiscoveryOperations};
use crate::core::path_utils;
use crate::core::shortcuts::ShortcutRecord;
use crate::core::sync_state::SyncState;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/*
 * Why a catalog record could not be exported. `code()` is the stable,
 * machine-readable form handed to presentation layers.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoInstallDirectory,
    NoExecutableFound,
    UserDeclined,
    UnsupportedLaunchKind,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::NoInstallDirectory => "no_install_directory",
            SkipReason::NoExecutableFound => "no_executable_found",
            SkipReason::UserDeclined => "user_declined",
            SkipReason::UnsupportedLaunchKind => "unsupported_launch_kind",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchTarget {
    /// Unquoted executable path.
    pub exe: String,
    pub start_dir: String,
    pub arguments: String,
}

impl LaunchTarget {
    fn for_executable(exe: &str) -> Self {
        LaunchTarget {
            exe: exe.to_string(),
            start_dir: path_utils::parent_dir(exe),
            arguments: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInputRequest {
    pub reason: SkipReason,
    /// Best guess to pre-fill a selection dialog with.
    pub suggestion: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(LaunchTarget),
    NotApplicable,
    NeedsUserInput(UserInputRequest),
}

/*
 * Everything a strategy may consult. All of it is an immutable snapshot taken at the
 * start of the export pass.
 */
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub record: &'a CatalogRecord,
    pub existing_shortcuts: &'a [ShortcutRecord],
    pub state: &'a SyncState,
    pub launch_scheme: &'a str,
}

pub trait LaunchTargetResolver: Send + Sync {
    fn name(&self) -> &'static str;
    /*
     * `pending` is the most recent user-input request raised by an earlier strategy.
     */
    fn resolve(&self, request: &ResolveRequest<'_>, pending: Option<&UserInputRequest>)
    -> Resolution;
}

/*
 * The UI seam for confirming or overriding an executable when automatic resolution
 * failed. Returning `None` means the user declined.
 */
pub trait ManualSelectionOperations: Send + Sync {
    fn select_executable(&self, record: &CatalogRecord, suggestion: Option<&Path>)
    -> Option<PathBuf>;
}

/*
 * Selection for non-interactive hosts: always declines.
 */
pub struct DeclineManualSelection;

impl ManualSelectionOperations for DeclineManualSelection {
    fn select_executable(&self, record: &CatalogRecord, _suggestion: Option<&Path>) -> Option<PathBuf> {
        log::debug!("ManualSelection: Declining selection for '{}'.", record.name);
        None
    }
}

fn sorted_actions(record: &CatalogRecord, kind: ActionKind) -> Vec<&LaunchAction> {
    let mut actions: Vec<&LaunchAction> = record
        .actions
        .iter()
        .filter(|a| a.kind == kind && !a.target.trim().is_empty())
        .collect();
    // Stable: primary actions first, original order otherwise.
    actions.sort_by_key(|a| !a.is_primary);
    actions
}

fn expand(raw: &str, record: &CatalogRecord) -> String {
    path_utils::expand_variables(path_utils::unquote(raw), record.install_dir(), path_utils::env_lookup)
}

/*
 * Turns an action into a target: variables expanded, relative executables anchored
 * at the install directory, working directory defaulting to the install directory
 * and then to the executable's own directory.
 */
fn target_from_action(action: &LaunchAction, record: &CatalogRecord) -> LaunchTarget {
    let mut exe = expand(&action.target, record);
    if !path_utils::is_absolute_any_platform(&exe.replace('\\', "/")) {
        if let Some(dir) = record.install_dir() {
            exe = Path::new(path_utils::unquote(dir))
                .join(&exe)
                .to_string_lossy()
                .into_owned();
        }
    }
    let start_dir = if !action.working_dir.trim().is_empty() {
        expand(&action.working_dir, record)
    } else if let Some(dir) = record.install_dir() {
        path_utils::unquote(dir).to_string()
    } else {
        path_utils::parent_dir(&exe)
    };
    LaunchTarget {
        exe,
        start_dir,
        arguments: action.arguments.trim().to_string(),
    }
}

pub struct FileActionResolver;

impl LaunchTargetResolver for FileActionResolver {
    fn name(&self) -> &'static str {
        "file action"
    }

    fn resolve(&self, request: &ResolveRequest<'_>, _pending: Option<&UserInputRequest>) -> Resolution {
        match sorted_actions(request.record, ActionKind::File).first() {
            Some(action) => Resolution::Resolved(target_from_action(action, request.record)),
            None => Resolution::NotApplicable,
        }
    }
}

/*
 * Emulated games launch the emulator executable with the game image in its arguments.
 */
pub struct EmulatorActionResolver;

impl LaunchTargetResolver for EmulatorActionResolver {
    fn name(&self) -> &'static str {
        "emulator action"
    }

    fn resolve(&self, request: &ResolveRequest<'_>, _pending: Option<&UserInputRequest>) -> Resolution {
        match sorted_actions(request.record, ActionKind::Emulator).first() {
            Some(action) => Resolution::Resolved(target_from_action(action, request.record)),
            None => Resolution::NotApplicable,
        }
    }
}

/*
 * A URL action in the launcher's scheme points at a shortcut; map it back to the
 * executable behind it. Tries the shortcut the URL names, then the executable
 * recorded for this catalog record by an earlier pass.
 */
pub struct UrlActionResolver;

impl UrlActionResolver {
    fn from_existing_shortcut(request: &ResolveRequest<'_>, app_id: u32) -> Option<LaunchTarget> {
        request
            .existing_shortcuts
            .iter()
            .find(|s| s.effective_app_id() == app_id && !s.exe_path().is_empty())
            .map(|s| LaunchTarget {
                exe: s.exe_path().to_string(),
                start_dir: s.start_dir_path().to_string(),
                arguments: s.launch_options.clone(),
            })
    }
}

impl LaunchTargetResolver for UrlActionResolver {
    fn name(&self) -> &'static str {
        "launch url"
    }

    fn resolve(&self, request: &ResolveRequest<'_>, _pending: Option<&UserInputRequest>) -> Resolution {
        let urls: Vec<&LaunchAction> = sorted_actions(request.record, ActionKind::Url)
            .into_iter()
            .filter(|a| app_id::uses_launch_scheme(&a.target, request.launch_scheme))
            .collect();
        if urls.is_empty() {
            return Resolution::NotApplicable;
        }

        for action in &urls {
            let parsed = app_id::parse_composite_id_with_scheme(&action.target, request.launch_scheme);
            if let Some(target) = parsed.and_then(|id| Self::from_existing_shortcut(request, id)) {
                return Resolution::Resolved(target);
            }
        }
        if let Some(exe) = request.state.recorded_executable(&request.record.id) {
            log::debug!(
                "UrlActionResolver: Using recorded executable for '{}'.",
                request.record.name
            );
            return Resolution::Resolved(LaunchTarget::for_executable(path_utils::unquote(exe)));
        }
        Resolution::NotApplicable
    }
}

/*
 * Scans the install directory of an installed game. A unique or clearly best
 * candidate resolves; anything else asks the user.
 */
pub struct DiscoveryResolver {
    discovery: Arc<dyn ExecutableDiscoveryOperations>,
}

impl DiscoveryResolver {
    pub fn new(discovery: Arc<dyn ExecutableDiscoveryOperations>) -> Self {
        DiscoveryResolver { discovery }
    }
}

impl LaunchTargetResolver for DiscoveryResolver {
    fn name(&self) -> &'static str {
        "discovery"
    }

    fn resolve(&self, request: &ResolveRequest<'_>, _pending: Option<&UserInputRequest>) -> Resolution {
        let record = request.record;
        let install_dir = record.install_dir().filter(|_| record.is_installed);
        let Some(install_dir) = install_dir else {
            if record.actions.is_empty() {
                return Resolution::NeedsUserInput(UserInputRequest {
                    reason: SkipReason::NoInstallDirectory,
                    suggestion: None,
                });
            }
            // Only unusable actions and nothing on disk to look at.
            return Resolution::NotApplicable;
        };

        let outcome = self
            .discovery
            .discover(Path::new(path_utils::unquote(install_dir)), &record.name);
        match outcome {
            DiscoveryOutcome::Found(path) => {
                let mut target = LaunchTarget::for_executable(&path.to_string_lossy());
                target.start_dir = path
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Resolution::Resolved(target)
            }
            other => Resolution::NeedsUserInput(UserInputRequest {
                reason: SkipReason::NoExecutableFound,
                suggestion: other.suggestion().map(Path::to_path_buf),
            }),
        }
    }
}

pub struct ManualSelectionResolver {
    selection: Arc<dyn ManualSelectionOperations>,
}

impl ManualSelectionResolver {
    pub fn new(selection: Arc<dyn ManualSelectionOperations>) -> Self {
        ManualSelectionResolver { selection }
    }
}

impl LaunchTargetResolver for ManualSelectionResolver {
    fn name(&self) -> &'static str {
        "manual selection"
    }

    fn resolve(&self, request: &ResolveRequest<'_>, pending: Option<&UserInputRequest>) -> Resolution {
        let Some(pending) = pending else {
            return Resolution::NotApplicable;
        };
        match self
            .selection
            .select_executable(request.record, pending.suggestion.as_deref())
        {
            Some(path) => Resolution::Resolved(LaunchTarget::for_executable(&path.to_string_lossy())),
            None => Resolution::NeedsUserInput(UserInputRequest {
                reason: SkipReason::UserDeclined,
                suggestion: pending.suggestion.clone(),
            }),
        }
    }
}

pub struct LaunchTargetChain {
    resolvers: Vec<Box<dyn LaunchTargetResolver>>,
}

impl LaunchTargetChain {
    /*
     * The standard chain. Without a manual selection collaborator the chain ends at
     * discovery and its reason is reported as-is.
     */
    pub fn new(
        discovery: Arc<dyn ExecutableDiscoveryOperations>,
        manual_selection: Option<Arc<dyn ManualSelectionOperations>>,
    ) -> Self {
        let mut resolvers: Vec<Box<dyn LaunchTargetResolver>> = vec![
            Box::new(FileActionResolver),
            Box::new(EmulatorActionResolver),
            Box::new(UrlActionResolver),
            Box::new(DiscoveryResolver::new(discovery)),
        ];
        if let Some(selection) = manual_selection {
            resolvers.push(Box::new(ManualSelectionResolver::new(selection)));
        }
        LaunchTargetChain { resolvers }
    }

    pub fn with_resolvers(resolvers: Vec<Box<dyn LaunchTargetResolver>>) -> Self {
        LaunchTargetChain { resolvers }
    }

    pub fn resolve(&self, request: &ResolveRequest<'_>) -> std::result::Result<LaunchTarget, SkipReason> {
        let mut pending: Option<UserInputRequest> = None;
        for resolver in &self.resolvers {
            match resolver.resolve(request, pending.as_ref()) {
                Resolution::Resolved(target) => {
                    log::debug!(
                        "LaunchTarget: '{}' resolved by {} to {:?}.",
                        request.record.name,
                        resolver.name(),
                        target.exe
                    );
                    return Ok(target);
                }
                Resolution::NotApplicable => {}
                Resolution::NeedsUserInput(input) => {
                    log::trace!(
                        "LaunchTarget: {} needs user input for '{}' ({}).",
                        resolver.name(),
                        request.record.name,
                        input.reason
                    );
                    pending = Some(input);
                }
            }
        }
        let reason = pending
            .map(|p| p.reason)
            .unwrap_or(SkipReason::UnsupportedLaunchKind);
        log::debug!(
            "LaunchTarget: No target for '{}': {reason}.",
            request.record.name
        );
        Err(reason)
    }
}
