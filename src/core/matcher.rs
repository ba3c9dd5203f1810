/*
 * Decides whether a catalog record already represents the game behind a shortcut.
 *
 * Five signals are tried in a fixed order and the first positive wins:
 *   1. a persisted app id -> catalog id mapping that still resolves,
 *   2. a visible record from another source with the same name,
 *   3. a record from this integration whose game id is the shortcut's key,
 *   4. same name and the same executable after path normalization,
 *   5. same name and a launch URL in the launcher's scheme.
 *
 * A step that cannot be evaluated (malformed or dangling mapping) counts as "no
 * match" and the cascade continues. A missed match costs a duplicate entry; a false
 * match would overwrite an unrelated game, so every doubt resolves to no match.
 */
use crate::core::app_id;
use crate::core::catalog::{ActionKind, CatalogRecord, LaunchAction};
use crate::core::path_utils;
use crate::core::shortcuts::ShortcutRecord;
use crate::core::sync_state::IdentifierMapping;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStep {
    IdMapping,
    CrossSourceName,
    SameSourceId,
    NameAndExecutable,
    NameAndLaunchUrl,
}

const CASCADE: [MatchStep; 5] = [
    MatchStep::IdMapping,
    MatchStep::CrossSourceName,
    MatchStep::SameSourceId,
    MatchStep::NameAndExecutable,
    MatchStep::NameAndLaunchUrl,
];

#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub catalog: &'a [CatalogRecord],
    pub mapping: &'a IdentifierMapping,
    /// Source tag of records this integration creates.
    pub own_source: &'a str,
    pub launch_scheme: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult<'a> {
    pub record: &'a CatalogRecord,
    pub step: MatchStep,
}

#[derive(Debug)]
enum LookupFailure {
    MalformedMapping { app_id: u32 },
    DanglingMapping { app_id: u32, catalog_id: String },
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupFailure::MalformedMapping { app_id } => {
                write!(f, "mapping for app id {app_id} has an empty catalog id")
            }
            LookupFailure::DanglingMapping { app_id, catalog_id } => write!(
                f,
                "mapping for app id {app_id} points at missing catalog record '{catalog_id}'"
            ),
        }
    }
}

type StepResult<'a> = Result<Option<&'a CatalogRecord>, LookupFailure>;

pub fn find_match<'a>(shortcut: &ShortcutRecord, ctx: &MatchContext<'a>) -> Option<MatchResult<'a>> {
    for step in CASCADE {
        match run_step(step, shortcut, ctx) {
            Ok(Some(record)) => {
                log::debug!(
                    "MatchEngine: '{}' matched catalog record '{}' via {step:?}.",
                    shortcut.app_name,
                    record.id
                );
                return Some(MatchResult { record, step });
            }
            Ok(None) => {}
            Err(failure) => {
                log::debug!(
                    "MatchEngine: {step:?} skipped for '{}': {failure}",
                    shortcut.app_name
                );
            }
        }
    }
    log::trace!("MatchEngine: No match for '{}'.", shortcut.app_name);
    None
}

pub fn exists_any_match(shortcut: &ShortcutRecord, ctx: &MatchContext<'_>) -> bool {
    find_match(shortcut, ctx).is_some()
}

fn run_step<'a>(step: MatchStep, shortcut: &ShortcutRecord, ctx: &MatchContext<'a>) -> StepResult<'a> {
    match step {
        MatchStep::IdMapping => by_id_mapping(shortcut, ctx),
        MatchStep::CrossSourceName => Ok(by_cross_source_name(shortcut, ctx)),
        MatchStep::SameSourceId => Ok(by_same_source_id(shortcut, ctx)),
        MatchStep::NameAndExecutable => Ok(by_name_and_executable(shortcut, ctx)),
        MatchStep::NameAndLaunchUrl => Ok(by_name_and_launch_url(shortcut, ctx)),
    }
}

fn by_id_mapping<'a>(shortcut: &ShortcutRecord, ctx: &MatchContext<'a>) -> StepResult<'a> {
    let app_id = shortcut.effective_app_id();
    let Some(catalog_id) = ctx.mapping.catalog_id_for(app_id) else {
        return Ok(None);
    };
    let catalog_id = catalog_id.trim();
    if catalog_id.is_empty() {
        return Err(LookupFailure::MalformedMapping { app_id });
    }
    match ctx.catalog.iter().find(|r| r.id == catalog_id) {
        Some(record) => Ok(Some(record)),
        None => Err(LookupFailure::DanglingMapping {
            app_id,
            catalog_id: catalog_id.to_string(),
        }),
    }
}

// Deliberately broad: any visible same-named game from another library counts.
fn by_cross_source_name<'a>(
    shortcut: &ShortcutRecord,
    ctx: &MatchContext<'a>,
) -> Option<&'a CatalogRecord> {
    ctx.catalog.iter().find(|r| {
        !r.hidden && r.source != ctx.own_source && r.name_matches(&shortcut.app_name)
    })
}

fn by_same_source_id<'a>(
    shortcut: &ShortcutRecord,
    ctx: &MatchContext<'a>,
) -> Option<&'a CatalogRecord> {
    let content_id = shortcut.stable_content_id();
    let numeric_id = shortcut.effective_app_id().to_string();
    ctx.catalog.iter().find(|r| {
        r.source == ctx.own_source
            && !r.game_id.is_empty()
            && (r.game_id == content_id || r.game_id == numeric_id)
    })
}

fn action_exe_key(record: &CatalogRecord, action: &LaunchAction) -> String {
    let base_dir = if action.working_dir.trim().is_empty() {
        record.install_dir()
    } else {
        Some(action.working_dir.as_str())
    };
    path_utils::normalize_exe_path(
        &action.target,
        record.install_dir(),
        base_dir,
        path_utils::env_lookup,
    )
}

fn by_name_and_executable<'a>(
    shortcut: &ShortcutRecord,
    ctx: &MatchContext<'a>,
) -> Option<&'a CatalogRecord> {
    if shortcut.exe_path().is_empty() {
        return None;
    }
    let wanted = path_utils::normalize_exe_path(
        shortcut.exe_path(),
        None,
        Some(shortcut.start_dir_path()),
        path_utils::env_lookup,
    );
    ctx.catalog
        .iter()
        .filter(|r| r.name_matches(&shortcut.app_name))
        .find(|r| {
            r.actions
                .iter()
                .filter(|a| a.kind != ActionKind::Url && (a.is_primary || a.kind == ActionKind::File))
                .filter(|a| !a.target.trim().is_empty())
                .any(|a| action_exe_key(r, a) == wanted)
        })
}

fn by_name_and_launch_url<'a>(
    shortcut: &ShortcutRecord,
    ctx: &MatchContext<'a>,
) -> Option<&'a CatalogRecord> {
    let expected = app_id::launch_url(ctx.launch_scheme, shortcut.effective_app_id());
    ctx.catalog
        .iter()
        .filter(|r| r.name_matches(&shortcut.app_name))
        .find(|r| {
            r.actions.iter().filter(|a| a.kind == ActionKind::Url).any(|a| {
                let target = a.target.trim();
                target.eq_ignore_ascii_case(&expected)
                    || app_id::uses_launch_scheme(target, ctx.launch_scheme)
            })
        })
}
