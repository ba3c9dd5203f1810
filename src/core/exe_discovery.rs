/*
 * Finds the executable of an installed game when the catalog records no launch
 * target. A manifest shipped by the store wins outright; otherwise the install
 * directory is scanned and candidates are scored against the display name. The
 * heuristic refuses to guess: a close race between two candidates is reported as
 * `Ambiguous` so the caller can fall back to manual selection.
 */
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

pub const DEFAULT_SCAN_DEPTH: usize = 2;

const MANIFEST_PATTERN: &str = "goggame-*.info";
const EXECUTABLE_EXTENSIONS: [&str; 3] = ["exe", "bat", "cmd"];

const SCORE_EXACT_NAME: i32 = 100;
const SCORE_PARTIAL_NAME: i32 = 50;
const SCORE_IN_ROOT: i32 = 30;
const SCORE_LARGE_FILE: i32 = 10;
const LARGE_FILE_BYTES: u64 = 10 * 1024 * 1024;
const VERY_LARGE_FILE_BYTES: u64 = 50 * 1024 * 1024;
const MIN_WINNING_SCORE: i32 = 50;
const MIN_WINNING_MARGIN: i32 = 20;

const EXCLUDED_DIRECTORIES: [&str; 16] = [
    "_commonredist",
    "commonredist",
    "redist",
    "_redist",
    "redistributable",
    "redistributables",
    "directx",
    "dotnet",
    "vcredist",
    "__installer",
    "installer",
    "_installer",
    "support",
    "__support",
    "prereqs",
    "prerequisites",
];

const EXCLUDED_NAME_PREFIXES: [&str; 21] = [
    "unins",
    "uninst",
    "update",
    "crashhandler",
    "crashreport",
    "crashpad",
    "unitycrashhandler",
    "bugreport",
    "errorreport",
    "vc_redist",
    "vcredist",
    "dxsetup",
    "dxwebsetup",
    "dotnetfx",
    "ndp4",
    "oalinst",
    "physx",
    "ue4prereq",
    "ueprereq",
    "setup",
    "7z",
];

/// Matched against the whole stem; as prefixes they would hit real games.
const EXCLUDED_NAMES: [&str; 1] = ["cmd"];

const NAME_SUFFIX_NOISE: [&str; 12] = [
    "win64", "win32", "x64", "x86", "64bit", "32bit", "amd64", "shipping", "dx11", "dx12",
    "vulkan", "launcher",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub path: PathBuf,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(PathBuf),
    NotFound,
    /// Candidates ordered best first.
    Ambiguous(Vec<ScoredCandidate>),
}

impl DiscoveryOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            DiscoveryOutcome::Found(path) => Some(path),
            _ => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            DiscoveryOutcome::Found(path) => Some(path),
            _ => None,
        }
    }

    /*
     * The best guess to pre-fill a manual selection with, if any.
     */
    pub fn suggestion(&self) -> Option<&Path> {
        match self {
            DiscoveryOutcome::Found(path) => Some(path),
            DiscoveryOutcome::Ambiguous(candidates) => {
                candidates.first().map(|c| c.path.as_path())
            }
            DiscoveryOutcome::NotFound => None,
        }
    }
}

pub trait ExecutableDiscoveryOperations: Send + Sync {
    fn discover(&self, install_dir: &Path, display_name: &str) -> DiscoveryOutcome;
}

pub struct CoreExecutableDiscovery {
    max_depth: usize,
}

impl CoreExecutableDiscovery {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_SCAN_DEPTH)
    }

    /*
     * `depth` counts directory levels below the install root that are scanned; files
     * directly in the root are always included.
     */
    pub fn with_depth(depth: usize) -> Self {
        CoreExecutableDiscovery { max_depth: depth }
    }
}

impl Default for CoreExecutableDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableDiscoveryOperations for CoreExecutableDiscovery {
    fn discover(&self, install_dir: &Path, display_name: &str) -> DiscoveryOutcome {
        if !install_dir.is_dir() {
            log::debug!("ExeDiscovery: {install_dir:?} is not a directory.");
            return DiscoveryOutcome::NotFound;
        }
        if let Some(path) = executable_from_manifest(install_dir) {
            log::debug!("ExeDiscovery: Manifest names {path:?} for '{display_name}'.");
            return DiscoveryOutcome::Found(path);
        }

        let candidates = collect_candidates(install_dir, self.max_depth);
        log::debug!(
            "ExeDiscovery: {} candidates under {install_dir:?} for '{display_name}'.",
            candidates.len()
        );
        choose_candidate(install_dir, display_name, candidates)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFile {
    #[serde(default)]
    play_tasks: Vec<ManifestTask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestTask {
    #[serde(default)]
    is_primary: bool,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    path: String,
}

/*
 * Reads a store manifest (`goggame-<id>.info`) from the install root and returns the
 * primary file task's executable, or the first file task's, if that file exists.
 */
fn executable_from_manifest(install_dir: &Path) -> Option<PathBuf> {
    let escaped_dir = Pattern::escape(&install_dir.to_string_lossy());
    let pattern = Path::new(&escaped_dir)
        .join(MANIFEST_PATTERN)
        .to_string_lossy()
        .into_owned();
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let manifests = match glob::glob_with(&pattern, options) {
        Ok(paths) => paths,
        Err(e) => {
            log::warn!("ExeDiscovery: Bad manifest pattern {pattern}: {e}");
            return None;
        }
    };

    for manifest_path in manifests.filter_map(|p| p.ok()) {
        let manifest: ManifestFile = match File::open(&manifest_path)
            .map_err(|e| e.to_string())
            .and_then(|f| {
                serde_json::from_reader::<_, ManifestFile>(BufReader::new(f))
                    .map_err(|e| e.to_string())
            })
        {
            Ok(m) => m,
            Err(e) => {
                log::warn!("ExeDiscovery: Unreadable manifest {manifest_path:?}: {e}");
                continue;
            }
        };

        let mut file_tasks: Vec<&ManifestTask> = manifest
            .play_tasks
            .iter()
            .filter(|t| t.kind.eq_ignore_ascii_case("FileTask") && !t.path.trim().is_empty())
            .collect();
        file_tasks.sort_by_key(|t| !t.is_primary);

        for task in file_tasks {
            let relative = task.path.trim().replace('\\', "/");
            let candidate = install_dir.join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
            log::debug!("ExeDiscovery: Manifest task target {candidate:?} does not exist.");
        }
    }
    None
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && EXCLUDED_DIRECTORIES
            .iter()
            .any(|d| entry.file_name().to_string_lossy().eq_ignore_ascii_case(d))
}

fn has_executable_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| EXECUTABLE_EXTENSIONS.contains(&e.as_str()))
}

fn is_excluded_name(path: &Path) -> bool {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    EXCLUDED_NAMES.contains(&stem.as_str())
        || EXCLUDED_NAME_PREFIXES.iter().any(|p| stem.starts_with(p))
}

fn collect_candidates(install_dir: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(install_dir)
        .max_depth(max_depth + 1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("ExeDiscovery: Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|p| has_executable_extension(p) && !is_excluded_name(p))
        .collect();
    candidates.sort();
    candidates
}

/*
 * Folds case, drops punctuation and trailing platform/architecture noise:
 * "MyGame-Win64-Shipping" and "My Game!" both become "mygame".
 */
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    while tokens.len() > 1 && tokens.last().is_some_and(|t| NAME_SUFFIX_NOISE.contains(t)) {
        tokens.pop();
    }
    tokens.concat()
}

pub fn score_candidate(install_dir: &Path, display_name: &str, candidate: &Path) -> i32 {
    let wanted = normalize_name(display_name);
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let have = normalize_name(&stem);

    let mut score = 0;
    if !wanted.is_empty() && !have.is_empty() {
        if have == wanted {
            score += SCORE_EXACT_NAME;
        } else if have.contains(&wanted) || wanted.contains(&have) {
            score += SCORE_PARTIAL_NAME;
        }
    }
    if candidate.parent() == Some(install_dir) {
        score += SCORE_IN_ROOT;
    }
    match candidate.metadata() {
        Ok(meta) => {
            if meta.len() > LARGE_FILE_BYTES {
                score += SCORE_LARGE_FILE;
            }
            if meta.len() > VERY_LARGE_FILE_BYTES {
                score += SCORE_LARGE_FILE;
            }
        }
        Err(e) => log::debug!("ExeDiscovery: No metadata for {candidate:?}: {e}"),
    }
    score
}

fn choose_candidate(
    install_dir: &Path,
    display_name: &str,
    mut candidates: Vec<PathBuf>,
) -> DiscoveryOutcome {
    match candidates.len() {
        0 => return DiscoveryOutcome::NotFound,
        1 => return DiscoveryOutcome::Found(candidates.remove(0)),
        _ => {}
    }

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|path| ScoredCandidate {
            score: score_candidate(install_dir, display_name, &path),
            path,
        })
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));

    let best = scored[0].score;
    let runner_up = scored[1].score;
    log::debug!("ExeDiscovery: Best score {best}, runner-up {runner_up} for '{display_name}'.");
    if best >= MIN_WINNING_SCORE && best - runner_up > MIN_WINNING_MARGIN {
        DiscoveryOutcome::Found(scored.swap_remove(0).path)
    } else {
        DiscoveryOutcome::Ambiguous(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::{self, Write};
    use tempfile::tempdir;

    fn touch(path: &Path, size: u64) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(path)?.set_len(size)
    }

    #[test]
    fn test_normalize_name_strips_noise() {
        assert_eq!(normalize_name("MyGame-Win64-Shipping"), "mygame");
        assert_eq!(normalize_name("My Game!"), "mygame");
        assert_eq!(normalize_name("Game_x64"), "game");
        assert_eq!(normalize_name("x64"), "x64");
        assert_eq!(normalize_name("Hollow Knight: Silksong"), "hollowknightsilksong");
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let discovery = CoreExecutableDiscovery::new();
        assert_eq!(
            discovery.discover(Path::new("/definitely/not/here"), "X"),
            DiscoveryOutcome::NotFound
        );
    }

    #[test]
    fn test_single_candidate_is_returned_without_scoring() -> io::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("bin").join("whatever.exe"), 10)?;
        touch(&dir.path().join("readme.txt"), 10)?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Totally Different");
        assert_eq!(
            outcome,
            DiscoveryOutcome::Found(dir.path().join("bin").join("whatever.exe"))
        );
        Ok(())
    }

    #[test]
    fn test_denylists_remove_helpers_and_redist_folders() -> io::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("unins000.exe"), 10)?;
        touch(&dir.path().join("UnityCrashHandler64.exe"), 10)?;
        touch(&dir.path().join("_CommonRedist").join("vcredist").join("game.exe"), 10)?;
        touch(&dir.path().join("Redist").join("thing.exe"), 10)?;
        touch(&dir.path().join("Celeste.exe"), 10)?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Celeste");
        assert_eq!(outcome, DiscoveryOutcome::Found(dir.path().join("Celeste.exe")));
        Ok(())
    }

    #[test]
    fn test_cmd_is_excluded_only_as_whole_name() -> io::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("cmd.exe"), 10)?;
        touch(&dir.path().join("CmdrKeen.exe"), 10)?;
        assert!(is_excluded_name(&dir.path().join("cmd.exe")));
        assert!(!is_excluded_name(&dir.path().join("CmdrKeen.exe")));
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Commander Keen");
        assert_eq!(outcome, DiscoveryOutcome::Found(dir.path().join("CmdrKeen.exe")));
        Ok(())
    }

    #[test]
    fn test_scoring_picks_clear_winner() -> io::Result<()> {
        let dir = tempdir()?;
        // exact name (100) + root (30) = 130
        touch(&dir.path().join("Hades.exe"), 1024)?;
        // root only (30) + large (10) = 40
        touch(&dir.path().join("tool.exe"), LARGE_FILE_BYTES + 1)?;
        touch(&dir.path().join("x64").join("other.exe"), 1024)?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Hades");
        assert_eq!(outcome, DiscoveryOutcome::Found(dir.path().join("Hades.exe")));
        Ok(())
    }

    #[test]
    fn test_close_scores_are_ambiguous() -> io::Result<()> {
        let dir = tempdir()?;
        // Both exact-name matches below the root: 100 vs 100 + 10 for size.
        touch(&dir.path().join("a").join("Hades.exe"), 1024)?;
        touch(&dir.path().join("b").join("Hades-Win64.exe"), LARGE_FILE_BYTES + 1)?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Hades");
        match outcome {
            DiscoveryOutcome::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].score, 110);
                assert_eq!(candidates[1].score, 100);
            }
            other => panic!("Expected ambiguity, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_low_scores_are_ambiguous_even_with_margin() -> io::Result<()> {
        let dir = tempdir()?;
        // 30 vs 0: margin is large but the best is below the threshold.
        touch(&dir.path().join("alpha.exe"), 10)?;
        touch(&dir.path().join("sub").join("beta.exe"), 10)?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Unrelated");
        assert!(matches!(outcome, DiscoveryOutcome::Ambiguous(_)));
        assert_eq!(outcome.suggestion(), Some(dir.path().join("alpha.exe").as_path()));
        Ok(())
    }

    #[test]
    fn test_scan_depth_is_bounded() -> io::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("a").join("b").join("c").join("deep.exe"), 10)?;
        assert_eq!(
            CoreExecutableDiscovery::new().discover(dir.path(), "deep"),
            DiscoveryOutcome::NotFound
        );
        touch(&dir.path().join("a").join("b").join("shallow.exe"), 10)?;
        assert_eq!(
            CoreExecutableDiscovery::new().discover(dir.path(), "deep"),
            DiscoveryOutcome::Found(dir.path().join("a").join("b").join("shallow.exe"))
        );
        Ok(())
    }

    #[test]
    fn test_manifest_wins_over_scan() -> io::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("Game.exe"), 1024)?;
        touch(&dir.path().join("bin").join("real.exe"), 10)?;
        touch(&dir.path().join("bin").join("editor.exe"), 10)?;
        let mut manifest = File::create(dir.path().join("goggame-1207658924.info"))?;
        write!(
            manifest,
            r#"{{"playTasks": [
                {{"isPrimary": false, "type": "FileTask", "path": "bin\\editor.exe"}},
                {{"isPrimary": true, "type": "FileTask", "path": "bin\\real.exe"}},
                {{"type": "URLTask", "link": "https://example.com"}}
            ]}}"#
        )?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Game");
        assert_eq!(
            outcome,
            DiscoveryOutcome::Found(dir.path().join("bin").join("real.exe"))
        );
        Ok(())
    }

    #[test]
    fn test_manifest_pointing_at_missing_file_falls_back_to_scan() -> io::Result<()> {
        let dir = tempdir()?;
        touch(&dir.path().join("Game.exe"), 1024)?;
        fs::write(
            dir.path().join("goggame-1.info"),
            r#"{"playTasks": [{"isPrimary": true, "type": "FileTask", "path": "gone.exe"}]}"#,
        )?;
        fs::write(dir.path().join("goggame-2.info"), "not json")?;
        let outcome = CoreExecutableDiscovery::new().discover(dir.path(), "Game");
        assert_eq!(outcome, DiscoveryOutcome::Found(dir.path().join("Game.exe")));
        Ok(())
    }
}
