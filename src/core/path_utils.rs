/*
 * Path helpers shared across the core: locating the per-user configuration
 * directory, and normalizing executable paths so that records written by different
 * tools compare equal. Shortcut files store paths quoted, catalogs store them with
 * `{InstallDir}` placeholders or environment variables; both are reduced here to an
 * absolute, unquoted, lexically clean form before comparison.
 */
use directories::ProjectDirs;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const INSTALL_DIR_VARIABLE: &str = "{InstallDir}";

/*
 * Retrieves the application's local configuration directory, creating it when
 * missing. Returns `None` when no home directory can be determined or the directory
 * cannot be created.
 */
pub fn get_base_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    log::trace!("PathUtils: Resolving local config dir for '{app_name}'");
    ProjectDirs::from("", "", app_name).and_then(|proj_dirs| {
        let config_path = proj_dirs.config_local_dir();
        if !config_path.exists() {
            if let Err(e) = fs::create_dir_all(config_path) {
                log::error!("PathUtils: Failed to create config directory {config_path:?}: {e}");
                return None;
            }
            log::debug!("PathUtils: Created config directory {config_path:?}");
        }
        Some(config_path.to_path_buf())
    })
}

/*
 * Strips surrounding whitespace and one pair of double quotes.
 */
pub fn unquote(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
}

pub fn quote(path: &str) -> String {
    format!("\"{}\"", unquote(path))
}

/*
 * Expands `{InstallDir}`, `%VAR%`, `$VAR` and `${VAR}`. Unknown variables are left
 * untouched so that a failed expansion never silently changes the path.
 */
pub fn expand_variables<F>(input: &str, install_dir: Option<&str>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut text = input.to_string();
    if let Some(dir) = install_dir {
        if text.contains(INSTALL_DIR_VARIABLE) {
            text = text.replace(INSTALL_DIR_VARIABLE, unquote(dir));
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(pos) = rest.find(['%', '$']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (name, consumed) = if let Some(after) = tail.strip_prefix('%') {
            match after.find('%') {
                Some(end) => (&after[..end], end + 2),
                None => ("", 0),
            }
        } else if let Some(after) = tail.strip_prefix("${") {
            match after.find('}') {
                Some(end) => (&after[..end], end + 3),
                None => ("", 0),
            }
        } else {
            let after = &tail[1..];
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end + 1)
        };

        let valid_name =
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let resolved = if valid_name { lookup(name) } else { None };
        match resolved {
            Some(value) => {
                out.push_str(&value);
                rest = &tail[consumed..];
            }
            None => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/*
 * Resolves `.` and `..` without touching the filesystem, so paths of uninstalled
 * games still normalize.
 */
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/*
 * Produces the comparison key for an executable path: variables expanded, quotes
 * removed, relative paths anchored at `base_dir`, separators unified to '/', and
 * case folded (the external launcher runs on case-insensitive filesystems).
 */
pub fn normalize_exe_path<F>(
    raw: &str,
    install_dir: Option<&str>,
    base_dir: Option<&str>,
    lookup: F,
) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = expand_variables(unquote(raw), install_dir, &lookup);
    let unified = unquote(&expanded).replace('\\', "/");
    let path = Path::new(&unified);
    let anchored = if is_absolute_any_platform(&unified) {
        path.to_path_buf()
    } else if let Some(base) = base_dir.filter(|b| !b.trim().is_empty()) {
        let base = expand_variables(unquote(base), install_dir, &lookup).replace('\\', "/");
        Path::new(&base).join(path)
    } else {
        path.to_path_buf()
    };
    lexical_normalize(&anchored)
        .to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

/*
 * Directory part of a path written for any platform, with the separator style of the
 * input preserved. Empty when the path has no directory part.
 */
pub fn parent_dir(path: &str) -> String {
    let path = unquote(path);
    match path.rfind(['/', '\\']) {
        Some(0) => path[..1].to_string(),
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

pub fn is_absolute_any_platform(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "GAMES" => Some("D:/Games".to_string()),
            "HOME" => Some("/home/deck".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_unquote_and_quote() {
        assert_eq!(unquote("  \"C:\\Foo\\foo.exe\" "), "C:\\Foo\\foo.exe");
        assert_eq!(unquote("plain"), "plain");
        assert_eq!(unquote("\"unterminated"), "\"unterminated");
        assert_eq!(quote("\"x\""), "\"x\"");
        assert_eq!(quote("x"), "\"x\"");
    }

    #[test]
    fn test_expand_variables_forms() {
        assert_eq!(
            expand_variables("%GAMES%/foo.exe", None, vars),
            "D:/Games/foo.exe"
        );
        assert_eq!(expand_variables("$HOME/bin", None, vars), "/home/deck/bin");
        assert_eq!(expand_variables("${HOME}/bin", None, vars), "/home/deck/bin");
        assert_eq!(
            expand_variables("{InstallDir}\\bin\\g.exe", Some("\"C:\\G\""), vars),
            "C:\\G\\bin\\g.exe"
        );
    }

    #[test]
    fn test_expand_variables_leaves_unknown_untouched() {
        assert_eq!(expand_variables("%NOPE%/x", None, vars), "%NOPE%/x");
        assert_eq!(expand_variables("100% sure", None, vars), "100% sure");
        assert_eq!(expand_variables("cost $5", None, vars), "cost $5");
        assert_eq!(expand_variables("{InstallDir}/x", None, vars), "{InstallDir}/x");
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn test_normalize_exe_path_equates_equivalent_spellings() {
        let a = normalize_exe_path("\"C:\\Games\\Foo\\foo.exe\"", None, None, vars);
        let b = normalize_exe_path("c:/games/foo/bin/../FOO.EXE", None, None, vars);
        let c = normalize_exe_path("{InstallDir}\\foo.exe", Some("C:\\Games\\Foo"), None, vars);
        let d = normalize_exe_path("foo.exe", None, Some("C:\\Games\\Foo"), vars);
        assert_eq!(a, "c:/games/foo/foo.exe");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
    }

    #[test]
    fn test_parent_dir_handles_both_separators() {
        assert_eq!(parent_dir("\"C:\\Games\\Foo\\foo.exe\""), "C:\\Games\\Foo");
        assert_eq!(parent_dir("/opt/games/foo"), "/opt/games");
        assert_eq!(parent_dir("/foo"), "/");
        assert_eq!(parent_dir("foo.exe"), "");
    }

    #[test]
    fn test_get_base_app_config_local_dir_creates_directory() {
        let unique_app_name = format!("ShortcutSyncTest_{}", rand::random::<u64>());
        let Some(path) = get_base_app_config_local_dir(&unique_app_name) else {
            // No home directory in this environment.
            return;
        };
        assert!(path.is_dir());
        assert_eq!(get_base_app_config_local_dir(&unique_app_name), Some(path.clone()));
        if let Err(e) = fs::remove_dir_all(&path) {
            eprintln!("Test cleanup failed for {path:?}: {e}");
        }
    }
}
