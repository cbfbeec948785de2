//! Path normalisation for remote and local arguments.
//!
//! Remote paths are always `/`-separated, whatever the host platform. Nothing
//! here touches the filesystem; existence is checked by the callers.

use std::path::{Component, Path, PathBuf};

/// Prefix marking a command-line argument as a remote path (`i:/zone/home`).
pub const REMOTE_PREFIX: &str = "i:";

/// Lexically canonicalise a `/`-separated path.
///
/// Collapses `.` and repeated separators, resolves `..` against the preceding
/// component, and never climbs above the root of an absolute path.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join `rest` onto `base` and canonicalise the result.
pub fn join(base: &str, rest: &str) -> String {
    if rest.is_empty() {
        clean(base)
    } else if base.is_empty() {
        clean(rest)
    } else {
        clean(&format!("{}/{}", base, rest))
    }
}

/// Resolve a user-supplied remote path into a canonical absolute path.
///
/// Rules, first match wins:
/// 1. `/<zone>/~...` is the legacy home-relative form; the remainder joins onto `home`
/// 2. `/...` is absolute
/// 3. `~...` joins onto `home`
/// 4. anything else joins onto `cwd`
pub fn resolve_remote(cwd: &str, home: &str, zone: &str, path: &str) -> String {
    let legacy_home = format!("/{}/~", zone);
    if let Some(rest) = path.strip_prefix(&legacy_home) {
        return join(home, rest);
    }

    if path.starts_with('/') {
        return clean(path);
    }

    if let Some(rest) = path.strip_prefix('~') {
        return join(home, rest);
    }

    join(cwd, path)
}

/// Resolve a local path against the process's current directory.
pub fn resolve_local(path: impl AsRef<Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    resolve_local_from(&cwd, path)
}

/// Resolve a local path against an explicit working directory.
pub fn resolve_local_from(cwd: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        clean_local(path)
    } else {
        clean_local(&cwd.join(path))
    }
}

/// Lexical canonicalisation for local paths (no symlink resolution).
pub fn clean_local(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Where a source named by `source` lands inside `target_dir`.
///
/// A root source has no name of its own, so its contents go straight into
/// `target_dir` instead of replacing it.
pub fn destination_in(target_dir: &Path, source: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) => target_dir.join(name),
        None => target_dir.to_path_buf(),
    }
}

/// Remote paths travel as `PathBuf` inside entries; this renders them back.
pub fn remote_string(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        raw.into_owned()
    } else {
        raw.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Split an `i:`-prefixed argument into its remote path.
pub fn split_remote_arg(arg: &str) -> Option<&str> {
    arg.strip_prefix(REMOTE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CWD: &str = "/zoneA/home/bob";
    const HOME: &str = "/zoneA/home/bob";
    const ZONE: &str = "zoneA";

    #[test]
    fn test_legacy_zone_home_form() {
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "/zoneA/~/x"), "/zoneA/home/bob/x");
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "/zoneA/~"), "/zoneA/home/bob");
    }

    #[test]
    fn test_home_relative() {
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "~/y"), "/zoneA/home/bob/y");
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "~"), "/zoneA/home/bob");
    }

    #[test]
    fn test_cwd_relative() {
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "z"), "/zoneA/home/bob/z");
        assert_eq!(
            resolve_remote("/zoneA/home/bob/proj", HOME, ZONE, "../data/./a"),
            "/zoneA/home/bob/data/a"
        );
        assert_eq!(resolve_remote(CWD, HOME, ZONE, ""), "/zoneA/home/bob");
    }

    #[test]
    fn test_absolute_is_cleaned() {
        assert_eq!(
            resolve_remote(CWD, HOME, ZONE, "/zoneB//home/./alice/"),
            "/zoneB/home/alice"
        );
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "/../.."), "/");
    }

    #[test]
    fn test_other_zone_tilde_is_absolute() {
        assert_eq!(resolve_remote(CWD, HOME, ZONE, "/zoneB/~/x"), "/zoneB/~/x");
    }

    #[test]
    fn test_clean_relative() {
        assert_eq!(clean("a/../.."), "..");
        assert_eq!(clean("./"), ".");
        assert_eq!(clean("a//b/"), "a/b");
    }

    #[test]
    fn test_resolve_local_from() {
        let cwd = Path::new("/work/dir");
        assert_eq!(resolve_local_from(cwd, "out"), PathBuf::from("/work/dir/out"));
        assert_eq!(resolve_local_from(cwd, "../x/./y"), PathBuf::from("/work/x/y"));
        assert_eq!(resolve_local_from(cwd, "/abs/../p"), PathBuf::from("/p"));
        assert_eq!(resolve_local_from(cwd, "/.."), PathBuf::from("/"));
    }

    #[test]
    fn test_destination_in() {
        let target = Path::new("/tmp/out");
        assert_eq!(destination_in(target, Path::new("/z/home/a/f.txt")), PathBuf::from("/tmp/out/f.txt"));
        assert_eq!(destination_in(target, Path::new("/z/home/a")), PathBuf::from("/tmp/out/a"));
        assert_eq!(destination_in(target, Path::new("/")), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_split_remote_arg() {
        assert_eq!(split_remote_arg("i:/zone/home"), Some("/zone/home"));
        assert_eq!(split_remote_arg("./local"), None);
    }
}
