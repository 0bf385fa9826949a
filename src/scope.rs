//! Path tracking & scope filter (spec §4.5), grounded on
//! `adapter/interceptor.cc`'s `IsTracked` and `adapter_utils.cc`'s
//! `LexicallyNormal`/`WeaklyCanonical`.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::config::{AdapterMode, Config};

/// Hard-coded system paths the original adapter never tracks
/// (`interceptor.cc`'s `kPathExclusions`).
const SYSTEM_PATH_EXCLUSIONS: &[&str] = &[
    "/bin/", "/boot/", "/dev/", "/etc/", "/lib/", "/opt/", "/proc/", "/sbin/",
    "/sys/", "/usr/", "/var/", "/run/",
];

/// Weakly-canonical normalization of `path` (spec §4.5 algorithm). Existing
/// leading components are resolved through `std::fs::canonicalize`; any
/// trailing components that do not yet exist (e.g. a file about to be
/// created) are appended lexically, matching `WeaklyCanonical`'s behavior
/// in the original adapter.
pub fn weakly_canonical(path: &Path) -> PathBuf {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    // Walk from the full path backward to find the longest existing prefix.
    let mut existing_len = path.components().count();
    let components: Vec<Component> = path.components().collect();
    loop {
        if existing_len == 0 {
            break;
        }
        let prefix: PathBuf = components[..existing_len].iter().collect();
        if prefix.exists() {
            break;
        }
        existing_len -= 1;
    }

    let canonical_prefix = if existing_len == 0 {
        PathBuf::from(
            components
                .first()
                .map(|c| c.as_os_str())
                .unwrap_or_default(),
        )
    } else {
        let prefix: PathBuf = components[..existing_len].iter().collect();
        std::fs::canonicalize(&prefix).unwrap_or(prefix)
    };

    let remainder: PathBuf = components[existing_len..].iter().collect();
    lexically_normal(&canonical_prefix.join(remainder))
}

/// Pure lexical normalization matching spec §4.5's rule ordering: drop `.`
/// components, collapse `X/..` pairs, keep a leading `..` after the root
/// absent (a rooted path cannot walk above its root), yield `.` for an
/// otherwise-empty result.
fn lexically_normal(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.into_iter().collect()
}

fn has_prefix(canonical: &Path, prefixes: &[String]) -> bool {
    let canonical_str = canonical.to_string_lossy();
    prefixes.iter().any(|p| canonical_str.starts_with(p.as_str()))
}

fn matches_system_exclusion(canonical: &Path) -> bool {
    let s = canonical.to_string_lossy();
    SYSTEM_PATH_EXCLUSIONS.iter().any(|p| s.starts_with(p))
}

/// Scope filter state: static lists loaded once at startup plus the
/// mutable, rarely-touched flush-exclusion set used to shadow in-flight
/// gap reads/flushes (spec §4.3.4, §4.6).
pub struct ScopeFilter {
    config: Config,
    shutdown: AtomicBool,
    flush_exclusions: RwLock<Vec<PathBuf>>,
}

impl ScopeFilter {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: AtomicBool::new(false),
            flush_exclusions: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Temporarily shadow `path` from tracking for the duration of a gap
    /// read or flush (spec §4.3.4). Returns a guard that removes the
    /// entry on drop.
    pub fn exclude_for_io<'a>(&'a self, path: &Path) -> FlushExclusionGuard<'a> {
        let canonical = weakly_canonical(path);
        self.flush_exclusions.write().unwrap().push(canonical.clone());
        FlushExclusionGuard {
            filter: self,
            path: canonical,
        }
    }

    /// The seven-step decision in spec §4.5, in the exact order the
    /// original's `IsTracked` evaluates it.
    pub fn is_tracked(&self, path: &Path) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }

        let canonical = weakly_canonical(path);

        if has_prefix(
            &canonical,
            &self
                .flush_exclusions
                .read()
                .unwrap()
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        ) {
            return false;
        }

        if !self.config.path_inclusions.is_empty()
            && has_prefix(&canonical, &self.config.path_inclusions)
        {
            return true;
        }

        if matches_system_exclusion(&canonical) {
            return false;
        }

        if has_prefix(&canonical, &self.config.path_exclusions) {
            return false;
        }

        match self.config.adapter_mode_for(&canonical) {
            AdapterMode::Bypass => self.config.adapter_mode_overrides.contains_key(
                canonical.to_string_lossy().as_ref(),
            ),
            AdapterMode::Default | AdapterMode::Scratch | AdapterMode::Workflow => true,
        }
    }
}

pub struct FlushExclusionGuard<'a> {
    filter: &'a ScopeFilter,
    path: PathBuf,
}

impl<'a> Drop for FlushExclusionGuard<'a> {
    fn drop(&mut self) {
        let mut list = self.filter.flush_exclusions.write().unwrap();
        if let Some(pos) = list.iter().position(|p| p == &self.path) {
            list.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_paths_are_never_tracked() {
        let filter = ScopeFilter::new(Config::default());
        assert!(!filter.is_tracked(Path::new("/etc/passwd")));
        assert!(!filter.is_tracked(Path::new("/proc/self/status")));
    }

    #[test]
    fn shutdown_untracks_everything() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").unwrap();
        let filter = ScopeFilter::new(Config::default());
        assert!(filter.is_tracked(&file));
        filter.begin_shutdown();
        assert!(!filter.is_tracked(&file));
    }

    #[test]
    fn inclusion_list_overrides_everything_but_flush_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").unwrap();
        let canonical = weakly_canonical(&file);

        let mut config = Config::default();
        config.path_inclusions.push(canonical.to_string_lossy().into_owned());
        let filter = ScopeFilter::new(config);
        assert!(filter.is_tracked(&file));
    }

    #[test]
    fn flush_exclusion_guard_shadows_then_restores() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").unwrap();
        let filter = ScopeFilter::new(Config::default());
        assert!(filter.is_tracked(&file));
        {
            let _guard = filter.exclude_for_io(&file);
            assert!(!filter.is_tracked(&file));
        }
        assert!(filter.is_tracked(&file));
    }

    #[test]
    fn bypass_mode_untracks_unless_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").unwrap();
        let canonical = weakly_canonical(&file);

        let mut config = Config::default();
        config.base_adapter_mode = AdapterMode::Bypass;
        let filter = ScopeFilter::new(config);
        assert!(!filter.is_tracked(&file));

        let mut config2 = Config::default();
        config2.base_adapter_mode = AdapterMode::Bypass;
        config2
            .adapter_mode_overrides
            .insert(canonical.to_string_lossy().into_owned(), AdapterMode::Bypass);
        let filter2 = ScopeFilter::new(config2);
        assert!(filter2.is_tracked(&file));
    }

    #[test]
    fn lexically_normal_collapses_dot_and_dotdot() {
        let p = lexically_normal(Path::new("/a/./b/../c"));
        assert_eq!(p, PathBuf::from("/a/c"));
    }

    #[test]
    fn lexically_normal_keeps_leading_dotdot_on_relative_path() {
        let p = lexically_normal(Path::new("../a"));
        assert_eq!(p, PathBuf::from("../a"));
    }

    #[test]
    fn weakly_canonical_handles_nonexistent_tail() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("not_yet_created.bin");
        let canonical = weakly_canonical(&target);
        assert_eq!(canonical.file_name().unwrap(), "not_yet_created.bin");
        assert!(canonical.starts_with(dir.path().canonicalize().unwrap()));
    }
}
