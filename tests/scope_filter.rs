//! Integration-level scope filter properties: classification is a pure
//! function of canonical path + static filter lists, independent of
//! which component queries it.

use hermes_buffer::config::Config;
use hermes_buffer::scope::ScopeFilter;

#[test]
fn classification_is_stable_across_repeated_queries() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("stable.bin");
    std::fs::write(&file, b"x").unwrap();

    let filter = ScopeFilter::new(Config::default());
    let first = filter.is_tracked(&file);
    for _ in 0..100 {
        assert_eq!(filter.is_tracked(&file), first);
    }
}

#[test]
fn user_exclusion_prefix_untracks_matching_paths() {
    let dir = tempfile::tempdir().unwrap();
    let excluded_dir = dir.path().join("scratch_excluded");
    std::fs::create_dir(&excluded_dir).unwrap();
    let file = excluded_dir.join("a.bin");
    std::fs::write(&file, b"x").unwrap();

    let mut config = Config::default();
    config
        .path_exclusions
        .push(excluded_dir.canonicalize().unwrap().to_string_lossy().into_owned());
    let filter = ScopeFilter::new(config);
    assert!(!filter.is_tracked(&file));
}

#[test]
fn workflow_and_default_modes_are_both_tracked_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("w.bin");
    std::fs::write(&file, b"x").unwrap();

    let mut config = Config::default();
    config.base_adapter_mode = hermes_buffer::config::AdapterMode::Workflow;
    let filter = ScopeFilter::new(config);
    assert!(filter.is_tracked(&file));
}

#[test]
fn nested_flush_exclusions_restore_independently() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    std::fs::write(&a, b"x").unwrap();
    std::fs::write(&b, b"x").unwrap();

    let filter = ScopeFilter::new(Config::default());
    let guard_a = filter.exclude_for_io(&a);
    assert!(!filter.is_tracked(&a));
    assert!(filter.is_tracked(&b));
    let guard_b = filter.exclude_for_io(&b);
    assert!(!filter.is_tracked(&b));
    drop(guard_b);
    assert!(filter.is_tracked(&b));
    assert!(!filter.is_tracked(&a));
    drop(guard_a);
    assert!(filter.is_tracked(&a));
}
