//! Loader and lifecycle tests against a fake dynamic loader.

mod common;

use std::ffi::CStr;

use common::{descriptor, take_calls, FakeOpener, FakeSpec};
use nativemod_core::abi::{free_mod_results, AbiState};
use nativemod_core::ffi::ModInfo;
use nativemod_core::lifecycle::{self, StepOutcome};
use nativemod_core::sort::validate_dependencies;
use nativemod_core::{MatchKind, MatchQuery, ModLoader};

unsafe extern "C" fn setup_alpha(info: *mut ModInfo) {
    common::log_call("setup:alpha");
    let info = &mut *info;
    info.id = c"alpha".as_ptr();
    info.version = c"1.2.3".as_ptr();
    info.version_long = 10203;
}

unsafe extern "C" fn setup_beta(info: *mut ModInfo) {
    common::log_call("setup:beta");
    let info = &mut *info;
    info.id = c"beta".as_ptr();
    info.version = c"not a version".as_ptr();
    info.version_long = 2;
}

unsafe extern "C" fn setup_anonymous(info: *mut ModInfo) {
    common::log_call("setup:anonymous");
    let info = &mut *info;
    info.id = std::ptr::null();
    info.version = c"2.0.0".as_ptr();
}

unsafe extern "C" fn load_alpha() {
    common::log_call("load:alpha");
}

unsafe extern "C" fn load_beta() {
    common::log_call("load:beta");
}

unsafe extern "C" fn late_alpha() {
    common::log_call("late:alpha");
}

unsafe extern "C" fn late_beta() {
    common::log_call("late:beta");
}

fn alpha() -> FakeSpec {
    FakeSpec::new()
        .setup(setup_alpha)
        .load(load_alpha)
        .late_load(late_alpha)
}

fn beta() -> FakeSpec {
    FakeSpec::new()
        .setup(setup_beta)
        .load(load_beta)
        .late_load(late_beta)
}

#[test]
fn test_dependency_loads_first() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    let mut loader = ModLoader::with_opener(opener.clone());

    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "b.so", &["a.so"]),
        descriptor(dir.path(), "a.so", &[]),
    ]);

    let names: Vec<_> = outcomes.iter().map(|o| o.descriptor().name()).collect();
    assert_eq!(names, ["a.so", "b.so"]);
    assert!(outcomes.iter().all(|o| o.is_loaded()));

    let state = AbiState::new();
    state.register_all(loader.take_outcomes());
    let mut loaded = state.loaded_results();
    assert_eq!(loaded.size, 2);
    unsafe {
        free_mod_results(&mut loaded);
        free_mod_results(&mut loaded);
    }
    assert!(loaded.array.is_null());
}

#[test]
fn test_independent_binaries_keep_discovery_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut loader = ModLoader::with_opener(FakeOpener::new());

    let batch = ["m3.so", "m1.so", "m2.so", "m0.so"]
        .iter()
        .map(|name| descriptor(dir.path(), name, &[]))
        .collect();
    let outcomes = loader.load_descriptors(batch);

    let names: Vec<_> = outcomes.iter().map(|o| o.descriptor().name()).collect();
    assert_eq!(names, ["m3.so", "m1.so", "m2.so", "m0.so"]);
}

#[test]
fn test_open_failure_does_not_stop_batch() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("broken.so", FakeSpec::new().failing("bad ELF header"));
    let mut loader = ModLoader::with_opener(opener.clone());

    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "broken.so", &[]),
        descriptor(dir.path(), "fine.so", &[]),
    ]);

    assert!(!outcomes[0].is_loaded());
    assert!(outcomes[0].failure().unwrap().contains("bad ELF header"));
    assert!(outcomes[0].handle().is_null());
    assert!(outcomes[1].is_loaded());
    assert!(!outcomes[1].handle().is_null());
}

#[test]
fn test_missing_dependency_is_advisory() {
    let dir = tempfile::tempdir().unwrap();
    let mut loader = ModLoader::with_opener(FakeOpener::new());

    let outcomes = loader.load_descriptors(vec![descriptor(dir.path(), "c.so", &["x.so"])]);
    assert!(outcomes[0].is_loaded());

    let diagnostics = validate_dependencies(outcomes);
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].contains("x.so"));
}

#[test]
fn test_lifecycle_steps_are_barriered() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("alpha.so", alpha());
    opener.add("beta.so", beta());
    let mut loader = ModLoader::with_opener(opener.clone());
    take_calls();

    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "alpha.so", &[]),
        descriptor(dir.path(), "beta.so", &[]),
    ]);
    let report = lifecycle::run_all(outcomes);

    assert_eq!(
        take_calls(),
        [
            "setup:alpha",
            "setup:beta",
            "load:alpha",
            "load:beta",
            "late:alpha",
            "late:beta",
        ]
    );
    assert_eq!(report.setup.called, 2);
    assert_eq!(report.late_load.called, 2);
}

#[test]
fn test_setup_copies_identity() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("alpha.so", alpha());
    opener.add("beta.so", beta());
    opener.add("anon.so", FakeSpec::new().setup(setup_anonymous));
    let mut loader = ModLoader::with_opener(opener.clone());

    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "alpha.so", &[]),
        descriptor(dir.path(), "beta.so", &[]),
        descriptor(dir.path(), "anon.so", &[]),
    ]);
    lifecycle::setup_all(outcomes);

    assert_eq!(outcomes[0].identifier(), "alpha");
    assert_eq!(outcomes[0].version(), &semver::Version::new(1, 2, 3));
    assert_eq!(outcomes[0].version_long(), 10203);

    // Unparseable version keeps the default.
    assert_eq!(outcomes[1].identifier(), "beta");
    assert_eq!(outcomes[1].version(), &semver::Version::new(0, 0, 0));
    assert_eq!(outcomes[1].version_long(), 2);

    // Null id keeps the display name.
    assert_eq!(outcomes[2].identifier(), "anon.so");
    assert_eq!(outcomes[2].version(), &semver::Version::new(2, 0, 0));
    take_calls();
}

#[test]
fn test_missing_symbols_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut loader = ModLoader::with_opener(FakeOpener::new());

    let outcomes = loader.load_descriptors(vec![descriptor(dir.path(), "plain.so", &[])]);
    assert_eq!(lifecycle::setup(&mut outcomes[0]).unwrap(), StepOutcome::Skipped);
    assert_eq!(lifecycle::load(&outcomes[0]).unwrap(), StepOutcome::Skipped);
    assert_eq!(lifecycle::late_load(&outcomes[0]).unwrap(), StepOutcome::Skipped);

    assert_eq!(outcomes[0].identifier(), "plain.so");
    assert_eq!(outcomes[0].version(), &semver::Version::new(0, 0, 0));
}

#[test]
fn test_lifecycle_fault_is_contained() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("alpha.so", alpha());
    opener.add("faulty.so", FakeSpec::new().panicking());
    opener.add("beta.so", beta());
    let mut loader = ModLoader::with_opener(opener.clone());
    take_calls();

    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "alpha.so", &[]),
        descriptor(dir.path(), "faulty.so", &[]),
        descriptor(dir.path(), "beta.so", &[]),
    ]);
    let report = lifecycle::run_all(outcomes);

    assert_eq!(report.setup.faulted, 1);
    assert_eq!(report.load.faulted, 1);
    assert_eq!(report.late_load.faulted, 1);
    assert_eq!(report.late_load.called, 2);
    assert_eq!(take_calls().len(), 6);

    let err = lifecycle::load(&outcomes[1]).unwrap_err();
    assert!(err.to_string().contains("faulty.so"));
}

#[test]
fn test_get_mod_and_force_unload() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("alpha.so", alpha());
    let mut loader = ModLoader::with_opener(opener.clone());

    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "alpha.so", &[]),
        descriptor(dir.path(), "beta.so", &[]),
    ]);
    lifecycle::setup_all(outcomes);
    take_calls();

    let state = AbiState::new();
    state.register_all(loader.take_outcomes());

    let found = state.get_mod(&MatchQuery::new("alpha", "1.2.3", 10203), MatchKind::Strict);
    assert!(!found.handle.is_null());
    let id = unsafe { CStr::from_ptr(found.info.id) };
    assert_eq!(id.to_str().unwrap(), "alpha");
    assert_eq!(found.info.version_long, 10203);
    let path = unsafe { CStr::from_ptr(found.path) };
    assert!(path.to_str().unwrap().ends_with("alpha.so"));

    let wrong = state.get_mod(&MatchQuery::new("alpha", "1.2.3", 1), MatchKind::Strict);
    assert!(wrong.is_null());

    let by_name = state.get_mod(&MatchQuery::id("beta.so"), MatchKind::ObjectName);
    assert!(!by_name.handle.is_null());

    assert!(state.force_unload(&MatchQuery::id("missing"), MatchKind::IdOnly));
    assert_eq!(state.len(), 2);
    assert_eq!(opener.closed(), 0);

    assert!(state.force_unload(&MatchQuery::id("alpha"), MatchKind::IdOnly));
    assert_eq!(state.len(), 1);
    assert_eq!(opener.closed(), 1);
    assert!(state
        .get_mod(&MatchQuery::id("alpha"), MatchKind::IdOnly)
        .is_null());
}

#[test]
fn test_unload_all_closes_clear_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("broken.so", FakeSpec::new().failing("nope"));
    let mut loader = ModLoader::with_opener(opener.clone());

    let batch = || {
        vec![
            descriptor(dir.path(), "one.so", &[]),
            descriptor(dir.path(), "two.so", &[]),
            descriptor(dir.path(), "broken.so", &[]),
        ]
    };

    loader.load_descriptors(batch());
    loader.clear();
    assert!(loader.is_empty());
    assert_eq!(opener.closed(), 0);

    loader.load_descriptors(batch());
    loader.unload_all();
    assert!(loader.is_empty());
    assert_eq!(opener.closed(), 2);
}

#[test]
fn test_reload_replaces_records_without_closing() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    let mut loader = ModLoader::with_opener(opener.clone());

    loader.load_descriptors(vec![
        descriptor(dir.path(), "one.so", &[]),
        descriptor(dir.path(), "two.so", &[]),
        descriptor(dir.path(), "three.so", &[]),
    ]);
    let outcomes = loader.load_descriptors(vec![
        descriptor(dir.path(), "four.so", &[]),
        descriptor(dir.path(), "five.so", &[]),
    ]);

    let names: Vec<_> = outcomes.iter().map(|o| o.descriptor().name()).collect();
    assert_eq!(names, ["four.so", "five.so"]);
    assert_eq!(loader.len(), 2);
    assert_eq!(opener.opened(), 5);
    assert_eq!(opener.closed(), 0);
}

#[test]
fn test_registry_unload_all_closes_loaded_records() {
    let dir = tempfile::tempdir().unwrap();
    let opener = FakeOpener::new();
    opener.add("broken.so", FakeSpec::new().failing("nope"));
    let mut loader = ModLoader::with_opener(opener.clone());

    loader.load_descriptors(vec![
        descriptor(dir.path(), "one.so", &[]),
        descriptor(dir.path(), "broken.so", &[]),
        descriptor(dir.path(), "two.so", &[]),
    ]);
    let state = AbiState::new();
    state.register_all(loader.take_outcomes());
    assert_eq!(state.len(), 3);

    state.unload_all();
    assert!(state.is_empty());
    assert_eq!(opener.closed(), 2);

    state.unload_all();
    assert_eq!(opener.closed(), 2);
}
