//! Plugin lifecycle tests.
//!
//! Batch loading, hooks, rollback and unload ordering, driven through a
//! `StaticLoader` so no shared libraries are needed.

mod common;

use common::*;
use justplug_core::{
    LoadOutcome, ManagerConfig, PluginError, PluginState, SymbolTable, PLUGIN_API_VERSION,
};
use justplug_sdk::abi::{symbols, RawDependency, RawDescriptor};

static ALPHA: RawDescriptor = RawDescriptor::new("alpha", "1.0.0").with_pretty_name("Alpha");
static BETA_DEPS: [RawDependency; 1] = [RawDependency::new("alpha", "^1")];
static BETA: RawDescriptor = RawDescriptor::new("beta", "1.1.0").with_dependencies(&BETA_DEPS);
static GAMMA_DEPS: [RawDependency; 1] = [RawDependency::new("beta", "")];
static GAMMA: RawDescriptor = RawDescriptor::new("gamma", "0.2.0").with_dependencies(&GAMMA_DEPS);
static SOLO: RawDescriptor = RawDescriptor::new("solo", "3.0.0");
static FUTURE: RawDescriptor =
    RawDescriptor::new("future", "1.0.0").with_api_version(PLUGIN_API_VERSION + 1);
static BAD_NAME: RawDescriptor = RawDescriptor::new("not-valid", "1.0.0");
static BAD_VERSION: RawDescriptor = RawDescriptor::new("sloppy", "one");
static REFUSER: RawDescriptor = RawDescriptor::new("refuser", "1.0.0");
static PANICKER: RawDescriptor = RawDescriptor::new("panicker", "1.0.0");
static STILLBORN: RawDescriptor = RawDescriptor::new("stillborn", "1.0.0");
static ALPHA_AGAIN: RawDescriptor = RawDescriptor::new("alpha", "2.0.0");

fn chain_loader() -> std::sync::Arc<justplug_core::StaticLoader> {
    loader(vec![
        ("gamma", recorder(&GAMMA)),
        ("alpha", recorder(&ALPHA)),
        ("beta", recorder(&BETA)),
    ])
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_orders_by_dependency() {
    let loader = chain_loader();
    let manager = manager(&loader);
    take_events();

    let report = manager.load_all(paths(&["gamma", "alpha", "beta"]));

    assert!(report.is_success(), "{}", report);
    assert_eq!(report.load_order, vec!["alpha", "beta", "gamma"]);
    assert_eq!(manager.plugin_names(), vec!["alpha", "beta", "gamma"]);
    assert_eq!(
        take_events(),
        vec!["loaded:alpha", "loaded:beta", "loaded:gamma"]
    );
    assert_eq!(manager.count(), 3);
    assert_eq!(manager.state("beta"), Some(PluginState::Loaded));
}

#[test]
fn test_load_indexes_increase() {
    let loader = chain_loader();
    let manager = manager(&loader);

    let report = manager.load_all(paths(&["gamma", "alpha", "beta"]));

    let index = |name: &str| match report.outcome_of(name) {
        Some(LoadOutcome::Loaded { load_index, .. }) => *load_index,
        other => panic!("{} not loaded: {:?}", name, other),
    };
    assert!(index("alpha") < index("beta"));
    assert!(index("beta") < index("gamma"));
    assert_eq!(manager.find_by_name("beta").unwrap().load_index, index("beta"));
}

#[test]
fn test_unload_one_closes_its_module() {
    let loader = loader(vec![("solo", recorder(&SOLO)), ("alpha", recorder(&ALPHA))]);
    let manager = manager(&loader);
    manager.load_all(paths(&["solo", "alpha"]));
    take_events();

    manager.unload("solo").unwrap();

    assert_eq!(take_events(), vec!["unloading:solo"]);
    assert_eq!(manager.state("solo"), None);
    assert!(!manager.has_plugin("solo"));
    assert_eq!(manager.plugin_names(), vec!["alpha"]);
    assert_eq!(loader.closed_paths(), paths(&["solo"]));
}

#[test]
fn test_incompatible_api_is_rejected() {
    let loader = loader(vec![("solo", recorder(&SOLO)), ("future", recorder(&FUTURE))]);
    let manager = manager(&loader);

    let report = manager.load_all(paths(&["solo", "future"]));

    assert_eq!(manager.count(), 1);
    let error = report.outcome_of("future").and_then(|o| o.error()).unwrap();
    assert!(matches!(
        error,
        PluginError::IncompatibleApi { found, .. } if *found == PLUGIN_API_VERSION + 1
    ));
    // Rejected modules are closed again.
    assert_eq!(loader.closed_paths(), paths(&["future"]));
}

#[test]
fn test_bad_modules_do_not_stop_the_batch() {
    let no_descriptor = SymbolTable::for_plugin::<Recorder>(&SOLO).without_symbol(symbols::DESCRIPTOR);
    let no_destroy = SymbolTable::for_plugin::<Recorder>(&ALPHA).without_symbol(symbols::DESTROY);
    let loader = loader(vec![
        ("solo", no_descriptor),
        ("alpha", no_destroy),
        ("bad_name", recorder(&BAD_NAME)),
        ("bad_version", recorder(&BAD_VERSION)),
        ("refuser", SymbolTable::for_plugin::<Refuser>(&REFUSER)),
        ("beta", recorder(&BETA)),
    ]);
    let manager = manager(&loader);

    let mut all = paths(&["solo", "alpha", "bad_name", "bad_version", "missing", "refuser"]);
    all.push(module_path("beta"));
    let report = manager.load_all(&all);

    assert_eq!(report.entries.len(), all.len());
    assert_eq!(report.loaded_count(), 0);
    assert_eq!(manager.count(), 0);

    let error_of = |name: &str| {
        report
            .entry(module_path(name))
            .and_then(|e| e.outcome.error())
            .map(|e| e.kind())
    };
    assert_eq!(error_of("solo"), Some("missing_descriptor"));
    assert_eq!(error_of("alpha"), Some("symbol_not_found"));
    assert_eq!(error_of("bad_name"), Some("malformed_metadata"));
    assert_eq!(error_of("bad_version"), Some("malformed_metadata"));
    assert_eq!(error_of("missing"), Some("load_error"));
    assert_eq!(error_of("refuser"), Some("hook_failed"));
    // beta needs alpha, which never got past validation.
    assert_eq!(error_of("beta"), Some("unmet_dependency"));
    assert_eq!(loader.open_modules(), 0);
}

#[test]
fn test_one_malformed_module_among_many() {
    let loader = loader(vec![
        ("alpha", recorder(&ALPHA)),
        ("solo", recorder(&SOLO)),
        ("bad_name", recorder(&BAD_NAME)),
    ]);
    let manager = manager(&loader);

    let report = manager.load_all(paths(&["alpha", "solo", "bad_name"]));

    assert_eq!(manager.count(), 2);
    assert_eq!(report.failures().count(), 1);
    let (path, _) = report.failures().next().unwrap();
    assert_eq!(path, module_path("bad_name"));
}

#[test]
fn test_duplicate_names_keep_the_first() {
    let loader = loader(vec![
        ("alpha", recorder(&ALPHA)),
        ("alpha_again", recorder(&ALPHA_AGAIN)),
    ]);
    let manager = manager(&loader);

    let report = manager.load_all(paths(&["alpha", "alpha_again"]));

    assert_eq!(manager.count(), 1);
    assert_eq!(
        manager.plugin_info("alpha").unwrap().version,
        semver::Version::new(1, 0, 0)
    );
    let error = report.entry(module_path("alpha_again")).unwrap().outcome.error().unwrap();
    assert!(matches!(error, PluginError::DuplicateName { .. }));

    // A later batch cannot replace it either.
    let again = manager.load_all(paths(&["alpha_again"]));
    assert_eq!(again.loaded_count(), 0);
    assert_eq!(manager.count(), 1);
}

#[test]
fn test_later_batch_can_depend_on_loaded_plugins() {
    let loader = chain_loader();
    let manager = manager(&loader);

    assert!(manager.load_all(paths(&["alpha"])).is_success());
    let report = manager.load_all(paths(&["gamma", "beta"]));

    assert!(report.is_success(), "{}", report);
    assert_eq!(manager.plugin_names(), vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_stop_on_first_error() {
    let loader = loader(vec![
        ("bad_name", recorder(&BAD_NAME)),
        ("solo", recorder(&SOLO)),
    ]);
    let config = ManagerConfig::default().with_continue_on_error(false);
    let manager = manager_with(&loader, config);

    let report = manager.load_all(paths(&["bad_name", "solo"]));

    assert_eq!(manager.count(), 0);
    assert_eq!(report.failures().count(), 1);
    assert_eq!(report.skipped().collect::<Vec<_>>(), vec![module_path("solo")]);
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn test_count_inside_loaded_includes_self() {
    let loader = chain_loader();
    let manager = manager(&loader);
    manager.load_all(paths(&["gamma", "alpha", "beta"]));

    let seen = |name: &str| {
        let target = manager.find_by_name(name).unwrap();
        let bytes = manager
            .dispatch(justplug_core::Envelope::to_plugin(target, OP_SEEN_COUNT, b""))
            .unwrap();
        String::from_utf8(bytes).unwrap()
    };
    assert_eq!(seen("alpha"), "1");
    assert_eq!(seen("beta"), "2");
    assert_eq!(seen("gamma"), "3");
}

#[test]
fn test_failing_hook_rolls_back() {
    let loader = loader(vec![
        ("alpha", recorder(&ALPHA)),
        ("refuser", SymbolTable::for_plugin::<Refuser>(&REFUSER)),
    ]);
    let manager = manager(&loader);

    let report = manager.load_all(paths(&["alpha", "refuser"]));

    assert_eq!(manager.count(), 1);
    assert!(!manager.has_plugin("refuser"));
    match report.outcome_of("refuser").and_then(|o| o.error()) {
        Some(PluginError::HookFailed { hook, reason, .. }) => {
            assert_eq!(*hook, "loaded");
            assert_eq!(reason, "refusing to start");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(loader.closed_paths(), paths(&["refuser"]));
}

#[test]
fn test_panicking_plugin_is_contained() {
    let loader = loader(vec![
        ("panicker", SymbolTable::for_plugin::<Panicker>(&PANICKER)),
        ("stillborn", SymbolTable::for_plugin::<Stillborn>(&STILLBORN)),
        ("solo", recorder(&SOLO)),
    ]);
    let manager = manager(&loader);

    let report = manager.load_all(paths(&["panicker", "stillborn", "solo"]));

    assert_eq!(manager.plugin_names(), vec!["solo"]);
    match report.outcome_of("panicker").and_then(|o| o.error()) {
        Some(PluginError::HookFailed { reason, .. }) => assert!(reason.contains("boom")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(
        report.outcome_of("stillborn").and_then(|o| o.error()),
        Some(PluginError::CreateFailed(_))
    ));
}

// ============================================================================
// Unloading
// ============================================================================

#[test]
fn test_unload_all_reverses_load_order() {
    let loader = chain_loader();
    let manager = manager(&loader);
    manager.load_all(paths(&["gamma", "alpha", "beta"]));
    take_events();

    let report = manager.unload_all();

    assert!(report.is_clean());
    assert_eq!(report.order(), vec!["gamma", "beta", "alpha"]);
    assert_eq!(
        take_events(),
        vec!["unloading:gamma", "unloading:beta", "unloading:alpha"]
    );
    assert_eq!(loader.closed_paths(), paths(&["gamma", "beta", "alpha"]));
    assert_eq!(manager.count(), 0);
    assert!(manager.locations().is_empty());
}

#[test]
fn test_unload_refuses_while_depended_upon() {
    let loader = chain_loader();
    let manager = manager(&loader);
    manager.load_all(paths(&["gamma", "alpha", "beta"]));

    match manager.unload("alpha") {
        Err(PluginError::HasDependents { dependents, .. }) => assert_eq!(dependents, vec!["beta"]),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(manager.is_loaded("alpha"));

    manager.unload("gamma").unwrap();
    manager.unload("beta").unwrap();
    manager.unload("alpha").unwrap();
    assert_eq!(manager.count(), 0);
    assert!(matches!(manager.unload("alpha"), Err(PluginError::NotFound(_))));
}

#[test]
fn test_reload_after_unload_gets_new_index() {
    let loader = loader(vec![("solo", recorder(&SOLO))]);
    let manager = manager(&loader);

    manager.load_all(paths(&["solo"]));
    let first = manager.find_by_name("solo").unwrap();
    manager.unload("solo").unwrap();
    manager.load_all(paths(&["solo"]));
    let second = manager.find_by_name("solo").unwrap();

    assert!(second.load_index > first.load_index);
}

#[test]
fn test_drop_unloads_everything() {
    let loader = chain_loader();
    {
        let manager = manager(&loader);
        manager.load_all(paths(&["gamma", "alpha", "beta"]));
        take_events();
    }
    assert_eq!(loader.open_modules(), 0);
    assert_eq!(
        take_events(),
        vec!["unloading:gamma", "unloading:beta", "unloading:alpha"]
    );
}
