#![cfg(unix)]

mod common;

use common::{FakeToolchain, SOLVERS_JSON, VERSION_LINE};
use mzr_driver::{DriverError, DriverRegistry, Version};

#[test]
fn probe_populates_registry() {
    let fake = FakeToolchain::new("exit 0");
    let registry = DriverRegistry::new();
    registry.set_location(Some(fake.path())).unwrap();

    assert!(registry.is_valid());
    assert_eq!(
        registry.version(),
        Some(Version {
            major: 2,
            minor: 8,
            patch: 5
        })
    );
    assert_eq!(registry.version_string().as_deref(), Some(VERSION_LINE));
    assert_eq!(registry.executable(), Some(fake.file("minizinc")));
    assert_eq!(registry.stdlib_dir(), Some(fake.file("std")));
    assert_eq!(registry.user_config_file(), Some(fake.file("Preferences.json")));

    let solvers = registry.solvers();
    assert_eq!(solvers.len(), 2);
    assert_eq!(solvers[0].extra_flags.len(), 1);
    assert_eq!(registry.default_solver().unwrap().id, "org.gecode.gecode");
    assert_eq!(registry.find_solver("chuffed").unwrap().version, "0.13.2");
}

#[test]
fn executable_path_is_accepted() {
    let fake = FakeToolchain::new("exit 0");
    let registry = DriverRegistry::new();
    registry.set_location(Some(&fake.file("minizinc"))).unwrap();
    assert!(registry.is_valid());
}

#[test]
fn bad_version_clears_registry() {
    let good = FakeToolchain::new("exit 0");
    let registry = DriverRegistry::new();
    registry.set_location(Some(good.path())).unwrap();

    let bad = FakeToolchain::with_probes("minizinc, unknown build", SOLVERS_JSON, "exit 0");
    let err = registry.set_location(Some(bad.path())).unwrap_err();
    assert!(matches!(err, DriverError::BadVersion(_)));
    assert!(!registry.is_valid());
    assert!(registry.solvers().is_empty());
}

#[test]
fn corrupt_solver_list_is_rejected() {
    let fake = FakeToolchain::with_probes(VERSION_LINE, "[{\"id\": ", "exit 0");
    let registry = DriverRegistry::new();
    let err = registry.set_location(Some(fake.path())).unwrap_err();
    assert!(matches!(err, DriverError::BadJson { .. }));
    assert!(!registry.is_valid());
}

#[test]
fn missing_directory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let registry = DriverRegistry::new();
    let err = registry.set_location(Some(dir.path())).unwrap_err();
    assert!(matches!(err, DriverError::NotFound(_)));
}

#[test]
fn unknown_solver_lookup_fails() {
    let fake = FakeToolchain::new("exit 0");
    let registry = fake.registry();
    assert!(matches!(
        registry.lookup("org.example.nosuch"),
        Err(DriverError::UnknownSolver(_))
    ));
    assert_eq!(registry.solvers().len(), 2);
}
