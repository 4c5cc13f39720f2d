//! Descriptor loading and settings error-message integration tests.

use assert_fs::prelude::*;
use halyard_core::{descriptor, settings, CoreError, Phase};
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Descriptor loading
// ---------------------------------------------------------------------------

#[test]
fn load_missing_descriptor_names_the_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("component.yml");
    let err = descriptor::load(&path).unwrap_err();
    assert!(matches!(err, CoreError::DescriptorNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("component.yml"));
}

#[test]
fn load_corrupt_descriptor_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("component.yml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = descriptor::load(file.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("component.yml"));
}

#[test]
fn load_descriptor_with_component_and_capability() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("component.yml");
    file.write_str(
        "kind: Component\n\
         metadata:\n  name: client-sb\n\
         spec:\n  runtime: quarkus\n  deploymentMode: dev\n\
         ---\n\
         kind: Capability\n\
         metadata:\n  name: db\n\
         spec:\n  category: database\n  type: postgres\n  version: \"11\"\n",
    )
    .expect("write");
    file.assert(predicate::path::exists());

    let loaded = descriptor::load(file.path()).expect("load");
    assert_eq!(loaded.components.len(), 1);
    assert_eq!(loaded.capabilities.len(), 1);
    let component = loaded.component("client-sb").expect("component");
    assert_eq!(component.spec.runtime, "quarkus");
    // Status is never part of a descriptor.
    assert_eq!(component.phase(), None::<Phase>);
    assert_eq!(loaded.capabilities[0].spec.version, "11");
}

#[test]
fn descriptor_path_is_relative_to_component_dir() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = descriptor::descriptor_path(dir.path(), std::path::Path::new("halyard/c.yml"));
    assert!(path.starts_with(dir.path()));
    assert!(path.ends_with("halyard/c.yml"));
}

// ---------------------------------------------------------------------------
// 2. Settings
// ---------------------------------------------------------------------------

#[test]
fn corrupt_settings_error_contains_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".halyard/config.yaml")
        .write_str("watch_timeout_secs: [not, a, number]\n")
        .expect("write");

    let err = settings::load_at(home.path()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("config.yaml"), "must contain file path, got: {msg}");
}

#[test]
fn home_not_found_error_message() {
    assert!(CoreError::HomeNotFound.to_string().contains("home directory"));
}
