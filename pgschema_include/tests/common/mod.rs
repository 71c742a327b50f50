use std::path::PathBuf;

/// Directory holding the checked-in SQL fixture trees.
#[allow(dead_code)]
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Canonical path of one fixture tree, usable as a sandbox root.
#[allow(dead_code)]
pub fn fixture_root(name: &str) -> PathBuf {
    std::fs::canonicalize(fixtures_dir().join(name)).expect("fixture tree should exist")
}

#[allow(dead_code)]
pub fn init_logging() {
    pgschema_include::utils::logging::init_test_logging();
}
