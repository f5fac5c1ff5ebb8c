//! Common test helper functions.
//!
//! These utilities reduce boilerplate in integration tests by providing
//! standard implementations for temp directories and manifest files.

use spawnbox::manifest::SpawnManifest;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Create a unique temporary directory for a test.
///
/// The directory name includes a timestamp to avoid collisions between
/// parallel test runs. The directory is created immediately.
///
/// # Arguments
///
/// * `prefix` - A short identifier for the test (e.g., "timeout", "publish")
///
/// # Returns
///
/// The path to the newly created directory.
///
/// # Panics
///
/// Panics if the directory cannot be created.
///
/// # Example
///
/// ```ignore
/// let dir = temp_dir("my-test");
/// // dir is something like /tmp/spawnbox-my-test-1703520000000
/// ```
#[must_use]
pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    dir.push(format!("spawnbox-{prefix}-{stamp}"));

    #[allow(clippy::expect_used)]
    fs::create_dir_all(&dir).expect("failed to create temp directory");

    dir
}

/// Write a spawn manifest as pretty-printed JSON.
///
/// The written file loads back through `spawnbox::manifest::load_manifest_file`
/// when its extension is `.json`.
///
/// # Panics
///
/// Panics if serialization or the write fails.
pub fn write_manifest(path: &Path, manifest: &SpawnManifest) {
    #[allow(clippy::expect_used)]
    let data = serde_json::to_vec_pretty(manifest).expect("manifest serializes");
    #[allow(clippy::expect_used)]
    fs::write(path, data).expect("manifest written");
}
