//! Platform environment providers.
//!
//! A provider rewrites a spawn's declared environment into the map the
//! child actually receives: scratch variables point into the sandbox and
//! platform toolchain discovery variables are filled in. The provider is
//! chosen once per runner from the host OS.

use std::collections::BTreeMap;
use std::path::Path;

/// Fallback Xcode installation consulted when neither the spawn nor the
/// invoking environment names a developer directory.
pub const DEFAULT_DEVELOPER_DIR: &str = "/Applications/Xcode.app/Contents/Developer";

/// Rewrites declared spawn environments for the local platform.
pub trait LocalEnvProvider: Send + Sync {
    /// Produce the effective child environment. `scratch` is the writable
    /// per-invocation temp directory.
    fn rewrite(
        &self,
        base: &BTreeMap<String, String>,
        execroot: &Path,
        scratch: &Path,
    ) -> BTreeMap<String, String>;
}

/// Generic POSIX rewrite: temp variables are redirected at the sandbox
/// scratch directory so the command cannot scribble on the host's tmp.
pub struct PosixEnvProvider;

impl LocalEnvProvider for PosixEnvProvider {
    fn rewrite(
        &self,
        base: &BTreeMap<String, String>,
        _execroot: &Path,
        scratch: &Path,
    ) -> BTreeMap<String, String> {
        let mut env = base.clone();
        let scratch = scratch.to_string_lossy().into_owned();
        for key in ["TEMP", "TMP"] {
            if env.contains_key(key) {
                env.insert(key.to_string(), scratch.clone());
            }
        }
        env.insert("TMPDIR".to_string(), scratch);
        env
    }
}

/// macOS specialization: everything the POSIX provider does, plus Xcode
/// toolchain discovery. A `DEVELOPER_DIR` declared by the spawn wins,
/// then the invoking environment's, then [`DEFAULT_DEVELOPER_DIR`].
pub struct DarwinEnvProvider {
    product_name: String,
    client_env: BTreeMap<String, String>,
}

impl DarwinEnvProvider {
    pub fn new(product_name: impl Into<String>, client_env: BTreeMap<String, String>) -> Self {
        Self {
            product_name: product_name.into(),
            client_env,
        }
    }
}

impl LocalEnvProvider for DarwinEnvProvider {
    fn rewrite(
        &self,
        base: &BTreeMap<String, String>,
        execroot: &Path,
        scratch: &Path,
    ) -> BTreeMap<String, String> {
        let mut env = PosixEnvProvider.rewrite(base, execroot, scratch);
        let developer_dir = env
            .get("DEVELOPER_DIR")
            .or_else(|| self.client_env.get("DEVELOPER_DIR"))
            .cloned()
            .unwrap_or_else(|| DEFAULT_DEVELOPER_DIR.to_string());
        let sdkroot =
            format!("{developer_dir}/Platforms/MacOSX.platform/Developer/SDKs/MacOSX.sdk");
        env.insert("DEVELOPER_DIR".to_string(), developer_dir);
        env.entry("SDKROOT".to_string()).or_insert(sdkroot);
        env.insert(
            format!("{}_PRODUCT", product_env_prefix(&self.product_name)),
            self.product_name.clone(),
        );
        env
    }
}

/// Uppercased product name safe for use as an environment variable prefix.
pub fn product_env_prefix(product_name: &str) -> String {
    product_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Pick the provider for an OS name as reported by `std::env::consts::OS`.
pub fn provider_for_os(
    os: &str,
    product_name: &str,
    client_env: &BTreeMap<String, String>,
) -> Box<dyn LocalEnvProvider> {
    if os == "macos" {
        Box::new(DarwinEnvProvider::new(product_name, client_env.clone()))
    } else {
        Box::new(PosixEnvProvider)
    }
}
