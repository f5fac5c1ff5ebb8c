//! On-disk spawn manifests for the CLI.
//!
//! A manifest is only a description; it is funneled through
//! [`SpawnBuilder`] so every builder validation applies to file input too.

use crate::model::{Spawn, SpawnBuilder};
use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpawnManifest {
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub mnemonic: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl SpawnManifest {
    pub fn into_spawn(self) -> RunnerResult<Spawn> {
        let mut command = self.command.into_iter();
        let program = command.next().unwrap_or_default();
        let mut builder = SpawnBuilder::new(program).args(command);
        for (key, value) in self.env {
            builder = builder.env(key, value);
        }
        for input in self.inputs {
            builder = builder.input(input);
        }
        for output in self.outputs {
            builder = builder.output(output);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(mnemonic) = self.mnemonic {
            builder = builder.mnemonic(mnemonic);
        }
        for (key, value) in self.tags {
            builder = builder.tag(key, value);
        }
        builder.build()
    }
}

/// Load a manifest, sniffing YAML vs JSON from the file extension.
pub fn load_manifest_file(path: &Path) -> RunnerResult<SpawnManifest> {
    let data = std::fs::read_to_string(path).map_err(|err| {
        RunnerError::io(
            format!("could not read manifest '{}'", path.display()),
            err,
        )
    })?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        });
    if is_yaml {
        serde_yml::from_str(&data).map_err(|err| manifest_parse_error(path, "YAML", &err))
    } else {
        serde_json::from_str(&data).map_err(|err| manifest_parse_error(path, "JSON", &err))
    }
}

fn manifest_parse_error(path: &Path, format: &str, err: &dyn std::fmt::Display) -> RunnerError {
    RunnerError::setup(
        format!("could not parse manifest '{}' as {format}", path.display()),
        serde_json::json!({
            "source": err.to_string(),
            "fix": "write the manifest as YAML (.yaml/.yml) or JSON, with a top-level 'command' list",
        }),
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::runner::ErrorCode;

    #[test]
    fn yaml_manifest_round_trips_into_a_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawn.yaml");
        std::fs::write(
            &path,
            concat!(
                "command: [\"/bin/sh\", \"-c\", \"echo hi > out.txt\"]\n",
                "outputs: [out.txt]\n",
                "env:\n",
                "  LANG: C\n",
                "timeout_secs: 30\n",
                "mnemonic: ShellWrite\n",
            ),
        )
        .unwrap();
        let spawn = load_manifest_file(&path).unwrap().into_spawn().unwrap();
        assert_eq!(spawn.program(), "/bin/sh");
        assert_eq!(spawn.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(spawn.mnemonic(), "ShellWrite");
        assert!(spawn.outputs().contains(Path::new("out.txt")));
        assert_eq!(spawn.environment().get("LANG").map(String::as_str), Some("C"));
    }

    #[test]
    fn json_manifest_is_accepted_without_a_yaml_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawn.json");
        std::fs::write(&path, r#"{"command": ["/bin/true"], "inputs": ["src/a.txt"]}"#)
            .unwrap();
        let spawn = load_manifest_file(&path).unwrap().into_spawn().unwrap();
        assert_eq!(spawn.program(), "/bin/true");
        assert!(spawn.inputs().contains(Path::new("src/a.txt")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawn.yaml");
        std::fs::write(&path, "command: [\"/bin/true\"]\nbogus_field: 1\n").unwrap();
        let err = load_manifest_file(&path).unwrap_err();
        assert_eq!(err.code, ErrorCode::SandboxSetup);
    }

    #[test]
    fn missing_file_and_empty_command_surface_as_setup_errors() {
        let dir = tempfile::tempdir().unwrap();
        let absent = load_manifest_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert_eq!(absent.code, ErrorCode::SandboxSetup);

        let manifest = SpawnManifest::default();
        assert_eq!(manifest.into_spawn().unwrap_err().code, ErrorCode::SandboxSetup);
    }

    #[test]
    fn manifest_paths_are_validated_like_builder_paths() {
        let manifest = SpawnManifest {
            command: vec!["/bin/true".to_string()],
            outputs: vec![PathBuf::from("../escape.txt")],
            ..SpawnManifest::default()
        };
        assert_eq!(manifest.into_spawn().unwrap_err().code, ErrorCode::SandboxSetup);
    }
}
