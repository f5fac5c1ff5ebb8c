//! Fixture: dumps its working directory and environment as one JSON line.
//!
//! Usage:
//!   spawnbox-env-probe
//!
//! Lets tests assert exactly which variables the sandbox injected and
//! where the command actually ran.

// Test fixtures require special allowances - they are not production code
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]
#![allow(clippy::exit)]
#![allow(missing_docs)]

use std::collections::BTreeMap;

fn main() {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    let cwd = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();
    let payload = serde_json::json!({
        "cwd": cwd,
        "env": env,
    });
    match serde_json::to_string(&payload) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("spawnbox-env-probe: {err}");
            std::process::exit(1);
        }
    }
}
