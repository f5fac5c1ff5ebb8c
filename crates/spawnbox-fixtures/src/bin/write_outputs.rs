//! Fixture: writes a fixed payload to every path given as an argument.
//!
//! Usage:
//!   spawnbox-write-outputs <path>...
//!
//! Creates parent directories as needed. Exits 1 on any write error and 2
//! when called without paths.

// Test fixtures require special allowances - they are not production code
#![allow(clippy::print_stderr)]
#![allow(clippy::exit)]
#![allow(missing_docs)]

use std::fs;
use std::path::Path;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("spawnbox-write-outputs: no output paths given");
        std::process::exit(2);
    }
    for arg in args {
        let path = Path::new(&arg);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = fs::create_dir_all(parent) {
                    eprintln!("spawnbox-write-outputs: mkdir {}: {err}", parent.display());
                    std::process::exit(1);
                }
            }
        }
        if let Err(err) = fs::write(path, b"fixture output\n") {
            eprintln!("spawnbox-write-outputs: write {}: {err}", path.display());
            std::process::exit(1);
        }
    }
}
