//! Fixture: ignores polite termination and spins until killed.
//!
//! Usage:
//!   spawnbox-stubborn [seconds]
//!
//! Runs for the given number of seconds (default 30) while swallowing
//! SIGTERM and SIGINT, so only SIGKILL ends it early.

// Test fixtures require special allowances - they are not production code
#![allow(clippy::print_stderr)]
#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

fn main() {
    let limit = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .unwrap_or(30);
    // An empty handler swallows the signal instead of dying to it.
    if let Err(err) = ctrlc::set_handler(|| {}) {
        eprintln!("spawnbox-stubborn: could not ignore signals: {err}");
    }
    let deadline = Instant::now() + Duration::from_secs(limit);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
}
