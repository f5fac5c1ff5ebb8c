//! Purpose-built fixture programs and helpers for exercising spawnbox.
//!
//! The binaries in `src/bin/` give integration tests deterministic commands
//! with known sandbox-relevant behavior: producing declared outputs,
//! ignoring polite termination, and reporting the injected environment.

pub mod helpers;
