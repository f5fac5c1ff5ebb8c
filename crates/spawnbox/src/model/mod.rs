//! Core data model: spawns, per-invocation policies, and execution results.

pub mod policy;
pub mod result;
pub mod spawn;

pub use policy::{CancelToken, ExecutionPolicy, SpawnReporter, SpawnStage};
pub use result::{ExecutionResult, ResourceUsage, SpawnStatus};
pub use spawn::{Spawn, SpawnBuilder};
