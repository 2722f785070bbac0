//! NIMBUS Runtime
//!
//! Executes a validated task plan against a cloud: tasks run as soon as
//! their dependencies converge, up to a parallelism bound, each under a
//! timeout. Failures stop only the tasks that depend on them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cloud;
pub mod engine;
pub mod executor;
pub mod memory;
pub mod reconcile;
pub mod report;
pub mod scheduler;

pub use cloud::{Attributes, Cloud, CloudError, CloudRecord};
pub use engine::{EngineConfig, ExecutionEngine};
pub use executor::{Executor, Mode, TaskError, Verdict};
pub use memory::{CallCounts, MemoryCloud, MemorySnapshot};
pub use reconcile::{ReconcileError, Reconciler};
pub use report::{ExecutionReport, TaskOutcome};
pub use scheduler::{ScheduleDecision, Scheduler};
