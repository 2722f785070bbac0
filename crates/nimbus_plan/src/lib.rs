//! NIMBUS Planner
//!
//! Translates a normalized cluster into named tasks and the dependency
//! edges between them, and validates the result into an execution order
//! before anything touches the cloud.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod graph;
pub mod task;

pub use builder::ModelBuilder;
pub use graph::{ExecutionPlan, GraphError, TaskGraph};
pub use task::{AttrValue, Task, TaskKind};
