//! NIMBUS Core Types
//!
//! Pure types shared by every stage of a reconciliation pass: task names,
//! run identifiers, content hashes and the base error type. No I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::Hash;
pub use id::{RunId, TaskName};
