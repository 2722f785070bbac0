//! NIMBUS Resources
//!
//! Named artifacts whose content is produced on first read and cached,
//! and the template renderer that produces most of them.
//! Every materialized resource exposes a content hash for change detection.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod holder;
pub mod template;

pub use error::{FunctionError, RenderError};
pub use holder::ResourceHolder;
pub use template::{FunctionMap, TemplateFunction, TemplateResource};
