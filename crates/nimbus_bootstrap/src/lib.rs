//! NIMBUS Bootstrap
//!
//! Renders the startup script each machine runs on first boot. The script
//! exports proxy and object-storage settings, writes the node
//! configuration and then downloads and runs the node agent.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod env;
pub mod script;

pub use env::{proxy_env, s3_env, BootstrapConfig, ConfigError, S3Config};
pub use script::{BootstrapScript, RenderContext};
