//! Server module for keel
//!
//! Contains configuration loading and the serve loop.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for the bus, reconcilers and cluster
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Startup configuration checks
//! - `init`: Bus wiring and the stdin/stdout serve loop

pub mod config;
mod init;
mod loader;
mod validation;

// Re-export public API
pub use init::run;
pub use loader::{load_config, DEFAULT_CONFIG};
