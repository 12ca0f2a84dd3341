//! Content Forge command-line application
//!
//! Loads layered configuration, installs logging, and assembles storage and
//! the engine for the `content-forge` binary.

pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use error::{Error, Result};
pub use server::Application;

/// Re-export the workspace crates for convenience
pub use content_forge_core as core;
pub use content_forge_engine as engine;
pub use content_forge_prompts as prompts;
pub use content_forge_storage as storage;
