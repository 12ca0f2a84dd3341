//! Core domain models and traits for Content Forge
//!
//! This crate contains the content task state machine, the quality rubric,
//! routing metadata, the training corpus model and the trait seams the engine
//! and storage crates plug into. It performs no I/O.

pub mod backend;
pub mod budget;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod history;
pub mod quality;
pub mod store;
pub mod task;
pub mod training;

pub use error::{Error, Result};
