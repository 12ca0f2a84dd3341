//! Stage prompts for the Content Forge pipeline
//!
//! This crate provides the default research, draft, refine, judge and format
//! templates, a `{{variable}}` renderer and a library that renders them from
//! task state.

pub mod error;
pub mod manager;
pub mod renderer;
pub mod templates;

pub use error::{Error, Result};
pub use manager::{PromptKind, PromptLibrary};
pub use renderer::{PromptRenderer, PromptTemplate, TemplateVariable};
