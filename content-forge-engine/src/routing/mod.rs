//! Model routing: backend registry, cost-ranked router, provider adapters

pub mod openai;
pub mod registry;
pub mod router;

pub use openai::{OpenAiBackendConfig, OpenAiCompatibleBackend};
pub use registry::BackendRegistry;
pub use router::{Generation, ModelRouter};
