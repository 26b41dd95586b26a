//! Retrieval engine, result formatting and the string tool surface.

pub mod engine;
pub mod format;
pub mod tools;

pub use engine::{RetrievalEngine, RetrievalRequest, RetrievalResponse, Snapshot};
pub use tools::ToolSurface;
