pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod rendering;
pub mod runtime;
pub mod staging;
pub mod video;

pub use error::PipelineError;
pub use pipeline::{Pipeline, RunSummary};

// Application-level errors use anyhow, so callers only need `watchpost_core::Result`
pub use anyhow::Error;
pub use anyhow::Result;
