//! Textgen common library
//!
//! This crate contains the configuration, error and metrics code shared by
//! the pipeline and the HTTP server.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{
    ComponentSpec, GenerationOptions, ModelOptions, PipelineSpec, PipelineSpecFile, PipelineType,
    ServiceConfig, TokenizerOptions,
};
pub use error::{Result, TextgenError};
pub use metrics::{LatencyTimer, MetricsRegistry, METRICS};
