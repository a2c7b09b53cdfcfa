//! The asynchronous media job pipeline.
//!
//! This crate owns everything between "a client named a source" and
//! "an output file exists": source acquisition, transform planning,
//! pipeline execution over external tools, and the job registry that
//! the HTTP layer polls.

pub mod acquire;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod registry;

pub use acquire::{is_allowed_upload, AcquireRequest, MediaHandle, SourceAcquirer};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use pipeline::PipelineExecutor;
pub use plan::{plan_transform, TransformPlan};
pub use registry::JobRegistry;
