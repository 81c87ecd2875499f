//! Ingestion coordinator: upload → stored → PROCESSING → classified.

pub mod context;
pub mod error;
pub mod runner;

pub use context::{IngestionOutcome, PipelineContext};
pub use error::{PipelineError, PipelineStep, StepFailure};
pub use runner::{Pipeline, PipelineDeps, PipelineSettings};
