//! PDF ingestion and LLM classification.
//!
//! An upload is stored, its text is recovered (embedded text first, OCR of
//! page images second), bounded and deduplicated, sent to a chat model with
//! a context-specific prompt, and the normalized category is persisted. A
//! background scheduler keeps stored bytes under a ceiling and fails
//! documents abandoned mid-pipeline.

pub mod classify;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod extractor;
pub mod maintenance;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod telemetry;

pub use classify::{ClassificationClient, ClassificationResult, RetryPolicy};
pub use config::{load_config, Config};
pub use error::{
    ClassifyError, ConfigError, DocintakeError, ExtractError, OcrError, PromptError, Result,
    StoreError,
};
pub use maintenance::{
    CapacityManager, CapacityPolicy, EvictionTrigger, MaintenanceScheduler, Reconciler,
};
pub use model::{Classification, Document, DocumentStatus, Upload};
pub use pipeline::{IngestionOutcome, Pipeline, PipelineDeps, PipelineError, PipelineSettings};
pub use prompt::TemplateRegistry;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
