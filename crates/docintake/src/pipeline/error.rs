use std::fmt;

use thiserror::Error;

use crate::error::{ClassifyError, ExtractError, PromptError, StoreError};

/// Pipeline stage names, also recorded in FAILED documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    StoreObject,
    Register,
    MarkProcessing,
    Extract,
    AssemblePrompt,
    Classify,
    Persist,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreObject => "store_object",
            Self::Register => "register",
            Self::MarkProcessing => "mark_processing",
            Self::Extract => "extract",
            Self::AssemblePrompt => "assemble_prompt",
            Self::Classify => "classify",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The underlying cause of a failed step.
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Nothing was persisted; there is no document to look up.
    #[error("Failed to store upload: {0}")]
    StoreObject(#[source] StoreError),

    #[error("Document {document_id} failed at step {step}: {source}")]
    Step {
        document_id: String,
        step: PipelineStep,
        #[source]
        source: StepFailure,
    },

    #[error("Ingestion task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Step { document_id, .. } => Some(document_id),
            _ => None,
        }
    }

    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            Self::StoreObject(_) => Some(PipelineStep::StoreObject),
            Self::Step { step, .. } => Some(*step),
            Self::Aborted(_) => None,
        }
    }
}
