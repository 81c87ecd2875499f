use crate::classify::ClassificationResult;
use crate::consolidate::AnalysisText;
use crate::model::{Classification, Document, Upload};
use crate::prompt::AssembledPrompt;

/// State carried through one ingestion run.
pub struct PipelineContext {
    // Input
    pub upload: Upload,

    // Set at registration; reflects the last persisted state
    pub document: Document,

    // Extract + consolidate result
    pub analysis: Option<AnalysisText>,

    // Only set when the LLM is consulted
    pub prompt: Option<AssembledPrompt>,
    pub raw_result: Option<ClassificationResult>,

    // Final classification, persisted with PROCESSED
    pub classification: Option<Classification>,

    pub short_circuited: bool,
}

impl PipelineContext {
    pub fn new(upload: Upload, document: Document) -> Self {
        Self {
            upload,
            document,
            analysis: None,
            prompt: None,
            raw_result: None,
            classification: None,
            short_circuited: false,
        }
    }
}

/// What a successful ingestion produced.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    /// The PROCESSED record as stored.
    pub document: Document,
    pub analysis_chars: usize,
    pub ocr_invocations: usize,
    /// True when the text was too short and the LLM was skipped.
    pub short_circuited: bool,
    pub prompt_template: Option<&'static str>,
}
