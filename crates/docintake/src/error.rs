use std::path::PathBuf;
use thiserror::Error;

use crate::model::DocumentStatus;

#[derive(Error, Debug)]
pub enum DocintakeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Failed to resolve API key: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to load PDF: {0}")]
    LoadPdf(String),

    #[error("Failed to extract text from page {page}: {reason}")]
    PageText { page: u32, reason: String },

    #[error("Failed to list images on page {page}: {reason}")]
    PageImages { page: u32, reason: String },

    #[error("Unsupported image encoding: {0}")]
    UnsupportedImage(String),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to load image: {0}")]
    LoadImage(String),

    #[error("Failed to initialize Tesseract: {0}")]
    EngineInit(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),
}

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("No template registered for context '{0}'")]
    UnknownContext(String),

    #[error("Context '{0}' has no default template")]
    MissingDefault(String),

    #[error("Fallback context '{0}' is not registered")]
    MissingFallbackContext(String),
}

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("LLM endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("LLM call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Unexpected LLM response body: {0}")]
    UnexpectedResponse(String),

    #[error("No JSON object found in LLM response")]
    NoJsonObject,

    #[error("LLM response is not valid JSON after repair: {0}")]
    MalformedJson(String),

    #[error("LLM response JSON is not an object")]
    NotAnObject,
}

impl ClassifyError {
    /// Transport and HTTP failures are worth another attempt; data-shape
    /// failures would repeat with the same prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HttpStatus { .. })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Document {0} not found")]
    NotFound(String),

    #[error("Corrupt row for document {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    #[error("Blocking task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, DocintakeError>;
