use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a document. Transitions only move forward:
/// `Uploaded -> Processing -> {Processed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Whether a classification may be attached in this state.
    pub fn carries_classification(&self) -> bool {
        self.is_terminal()
    }

    /// States from which `self` may be entered.
    ///
    /// `Failed` is reachable from `Uploaded` because a document may fail
    /// before it was ever marked as processing.
    pub fn predecessors(&self) -> &'static [DocumentStatus] {
        match self {
            Self::Uploaded => &[],
            Self::Processing => &[Self::Uploaded],
            Self::Processed => &[Self::Processing],
            Self::Failed => &[Self::Uploaded, Self::Processing],
        }
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOADED" => Ok(Self::Uploaded),
            "PROCESSING" => Ok(Self::Processing),
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown document status '{}'", other)),
        }
    }
}

/// Category plus the open attribute map returned by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Classification {
    pub fn new(category: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            category: category.into(),
            attributes,
        }
    }

    /// Error payload stored with a FAILED document.
    pub fn failure(step: &str, message: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert("error".to_string(), Value::String(message.to_string()));
        attributes.insert("step".to_string(), Value::String(step.to_string()));
        Self::new(super::PROCESSING_ERROR_CATEGORY, attributes)
    }
}

/// The persisted record of one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub storage_key: String,
    pub bucket_name: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub uploader_id: String,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DocumentStatus,
    pub classification: Option<Classification>,
}

impl Document {
    /// Creates a fresh UPLOADED record for an upload stored under `bucket`.
    pub fn new_uploaded(upload: &Upload, bucket: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let storage_key = format!("{}/{}", id, sanitize_file_name(&upload.file_name));

        Self {
            id,
            storage_key,
            bucket_name: bucket.to_string(),
            file_name: upload.file_name.clone(),
            file_size: upload.bytes.len() as u64,
            content_type: upload.content_type.clone(),
            uploader_id: upload.uploader_id.clone(),
            uploaded_at: now,
            updated_at: now,
            status: DocumentStatus::Uploaded,
            classification: None,
        }
    }
}

/// A raw upload handed to the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub uploader_id: String,
    pub bytes: Vec<u8>,
    /// Category context selecting the prompt template (e.g. "financial").
    pub context: Option<String>,
    pub sub_context: Option<String>,
    /// Free-text instruction from the uploader.
    pub instruction: Option<String>,
}

impl Upload {
    pub fn pdf(file_name: impl Into<String>, uploader_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: "application/pdf".to_string(),
            uploader_id: uploader_id.into(),
            bytes,
            context: None,
            sub_context: None,
            instruction: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>, sub_context: Option<String>) -> Self {
        self.context = Some(context.into());
        self.sub_context = sub_context;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// Keeps only the final path component and replaces characters that are
/// awkward in object keys.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "document.pdf".to_string()
    } else {
        trimmed.to_string()
    }
}
