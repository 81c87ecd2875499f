//! LLM classification: retrying transport calls, JSON extraction and
//! category normalization.

pub mod json;
pub mod normalize;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ClassifyError;
use crate::model::{Classification, UNCLASSIFIED};

pub use normalize::normalize_category;
pub use transport::{ChatTransport, HttpChatTransport};

const CATEGORY_KEYS: [&str; 2] = ["category", "categoria"];
const METADATA_KEYS: [&str; 2] = ["metadata", "metadados"];
const SUMMARY_KEYS: [&str; 4] = ["summary", "resumo", "description", "descricao"];

/// Summary stored when the model gave neither a category nor a summary.
const FALLBACK_SUMMARY: &str = "The model returned no category for this document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(2000),
        }
    }
}

/// The model's parsed answer before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Raw `category` value, if the model sent one.
    pub category: Option<Value>,
    pub metadata: Map<String, Value>,
}

impl ClassificationResult {
    /// Splits a model object into category and metadata. A nested
    /// `metadata` object is used when present; otherwise every other
    /// top-level field is metadata.
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let category = CATEGORY_KEYS.iter().find_map(|k| object.remove(*k));

        let nested = METADATA_KEYS
            .iter()
            .find(|k| matches!(object.get(**k), Some(Value::Object(_))))
            .and_then(|k| object.remove(*k));

        let metadata = match nested {
            Some(Value::Object(mut inner)) => {
                // Keep top-level summaries the model put beside the metadata.
                for key in SUMMARY_KEYS {
                    if let Some(v) = object.remove(key) {
                        inner.entry(key.to_string()).or_insert(v);
                    }
                }
                inner
            }
            _ => object,
        };

        Self { category, metadata }
    }

    /// Normalizes the category. A missing or non-string category becomes
    /// [`UNCLASSIFIED`] and a best-effort `summary` is guaranteed.
    pub fn into_classification(self) -> Classification {
        let category = normalize::normalize_category_value(self.category.as_ref());
        let mut attributes = self.metadata;

        if category == UNCLASSIFIED {
            let summary = SUMMARY_KEYS
                .iter()
                .find_map(|k| attributes.get(*k).and_then(Value::as_str))
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| FALLBACK_SUMMARY.to_string());
            attributes.insert("summary".to_string(), Value::String(summary));
        }

        Classification::new(category, attributes)
    }
}

/// Sends prompts through a [`ChatTransport`] with bounded retries.
#[derive(Clone)]
pub struct ClassificationClient {
    transport: Arc<dyn ChatTransport>,
    policy: RetryPolicy,
}

impl ClassificationClient {
    pub fn new(transport: Arc<dyn ChatTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Calls the model and parses its answer. Transport failures are retried;
    /// a reply that is not a JSON object fails at once.
    pub async fn classify(&self, prompt: &str) -> Result<ClassificationResult, ClassifyError> {
        let reply = self.complete_with_retry(prompt).await?;
        debug!("LLM reply: {} chars", reply.chars().count());

        let object = json::parse_model_output(&reply)?;
        Ok(ClassificationResult::from_object(object))
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, ClassifyError> {
        let max = self.policy.max_attempts;
        let mut last_error = None;

        for attempt in 1..=max {
            match self.transport.complete(prompt).await {
                Ok(reply) => {
                    if attempt > 1 {
                        info!("LLM call succeeded on attempt {}/{}", attempt, max);
                    }
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() => {
                    warn!("LLM call attempt {}/{} failed: {}", attempt, max, e);
                    last_error = Some(e);
                    if attempt < max {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClassifyError::RetriesExhausted {
            attempts: max,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }
}
