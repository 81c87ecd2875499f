use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::classify::RetryPolicy;
use crate::secrets::{self, SecretError};

pub const CONFIG_VERSION: &str = "1.0";

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: default_database_path(),
            object_store: ObjectStoreConfig::default(),
            analysis: AnalysisConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            capacity: CapacityConfig::default(),
        }
    }
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_database_path() -> PathBuf {
    crate::store::sqlite::default_database_path()
        .unwrap_or_else(|| PathBuf::from("docintake.db"))
}

fn data_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".docintake"))
        .unwrap_or_else(|| PathBuf::from(".docintake"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreConfig {
    #[serde(default = "default_object_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_object_root() -> PathBuf {
    data_home().join("objects")
}

fn default_bucket() -> String {
    "documents".to_string()
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: default_object_root(),
            bucket: default_bucket(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

fn default_max_chunk_size() -> usize {
    12_000
}

fn default_min_text_chars() -> usize {
    10
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    #[serde(default = "default_ocr_workers")]
    pub workers: usize,
    /// Tesseract tessdata directory; the library default when unset.
    #[serde(default)]
    pub data_path: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_ocr_language() -> String {
    "por".to_string()
}

fn default_ocr_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: default_ocr_language(),
            workers: default_ocr_workers(),
            data_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "llama3.1".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            api_key_file: None,
            api_key_env: None,
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            temperature: None,
        }
    }
}

impl LlmConfig {
    /// Resolves the API key; `None` when no source is configured.
    pub fn api_key(&self) -> Result<Option<SecretString>, SecretError> {
        secrets::resolve_secret_optional(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env.as_deref(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityConfig {
    #[serde(default = "default_ceiling_bytes")]
    pub ceiling_bytes: u64,
    /// Bytes one sweep tries to free once the ceiling is crossed.
    #[serde(default = "default_eviction_target_bytes")]
    pub eviction_target_bytes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: u64,
}

fn default_ceiling_bytes() -> u64 {
    5 * GIB
}

fn default_eviction_target_bytes() -> u64 {
    GIB
}

fn default_batch_size() -> usize {
    50
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_stale_processing_secs() -> u64 {
    1800
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: default_ceiling_bytes(),
            eviction_target_bytes: default_eviction_target_bytes(),
            batch_size: default_batch_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_processing_secs: default_stale_processing_secs(),
        }
    }
}

impl CapacityConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_processing(&self) -> Duration {
        Duration::from_secs(self.stale_processing_secs)
    }
}
