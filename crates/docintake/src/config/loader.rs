use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "DOCINTAKE_";

/// Smallest chunk that still leaves room around the omission marker.
pub const MIN_CHUNK_SIZE: usize = 64;

/// Loads the configuration: defaults, then the optional JSON file, then
/// `DOCINTAKE_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_config`] with an injectable environment lookup.
pub fn load_config_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            parse_config(&content)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config)?;

    log::debug!(
        "Config loaded (file: {})",
        path.map(crate::sanitize::redact_path)
            .unwrap_or_else(|| "none".to_string())
    );
    Ok(config)
}

/// Parses and validates a JSON config without consulting the environment.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config = parse_config(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    validate_schema(&json_value)?;
    Ok(serde_json::from_value(json_value)?)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Applies `DOCINTAKE_*` overrides. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| -> Option<(String, String)> {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (name, v))
    };

    if let Some((_, v)) = get("DATABASE_PATH") {
        config.database_path = PathBuf::from(v);
    }
    if let Some((_, v)) = get("OBJECT_ROOT") {
        config.object_store.root = PathBuf::from(v);
    }
    if let Some((_, v)) = get("BUCKET") {
        config.object_store.bucket = v;
    }

    if let Some((n, v)) = get("MAX_CHUNK_SIZE") {
        config.analysis.max_chunk_size = parse_env(&n, &v)?;
    }
    if let Some((n, v)) = get("MIN_TEXT_CHARS") {
        config.analysis.min_text_chars = parse_env(&n, &v)?;
    }

    if let Some((n, v)) = get("OCR_ENABLED") {
        config.ocr.enabled = parse_bool(&n, &v)?;
    }
    if let Some((_, v)) = get("OCR_LANGUAGE") {
        config.ocr.language = v;
    }
    if let Some((n, v)) = get("OCR_WORKERS") {
        config.ocr.workers = parse_env(&n, &v)?;
    }
    if let Some((_, v)) = get("OCR_DATA_PATH") {
        config.ocr.data_path = Some(v);
    }

    if let Some((_, v)) = get("LLM_ENDPOINT") {
        config.llm.endpoint = v;
    }
    if let Some((_, v)) = get("LLM_MODEL") {
        config.llm.model = v;
    }
    if let Some((_, v)) = get("LLM_API_KEY") {
        config.llm.api_key = Some(v);
    }
    if let Some((n, v)) = get("LLM_MAX_ATTEMPTS") {
        config.llm.max_attempts = parse_env(&n, &v)?;
    }
    if let Some((n, v)) = get("LLM_BACKOFF_MS") {
        config.llm.backoff_ms = parse_env(&n, &v)?;
    }
    if let Some((n, v)) = get("LLM_TIMEOUT_SECS") {
        config.llm.timeout_secs = parse_env(&n, &v)?;
    }

    if let Some((n, v)) = get("CAPACITY_CEILING_BYTES") {
        config.capacity.ceiling_bytes = parse_env(&n, &v)?;
    }
    if let Some((n, v)) = get("EVICTION_TARGET_BYTES") {
        config.capacity.eviction_target_bytes = parse_env(&n, &v)?;
    }
    if let Some((n, v)) = get("SWEEP_INTERVAL_SECS") {
        config.capacity.sweep_interval_secs = parse_env(&n, &v)?;
    }
    if let Some((n, v)) = get("STALE_PROCESSING_SECS") {
        config.capacity.stale_processing_secs = parse_env(&n, &v)?;
    }

    Ok(())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Checks the merged configuration. Runs after env overrides, which the
/// schema never sees.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.version != CONFIG_VERSION {
        return invalid(format!("Unsupported config version: {}", config.version));
    }

    let bucket = &config.object_store.bucket;
    if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
        return invalid(format!("Invalid bucket name: '{}'", bucket));
    }

    if config.analysis.max_chunk_size < MIN_CHUNK_SIZE {
        return invalid(format!(
            "analysis.maxChunkSize must be at least {}, got {}",
            MIN_CHUNK_SIZE, config.analysis.max_chunk_size
        ));
    }

    if config.ocr.language.trim().is_empty() {
        return invalid("ocr.language must not be empty".to_string());
    }
    if config.ocr.workers == 0 {
        return invalid("ocr.workers must be at least 1".to_string());
    }

    let llm = &config.llm;
    if !(llm.endpoint.starts_with("http://") || llm.endpoint.starts_with("https://")) {
        return invalid(format!(
            "llm.endpoint must be an http(s) URL, got '{}'",
            crate::sanitize::redact_url(&llm.endpoint)
        ));
    }
    if llm.model.trim().is_empty() {
        return invalid("llm.model must not be empty".to_string());
    }
    if llm.max_attempts == 0 {
        return invalid("llm.maxAttempts must be at least 1".to_string());
    }
    if llm.timeout_secs == 0 {
        return invalid("llm.timeoutSecs must be positive".to_string());
    }

    let capacity = &config.capacity;
    if capacity.ceiling_bytes == 0 {
        return invalid("capacity.ceilingBytes must be positive".to_string());
    }
    if capacity.eviction_target_bytes == 0 {
        return invalid("capacity.evictionTargetBytes must be positive".to_string());
    }
    if capacity.batch_size == 0 {
        return invalid("capacity.batchSize must be at least 1".to_string());
    }
    if capacity.sweep_interval_secs == 0 || capacity.stale_processing_secs == 0 {
        return invalid("capacity intervals must be positive".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_config_with_env(None, env(&[])).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.analysis.max_chunk_size, 12_000);
        assert_eq!(config.analysis.min_text_chars, 10);
        assert_eq!(config.ocr.language, "por");
        assert!(config.ocr.workers >= 1 && config.ocr.workers <= 4);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.llm.backoff_ms, 2000);
        assert_eq!(config.capacity.ceiling_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.capacity.eviction_target_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.object_store.bucket, "documents");
    }

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "databasePath": "/var/lib/docintake/db.sqlite",
            "analysis": { "maxChunkSize": 8000 },
            "llm": {
                "endpoint": "https://llm.internal/v1/chat/completions",
                "model": "qwen2.5",
                "maxAttempts": 5,
                "temperature": 0.1
            },
            "capacity": { "ceilingBytes": 1000, "evictionTargetBytes": 200 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/docintake/db.sqlite"));
        assert_eq!(config.analysis.max_chunk_size, 8000);
        assert_eq!(config.analysis.min_text_chars, 10);
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.llm.max_attempts, 5);
        assert_eq!(config.llm.temperature, Some(0.1));
        assert_eq!(config.capacity.ceiling_bytes, 1000);
        assert_eq!(config.capacity.batch_size, 50);
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "analysis": { "maxChunk": 10 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_small_chunk() {
        let result = load_config_from_str(r#"{ "analysis": { "maxChunkSize": 10 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docintake.json");
        std::fs::write(&path, r#"{ "analysis": { "maxChunkSize": 8000 } }"#).unwrap();

        let config = load_config_with_env(
            Some(&path),
            env(&[
                ("DOCINTAKE_MAX_CHUNK_SIZE", "4000"),
                ("DOCINTAKE_LLM_MAX_ATTEMPTS", "5"),
                ("DOCINTAKE_LLM_BACKOFF_MS", "10"),
                ("DOCINTAKE_CAPACITY_CEILING_BYTES", "2048"),
                ("DOCINTAKE_EVICTION_TARGET_BYTES", "512"),
                ("DOCINTAKE_OCR_LANGUAGE", "por+eng"),
                ("DOCINTAKE_OCR_ENABLED", "off"),
                ("DOCINTAKE_LLM_MODEL", " "),
            ]),
        )
        .unwrap();

        assert_eq!(config.analysis.max_chunk_size, 4000);
        assert_eq!(config.llm.max_attempts, 5);
        assert_eq!(config.llm.backoff_ms, 10);
        assert_eq!(config.capacity.ceiling_bytes, 2048);
        assert_eq!(config.capacity.eviction_target_bytes, 512);
        assert_eq!(config.ocr.language, "por+eng");
        assert!(!config.ocr.enabled);
        // Blank values are ignored
        assert_eq!(config.llm.model, "llama3.1");
    }

    #[test]
    fn test_bad_env_value() {
        let result = load_config_with_env(None, env(&[("DOCINTAKE_LLM_MAX_ATTEMPTS", "many")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { ref name, .. }) if name == "DOCINTAKE_LLM_MAX_ATTEMPTS"
        ));
    }

    #[test]
    fn test_env_values_validated_after_merge() {
        let result = load_config_with_env(None, env(&[("DOCINTAKE_MAX_CHUNK_SIZE", "8")]));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));

        let result = load_config_with_env(None, env(&[("DOCINTAKE_LLM_MAX_ATTEMPTS", "0")]));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));

        let result = load_config_with_env(None, env(&[("DOCINTAKE_BUCKET", "a/b")]));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config_with_env(Some(Path::new("/nonexistent/docintake.json")), env(&[]));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = load_config_with_env(
            None,
            env(&[("DOCINTAKE_LLM_MAX_ATTEMPTS", "4"), ("DOCINTAKE_LLM_BACKOFF_MS", "250")]),
        )
        .unwrap();
        let policy = config.llm.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, std::time::Duration::from_millis(250));
    }
}
