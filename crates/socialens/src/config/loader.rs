use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let compiled =
        jsonschema::JSONSchema::compile(&schema).map_err(|e| ConfigError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let result = compiled.validate(json_value);
    if let Err(errors) = result {
        let error_messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.max_upload_bytes == 0 {
        return Err(invalid("max_upload_bytes must be greater than zero"));
    }

    let dispatcher = &config.dispatcher;
    if dispatcher.worker_count == 0 {
        return Err(invalid("dispatcher.worker_count must be at least 1"));
    }
    if dispatcher.attempt_timeout_ms == 0 || dispatcher.lease_ms == 0 {
        return Err(invalid("dispatcher timeouts must be greater than zero"));
    }
    if dispatcher.reaper_interval_ms == 0 {
        return Err(invalid("dispatcher.reaper_interval_ms must be greater than zero"));
    }
    if dispatcher.backoff_max_ms < dispatcher.backoff_base_ms {
        return Err(invalid(
            "dispatcher.backoff_max_ms must not be below backoff_base_ms",
        ));
    }
    // A worker must be able to finish an attempt before its lease lapses.
    if dispatcher.lease_ms <= dispatcher.attempt_timeout_ms {
        return Err(invalid(format!(
            "dispatcher.lease_ms ({}) must exceed attempt_timeout_ms ({})",
            dispatcher.lease_ms, dispatcher.attempt_timeout_ms
        )));
    }

    if config.aggregator.top_n == 0 {
        return Err(invalid("aggregator.top_n must be at least 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.dispatcher.max_retries, 2);
        assert_eq!(config.aggregator.top_n, 10);
        assert!(config.enrichment.media_tagging);
        assert!(config.dispatcher.worker_count >= 1);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/data/socialens.db",
            "blob_directory": "/data/blobs",
            "max_upload_bytes": 1048576,
            "dispatcher": {
                "worker_count": 4,
                "attempt_timeout_ms": 5000,
                "max_retries": 3,
                "backoff_base_ms": 100,
                "backoff_max_ms": 1000,
                "lease_ms": 10000,
                "reaper_interval_ms": 250
            },
            "enrichment": {
                "media_tagging": false,
                "entity_keywords": ["rust"]
            },
            "aggregator": { "top_n": 5, "daily_limit": 30 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database_path, "/data/socialens.db");
        assert_eq!(config.dispatcher.worker_count, 4);
        assert_eq!(config.dispatcher.max_retries, 3);
        assert!(!config.enrichment.media_tagging);
        assert_eq!(config.enrichment.entity_keywords, vec!["rust"]);
        assert_eq!(config.aggregator.daily_limit, Some(30));
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_schema_rejects_unknown_field() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workers": 3 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_zero_workers() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "dispatcher": { "worker_count": 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_lease_must_exceed_attempt_timeout() {
        let config_json = r#"
        {
            "version": "1.0",
            "dispatcher": { "attempt_timeout_ms": 5000, "lease_ms": 5000 }
        }
        "#;
        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socialens.json");
        std::fs::write(&path, r#"{ "version": "1.0", "aggregator": { "top_n": 3 } }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.aggregator.top_n, 3);
        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
