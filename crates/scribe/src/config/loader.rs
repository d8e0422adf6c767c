use std::path::Path;

use secrecy::SecretString;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::processor::remote::parse_endpoint;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

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

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let processing = &config.processing;
    if processing.timeout_secs == 0 || processing.max_concurrent_jobs == 0 {
        return Err(ConfigError::Validation {
            message: "processing.timeout_secs and processing.max_concurrent_jobs must be positive"
                .to_string(),
        });
    }
    if processing.stale_after_secs <= processing.timeout_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "processing.stale_after_secs ({}) must exceed processing.timeout_secs ({})",
                processing.stale_after_secs, processing.timeout_secs
            ),
        });
    }
    if processing.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "processing.sweep_interval_secs must be positive".to_string(),
        });
    }

    let retry = &config.retry;
    if retry.min_backoff_ms > retry.max_backoff_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "retry.min_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                retry.min_backoff_ms, retry.max_backoff_ms
            ),
        });
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ConfigError::Validation {
            message: format!("retry.multiplier must be at least 1, got {}", retry.multiplier),
        });
    }

    if config.poller.interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "poller.interval_ms must be positive".to_string(),
        });
    }

    if let Some(provider) = &config.transcription {
        parse_endpoint(&provider.endpoint)?;
    }
    if let Some(export) = &config.export {
        parse_endpoint(&export.endpoint)?;
    }

    Ok(())
}

/// Reads a secret from the named environment variable. Surrounding
/// whitespace is trimmed; an empty value counts as missing.
pub fn resolve_secret(env_var: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value.trim())),
        _ => Err(ConfigError::MissingSecret(env_var.to_string())),
    }
}
