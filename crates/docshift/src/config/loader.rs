use std::path::{Path, PathBuf};

use crate::config::schema::{Config, Environment, LogFormat};
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

/// Applies `DOCSHIFT_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var("DOCSHIFT_ENV") {
        config.environment =
            Environment::parse(&value).ok_or_else(|| ConfigError::InvalidOverride {
                name: "DOCSHIFT_ENV",
                value: value.clone(),
                reason: "expected 'development' or 'production'".to_string(),
            })?;
    }

    if let Ok(value) = std::env::var("DOCSHIFT_HOST") {
        config.server.host = value;
    }

    if let Ok(value) = std::env::var("DOCSHIFT_PORT") {
        config.server.port = value
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidOverride {
                name: "DOCSHIFT_PORT",
                value: value.clone(),
                reason: e.to_string(),
            })?;
    }

    if let Ok(value) = std::env::var("DOCSHIFT_STORAGE_ROOT") {
        config.storage.root = PathBuf::from(value);
    }

    if let Ok(value) = std::env::var("DOCSHIFT_DATABASE_PATH") {
        config.database.path = PathBuf::from(value);
    }

    if let Ok(value) = std::env::var("DOCSHIFT_LOG_FORMAT") {
        config.logging.format = match value.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => {
                return Err(ConfigError::InvalidOverride {
                    name: "DOCSHIFT_LOG_FORMAT",
                    value,
                    reason: "expected 'json' or 'pretty'".to_string(),
                })
            }
        };
    }

    validate_config(config)
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

    if config.storage.root.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "storage.root must not be empty".to_string(),
        });
    }

    if config.database.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "database.path must not be empty".to_string(),
        });
    }

    let limits = &config.limits;
    if limits.spreadsheet_max_bytes == 0 || limits.document_max_bytes == 0 || limits.pdf_max_bytes == 0
    {
        return Err(ConfigError::Validation {
            message: "upload size limits must be greater than zero".to_string(),
        });
    }

    if limits.merge_max_files < 2 {
        return Err(ConfigError::Validation {
            message: "limits.merge_max_files must allow at least 2 files".to_string(),
        });
    }

    Ok(())
}
