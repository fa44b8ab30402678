use jsonschema::{Draft, JSONSchema};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const CONFIG_SCHEMA: &str = include_str!("../schema/deployment-config.v1.json");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed: {}", format_errors(errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("JSON parsing failed: {message}")]
    JsonParsingFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Model weights file not found: {path}")]
    ModelFileNotFound { path: String },

    #[error("Inference code directory not found: {path}")]
    CodeDirNotFound { path: String },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// One-shot deployment configuration, read from a flat JSON file.
///
/// The metadata fields (`model`, `version`, `task`, `source_code_url`,
/// `filename_schema`) are attached to the endpoint as tags only.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub code_path: PathBuf,
    pub pytorch_model_file: PathBuf,
    pub zipped_model_path: PathBuf,
    pub endpoint_name: String,
    pub entry_point: String,
    pub bucket_prefix: String,
    pub instance_type: String,
    pub model: String,
    pub version: String,
    pub task: String,
    pub source_code_url: String,
    pub filename_schema: String,
    pub success_topic_arn: Option<String>,
    pub error_topic_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub s3_bucket: Option<String>,
}

/// Load a deployment config, validating it against the embedded schema and
/// checking that both local inputs (weights file, code directory) exist.
/// Every failure here happens before any remote call is made.
pub fn load_deployment_config(path: &Path) -> Result<DeploymentConfig, ConfigError> {
    debug!("Loading deployment config from: {:?}", path);

    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound {
            path: path.to_string_lossy().to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        message: format!("Failed to read config file: {}", e),
    })?;

    let config_value: Value =
        serde_json::from_str(&content).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })?;

    validate_config_value(&config_value)?;

    let config: DeploymentConfig =
        serde_json::from_value(config_value).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })?;

    if !config.pytorch_model_file.is_file() {
        return Err(ConfigError::ModelFileNotFound {
            path: config.pytorch_model_file.to_string_lossy().to_string(),
        });
    }

    if !config.code_path.is_dir() {
        return Err(ConfigError::CodeDirNotFound {
            path: config.code_path.to_string_lossy().to_string(),
        });
    }

    Ok(config)
}

/// Validate a raw config value against the deployment-config schema.
pub fn validate_config_value(config: &Value) -> Result<(), ConfigError> {
    let schema = compiled_schema()?;
    let validation_result = schema.validate(config);

    if let Err(errors) = validation_result {
        let validation_errors: Vec<ValidationError> = errors
            .map(|error| ValidationError {
                json_pointer: error.instance_path.to_string(),
                message: error.to_string(),
                schema_path: error.schema_path.to_string(),
            })
            .collect();

        return Err(ConfigError::ValidationFailed {
            errors: validation_errors,
        });
    }

    Ok(())
}

fn compiled_schema() -> Result<JSONSchema, ConfigError> {
    let schema_value: Value =
        serde_json::from_str(CONFIG_SCHEMA).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })?;

    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .map_err(|e| ConfigError::SchemaCompilationFailed {
            message: e.to_string(),
        })
}
