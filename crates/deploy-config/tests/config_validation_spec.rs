use deploy_config::{load_deployment_config, ConfigError};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_inputs(dir: &Path) -> (String, String) {
    let code_dir = dir.join("src");
    fs::create_dir(&code_dir).unwrap();
    fs::write(code_dir.join("inference.py"), "def model_fn(d): ...\n").unwrap();

    let weights = dir.join("weights-v3.pth");
    fs::write(&weights, b"not a real tensor").unwrap();

    (
        code_dir.to_string_lossy().to_string(),
        weights.to_string_lossy().to_string(),
    )
}

fn full_config(code_path: &str, weights: &str, archive: &str) -> serde_json::Value {
    json!({
        "code_path": code_path,
        "pytorch_model_file": weights,
        "zipped_model_path": archive,
        "endpoint_name": "summarizer-prod",
        "entry_point": "inference.py",
        "bucket_prefix": "summarizer",
        "instance_type": "ml.g4dn.xlarge",
        "model": "bart-large",
        "version": "3",
        "task": "summarization",
        "source_code_url": "https://example.com/repo",
        "filename_schema": "{date}.json"
    })
}

#[test]
fn loads_valid_config() {
    let dir = TempDir::new().unwrap();
    let (code_path, weights) = write_inputs(dir.path());
    let archive = dir.path().join("model.tar.gz").to_string_lossy().to_string();

    let config_path = dir.path().join("config.json");
    fs::write(
        &config_path,
        full_config(&code_path, &weights, &archive).to_string(),
    )
    .unwrap();

    let config = load_deployment_config(&config_path).unwrap();
    assert_eq!(config.endpoint_name, "summarizer-prod");
    assert_eq!(config.entry_point, "inference.py");
    assert_eq!(config.instance_type, "ml.g4dn.xlarge");
    assert!(config.success_topic_arn.is_none());
    assert!(config.execution_role_arn.is_none());
}

#[test]
fn loads_optional_notification_topics() {
    let dir = TempDir::new().unwrap();
    let (code_path, weights) = write_inputs(dir.path());
    let archive = dir.path().join("model.tar.gz").to_string_lossy().to_string();

    let mut value = full_config(&code_path, &weights, &archive);
    value["success_topic_arn"] = json!("arn:aws:sns:us-east-1:111122223333:ok");
    value["error_topic_arn"] = json!("arn:aws:sns:us-east-1:111122223333:err");

    let config_path = dir.path().join("config.json");
    fs::write(&config_path, value.to_string()).unwrap();

    let config = load_deployment_config(&config_path).unwrap();
    assert_eq!(
        config.success_topic_arn.as_deref(),
        Some("arn:aws:sns:us-east-1:111122223333:ok")
    );
    assert_eq!(
        config.error_topic_arn.as_deref(),
        Some("arn:aws:sns:us-east-1:111122223333:err")
    );
}

#[test]
fn fails_on_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let err = load_deployment_config(&dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigFileNotFound { .. }));
}

#[test]
fn fails_on_malformed_json() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, "{not json").unwrap();

    let err = load_deployment_config(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::JsonParsingFailed { .. }));
}

#[test]
fn fails_on_missing_key_with_field_pointer() {
    let dir = TempDir::new().unwrap();
    let (code_path, weights) = write_inputs(dir.path());
    let archive = dir.path().join("model.tar.gz").to_string_lossy().to_string();

    let mut value = full_config(&code_path, &weights, &archive);
    value.as_object_mut().unwrap().remove("bucket_prefix");

    let config_path = dir.path().join("config.json");
    fs::write(&config_path, value.to_string()).unwrap();

    let err = load_deployment_config(&config_path).unwrap_err();
    match err {
        ConfigError::ValidationFailed { errors } => {
            assert!(errors.iter().any(|e| e.message.contains("bucket_prefix")));
        }
        other => panic!("expected ValidationFailed, got {:?}", other),
    }
    assert!(format!("{}", load_deployment_config(&config_path).unwrap_err())
        .contains("bucket_prefix"));
}

#[test]
fn fails_when_weights_file_is_missing() {
    let dir = TempDir::new().unwrap();
    let (code_path, _) = write_inputs(dir.path());
    let archive = dir.path().join("model.tar.gz").to_string_lossy().to_string();
    let missing = dir.path().join("gone.pth").to_string_lossy().to_string();

    let config_path = dir.path().join("config.json");
    fs::write(
        &config_path,
        full_config(&code_path, &missing, &archive).to_string(),
    )
    .unwrap();

    let err = load_deployment_config(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::ModelFileNotFound { .. }));
}

#[test]
fn fails_when_code_dir_is_missing() {
    let dir = TempDir::new().unwrap();
    let (_, weights) = write_inputs(dir.path());
    let archive = dir.path().join("model.tar.gz").to_string_lossy().to_string();
    let missing = dir.path().join("no-code").to_string_lossy().to_string();

    let config_path = dir.path().join("config.json");
    fs::write(
        &config_path,
        full_config(&missing, &weights, &archive).to_string(),
    )
    .unwrap();

    let err = load_deployment_config(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::CodeDirNotFound { .. }));
}
