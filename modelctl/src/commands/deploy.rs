use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use deploy_config::DeploymentConfig;
use sagemaker_client::hosting::{
    self, AsyncEndpointSettings, EndpointConfigSpec, ModelHosting, ModelSpec, ResourceTag,
};
use sagemaker_client::identity::ExecutionIdentity;
use sagemaker_client::storage::{self, ArtifactStore};
use sagemaker_client::AwsClients;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::archive;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Path to the deployment config JSON
    #[arg(value_name = "MODEL_CONFIG")]
    pub model_config: String,
    /// Execution role ARN; skips caller-identity resolution
    #[arg(long = "role", env = "MODELCTL_EXECUTION_ROLE", value_name = "ARN")]
    pub execution_role: Option<String>,
    /// Artifact bucket; skips default-bucket resolution
    #[arg(long = "bucket", env = "MODELCTL_S3_BUCKET", value_name = "NAME")]
    pub bucket: Option<String>,
}

pub async fn run(args: DeployArgs) -> Result<()> {
    let config = deploy_config::load_deployment_config(Path::new(&args.model_config))
        .with_context(|| format!("Failed to load deployment config '{}'", args.model_config))?;

    let aws = AwsClients::connect().await?;
    let services = Services {
        hosting: &aws.hosting,
        store: &aws.store,
        identity: &aws.identity,
        region: &aws.region,
        poll_interval: hosting::ENDPOINT_POLL_INTERVAL,
    };

    deploy_model(&config, args.execution_role, args.bucket, &services).await
}

pub(crate) struct Services<'a> {
    pub hosting: &'a dyn ModelHosting,
    pub store: &'a dyn ArtifactStore,
    pub identity: &'a dyn ExecutionIdentity,
    pub region: &'a str,
    pub poll_interval: Duration,
}

/// The deploy sequence: resolve the role, pack the archive, upload it, then
/// create the model, endpoint config, and endpoint, and wait for the
/// endpoint to come in service. Strictly ordered; nothing is retried and a
/// mid-sequence failure leaves the archive on disk.
pub(crate) async fn deploy_model(
    config: &DeploymentConfig,
    role_override: Option<String>,
    bucket_override: Option<String>,
    services: &Services<'_>,
) -> Result<()> {
    let execution_role = match role_override.or_else(|| config.execution_role_arn.clone()) {
        Some(role) => role,
        None => services.identity.execution_role_arn().await?,
    };
    println!("Using Role: {execution_role}");

    println!(
        "Creating {} from {} and {}.",
        config.zipped_model_path.display(),
        config.pytorch_model_file.display(),
        config.code_path.display()
    );
    archive::build_model_archive(
        &config.pytorch_model_file,
        &config.code_path,
        &config.zipped_model_path,
    )?;

    let bucket = match bucket_override.or_else(|| config.s3_bucket.clone()) {
        Some(bucket) => bucket,
        None => {
            let account = services.identity.account_id().await?;
            let bucket = storage::default_bucket_name(services.region, &account);
            services.store.ensure_bucket(&bucket).await?;
            bucket
        }
    };

    let key = format!("{}/model/model.tar.gz", config.bucket_prefix);
    println!(
        "Uploading {} to s3://{}/{}",
        config.zipped_model_path.display(),
        bucket,
        key
    );
    let model_data_url = services
        .store
        .upload_archive(&bucket, &key, &config.zipped_model_path)
        .await?;
    debug!(%model_data_url, "uploaded model archive");

    println!("Creating model {}.", config.endpoint_name);
    if services.hosting.model_exists(&config.endpoint_name).await? {
        services.hosting.delete_model(&config.endpoint_name).await?;
    }
    services
        .hosting
        .create_model(&ModelSpec {
            model_name: config.endpoint_name.clone(),
            image_uri: hosting::pytorch_inference_image(services.region, &config.instance_type),
            model_data_url,
            execution_role_arn: execution_role.clone(),
            environment: model_environment(config, services.region),
        })
        .await?;

    let endpoint_exists = services
        .hosting
        .endpoint_exists(&config.endpoint_name)
        .await?;
    // UpdateEndpoint rejects the config the endpoint is already running, so
    // redeploys get a versioned config name.
    let config_name = if endpoint_exists {
        format!(
            "{}-{}",
            config.endpoint_name,
            Utc::now().format("%Y%m%d%H%M%S")
        )
    } else {
        config.endpoint_name.clone()
    };
    if services.hosting.endpoint_config_exists(&config_name).await? {
        services.hosting.delete_endpoint_config(&config_name).await?;
    }
    services
        .hosting
        .create_endpoint_config(&EndpointConfigSpec {
            config_name: config_name.clone(),
            model_name: config.endpoint_name.clone(),
            instance_type: config.instance_type.clone(),
            initial_instance_count: hosting::INITIAL_INSTANCE_COUNT,
            async_inference: AsyncEndpointSettings {
                output_path: format!("s3://{}/{}/output", bucket, config.bucket_prefix),
                max_concurrent_invocations_per_instance:
                    hosting::MAX_CONCURRENT_INVOCATIONS_PER_INSTANCE,
                success_topic_arn: config.success_topic_arn.clone(),
                error_topic_arn: config.error_topic_arn.clone(),
            },
        })
        .await?;

    println!("Deploying model {}", config.endpoint_name);
    println!("    task: {}", config.task);
    println!("    model: {}", config.model);
    println!("    version: {}", config.version);
    println!("    instance_type: {}", config.instance_type);

    if endpoint_exists {
        services
            .hosting
            .update_endpoint(&config.endpoint_name, &config_name)
            .await?;
    } else {
        let tags = endpoint_tags(config, &execution_role);
        services
            .hosting
            .create_endpoint(&config.endpoint_name, &config_name, &tags)
            .await?;
    }

    hosting::wait_until_in_service(services.hosting, &config.endpoint_name, services.poll_interval)
        .await?;
    println!("Done");
    Ok(())
}

fn model_environment(config: &DeploymentConfig, region: &str) -> HashMap<String, String> {
    HashMap::from([
        ("SAGEMAKER_PROGRAM".to_string(), config.entry_point.clone()),
        (
            "SAGEMAKER_SUBMIT_DIRECTORY".to_string(),
            "/opt/ml/model/code".to_string(),
        ),
        ("SAGEMAKER_CONTAINER_LOG_LEVEL".to_string(), "10".to_string()),
        ("SAGEMAKER_REGION".to_string(), region.to_string()),
        (
            "SAGEMAKER_MODEL_SERVER_TIMEOUT".to_string(),
            hosting::MODEL_SERVER_TIMEOUT_SECS.to_string(),
        ),
    ])
}

fn endpoint_tags(config: &DeploymentConfig, execution_role: &str) -> Vec<ResourceTag> {
    let tag = |key: &str, value: &str| ResourceTag {
        key: key.to_string(),
        value: value.to_string(),
    };
    vec![
        tag("Role", execution_role),
        tag("Model", &config.model),
        tag("SourceCodeURL", &config.source_code_url),
        tag("Task", &config.task),
        tag("Version", &config.version),
        tag("FilenameSchema", &config.filename_schema),
    ]
}
