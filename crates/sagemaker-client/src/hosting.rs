use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sagemaker::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sagemaker::types::{
    AsyncInferenceClientConfig, AsyncInferenceConfig, AsyncInferenceNotificationConfig,
    AsyncInferenceOutputConfig, ContainerDefinition, ProductionVariant,
    ProductionVariantInstanceType, Tag,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::VARIANT_NAME;

/// Framework pin for the inference container. The hosting runtime loads the
/// archive produced by the packager, so both sides must agree on this.
pub const FRAMEWORK_VERSION: &str = "1.11.0";
pub const PYTHON_VERSION: &str = "py38";

/// Account that publishes the PyTorch deep learning containers.
const DLC_ACCOUNT: &str = "763104351884";

/// Request timeout override for the model server. Async inference jobs can
/// run far past the 60s server default.
pub const MODEL_SERVER_TIMEOUT_SECS: &str = "3600";

pub const INITIAL_INSTANCE_COUNT: i32 = 1;

/// Backpressure cap: one instance never runs more than this many async
/// invocations at once.
pub const MAX_CONCURRENT_INVOCATIONS_PER_INSTANCE: i32 = 4;

pub const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum HostingError {
    #[error("SageMaker {operation} failed: {message}")]
    RequestFailed {
        operation: &'static str,
        message: String,
    },

    #[error("Endpoint {endpoint_name} entered Failed state: {reason}")]
    EndpointFailed {
        endpoint_name: String,
        reason: String,
    },

    #[error("Invalid {operation} request: {message}")]
    InvalidRequest {
        operation: &'static str,
        message: String,
    },
}

/// Model descriptor: container image, archive location, role, environment.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub model_name: String,
    pub image_uri: String,
    pub model_data_url: String,
    pub execution_role_arn: String,
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AsyncEndpointSettings {
    pub output_path: String,
    pub max_concurrent_invocations_per_instance: i32,
    pub success_topic_arn: Option<String>,
    pub error_topic_arn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EndpointConfigSpec {
    pub config_name: String,
    pub model_name: String,
    pub instance_type: String,
    pub initial_instance_count: i32,
    pub async_inference: AsyncEndpointSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointState {
    Creating,
    Updating,
    InService,
    Failed { reason: String },
    Other(String),
}

#[async_trait]
pub trait ModelHosting: Send + Sync {
    async fn model_exists(&self, model_name: &str) -> Result<bool, HostingError>;
    async fn delete_model(&self, model_name: &str) -> Result<(), HostingError>;
    async fn create_model(&self, spec: &ModelSpec) -> Result<(), HostingError>;
    async fn endpoint_config_exists(&self, config_name: &str) -> Result<bool, HostingError>;
    async fn delete_endpoint_config(&self, config_name: &str) -> Result<(), HostingError>;
    async fn create_endpoint_config(&self, spec: &EndpointConfigSpec) -> Result<(), HostingError>;
    async fn endpoint_exists(&self, endpoint_name: &str) -> Result<bool, HostingError>;
    async fn create_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
        tags: &[ResourceTag],
    ) -> Result<(), HostingError>;
    async fn update_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), HostingError>;
    async fn endpoint_state(&self, endpoint_name: &str) -> Result<EndpointState, HostingError>;
}

/// Poll the endpoint until it reaches a terminal state. No overall deadline:
/// endpoint creation routinely takes several minutes and the operator can
/// interrupt the process.
pub async fn wait_until_in_service(
    hosting: &dyn ModelHosting,
    endpoint_name: &str,
    poll_interval: Duration,
) -> Result<(), HostingError> {
    loop {
        match hosting.endpoint_state(endpoint_name).await? {
            EndpointState::InService => return Ok(()),
            EndpointState::Failed { reason } => {
                return Err(HostingError::EndpointFailed {
                    endpoint_name: endpoint_name.to_string(),
                    reason,
                })
            }
            state => debug!(?state, endpoint_name, "endpoint not in service yet"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Image URI for the pinned PyTorch inference container, cpu/gpu flavor
/// chosen from the instance family.
pub fn pytorch_inference_image(region: &str, instance_type: &str) -> String {
    let device = if is_gpu_instance(instance_type) {
        "gpu"
    } else {
        "cpu"
    };
    format!(
        "{DLC_ACCOUNT}.dkr.ecr.{region}.amazonaws.com/pytorch-inference:{FRAMEWORK_VERSION}-{device}-{PYTHON_VERSION}"
    )
}

fn is_gpu_instance(instance_type: &str) -> bool {
    instance_type.starts_with("ml.p") || instance_type.starts_with("ml.g")
}

pub struct SageMakerHosting {
    client: aws_sdk_sagemaker::Client,
}

impl SageMakerHosting {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sagemaker::Client::new(config),
        }
    }
}

fn request_failed<E>(operation: &'static str, err: SdkError<E>) -> HostingError
where
    E: std::error::Error + Send + Sync + 'static,
{
    HostingError::RequestFailed {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

/// SageMaker reports a missing model/endpoint/config as a ValidationException
/// with a "Could not find ..." message rather than a typed not-found error.
fn is_not_found<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err.code() {
        Some("ResourceNotFound") | Some("ResourceNotFoundException") => true,
        Some("ValidationException") => err
            .message()
            .is_some_and(|m| m.contains("Could not find") || m.contains("not found")),
        _ => false,
    }
}

fn endpoint_state_from(status: Option<&str>, failure_reason: Option<&str>) -> EndpointState {
    match status {
        Some("InService") => EndpointState::InService,
        Some("Creating") => EndpointState::Creating,
        Some("Updating") => EndpointState::Updating,
        Some("Failed") => EndpointState::Failed {
            reason: failure_reason.unwrap_or("no failure reason reported").to_string(),
        },
        other => EndpointState::Other(other.unwrap_or("unknown").to_string()),
    }
}

#[async_trait]
impl ModelHosting for SageMakerHosting {
    async fn model_exists(&self, model_name: &str) -> Result<bool, HostingError> {
        match self.client.describe_model().model_name(model_name).send().await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(request_failed("DescribeModel", err)),
        }
    }

    async fn delete_model(&self, model_name: &str) -> Result<(), HostingError> {
        debug!(model_name, "deleting existing model");
        self.client
            .delete_model()
            .model_name(model_name)
            .send()
            .await
            .map_err(|e| request_failed("DeleteModel", e))?;
        Ok(())
    }

    async fn create_model(&self, spec: &ModelSpec) -> Result<(), HostingError> {
        let mut container = ContainerDefinition::builder()
            .image(&spec.image_uri)
            .model_data_url(&spec.model_data_url);
        for (key, value) in &spec.environment {
            container = container.environment(key, value);
        }

        self.client
            .create_model()
            .model_name(&spec.model_name)
            .primary_container(container.build())
            .execution_role_arn(&spec.execution_role_arn)
            .send()
            .await
            .map_err(|e| request_failed("CreateModel", e))?;
        Ok(())
    }

    async fn endpoint_config_exists(&self, config_name: &str) -> Result<bool, HostingError> {
        match self
            .client
            .describe_endpoint_config()
            .endpoint_config_name(config_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(request_failed("DescribeEndpointConfig", err)),
        }
    }

    async fn delete_endpoint_config(&self, config_name: &str) -> Result<(), HostingError> {
        debug!(config_name, "deleting existing endpoint config");
        self.client
            .delete_endpoint_config()
            .endpoint_config_name(config_name)
            .send()
            .await
            .map_err(|e| request_failed("DeleteEndpointConfig", e))?;
        Ok(())
    }

    async fn create_endpoint_config(&self, spec: &EndpointConfigSpec) -> Result<(), HostingError> {
        let variant = ProductionVariant::builder()
            .variant_name(VARIANT_NAME)
            .model_name(&spec.model_name)
            .initial_instance_count(spec.initial_instance_count)
            .instance_type(ProductionVariantInstanceType::from(
                spec.instance_type.as_str(),
            ))
            .build();

        let settings = &spec.async_inference;
        let mut output = AsyncInferenceOutputConfig::builder().s3_output_path(&settings.output_path);
        if settings.success_topic_arn.is_some() || settings.error_topic_arn.is_some() {
            let mut notification = AsyncInferenceNotificationConfig::builder();
            if let Some(topic) = &settings.success_topic_arn {
                notification = notification.success_topic(topic);
            }
            if let Some(topic) = &settings.error_topic_arn {
                notification = notification.error_topic(topic);
            }
            output = output.notification_config(notification.build());
        }

        let async_config = AsyncInferenceConfig::builder()
            .client_config(
                AsyncInferenceClientConfig::builder()
                    .max_concurrent_invocations_per_instance(
                        settings.max_concurrent_invocations_per_instance,
                    )
                    .build(),
            )
            .output_config(output.build())
            .build();

        self.client
            .create_endpoint_config()
            .endpoint_config_name(&spec.config_name)
            .production_variants(variant)
            .async_inference_config(async_config)
            .send()
            .await
            .map_err(|e| request_failed("CreateEndpointConfig", e))?;
        Ok(())
    }

    async fn endpoint_exists(&self, endpoint_name: &str) -> Result<bool, HostingError> {
        match self
            .client
            .describe_endpoint()
            .endpoint_name(endpoint_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(request_failed("DescribeEndpoint", err)),
        }
    }

    async fn create_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
        tags: &[ResourceTag],
    ) -> Result<(), HostingError> {
        let mut request = self
            .client
            .create_endpoint()
            .endpoint_name(endpoint_name)
            .endpoint_config_name(config_name);
        for tag in tags {
            let tag = Tag::builder()
                .key(&tag.key)
                .value(&tag.value)
                .build();
            request = request.tags(tag);
        }

        request
            .send()
            .await
            .map_err(|e| request_failed("CreateEndpoint", e))?;
        Ok(())
    }

    async fn update_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), HostingError> {
        self.client
            .update_endpoint()
            .endpoint_name(endpoint_name)
            .endpoint_config_name(config_name)
            .send()
            .await
            .map_err(|e| request_failed("UpdateEndpoint", e))?;
        Ok(())
    }

    async fn endpoint_state(&self, endpoint_name: &str) -> Result<EndpointState, HostingError> {
        let response = self
            .client
            .describe_endpoint()
            .endpoint_name(endpoint_name)
            .send()
            .await
            .map_err(|e| request_failed("DescribeEndpoint", e))?;

        Ok(endpoint_state_from(
            response.endpoint_status().map(|s| s.as_str()),
            response.failure_reason(),
        ))
    }
}
