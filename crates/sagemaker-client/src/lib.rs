//! Clients for the managed services behind model deployment: SageMaker
//! hosting, S3 artifact storage, STS identity resolution, and Application
//! Auto Scaling. Each concern is a trait so the deployment sequences can be
//! exercised against fakes; the AWS SDK implementations live alongside.

use aws_config::BehaviorVersion;
use thiserror::Error;

pub mod autoscaling;
pub mod hosting;
pub mod identity;
pub mod storage;

pub use autoscaling::{
    disable_autoscaling, enable_autoscaling, endpoint_resource_id, AwsEndpointScaling,
    BacklogPolicySpec, EndpointScaling, ScalableTargetSpec, ScalingError,
};
pub use hosting::{
    wait_until_in_service, AsyncEndpointSettings, EndpointConfigSpec, EndpointState, HostingError,
    ModelHosting, ModelSpec, ResourceTag, SageMakerHosting,
};
pub use identity::{ExecutionIdentity, IdentityError, StsIdentity};
pub use storage::{default_bucket_name, ArtifactStore, S3ArtifactStore, StorageError};

/// Production variant name used for every deployed endpoint. Application
/// Auto Scaling addresses the endpoint through this variant.
pub const VARIANT_NAME: &str = "AllTraffic";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No AWS region configured. Set AWS_REGION or configure a profile region.")]
    MissingRegion,
}

/// All remote collaborators, built from one shared AWS configuration.
pub struct AwsClients {
    pub region: String,
    pub hosting: SageMakerHosting,
    pub store: S3ArtifactStore,
    pub identity: StsIdentity,
    pub scaling: AwsEndpointScaling,
}

impl AwsClients {
    pub async fn connect() -> Result<Self, ClientError> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .ok_or(ClientError::MissingRegion)?;

        Ok(Self {
            hosting: SageMakerHosting::new(&config),
            store: S3ArtifactStore::new(&config, region.clone()),
            identity: StsIdentity::new(&config),
            scaling: AwsEndpointScaling::new(&config),
            region,
        })
    }
}
