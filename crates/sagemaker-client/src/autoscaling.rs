use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_applicationautoscaling::error::{DisplayErrorContext, SdkError};
use aws_sdk_applicationautoscaling::types::{
    CustomizedMetricSpecification, MetricDimension, MetricStatistic, PolicyType,
    ScalableDimension, ServiceNamespace, TargetTrackingScalingPolicyConfiguration,
};
use thiserror::Error;
use tracing::debug;

use crate::VARIANT_NAME;

pub const SERVICE_NAMESPACE: &str = "sagemaker";
pub const SCALABLE_DIMENSION: &str = "sagemaker:variant:DesiredInstanceCount";
pub const POLICY_NAME: &str = "Invocations-ScalingPolicy";
pub const POLICY_TYPE: &str = "TargetTrackingScaling";

/// Queue-depth metric emitted for async endpoints; the scaling signal.
pub const BACKLOG_METRIC_NAME: &str = "ApproximateBacklogSize";
pub const BACKLOG_METRIC_NAMESPACE: &str = "AWS/SageMaker";

/// Capacity floor of zero: an async endpoint may drain to no instances when
/// idle. Only safe because requests queue instead of failing.
pub const MIN_CAPACITY: i32 = 0;
pub const MAX_CAPACITY: i32 = 5;

pub const TARGET_BACKLOG_PER_INSTANCE: f64 = 0.9;

/// Asymmetric cooldowns: scale-out reacts twice as fast as scale-in so load
/// spikes are absorbed while drain-down does not flap.
pub const SCALE_IN_COOLDOWN_SECS: i32 = 600;
pub const SCALE_OUT_COOLDOWN_SECS: i32 = 300;

#[derive(Error, Debug)]
pub enum ScalingError {
    #[error("Application Auto Scaling {operation} failed: {message}")]
    RequestFailed {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid {operation} request: {message}")]
    InvalidRequest {
        operation: &'static str,
        message: String,
    },
}

/// Resource id Application Auto Scaling uses to address the endpoint.
pub fn endpoint_resource_id(endpoint_name: &str) -> String {
    format!("endpoint/{endpoint_name}/variant/{VARIANT_NAME}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalableTargetSpec {
    pub resource_id: String,
    pub min_capacity: i32,
    pub max_capacity: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacklogPolicySpec {
    pub policy_name: String,
    pub resource_id: String,
    pub endpoint_name: String,
    pub target_value: f64,
    pub scale_in_cooldown_secs: i32,
    pub scale_out_cooldown_secs: i32,
}

#[async_trait]
pub trait EndpointScaling: Send + Sync {
    async fn register_scalable_target(&self, spec: &ScalableTargetSpec)
        -> Result<(), ScalingError>;
    async fn put_backlog_tracking_policy(
        &self,
        spec: &BacklogPolicySpec,
    ) -> Result<(), ScalingError>;
    async fn deregister_scalable_target(&self, resource_id: &str) -> Result<(), ScalingError>;
}

/// Register the endpoint as a scalable target with bounds [0, 5], then attach
/// a target-tracking policy on the backlog-size metric.
pub async fn enable_autoscaling(
    scaling: &dyn EndpointScaling,
    endpoint_name: &str,
) -> Result<(), ScalingError> {
    let resource_id = endpoint_resource_id(endpoint_name);

    scaling
        .register_scalable_target(&ScalableTargetSpec {
            resource_id: resource_id.clone(),
            min_capacity: MIN_CAPACITY,
            max_capacity: MAX_CAPACITY,
        })
        .await?;

    scaling
        .put_backlog_tracking_policy(&BacklogPolicySpec {
            policy_name: POLICY_NAME.to_string(),
            resource_id,
            endpoint_name: endpoint_name.to_string(),
            target_value: TARGET_BACKLOG_PER_INSTANCE,
            scale_in_cooldown_secs: SCALE_IN_COOLDOWN_SECS,
            scale_out_cooldown_secs: SCALE_OUT_COOLDOWN_SECS,
        })
        .await
}

/// Deregister the scalable target. Attached policies are invalidated by the
/// service; no separate policy deletion is issued.
pub async fn disable_autoscaling(
    scaling: &dyn EndpointScaling,
    endpoint_name: &str,
) -> Result<(), ScalingError> {
    scaling
        .deregister_scalable_target(&endpoint_resource_id(endpoint_name))
        .await
}

pub struct AwsEndpointScaling {
    client: aws_sdk_applicationautoscaling::Client,
}

impl AwsEndpointScaling {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_applicationautoscaling::Client::new(config),
        }
    }
}

fn request_failed<E>(operation: &'static str, err: SdkError<E>) -> ScalingError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ScalingError::RequestFailed {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[async_trait]
impl EndpointScaling for AwsEndpointScaling {
    async fn register_scalable_target(
        &self,
        spec: &ScalableTargetSpec,
    ) -> Result<(), ScalingError> {
        debug!(resource_id = %spec.resource_id, "registering scalable target");
        self.client
            .register_scalable_target()
            .service_namespace(ServiceNamespace::from(SERVICE_NAMESPACE))
            .resource_id(&spec.resource_id)
            .scalable_dimension(ScalableDimension::from(SCALABLE_DIMENSION))
            .min_capacity(spec.min_capacity)
            .max_capacity(spec.max_capacity)
            .send()
            .await
            .map_err(|e| request_failed("RegisterScalableTarget", e))?;
        Ok(())
    }

    async fn put_backlog_tracking_policy(
        &self,
        spec: &BacklogPolicySpec,
    ) -> Result<(), ScalingError> {
        let dimension = MetricDimension::builder()
            .name("EndpointName")
            .value(&spec.endpoint_name)
            .build()
            .map_err(|e| ScalingError::InvalidRequest {
                operation: "PutScalingPolicy",
                message: e.to_string(),
            })?;

        let metric = CustomizedMetricSpecification::builder()
            .metric_name(BACKLOG_METRIC_NAME)
            .namespace(BACKLOG_METRIC_NAMESPACE)
            .dimensions(dimension)
            .statistic(MetricStatistic::from("Average"))
            .build();

        let tracking = TargetTrackingScalingPolicyConfiguration::builder()
            .target_value(spec.target_value)
            .customized_metric_specification(metric)
            .scale_in_cooldown(spec.scale_in_cooldown_secs)
            .scale_out_cooldown(spec.scale_out_cooldown_secs)
            .build()
            .map_err(|e| ScalingError::InvalidRequest {
                operation: "PutScalingPolicy",
                message: e.to_string(),
            })?;

        debug!(resource_id = %spec.resource_id, "putting target-tracking policy");
        self.client
            .put_scaling_policy()
            .policy_name(&spec.policy_name)
            .service_namespace(ServiceNamespace::from(SERVICE_NAMESPACE))
            .resource_id(&spec.resource_id)
            .scalable_dimension(ScalableDimension::from(SCALABLE_DIMENSION))
            .policy_type(PolicyType::from(POLICY_TYPE))
            .target_tracking_scaling_policy_configuration(tracking)
            .send()
            .await
            .map_err(|e| request_failed("PutScalingPolicy", e))?;
        Ok(())
    }

    async fn deregister_scalable_target(&self, resource_id: &str) -> Result<(), ScalingError> {
        debug!(resource_id, "deregistering scalable target");
        self.client
            .deregister_scalable_target()
            .service_namespace(ServiceNamespace::from(SERVICE_NAMESPACE))
            .resource_id(resource_id)
            .scalable_dimension(ScalableDimension::from(SCALABLE_DIMENSION))
            .send()
            .await
            .map_err(|e| request_failed("DeregisterScalableTarget", e))?;
        Ok(())
    }
}
