use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sts::error::DisplayErrorContext;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("STS GetCallerIdentity failed: {message}")]
    RequestFailed { message: String },

    #[error("Caller identity response is missing the {field} field")]
    IncompleteIdentity { field: &'static str },

    #[error(
        "Cannot derive an execution role from caller ARN '{arn}'. \
         Pass an explicit role via --role or the execution_role_arn config key."
    )]
    NoRoleInArn { arn: String },
}

#[async_trait]
pub trait ExecutionIdentity: Send + Sync {
    async fn account_id(&self) -> Result<String, IdentityError>;

    /// Resolve the IAM role the hosting service should assume, derived from
    /// the ambient caller identity.
    async fn execution_role_arn(&self) -> Result<String, IdentityError>;
}

/// Map a caller ARN to an execution role ARN. Assumed-role session ARNs are
/// rewritten to the underlying IAM role; plain role ARNs pass through.
pub fn role_arn_from_caller(arn: &str, account_id: &str) -> Result<String, IdentityError> {
    if let Some(rest) = arn.split(":assumed-role/").nth(1) {
        let role_name = rest.split('/').next().unwrap_or(rest);
        return Ok(format!("arn:aws:iam::{account_id}:role/{role_name}"));
    }
    if arn.contains(":role/") {
        return Ok(arn.to_string());
    }
    Err(IdentityError::NoRoleInArn {
        arn: arn.to_string(),
    })
}

pub struct StsIdentity {
    client: aws_sdk_sts::Client,
}

impl StsIdentity {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(config),
        }
    }

    async fn caller_identity(&self) -> Result<(String, String), IdentityError> {
        let response = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| IdentityError::RequestFailed {
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let account = response
            .account()
            .ok_or(IdentityError::IncompleteIdentity { field: "Account" })?
            .to_string();
        let arn = response
            .arn()
            .ok_or(IdentityError::IncompleteIdentity { field: "Arn" })?
            .to_string();

        debug!(%arn, "resolved caller identity");
        Ok((account, arn))
    }
}

#[async_trait]
impl ExecutionIdentity for StsIdentity {
    async fn account_id(&self) -> Result<String, IdentityError> {
        let (account, _) = self.caller_identity().await?;
        Ok(account)
    }

    async fn execution_role_arn(&self) -> Result<String, IdentityError> {
        let (account, arn) = self.caller_identity().await?;
        role_arn_from_caller(&arn, &account)
    }
}
