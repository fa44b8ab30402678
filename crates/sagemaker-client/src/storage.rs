use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 {operation} failed: {message}")]
    RequestFailed {
        operation: &'static str,
        message: String,
    },

    #[error("Failed to read archive '{path}': {message}")]
    ArchiveUnreadable { path: String, message: String },
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Upload the archive and return its `s3://` URL.
    async fn upload_archive(
        &self,
        bucket: &str,
        key: &str,
        archive: &Path,
    ) -> Result<String, StorageError>;
}

/// Session default bucket, the same convention the SageMaker SDKs use.
pub fn default_bucket_name(region: &str, account_id: &str) -> String {
    format!("sagemaker-{region}-{account_id}")
}

pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    region: String,
}

impl S3ArtifactStore {
    pub fn new(config: &SdkConfig, region: String) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            region,
        }
    }
}

fn request_failed<E>(operation: &'static str, err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::RequestFailed {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if !service_err.is_not_found() {
                    return Err(StorageError::RequestFailed {
                        operation: "HeadBucket",
                        message: service_err.to_string(),
                    });
                }
            }
        }

        debug!(bucket, "default bucket missing, creating it");
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| request_failed("CreateBucket", e))?;
        Ok(())
    }

    async fn upload_archive(
        &self,
        bucket: &str,
        key: &str,
        archive: &Path,
    ) -> Result<String, StorageError> {
        let body = ByteStream::from_path(archive)
            .await
            .map_err(|e| StorageError::ArchiveUnreadable {
                path: archive.to_string_lossy().to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| request_failed("PutObject", e))?;

        Ok(format!("s3://{bucket}/{key}"))
    }
}
