use anyhow::{Context, Result};
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::region::Region;
use s3::Bucket;
use tracing::debug;

use crate::config::Config;
use crate::storage::ObjectStore;

/// S3 client wrapper.
#[derive(Clone)]
pub struct S3Client {
    bucket: Box<Bucket>,
}

impl S3Client {
    /// Create a new S3 client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if client initialization fails.
    pub fn new(config: &Config) -> Result<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").context("AWS_ACCESS_KEY_ID not set")?;
        let secret_key =
            std::env::var("AWS_SECRET_ACCESS_KEY").context("AWS_SECRET_ACCESS_KEY not set")?;

        let credentials = Credentials::new(Some(&access_key), Some(&secret_key), None, None, None)
            .context("Failed to create S3 credentials")?;

        let region = if let Some(ref endpoint) = config.s3_endpoint {
            Region::Custom {
                region: config.s3_region.clone(),
                endpoint: endpoint.clone(),
            }
        } else {
            config.s3_region.parse().unwrap_or(Region::UsEast1)
        };

        let bucket = Bucket::new(&config.s3_bucket, region, credentials)
            .context("Failed to create S3 bucket")?;

        // Use path-style for custom endpoints (MinIO, R2, etc.)
        let bucket = if config.s3_endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self { bucket })
    }

    /// Get the bucket name
    #[must_use]
    pub fn bucket_name(&self) -> String {
        self.bucket.name().to_string()
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn write(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        debug!(key = %key, content_type = %content_type, size = bytes.len(), "Uploading bytes to S3");

        let response = self
            .bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await
            .context("Failed to upload bytes to S3")?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            anyhow::bail!("S3 upload of {key} failed with status {status}");
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!(key = %key, "Getting S3 object");

        match self.bucket.get_object(key).await {
            Ok(response) => match response.status_code() {
                200..=299 => Ok(Some(response.bytes().to_vec())),
                404 => Ok(None),
                status => Err(anyhow::anyhow!(
                    "S3 get object {key} failed with status {status}"
                )),
            },
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("S3 get object failed: {e}")),
        }
    }
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.bucket.name())
            .finish()
    }
}
