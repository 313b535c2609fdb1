use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::datalake::ObjectStore;
use crate::ingest::ObjectFetcher;

pub struct S3Client {
    client: aws_sdk_s3::Client,
}

impl S3Client {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }

    pub fn new_with_s3_config(config: aws_sdk_s3::config::Config) -> Self {
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
        }
    }

    /// Fetch a whole object into memory. Audit-log objects are bounded by
    /// the delivery services (CloudTrail caps files well under the lake
    /// buffer size), so buffering the body is fine.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("get object s3://{}/{}", bucket, key))?;

        let bytes = response
            .body
            .collect()
            .await
            .with_context(|| format!("read object body s3://{}/{}", bucket, key))?;

        Ok(bytes.into_bytes().to_vec())
    }
}

#[async_trait]
impl ObjectFetcher for S3Client {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.get_object(bucket, key).await
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("put object s3://{}/{}", bucket, key))?;
        Ok(())
    }
}
