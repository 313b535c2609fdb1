mod s3;
mod sqs;

use aws_config::{BehaviorVersion, Region, SdkConfig};

pub use s3::S3Client;
pub use sqs::SqsClient;

/// Load the shared SDK config from the default provider chain (env,
/// profile, instance role) with the region pinned. An `AWS_ENDPOINT_URL`
/// override is honored so tests and local stacks can point everything at
/// one endpoint.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_owned()));

    if let Ok(endpoint_url) = std::env::var("AWS_ENDPOINT_URL") {
        loader = loader.endpoint_url(endpoint_url);
    }

    loader.load().await
}
