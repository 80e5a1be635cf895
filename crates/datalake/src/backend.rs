use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use tracing::info;

use panorama_core::DatalakeSettings;

use crate::error::DatalakeError;

/// Build the S3 object store for the datalake bucket.
///
/// `endpoint_url` switches to path-style addressing against an
/// S3-compatible service (MinIO, localstack).
pub fn s3_store(settings: &DatalakeSettings) -> Result<Arc<dyn ObjectStore>, DatalakeError> {
    let bucket = settings
        .bucket
        .as_deref()
        .ok_or_else(|| DatalakeError::NotConfigured("datalake.bucket not set".into()))?;

    let mut builder = AmazonS3Builder::new().with_region(&settings.aws_region);

    if let Some(ref key) = settings.aws_access_key {
        builder = builder.with_access_key_id(key);
    }
    if let Some(ref secret) = settings.aws_secret_access_key {
        builder = builder.with_secret_access_key(secret);
    }

    match settings.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("https://{}", endpoint)
            };
            builder = builder
                .with_bucket_name(bucket)
                .with_endpoint(&endpoint_url)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(endpoint_url.starts_with("http://"));
        }
        None => {
            builder = builder.with_url(format!("s3://{}", bucket));
        }
    }

    let store = builder.build()?;

    info!(bucket = %bucket, region = %settings.aws_region, "Datalake: S3 object store");
    Ok(Arc::new(store))
}
