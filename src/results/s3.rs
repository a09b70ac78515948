//! Result summaries in an S3-compatible object store

use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::ResultStore;
use crate::error::{Error, Result};

/// Region sent with every request; path-style stores ignore it
const DEFAULT_REGION: &str = "us-east-1";

/// JSON documents in one bucket of a path-style S3 endpoint (SeaweedFS, MinIO)
#[derive(Debug)]
pub struct S3ResultStore {
    store: AmazonS3,
    bucket: String,
}

impl S3ResultStore {
    /// `endpoint` without a scheme is taken as plain HTTP
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str, bucket: &str) -> Result<Self> {
        if bucket.is_empty() {
            return Err(Error::ConfigError("results bucket must not be empty".to_string()));
        }

        let endpoint = if endpoint.contains("://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", endpoint.trim_end_matches('/'))
        };

        let store = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false)
            .with_region(DEFAULT_REGION)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_bucket_name(bucket)
            .build()?;

        Ok(Self {
            store,
            bucket: bucket.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ResultStore for S3ResultStore {
    #[instrument(skip(self, value), fields(bucket = %self.bucket))]
    async fn put_json(&self, key: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, "application/json".into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&Path::from(key), PutPayload::from(body), opts)
            .await?;
        info!("Stored {}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        let object = match self.store.get(&Path::from(key)).await {
            Ok(object) => object,
            Err(object_store::Error::NotFound { .. }) => {
                debug!("{}/{} does not exist", self.bucket, key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let body = object.bytes().await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }
}
