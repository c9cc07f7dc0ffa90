//! Thin client over the remote object-storage protocol.
//!
//! The trait mirrors the backend's own vocabulary (buckets, keys, tags,
//! lifecycle policy, paginated listing) and does not interpret failures:
//! backend error codes are surfaced on [`ClientError`] for the orchestrator
//! to classify. The one exception is object-level not-found, which `get`
//! reports as `None`: "I looked and it's not there" is a value, not an
//! error.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, CompletedMultipartUpload,
    CompletedPart, CreateBucketConfiguration, ExpirationStatus, LifecycleExpiration,
    LifecycleRuleFilter, Tagging, Transition as S3Transition, TransitionStorageClass,
};
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::BlobStoreConfig;
use crate::models::lifecycle::{LifecycleRule, TagFilter, Transition};

/// Backend error code for "bucket still holds objects".
pub const CODE_BUCKET_NOT_EMPTY: &str = "BucketNotEmpty";

/// Byte stream handed out for object reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One object tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One page of a key listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Keys in backend listing order (lexicographic).
    pub keys: Vec<String>,
    /// Continuation token for the next page, if the listing is truncated.
    pub next_token: Option<String>,
}

/// Uniform error surface over backend client failures.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct ClientError {
    /// Backend call that failed, with its target where relevant.
    pub operation: String,
    /// Machine-readable backend error code, when the backend supplied one.
    pub code: Option<String>,
    pub message: String,
}

impl ClientError {
    pub fn new(
        operation: impl Into<String>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Classification point for store teardown: the backend refused to
    /// delete a non-empty bucket. A backend with a different error taxonomy
    /// normalizes its code here, in its adapter.
    pub fn is_bucket_not_empty(&self) -> bool {
        self.is_code(CODE_BUCKET_NOT_EMPTY)
    }
}

/// Operations the blob store needs from the backend.
///
/// One production implementation ([`S3ObjectClient`]) plus hand-written
/// doubles in tests. Writability semantics are the caller's responsibility:
/// `bucket_exists` distinguishes "confirmed absent" (`Ok(false)`) from
/// "could not ask" (`Err`), and the caller decides what each means.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    /// The bucket's lifecycle rules; `None` when no policy is configured.
    async fn get_lifecycle(&self, bucket: &str) -> Result<Option<Vec<LifecycleRule>>, ClientError>;

    /// Replace the bucket's lifecycle policy wholesale.
    async fn put_lifecycle(&self, bucket: &str, rules: &[LifecycleRule])
    -> Result<(), ClientError>;

    /// Open an object for reading; `None` when the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str)
    -> Result<Option<ByteStream>, ClientError>;

    /// Single-shot atomic write of a small object.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ClientError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;

    /// Replace the object's tag set; an empty set clears all tags.
    async fn tag_object(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<(), ClientError>;

    /// One page of keys under `prefix`, resuming from `token`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, ClientError>;

    /// Start a multipart upload, returning its upload id.
    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, ClientError>;

    /// Upload one part, returning its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ClientError>;

    /// Complete a multipart upload; `etags` ordered by part number from 1.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<(), ClientError>;

    /// Abort a multipart upload, discarding uploaded parts backend-side.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError>;
}

/// Production [`ObjectClient`] over the AWS S3 SDK.
#[derive(Clone)]
pub struct S3ObjectClient {
    client: aws_sdk_s3::Client,
    region: Option<String>,
}

impl S3ObjectClient {
    /// Build a client from the store configuration.
    ///
    /// `force_path_style` keeps S3-compatible endpoints (MinIO, LocalStack)
    /// working; region, endpoint, and credentials profile are optional
    /// overrides on top of the default provider chain.
    pub async fn connect(config: &BlobStoreConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(profile) = &config.credentials {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            region: config.region.clone(),
        }
    }
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(wrap(format!("head_bucket {bucket}"), err)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 is the one region that must not be sent as a constraint.
        if let Some(region) = &self.region
            && region != "us-east-1"
        {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|err| wrap(format!("create_bucket {bucket}"), err))?;
        debug!(bucket, "created bucket");
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| wrap(format!("delete_bucket {bucket}"), err))?;
        Ok(())
    }

    async fn get_lifecycle(&self, bucket: &str) -> Result<Option<Vec<LifecycleRule>>, ClientError> {
        match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(resp.rules().iter().map(rule_from_s3).collect())),
            Err(err) if err.code() == Some("NoSuchLifecycleConfiguration") => Ok(None),
            Err(err) => Err(wrap(format!("get_lifecycle {bucket}"), err)),
        }
    }

    async fn put_lifecycle(
        &self,
        bucket: &str,
        rules: &[LifecycleRule],
    ) -> Result<(), ClientError> {
        let operation = format!("put_lifecycle {bucket}");
        let rules = rules
            .iter()
            .map(|rule| rule_to_s3(&operation, rule))
            .collect::<Result<Vec<_>, _>>()?;
        let configuration = BucketLifecycleConfiguration::builder()
            .set_rules(Some(rules))
            .build()
            .map_err(|err| build_error(&operation, err))?;
        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(|err| wrap(operation, err))?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ByteStream>, ClientError> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => {
                let reader = resp.body.into_async_read();
                Ok(Some(Box::pin(ReaderStream::new(reader))))
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => Ok(None),
            Err(err) => Err(wrap(format!("get_object {bucket}/{key}"), err)),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ClientError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .map_err(|err| wrap(format!("put_object {bucket}/{key}"), err))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| wrap(format!("delete_object {bucket}/{key}"), err))?;
        Ok(())
    }

    async fn tag_object(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<(), ClientError> {
        let operation = format!("tag_object {bucket}/{key}");
        let tag_set = tags
            .iter()
            .map(|tag| {
                aws_sdk_s3::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
                    .map_err(|err| build_error(&operation, err))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|err| build_error(&operation, err))?;
        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|err| wrap(operation, err))?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, ClientError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix);
        if let Some(token) = token {
            request = request.continuation_token(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|err| wrap(format!("list_objects {bucket}/{prefix}"), err))?;
        Ok(ObjectPage {
            keys: resp
                .contents()
                .iter()
                .filter_map(|object| object.key().map(String::from))
                .collect(),
            next_token: resp.next_continuation_token().map(String::from),
        })
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, ClientError> {
        let operation = format!("create_multipart {bucket}/{key}");
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| wrap(operation.clone(), err))?;
        let upload_id = resp
            .upload_id()
            .ok_or_else(|| ClientError::new(operation, None, "no upload id in response"))?
            .to_string();
        debug!(bucket, key, upload_id = %upload_id, "created multipart upload");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ClientError> {
        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(body.into())
            .send()
            .await
            .map_err(|err| wrap(format!("upload_part {bucket}/{key}#{part_number}"), err))?;
        Ok(resp.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<(), ClientError> {
        let parts: Vec<CompletedPart> = etags
            .iter()
            .enumerate()
            .map(|(i, etag)| {
                CompletedPart::builder()
                    .e_tag(etag)
                    .part_number((i + 1) as i32)
                    .build()
            })
            .collect();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| wrap(format!("complete_multipart {bucket}/{key}"), err))?;
        debug!(bucket, key, upload_id, "completed multipart upload");
        Ok(())
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| wrap(format!("abort_multipart {bucket}/{key}"), err))?;
        debug!(bucket, key, upload_id, "aborted multipart upload");
        Ok(())
    }
}

/// Fold an SDK error into [`ClientError`], surfacing the backend code
/// untouched for the caller to classify.
fn wrap<E, R>(operation: String, err: SdkError<E, R>) -> ClientError
where
    E: ProvideErrorMetadata,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    ClientError::new(operation, code, message)
}

fn build_error(operation: &str, err: aws_sdk_s3::error::BuildError) -> ClientError {
    ClientError::new(operation, None, err.to_string())
}

fn rule_from_s3(rule: &aws_sdk_s3::types::LifecycleRule) -> LifecycleRule {
    LifecycleRule {
        id: rule.id().unwrap_or_default().to_string(),
        enabled: rule.status() == &ExpirationStatus::Enabled,
        filter: rule.filter().and_then(|f| f.tag()).map(|tag| TagFilter {
            key: tag.key().to_string(),
            value: tag.value().to_string(),
        }),
        expiration_days: rule
            .expiration()
            .and_then(|e| e.days())
            .and_then(|days| u32::try_from(days).ok()),
        transitions: rule
            .transitions()
            .iter()
            .map(|t| Transition {
                days: t.days().and_then(|d| u32::try_from(d).ok()).unwrap_or(0),
                storage_class: t
                    .storage_class()
                    .map(|class| class.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect(),
    }
}

fn rule_to_s3(
    operation: &str,
    rule: &LifecycleRule,
) -> Result<aws_sdk_s3::types::LifecycleRule, ClientError> {
    let mut builder = aws_sdk_s3::types::LifecycleRule::builder()
        .id(&rule.id)
        .status(if rule.enabled {
            ExpirationStatus::Enabled
        } else {
            ExpirationStatus::Disabled
        });
    if let Some(filter) = &rule.filter {
        let tag = aws_sdk_s3::types::Tag::builder()
            .key(&filter.key)
            .value(&filter.value)
            .build()
            .map_err(|err| build_error(operation, err))?;
        builder = builder.filter(LifecycleRuleFilter::builder().tag(tag).build());
    }
    if let Some(days) = rule.expiration_days {
        builder = builder.expiration(LifecycleExpiration::builder().days(days as i32).build());
    }
    for transition in &rule.transitions {
        builder = builder.transitions(
            S3Transition::builder()
                .days(transition.days as i32)
                .storage_class(TransitionStorageClass::from(
                    transition.storage_class.as_str(),
                ))
                .build(),
        );
    }
    builder.build().map_err(|err| build_error(operation, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_code_classification() {
        let err = ClientError::new(
            "delete_bucket my-bucket",
            Some(CODE_BUCKET_NOT_EMPTY.to_string()),
            "bucket is not empty",
        );
        assert!(err.is_bucket_not_empty());
        assert!(err.is_code(CODE_BUCKET_NOT_EMPTY));
        assert!(!err.is_code("NoSuchBucket"));

        let codeless = ClientError::new("head_bucket my-bucket", None, "timed out");
        assert!(!codeless.is_bucket_not_empty());
    }

    #[test]
    fn client_error_display_names_the_operation() {
        let err = ClientError::new("put_object b/k", None, "connection reset");
        assert_eq!(err.to_string(), "put_object b/k failed: connection reset");
    }
}
