//! In-memory object client double shared by the service tests.
//!
//! Records every backend call in order, so tests can assert write ordering
//! and zero-mutation properties, and supports injecting failures per
//! operation/key.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use crate::models::lifecycle::LifecycleRule;
use crate::services::object_client::{ByteStream, ClientError, ObjectClient, ObjectPage, Tag};

#[derive(Default)]
struct State {
    buckets: Vec<String>,
    /// `bucket -> key -> bytes`; BTreeMap keeps listing order lexicographic.
    objects: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    tags: BTreeMap<String, Vec<Tag>>,
    lifecycle: BTreeMap<String, Vec<LifecycleRule>>,
    uploads: BTreeMap<String, MultipartSession>,
    calls: Vec<String>,
    failures: Vec<Failure>,
    upload_counter: usize,
}

struct MultipartSession {
    bucket: String,
    key: String,
    parts: Vec<(i32, Vec<u8>)>,
}

struct Failure {
    operation: &'static str,
    key_contains: String,
    error: ClientError,
}

pub(crate) struct InMemoryObjectClient {
    state: Mutex<State>,
    /// Listing page size; small by default so pagination is exercised.
    pub(crate) page_size: usize,
}

impl InMemoryObjectClient {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 2,
        }
    }

    pub(crate) fn with_bucket(bucket: &str) -> Self {
        let client = Self::new();
        client.state.lock().unwrap().buckets.push(bucket.to_string());
        client
    }

    /// Make `operation` fail whenever its key contains `key_contains`.
    pub(crate) fn fail_when(&self, operation: &'static str, key_contains: &str, error: ClientError) {
        self.state.lock().unwrap().failures.push(Failure {
            operation,
            key_contains: key_contains.to_string(),
            error,
        });
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub(crate) fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    pub(crate) fn insert_object(&self, bucket: &str, key: &str, body: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.to_vec());
    }

    pub(crate) fn tags_of(&self, key: &str) -> Option<Vec<Tag>> {
        self.state.lock().unwrap().tags.get(key).cloned()
    }

    pub(crate) fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn set_lifecycle(&self, bucket: &str, rules: Vec<LifecycleRule>) {
        self.state
            .lock()
            .unwrap()
            .lifecycle
            .insert(bucket.to_string(), rules);
    }

    pub(crate) fn lifecycle_of(&self, bucket: &str) -> Option<Vec<LifecycleRule>> {
        self.state.lock().unwrap().lifecycle.get(bucket).cloned()
    }

    pub(crate) fn bucket_exists_sync(&self, bucket: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .buckets
            .iter()
            .any(|b| b == bucket)
    }

    pub(crate) fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    fn check(&self, operation: &'static str, key: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(if key.is_empty() {
            operation.to_string()
        } else {
            format!("{operation} {key}")
        });
        let failure = state
            .failures
            .iter()
            .find(|f| f.operation == operation && key.contains(&f.key_contains));
        match failure {
            Some(f) => Err(f.error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectClient for InMemoryObjectClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError> {
        self.check("bucket_exists", bucket)?;
        Ok(self.bucket_exists_sync(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        self.check("create_bucket", bucket)?;
        let mut state = self.state.lock().unwrap();
        if !state.buckets.iter().any(|b| b == bucket) {
            state.buckets.push(bucket.to_string());
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        self.check("delete_bucket", bucket)?;
        let mut state = self.state.lock().unwrap();
        state.buckets.retain(|b| b != bucket);
        Ok(())
    }

    async fn get_lifecycle(&self, bucket: &str) -> Result<Option<Vec<LifecycleRule>>, ClientError> {
        self.check("get_lifecycle", bucket)?;
        Ok(self.lifecycle_of(bucket))
    }

    async fn put_lifecycle(
        &self,
        bucket: &str,
        rules: &[LifecycleRule],
    ) -> Result<(), ClientError> {
        self.check("put_lifecycle", bucket)?;
        self.set_lifecycle(bucket, rules.to_vec());
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ByteStream>, ClientError> {
        self.check("get_object", key)?;
        match self.object(bucket, key) {
            Some(body) => {
                let chunk = Bytes::from(body);
                let s: ByteStream = Box::pin(stream::once(async move { Ok(chunk) }));
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ClientError> {
        self.check("put_object", key)?;
        self.insert_object(bucket, key, &body);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        self.check("delete_object", key)?;
        let mut state = self.state.lock().unwrap();
        if let Some(objects) = state.objects.get_mut(bucket) {
            objects.remove(key);
        }
        state.tags.remove(key);
        Ok(())
    }

    async fn tag_object(&self, _bucket: &str, key: &str, tags: &[Tag]) -> Result<(), ClientError> {
        self.check("tag_object", key)?;
        self.state
            .lock()
            .unwrap()
            .tags
            .insert(key.to_string(), tags.to_vec());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> Result<ObjectPage, ClientError> {
        self.check("list_objects", prefix)?;
        let state = self.state.lock().unwrap();
        let keys: Vec<String> = state
            .objects
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .filter(|key| token.as_deref().is_none_or(|after| key.as_str() > after))
                    .take(self.page_size + 1)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let truncated = keys.len() > self.page_size;
        let page: Vec<String> = keys.into_iter().take(self.page_size).collect();
        let next_token = if truncated { page.last().cloned() } else { None };
        Ok(ObjectPage {
            keys: page,
            next_token,
        })
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String, ClientError> {
        self.check("create_multipart", key)?;
        let mut state = self.state.lock().unwrap();
        state.upload_counter += 1;
        let upload_id = format!("upload-{}", state.upload_counter);
        state.uploads.insert(
            upload_id.clone(),
            MultipartSession {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: Vec::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ClientError> {
        self.check("upload_part", key)?;
        let mut state = self.state.lock().unwrap();
        let session = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| ClientError::new("upload_part", None, "unknown upload id"))?;
        session.parts.push((part_number, body.to_vec()));
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_multipart(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<(), ClientError> {
        self.check("complete_multipart", key)?;
        let mut state = self.state.lock().unwrap();
        let mut session = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| ClientError::new("complete_multipart", None, "unknown upload id"))?;
        assert_eq!(session.parts.len(), etags.len());
        session.parts.sort_by_key(|(number, _)| *number);
        let body: Vec<u8> = session
            .parts
            .into_iter()
            .flat_map(|(_, part)| part)
            .collect();
        state
            .objects
            .entry(session.bucket)
            .or_default()
            .insert(session.key, body);
        Ok(())
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError> {
        self.check("abort_multipart", key)?;
        self.state.lock().unwrap().uploads.remove(upload_id);
        Ok(())
    }
}
