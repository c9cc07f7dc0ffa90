//! src/services/blob_store.rs
//!
//! BlobStore — the orchestrator over the object-storage adapter. Owns the
//! store lifecycle state machine, the content-before-attributes write
//! protocol, soft delete/undelete, store teardown, and the direct-path
//! listing. All consistency comes from call ordering: the backend offers no
//! multi-object transactions.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BlobStoreConfig;
use crate::errors::{BlobStoreError, BlobStoreResult};
use crate::location;
use crate::metrics::MetricsStore;
use crate::models::attributes::{
    BlobAttributes, BlobId, DELETED_TAG_KEY, DELETED_TAG_VALUE,
};
use crate::models::lifecycle;
use crate::services::object_client::{ByteStream, ObjectClient, Tag};
use crate::services::uploader::Uploader;

/// Header selecting the direct-path location strategy when set to `"true"`.
pub const DIRECT_PATH_HEADER: &str = "direct-path";

/// Header naming the blob. Required; doubles as the logical path for
/// direct-path blobs.
pub const BLOB_NAME_HEADER: &str = "blob-name";

/// Header naming the principal that created the blob.
pub const CREATED_BY_HEADER: &str = "created-by";

/// Header carrying the content type of the payload.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Marker type this implementation writes and recognizes as its own.
const STORE_TYPE: &str = "s3/1";

/// Marker type of stores migrated from the local-filesystem backend.
const MIGRATED_FILE_TYPE: &str = "file/1";

const DEFAULT_CREATED_BY: &str = "unknown";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Store lifecycle phase. Blob operations are valid only in `Started`;
/// calling them in any other phase is a programming error and panics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
enum Phase {
    New = 0,
    Initialized = 1,
    Started = 2,
    Stopped = 3,
}

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            0 => Phase::New,
            1 => Phase::Initialized,
            2 => Phase::Started,
            _ => Phase::Stopped,
        }
    }
}

/// Store-level metadata marker persisted at the bucket root.
#[derive(Serialize, Deserialize, Debug)]
struct StoreMetadata {
    #[serde(rename = "type")]
    store_type: String,
}

/// A stored blob: identifier, durable attributes, and a freshly opened
/// content stream.
pub struct Blob {
    pub id: BlobId,
    pub attributes: BlobAttributes,
    pub content: ByteStream,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Predicate answering whether a blob is still referenced by some
/// higher-level entity. Passed into [`BlobStore::undelete`].
#[async_trait]
pub trait UsageChecker: Send + Sync {
    async fn is_in_use(&self, blob_id: &BlobId, attributes: &BlobAttributes) -> bool;
}

/// Orchestrator over one bucket of blob objects.
///
/// Lifecycle: `new` → `init` → `start` → blob operations → `stop` or
/// `remove`. Lifecycle transitions are serialized behind a mutex; blob
/// operations only read the phase and may run concurrently.
pub struct BlobStore {
    client: Arc<dyn ObjectClient>,
    metrics: Arc<dyn MetricsStore>,
    uploader: Uploader,
    phase: AtomicU8,
    config: OnceLock<BlobStoreConfig>,
    transitions: Mutex<()>,
}

impl BlobStore {
    pub fn new(client: Arc<dyn ObjectClient>, metrics: Arc<dyn MetricsStore>) -> Self {
        Self {
            client,
            metrics,
            uploader: Uploader::default(),
            phase: AtomicU8::new(Phase::New as u8),
            config: OnceLock::new(),
            transitions: Mutex::new(()),
        }
    }

    /// Replace the default uploader (smaller chunk sizes in tests).
    pub fn with_uploader(mut self, uploader: Uploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Validate the configuration, ensure the bucket exists, and reconcile
    /// the bucket's expiration lifecycle rule.
    ///
    /// The rule set is written back only when the merged set differs from
    /// what was read, so unrelated rules mutated concurrently by other
    /// actors are never clobbered needlessly.
    pub async fn init(&self, config: BlobStoreConfig) -> BlobStoreResult<()> {
        let _gate = self.transitions.lock().await;
        self.expect_phase(Phase::New, "init");
        config.validate()?;

        let bucket = &config.bucket;
        let exists = self.client.bucket_exists(bucket).await.map_err(|err| {
            BlobStoreError::Configuration(format!("bucket `{bucket}` unreachable: {err}"))
        })?;
        if !exists {
            info!(bucket, "bucket absent, creating it");
            self.client.create_bucket(bucket).await.map_err(|err| {
                BlobStoreError::Configuration(format!("cannot create bucket `{bucket}`: {err}"))
            })?;
            if let Some(rules) = lifecycle::reconcile(&[], config.expiration_days) {
                self.client.put_lifecycle(bucket, &rules).await?;
            }
        } else {
            let current = self.client.get_lifecycle(bucket).await?.unwrap_or_default();
            if let Some(rules) = lifecycle::reconcile(&current, config.expiration_days) {
                debug!(bucket, rules = rules.len(), "writing reconciled lifecycle policy");
                self.client.put_lifecycle(bucket, &rules).await?;
            }
        }

        let _ = self.config.set(config);
        self.set_phase(Phase::Initialized);
        Ok(())
    }

    /// Probe the store metadata marker and start accepting blob operations.
    ///
    /// A fresh store claims the bucket by writing its own marker. A marker
    /// of another store kind is a fatal fault: refusing to start beats
    /// silently operating on foreign data.
    pub async fn start(&self) -> BlobStoreResult<()> {
        let _gate = self.transitions.lock().await;
        self.expect_phase(Phase::Initialized, "start");
        let bucket = self.bucket().to_string();

        match self.read_properties::<StoreMetadata>(&bucket, location::METADATA_KEY).await? {
            Some(marker) => {
                if !compatible_store_type(&marker.store_type) {
                    return Err(BlobStoreError::IncompatibleStore {
                        bucket,
                        store_type: marker.store_type,
                    });
                }
                debug!(bucket, store_type = %marker.store_type, "attached to existing store");
            }
            None => {
                let marker = StoreMetadata {
                    store_type: STORE_TYPE.to_string(),
                };
                self.write_properties(&bucket, location::METADATA_KEY, &marker).await?;
                info!(bucket, "initialized fresh store");
            }
        }

        self.set_phase(Phase::Started);
        Ok(())
    }

    /// Stop accepting blob operations.
    pub async fn stop(&self) {
        let _gate = self.transitions.lock().await;
        self.expect_phase(Phase::Started, "stop");
        self.set_phase(Phase::Stopped);
        info!(bucket = self.bucket(), "blob store stopped");
    }

    /// Store a new blob from `content` and its metadata `headers`.
    ///
    /// The content object is fully persisted before the attributes object is
    /// written: attributes are the durable proof of existence, so they must
    /// never be observable unless the bytes they describe already exist. A
    /// crash between the two writes leaves an orphaned, unreferenced content
    /// object, which is safe residue.
    pub async fn create<S>(
        &self,
        content: S,
        headers: BTreeMap<String, String>,
    ) -> BlobStoreResult<Blob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let config = self.started_config("create");
        let bucket = &config.bucket;

        let blob_name = headers
            .get(BLOB_NAME_HEADER)
            .cloned()
            .ok_or_else(|| BlobStoreError::Headers(format!("missing header `{BLOB_NAME_HEADER}`")))?;
        let direct = headers
            .get(DIRECT_PATH_HEADER)
            .is_some_and(|value| value == "true");
        let id = if direct {
            BlobId::for_direct_path(&blob_name)
        } else {
            BlobId::generate()
        };
        let content_key = location::content_key(&id);
        let attributes_key = location::attributes_key(&id);

        let upload = self
            .uploader
            .upload(self.client.as_ref(), bucket, &content_key, content, None)
            .await?;

        let attributes = BlobAttributes {
            blob_name,
            creation_time: Utc::now(),
            created_by: headers
                .get(CREATED_BY_HEADER)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CREATED_BY.to_string()),
            content_type: headers
                .get(CONTENT_TYPE_HEADER)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: upload.size,
            sha256: Some(upload.sha256),
            deleted: false,
            deleted_reason: None,
            deleted_at: None,
            headers,
        };

        if let Err(err) = self.write_properties(bucket, &attributes_key, &attributes).await {
            // Bytes without attributes are unreferenced and harmless; the
            // reverse would be a dangling blob, so take the content back out.
            if let Err(cleanup) = self.client.delete_object(bucket, &content_key).await {
                warn!(key = %content_key, %cleanup, "could not remove content after failed attributes write");
            }
            return Err(err);
        }

        self.metrics.record_create(upload.size);
        debug!(blob_id = %id, size = upload.size, "created blob");

        let content = self.open_content(bucket, &content_key).await?;
        Ok(Blob {
            id,
            attributes,
            content,
        })
    }

    /// Fetch a blob. Absent attributes and soft-deleted blobs are both
    /// reported as `None`, distinct from hard I/O errors.
    pub async fn get(&self, blob_id: &BlobId) -> BlobStoreResult<Option<Blob>> {
        let config = self.started_config("get");
        let bucket = &config.bucket;

        let Some(attributes) = self
            .read_properties::<BlobAttributes>(bucket, &location::attributes_key(blob_id))
            .await?
        else {
            return Ok(None);
        };
        if attributes.deleted {
            debug!(blob_id = %blob_id, "blob is soft-deleted");
            return Ok(None);
        }

        let content = self
            .open_content(bucket, &location::content_key(blob_id))
            .await?;
        Ok(Some(Blob {
            id: blob_id.clone(),
            attributes,
            content,
        }))
    }

    /// Soft-delete a blob: record the reason and timestamp in its
    /// attributes, then tag both the content and the attributes object with
    /// the deleted marker. The dual tag lets out-of-band tooling that sees
    /// only one of the two keys still learn the deletion state.
    ///
    /// Returns `false` without mutating anything when the blob is unknown.
    pub async fn delete(&self, blob_id: &BlobId, reason: &str) -> BlobStoreResult<bool> {
        let config = self.started_config("delete");
        let bucket = &config.bucket;
        let attributes_key = location::attributes_key(blob_id);

        let Some(mut attributes) = self
            .read_properties::<BlobAttributes>(bucket, &attributes_key)
            .await?
        else {
            return Ok(false);
        };

        attributes.set_deleted(reason);
        self.write_properties(bucket, &attributes_key, &attributes).await?;

        let deleted_tag = [Tag::new(DELETED_TAG_KEY, DELETED_TAG_VALUE)];
        self.client
            .tag_object(bucket, &location::content_key(blob_id), &deleted_tag)
            .await?;
        self.client
            .tag_object(bucket, &attributes_key, &deleted_tag)
            .await?;

        debug!(blob_id = %blob_id, reason, "soft-deleted blob");
        Ok(true)
    }

    /// Restore a soft-deleted blob if `checker` reports it still in use.
    ///
    /// With `dry_run` the restoration decision is computed and reported but
    /// nothing is mutated: no tag changes, no attribute changes. Without a
    /// checker the determination is always negative.
    pub async fn undelete(
        &self,
        checker: Option<&dyn UsageChecker>,
        blob_id: &BlobId,
        attributes: &BlobAttributes,
        dry_run: bool,
    ) -> BlobStoreResult<bool> {
        let config = self.started_config("undelete");
        let bucket = &config.bucket;

        let Some(checker) = checker else {
            return Ok(false);
        };
        if !checker.is_in_use(blob_id, attributes).await {
            return Ok(false);
        }

        warn!(blob_id = %blob_id, dry_run, "soft-deleted blob still in use, restoring");
        if dry_run {
            return Ok(true);
        }

        if attributes.deleted {
            // Empty tag sets clear the deleted marker on both objects.
            self.client
                .tag_object(bucket, &location::content_key(blob_id), &[])
                .await?;
            let attributes_key = location::attributes_key(blob_id);
            self.client.tag_object(bucket, &attributes_key, &[]).await?;

            let mut restored = attributes.clone();
            restored.clear_deleted();
            self.write_properties(bucket, &attributes_key, &restored).await?;
        }
        Ok(true)
    }

    /// Tear the store down: delete every object under the content prefix,
    /// the metadata marker, and finally the bucket itself.
    ///
    /// A `BucketNotEmpty` refusal is downgraded to a warning: foreign
    /// objects (another tenant sharing the bucket) are none of our business
    /// and the store still counts as removed. Any other deletion failure is
    /// fatal.
    pub async fn remove(&self) -> BlobStoreResult<()> {
        let _gate = self.transitions.lock().await;
        let config = self.started_config("remove");
        let bucket = config.bucket.clone();

        let content_prefix = format!("{}/", location::CONTENT_PREFIX);
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects(&bucket, &content_prefix, token.take())
                .await?;
            for key in page.keys {
                self.client.delete_object(&bucket, &key).await?;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        self.metrics.remove();
        self.client
            .delete_object(&bucket, location::METADATA_KEY)
            .await?;

        match self.client.delete_bucket(&bucket).await {
            Ok(()) => info!(bucket, "removed blob store and bucket"),
            Err(err) if err.is_bucket_not_empty() => {
                warn!(bucket, "bucket not empty after store removal, leaving it in place");
            }
            Err(err) => return Err(err.into()),
        }

        self.set_phase(Phase::Stopped);
        Ok(())
    }

    /// Whether the backing bucket is currently usable for writes.
    ///
    /// Only a confirmed affirmative probe yields `true`; confirmed absence
    /// and probe failures both collapse to `false`. Writability is a single
    /// boolean signal, not a diagnostic.
    pub async fn is_writable(&self) -> bool {
        let config = self.started_config("is_writable");
        match self.client.bucket_exists(&config.bucket).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(bucket = %config.bucket, %err, "writability probe failed");
                false
            }
        }
    }

    /// Lazy sequence of the blob ids of every direct-path blob under
    /// `path_prefix`, in backend listing order.
    ///
    /// Pagination is followed transparently; an unconsumed remainder
    /// performs no further backend calls.
    pub fn direct_path_blob_ids(
        &self,
        path_prefix: &str,
    ) -> impl Stream<Item = BlobStoreResult<BlobId>> + Send + '_ {
        let config = self.started_config("direct_path_blob_ids");
        let bucket = config.bucket.clone();
        let prefix = location::direct_path_prefix(path_prefix);
        try_stream! {
            let mut token: Option<String> = None;
            loop {
                let page = self.client.list_objects(&bucket, &prefix, token.take()).await?;
                for key in page.keys {
                    if let Some(id) = location::direct_path_key_to_id(&key) {
                        yield id;
                    }
                }
                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        }
    }

    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn expect_phase(&self, expected: Phase, operation: &str) {
        let current = self.phase();
        if current != expected {
            panic!("{operation} called in {current:?} state (requires {expected:?})");
        }
    }

    fn started_config(&self, operation: &str) -> &BlobStoreConfig {
        self.expect_phase(Phase::Started, operation);
        self.config
            .get()
            .expect("started store has a configuration")
    }

    fn bucket(&self) -> &str {
        &self
            .config
            .get()
            .expect("initialized store has a configuration")
            .bucket
    }

    async fn open_content(&self, bucket: &str, key: &str) -> BlobStoreResult<ByteStream> {
        self.client
            .get_object(bucket, key)
            .await?
            .ok_or_else(|| BlobStoreError::MissingContent {
                key: key.to_string(),
            })
    }

    async fn read_properties<T: serde::de::DeserializeOwned>(
        &self,
        bucket: &str,
        key: &str,
    ) -> BlobStoreResult<Option<T>> {
        let Some(stream) = self.client.get_object(bucket, key).await? else {
            return Ok(None);
        };
        let raw = collect_bytes(stream).await?;
        let parsed = serde_json::from_slice(&raw).map_err(|source| BlobStoreError::Properties {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(parsed))
    }

    async fn write_properties<T: Serialize>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
    ) -> BlobStoreResult<()> {
        let raw = serde_json::to_vec(value).map_err(|source| BlobStoreError::Properties {
            key: key.to_string(),
            source,
        })?;
        self.client.put_object(bucket, key, Bytes::from(raw)).await?;
        Ok(())
    }
}

fn compatible_store_type(store_type: &str) -> bool {
    store_type.starts_with("s3/") || store_type == MIGRATED_FILE_TYPE
}

async fn collect_bytes(mut stream: ByteStream) -> BlobStoreResult<Vec<u8>> {
    let mut raw = Vec::new();
    while let Some(chunk) = stream.next().await {
        raw.extend_from_slice(&chunk?);
    }
    Ok(raw)
}
