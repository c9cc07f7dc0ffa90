//! Blob store over a remote S3-compatible object-storage backend.
//!
//! Turns an arbitrary byte stream plus metadata headers into a durably
//! stored, content-addressed blob. Supports soft delete and usage-checked
//! undelete, reconciles the bucket's expiration lifecycle rule without
//! clobbering foreign rules, and exposes a crash-consistent, listable view
//! of stored blobs including a caller-addressed "direct path" namespace.
//!
//! Consistency rests on one ordering invariant: content bytes are fully
//! persisted before the attributes object that proves their existence is
//! written. The backend offers no multi-object transactions; a crash
//! between the two writes leaves an orphaned content object, never a
//! dangling attributes object.

pub mod config;
pub mod errors;
pub mod location;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::{BlobStoreConfig, DEFAULT_EXPIRATION_DAYS};
pub use errors::{BlobStoreError, BlobStoreResult};
pub use metrics::{MetricsStore, QuotaService, QuotaViolation};
pub use models::attributes::{BlobAttributes, BlobId};
pub use models::lifecycle::{EXPIRATION_RULE_ID, LifecycleRule};
pub use services::blob_store::{
    BLOB_NAME_HEADER, Blob, BlobStore, CONTENT_TYPE_HEADER, CREATED_BY_HEADER,
    DIRECT_PATH_HEADER, UsageChecker,
};
pub use services::object_client::{ClientError, ObjectClient, S3ObjectClient};
pub use services::uploader::Uploader;
