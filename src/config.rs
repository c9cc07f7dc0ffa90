//! Blob store configuration and bucket-name validation.

use serde::{Deserialize, Serialize};

use crate::errors::{BlobStoreError, BlobStoreResult};

/// Days until the backend hard-expires soft-deleted blobs, when the
/// configuration does not say otherwise.
pub const DEFAULT_EXPIRATION_DAYS: u32 = 3;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Configuration of one blob store. Immutable after `init`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlobStoreConfig {
    /// Bucket backing this store. Must satisfy the backend naming grammar.
    pub bucket: String,

    /// Region the bucket lives in; the client's default chain applies when
    /// unset.
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible backends (MinIO, LocalStack).
    pub endpoint: Option<String>,

    /// Days until soft-deleted blobs are hard-expired by the backend.
    /// Zero disables backend expiration.
    pub expiration_days: u32,

    /// Opaque credentials reference (a named profile); the default provider
    /// chain applies when unset.
    pub credentials: Option<String>,
}

impl BlobStoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            expiration_days: DEFAULT_EXPIRATION_DAYS,
            credentials: None,
        }
    }

    /// Check the configuration against the backend naming grammar.
    pub fn validate(&self) -> BlobStoreResult<()> {
        ensure_bucket_name_valid(&self.bucket)
    }
}

/// Validate bucket name format.
///
/// Enforces the backend's naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_valid(name: &str) -> BlobStoreResult<()> {
    let invalid = |reason: &str| {
        Err(BlobStoreError::Configuration(format!(
            "bucket name `{name}` invalid: {reason}"
        )))
    };

    let len = name.len();
    if len < BUCKET_NAME_MIN_LEN || len > BUCKET_NAME_MAX_LEN {
        return invalid("must be between 3 and 63 characters");
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return invalid("must start and end with a lowercase letter or digit");
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }

    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    for segment in parts {
        if segment.is_empty() || segment.len() > 3 {
            return false;
        }
        if segment.chars().any(|c| !c.is_ascii_digit()) {
            return false;
        }
        if segment.parse::<u8>().is_err() {
            return false;
        }
    }
    true
}
