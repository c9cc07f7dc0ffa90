//! Blob identifiers and the per-blob attributes record.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix distinguishing direct-path identifiers from generated ones.
///
/// `$` cannot appear in a UUID, so the two namespaces can never collide.
pub const DIRECT_PATH_PREFIX: &str = "path$";

/// Tag key marking an object as soft-deleted.
pub const DELETED_TAG_KEY: &str = "deleted";

/// Tag value paired with [`DELETED_TAG_KEY`].
pub const DELETED_TAG_VALUE: &str = "true";

/// Opaque, immutable identifier of a blob.
///
/// Generated identifiers are random UUIDs. Direct-path identifiers embed the
/// caller-chosen logical path behind [`DIRECT_PATH_PREFIX`], so the location
/// strategy can be recovered from the identifier alone.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Debug)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Mint a fresh identifier for a permanently-located blob.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Build the identifier of a blob addressed by a caller-chosen path.
    pub fn for_direct_path(path: &str) -> Self {
        Self(format!("{DIRECT_PATH_PREFIX}{path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The caller-chosen logical path, if this is a direct-path identifier.
    pub fn direct_path(&self) -> Option<&str> {
        self.0.strip_prefix(DIRECT_PATH_PREFIX)
    }
}

impl From<String> for BlobId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable property set describing one blob.
///
/// Persisted as the `.properties` object next to the content bytes. Its
/// existence is the proof that the content object was successfully written
/// at some point; it may describe a soft-deleted blob whose bytes are still
/// present.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlobAttributes {
    /// Human-meaningful name supplied by the caller at creation.
    pub blob_name: String,

    /// When the blob was created.
    pub creation_time: DateTime<Utc>,

    /// Principal that created the blob.
    pub created_by: String,

    /// Content type (MIME type) of the stored bytes.
    pub content_type: String,

    /// Size of the content object in bytes.
    pub size: u64,

    /// SHA-256 of the content bytes, computed while streaming the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Whether the blob is soft-deleted.
    #[serde(default)]
    pub deleted: bool,

    /// Reason supplied with the soft delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_reason: Option<String>,

    /// When the soft delete happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Caller headers from `create`, kept verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl BlobAttributes {
    /// Flip the soft-delete state on, recording the reason and timestamp.
    pub fn set_deleted(&mut self, reason: &str) {
        self.deleted = true;
        self.deleted_reason = Some(reason.to_string());
        self.deleted_at = Some(Utc::now());
    }

    /// Clear the soft-delete state entirely.
    pub fn clear_deleted(&mut self) {
        self.deleted = false;
        self.deleted_reason = None;
        self.deleted_at = None;
    }
}
