//! Deterministic mapping from blob identifiers to storage keys.
//!
//! Generated identifiers shard into two fixed-depth directories derived from
//! the MD5 of the id (00–ff each), which spreads keys evenly across backend
//! partitions. Direct-path identifiers pass the caller's path through under
//! a reserved `directpath/` namespace, so the two strategies can never
//! collide.

use crate::models::attributes::BlobId;

/// Prefix under which every blob object lives in the bucket.
pub const CONTENT_PREFIX: &str = "content";

/// Namespace for caller-addressed blobs, below [`CONTENT_PREFIX`].
pub const DIRECT_PATH_ROOT: &str = "directpath";

/// Suffix of the content object.
pub const BYTES_SUFFIX: &str = ".bytes";

/// Suffix of the attributes object.
pub const PROPERTIES_SUFFIX: &str = ".properties";

/// Key of the store-level metadata marker, at the bucket root.
pub const METADATA_KEY: &str = "metadata.properties";

/// Resolve the key fragment for a blob id, without prefix or suffix.
pub fn location(id: &BlobId) -> String {
    match id.direct_path() {
        Some(path) => format!("{DIRECT_PATH_ROOT}/{path}"),
        None => {
            let digest = md5::compute(id.as_str());
            format!("{:02x}/{:02x}/{}", digest[0], digest[1], id.as_str())
        }
    }
}

/// Full key of the content object for `id`.
pub fn content_key(id: &BlobId) -> String {
    format!("{CONTENT_PREFIX}/{}{BYTES_SUFFIX}", location(id))
}

/// Full key of the attributes object for `id`.
pub fn attributes_key(id: &BlobId) -> String {
    format!("{CONTENT_PREFIX}/{}{PROPERTIES_SUFFIX}", location(id))
}

/// Listing prefix for direct-path blobs below `path_prefix`.
pub fn direct_path_prefix(path_prefix: &str) -> String {
    format!("{CONTENT_PREFIX}/{DIRECT_PATH_ROOT}/{path_prefix}")
}

/// Map a direct-path attributes key back to the blob id it belongs to.
///
/// Returns `None` for content (`.bytes`) keys and for keys outside the
/// direct-path namespace.
pub fn direct_path_key_to_id(key: &str) -> Option<BlobId> {
    let fragment = key
        .strip_prefix(CONTENT_PREFIX)?
        .strip_prefix('/')?
        .strip_prefix(DIRECT_PATH_ROOT)?
        .strip_prefix('/')?;
    let path = fragment.strip_suffix(PROPERTIES_SUFFIX)?;
    Some(BlobId::for_direct_path(path))
}
