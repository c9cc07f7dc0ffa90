//! Error surface of the blob store.
//!
//! Configuration and incompatible-store faults are distinct so operators can
//! tell "bad bucket" from "wrong store kind" apart. Not-found is never an
//! error here: `get` and soft `delete` report it as a value.

use std::io;

use thiserror::Error;

use crate::services::object_client::ClientError;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// Rejected configuration (bad bucket name, unusable endpoint). Fatal at
    /// `init`.
    #[error("invalid blob store configuration: {0}")]
    Configuration(String),

    /// The bucket holds a store written by an unrecognized implementation.
    /// Fatal at `start`.
    #[error("bucket `{bucket}` holds an incompatible store of type `{store_type}`")]
    IncompatibleStore { bucket: String, store_type: String },

    /// Required creation headers are missing or contradictory.
    #[error("invalid blob headers: {0}")]
    Headers(String),

    /// Generic backend failure during get/put/delete/tag/list.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A properties object could not be serialized or parsed.
    #[error("malformed properties object `{key}`")]
    Properties {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Attributes exist but the content object they describe is gone.
    #[error("content object `{key}` missing despite attributes")]
    MissingContent { key: String },

    /// The caller's input stream failed while uploading.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;
