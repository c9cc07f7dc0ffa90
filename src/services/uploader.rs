//! Upload path for content objects.
//!
//! A payload that fits in one chunk is written with a single atomic put.
//! Anything larger goes through a multipart upload; a failure mid-upload
//! aborts the session backend-side, so a partial write is never observable
//! as a readable object at the key.

use std::io;

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{BlobStoreError, BlobStoreResult};
use crate::services::object_client::ObjectClient;

/// Part size for multipart uploads; also the single-shot cutoff. Matches the
/// backend's minimum part size.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// What a completed upload looked like on the wire.
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// Total bytes written.
    pub size: u64,
    /// SHA-256 of the payload, computed while streaming.
    pub sha256: String,
}

/// Chooses single-shot vs multipart upload for content objects.
#[derive(Debug, Clone)]
pub struct Uploader {
    chunk_size: usize,
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Uploader {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Write `content` to `bucket`/`key`.
    ///
    /// `content_length` is a sizing hint; the first buffered chunk decides
    /// the upload shape, so an unknown length still takes the single-shot
    /// path when the stream ends within one chunk.
    pub async fn upload<S>(
        &self,
        client: &dyn ObjectClient,
        bucket: &str,
        key: &str,
        content: S,
        content_length: Option<u64>,
    ) -> BlobStoreResult<UploadResult>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        // Fused: the part loop may poll past the end of the stream.
        let content = content.fuse();
        pin_mut!(content);
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let capacity = content_length
            .map(|len| len.min(self.chunk_size as u64 + 1) as usize)
            .unwrap_or(self.chunk_size.min(64 * 1024));
        let mut buffer: Vec<u8> = Vec::with_capacity(capacity);

        // Buffer the first chunk; a stream that ends inside it is small
        // enough for one atomic put.
        let mut exhausted = false;
        while !exhausted && buffer.len() <= self.chunk_size {
            match content.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    total += chunk.len() as u64;
                    hasher.update(&chunk);
                    buffer.extend_from_slice(&chunk);
                }
                None => exhausted = true,
            }
        }

        if exhausted && buffer.len() <= self.chunk_size {
            client.put_object(bucket, key, Bytes::from(buffer)).await?;
            debug!(bucket, key, size = total, "single-shot upload");
            return Ok(UploadResult {
                size: total,
                sha256: format!("{:x}", hasher.finalize()),
            });
        }

        let upload_id = client.create_multipart(bucket, key).await?;
        match self
            .upload_parts(client, bucket, key, &upload_id, buffer, content, &mut hasher, &mut total)
            .await
        {
            Ok(etags) => {
                client
                    .complete_multipart(bucket, key, &upload_id, &etags)
                    .await?;
                debug!(bucket, key, size = total, parts = etags.len(), "multipart upload");
                Ok(UploadResult {
                    size: total,
                    sha256: format!("{:x}", hasher.finalize()),
                })
            }
            Err(err) => {
                // No partial object may remain observable at the key.
                if let Err(abort_err) = client.abort_multipart(bucket, key, &upload_id).await {
                    warn!(bucket, key, %abort_err, "could not abort multipart upload");
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_parts<S>(
        &self,
        client: &dyn ObjectClient,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut buffer: Vec<u8>,
        mut content: std::pin::Pin<&mut S>,
        hasher: &mut Sha256,
        total: &mut u64,
    ) -> BlobStoreResult<Vec<String>>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut etags = Vec::new();
        let mut part_number = 1i32;
        loop {
            while buffer.len() < self.chunk_size {
                match content.next().await {
                    Some(chunk) => {
                        let chunk = chunk?;
                        *total += chunk.len() as u64;
                        hasher.update(&chunk);
                        buffer.extend_from_slice(&chunk);
                    }
                    None => break,
                }
            }
            if buffer.is_empty() {
                break;
            }
            let part: Vec<u8> = if buffer.len() > self.chunk_size {
                buffer.drain(..self.chunk_size).collect()
            } else {
                std::mem::take(&mut buffer)
            };
            let etag = client
                .upload_part(bucket, key, upload_id, part_number, Bytes::from(part))
                .await?;
            etags.push(etag);
            part_number += 1;
        }
        Ok(etags)
    }
}
