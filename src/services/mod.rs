//! Service layer: the object-storage adapter, the upload path, and the
//! blob store orchestrator built on top of them.

pub mod blob_store;
pub mod object_client;
pub mod uploader;

#[cfg(test)]
pub(crate) mod test_support;
