//! Blocking access to S3-compatible object stores.
use bytes::Bytes;
use log::{debug, warn};
use thiserror::Error;

mod memory;
mod pool;
#[cfg(feature = "s3")]
mod s3;

pub use memory::MemoryObjectStore;
pub use pool::{ConnectionPool, PooledConnection};
#[cfg(feature = "s3")]
pub use s3::S3Client;

/// Smallest part S3 accepts in a multipart upload, other than the last.
pub const MIN_PART_SIZE: usize = 5 << 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("No such bucket `{0}`")]
    NoSuchBucket(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// A part which has been uploaded as part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// One connection to an object store.
///
/// Connections are used by one thread at a time, through a [ConnectionPool].
pub trait ObjectClient: Send {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError>;

    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ObjectStoreError>;

    /// Returns the upload ID.
    fn create_multipart_upload(&self, bucket: &str, key: &str)
        -> Result<String, ObjectStoreError>;

    /// Returns the part's ETag.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ObjectStoreError>;

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), ObjectStoreError>;

    fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ObjectStoreError>;
}

/// Store `body` under `key`, as a single request if it fits in one part,
/// otherwise as a multipart upload which is aborted if any part fails.
pub fn upload(
    client: &dyn ObjectClient,
    bucket: &str,
    key: &str,
    body: Bytes,
    part_size: usize,
) -> Result<(), ObjectStoreError> {
    if part_size == 0 {
        return Err(ObjectStoreError::Request(
            "part size must be nonzero".to_owned(),
        ));
    }
    if body.len() <= part_size {
        debug!("Putting {} bytes to {bucket}/{key}", body.len());
        return client.put_object(bucket, key, body);
    }

    let upload_id = client.create_multipart_upload(bucket, key)?;
    debug!(
        "Uploading {} bytes to {bucket}/{key} in {} parts",
        body.len(),
        body.len().div_ceil(part_size)
    );
    match upload_parts(client, bucket, key, &upload_id, body, part_size) {
        Ok(parts) => client.complete_multipart_upload(bucket, key, &upload_id, &parts),
        Err(e) => {
            if let Err(abort_err) = client.abort_multipart_upload(bucket, key, &upload_id) {
                warn!("Could not abort upload {upload_id} of {bucket}/{key}: {abort_err}");
            }
            Err(e)
        }
    }
}

fn upload_parts(
    client: &dyn ObjectClient,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: Bytes,
    part_size: usize,
) -> Result<Vec<UploadedPart>, ObjectStoreError> {
    let mut parts = Vec::with_capacity(body.len().div_ceil(part_size));
    let mut start = 0;
    let mut part_number = 1;
    while start < body.len() {
        let end = (start + part_size).min(body.len());
        let etag = client.upload_part(bucket, key, upload_id, part_number, body.slice(start..end))?;
        parts.push(UploadedPart { part_number, etag });
        start = end;
        part_number += 1;
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_is_single_put() {
        let store = MemoryObjectStore::with_bucket("b");
        upload(&store, "b", "k", Bytes::from_static(b"hello"), 16).unwrap();
        assert_eq!(store.get("b", "k"), Some(Bytes::from_static(b"hello")));
        assert_eq!(store.multipart_uploads_started(), 0);
    }

    #[test]
    fn large_body_is_multipart() {
        let store = MemoryObjectStore::with_bucket("b");
        let body: Vec<u8> = (0..100u8).collect();
        upload(&store, "b", "k", Bytes::from(body.clone()), 30).unwrap();
        assert_eq!(store.get("b", "k").unwrap().as_ref(), &body[..]);
        assert_eq!(store.multipart_uploads_started(), 1);
        assert_eq!(store.open_uploads(), 0);
    }

    #[test]
    fn failed_multipart_is_aborted() {
        let store = MemoryObjectStore::with_bucket("b");
        store.fail_part_uploads(true);
        let res = upload(&store, "b", "k", Bytes::from(vec![1u8; 100]), 30);
        assert!(res.is_err());
        assert_eq!(store.get("b", "k"), None);
        assert_eq!(store.open_uploads(), 0);
    }

    #[test]
    fn missing_bucket() {
        let store = MemoryObjectStore::default();
        assert_eq!(
            upload(&store, "nope", "k", Bytes::from_static(b"x"), 16),
            Err(ObjectStoreError::NoSuchBucket("nope".to_owned()))
        );
    }
}
