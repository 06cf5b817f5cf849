use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use bytes::{BufMut, Bytes, BytesMut};

use super::{ObjectClient, ObjectStoreError, UploadedPart};

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, HashMap<String, Bytes>>,
    uploads: HashMap<String, PendingUpload>,
}

/// An in-process object store.
///
/// Clones share the same contents, so a [super::ConnectionPool]
/// can be filled with clones of one store.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
    uploads_started: Arc<AtomicUsize>,
    fail_parts: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn with_bucket(bucket: &str) -> Self {
        let s = Self::default();
        s.create_bucket(bucket);
        s
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.state()
            .buckets
            .entry(bucket.to_owned())
            .or_default();
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        // cloning Bytes only bumps a refcount
        self.state().buckets.get(bucket)?.get(key).cloned()
    }

    /// Sorted keys of every object in the bucket.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .state()
            .buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn multipart_uploads_started(&self) -> usize {
        self.uploads_started.load(Ordering::SeqCst)
    }

    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Make every subsequent part upload fail.
    pub fn fail_part_uploads(&self, fail: bool) {
        self.fail_parts.store(fail, Ordering::SeqCst);
    }
}

fn no_such_upload(upload_id: &str) -> ObjectStoreError {
    ObjectStoreError::Request(format!("no such upload `{upload_id}`"))
}

impl ObjectClient for MemoryObjectStore {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.state().buckets.contains_key(bucket))
    }

    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::NoSuchBucket(bucket.to_owned()))?;
        b.insert(key.to_owned(), body);
        Ok(())
    }

    fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, ObjectStoreError> {
        let mut state = self.state();
        if !state.buckets.contains_key(bucket) {
            return Err(ObjectStoreError::NoSuchBucket(bucket.to_owned()));
        }
        let n = self.uploads_started.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("upload-{n}");
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ObjectStoreError> {
        if self.fail_parts.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Request(format!(
                "part {part_number} rejected"
            )));
        }
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        upload.parts.insert(part_number, body);
        Ok(format!("\"{upload_id}-{part_number}\""))
    }

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(ObjectStoreError::Request(format!(
                "upload `{upload_id}` is not for {bucket}/{key}"
            )));
        }
        let mut body = BytesMut::new();
        for p in parts.iter() {
            let data = upload.parts.get(&p.part_number).ok_or_else(|| {
                ObjectStoreError::Request(format!("part {} was not uploaded", p.part_number))
            })?;
            body.put_slice(data);
        }
        state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::NoSuchBucket(bucket.to_owned()))?
            .insert(key.to_owned(), body.freeze());
        Ok(())
    }

    fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), ObjectStoreError> {
        self.state()
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_contents() {
        let a = MemoryObjectStore::with_bucket("b");
        let b = a.clone();
        b.put_object("b", "x/y", Bytes::from_static(b"1")).unwrap();
        assert_eq!(a.keys("b"), vec!["x/y".to_owned()]);
        assert!(a.bucket_exists("b").unwrap());
        assert!(!a.bucket_exists("c").unwrap());
    }

    #[test]
    fn parts_are_assembled_in_listed_order() {
        let s = MemoryObjectStore::with_bucket("b");
        let id = s.create_multipart_upload("b", "k").unwrap();
        let e2 = s.upload_part("b", "k", &id, 2, Bytes::from_static(b"world")).unwrap();
        let e1 = s.upload_part("b", "k", &id, 1, Bytes::from_static(b"hello ")).unwrap();
        let parts = vec![
            UploadedPart {
                part_number: 1,
                etag: e1,
            },
            UploadedPart {
                part_number: 2,
                etag: e2,
            },
        ];
        s.complete_multipart_upload("b", "k", &id, &parts).unwrap();
        assert_eq!(s.get("b", "k"), Some(Bytes::from_static(b"hello world")));
    }
}
