use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use log::{debug, warn};

use super::{check_nonempty, Sink, SinkError};
use crate::{
    addressing::to_usize,
    object_store::{upload, ConnectionPool},
};

/// One object in a bucket.
///
/// Writes build up the object's body in memory, gaps reading as zeros.
/// Nothing is sent to the store until the sink is finalized.
pub struct ObjectSink {
    bucket: String,
    key: String,
    part_size: usize,
    pool: Arc<ConnectionPool>,
    /// `None` once uploaded.
    body: Mutex<Option<BytesMut>>,
}

impl ObjectSink {
    pub fn new(bucket: String, key: String, pool: Arc<ConnectionPool>, part_size: usize) -> Self {
        Self {
            bucket,
            key,
            part_size,
            pool,
            body: Mutex::new(Some(BytesMut::new())),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn body(&self) -> MutexGuard<'_, Option<BytesMut>> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for ObjectSink {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), SinkError> {
        check_nonempty(buf)?;
        let start = to_usize(offset).map_err(|e| SinkError::InvalidArgument(e.to_string()))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| SinkError::InvalidArgument("write end overflows".to_owned()))?;

        let mut guard = self.body();
        let body = guard.as_mut().ok_or_else(|| {
            SinkError::WriteFailure(format!("{}/{} was already finalized", self.bucket, self.key))
        })?;
        if body.len() < end {
            body.resize(end, 0);
        }
        body[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn finalize(&self) -> Result<(), SinkError> {
        let mut guard = self.body();
        let Some(body) = guard.as_ref() else {
            return Ok(());
        };
        let body = body.clone().freeze();
        debug!("Finalizing {}/{} ({} bytes)", self.bucket, self.key, body.len());
        let conn = self.pool.get()?;
        upload(&*conn, &self.bucket, &self.key, body, self.part_size)?;
        // only discard the body once the store has it
        *guard = None;
        Ok(())
    }
}

impl Drop for ObjectSink {
    fn drop(&mut self) {
        let body = self
            .body
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(b) = body.as_ref().filter(|b| !b.is_empty()) {
            warn!(
                "Dropping {}/{} with {} bytes never uploaded",
                self.bucket,
                self.key,
                b.len()
            );
        }
    }
}
