use std::io;

use thiserror::Error;

use crate::object_store::ObjectStoreError;

mod file;
mod object;

pub use file::FileSink;
pub use object::ObjectSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Write failed: {0}")]
    WriteFailure(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

/// Write access to one physical target.
///
/// Writes carry absolute offsets and may come from several threads at once,
/// provided they do not overlap.
#[enum_delegate::register]
pub trait Sink {
    /// Write all of `buf` at `offset`.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), SinkError>;

    /// Make everything written so far durable.
    fn finalize(&self) -> Result<(), SinkError>;
}

pub(crate) fn check_nonempty(buf: &[u8]) -> Result<(), SinkError> {
    if buf.is_empty() {
        Err(SinkError::InvalidArgument("empty write".to_owned()))
    } else {
        Ok(())
    }
}

#[enum_delegate::implement(Sink)]
pub enum SinkType {
    File(FileSink),
    Object(ObjectSink),
}

impl std::fmt::Debug for SinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(s) => write!(f, "SinkType::File({})", s.path().display()),
            Self::Object(s) => write!(f, "SinkType::Object({}/{})", s.bucket(), s.key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use tempdir::TempDir;

    use super::*;
    use crate::object_store::{ConnectionPool, MemoryObjectStore, ObjectClient};

    #[test]
    fn sink_type_delegates() {
        let tmp = TempDir::new("sink_type").unwrap();
        let p = tmp.path().join("f");
        let file: SinkType = FileSink::create(&p).unwrap().into();
        file.write(2, b"cd").unwrap();
        file.write(0, b"ab").unwrap();
        file.finalize().unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"abcd");

        let store = MemoryObjectStore::with_bucket("b");
        let s = store.clone();
        let pool = Arc::new(
            ConnectionPool::from_fn(1, move || Ok(Box::new(s.clone()) as Box<dyn ObjectClient>))
                .unwrap(),
        );
        let object: SinkType = ObjectSink::new("b".into(), "k".into(), pool, 16).into();
        assert!(matches!(object.write(0, b""), Err(SinkError::InvalidArgument(_))));
        object.write(0, b"xyz").unwrap();
        object.finalize().unwrap();
        assert_eq!(store.get("b", "k").unwrap().as_ref(), b"xyz");
        assert_eq!(format!("{object:?}"), "SinkType::Object(b/k)");
    }
}
