use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use fs4::FileExt;

use super::{check_nonempty, Sink, SinkError};

/// One local file, exclusively locked while the sink lives.
///
/// The lock and handle are released when the sink is dropped.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
}

impl FileSink {
    /// Create (or truncate) the file at `path`; its parent must exist.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        // lock before truncating so that a file held by another sink is left alone
        FileExt::try_lock_exclusive(&file)?;
        file.set_len(0)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        std::os::unix::fs::FileExt::write_all_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt as _;
        let mut written = 0;
        while written < buf.len() {
            let n = self
                .file
                .seek_write(&buf[written..], offset + written as u64)?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            written += n;
        }
        Ok(())
    }
}

impl Sink for FileSink {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), SinkError> {
        check_nonempty(buf)?;
        self.write_at(offset, buf).map_err(|e| {
            SinkError::WriteFailure(format!(
                "{} bytes at offset {offset} of {}: {e}",
                buf.len(),
                self.path.display()
            ))
        })
    }

    fn finalize(&self) -> Result<(), SinkError> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread};

    use super::*;
    use tempdir::TempDir;

    #[test]
    fn positioned_writes() {
        let tmp = TempDir::new("file_sink").unwrap();
        let p = tmp.path().join("chunk");
        let sink = FileSink::create(&p).unwrap();
        sink.write(4, b"world").unwrap();
        sink.write(0, b"hey ").unwrap();
        sink.finalize().unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"hey world");
    }

    #[test]
    fn gaps_read_as_zeros() {
        let tmp = TempDir::new("file_sink").unwrap();
        let p = tmp.path().join("chunk");
        let sink = FileSink::create(&p).unwrap();
        sink.write(3, &[1]).unwrap();
        drop(sink);
        assert_eq!(fs::read(&p).unwrap(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn empty_write_rejected() {
        let tmp = TempDir::new("file_sink").unwrap();
        let sink = FileSink::create(tmp.path().join("chunk")).unwrap();
        assert!(matches!(
            sink.write(0, &[]),
            Err(SinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn truncates_existing() {
        let tmp = TempDir::new("file_sink").unwrap();
        let p = tmp.path().join("chunk");
        fs::write(&p, b"old contents").unwrap();
        let sink = FileSink::create(&p).unwrap();
        sink.write(0, b"new").unwrap();
        drop(sink);
        assert_eq!(fs::read(&p).unwrap(), b"new");
    }

    #[test]
    fn missing_parent_is_io_error() {
        let tmp = TempDir::new("file_sink").unwrap();
        let res = FileSink::create(tmp.path().join("no").join("such").join("dir"));
        assert!(matches!(res, Err(SinkError::Io(_))));
    }

    #[test]
    fn concurrent_disjoint_writes() {
        let tmp = TempDir::new("file_sink").unwrap();
        let p = tmp.path().join("shard");
        let sink = Arc::new(FileSink::create(&p).unwrap());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let s = sink.clone();
                thread::spawn(move || s.write(i as u64 * 16, &[i; 16]).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        sink.finalize().unwrap();
        let data = fs::read(&p).unwrap();
        assert_eq!(data.len(), 128);
        for (i, block) in data.chunks(16).enumerate() {
            assert!(block.iter().all(|b| *b as usize == i));
        }
    }
}
