//! Streaming frames into a chunked (and optionally sharded) Zarr array.
//!
//! Frames are tiled into the chunk buffers of the current chunk row.
//! Once the row is full, its chunks are compressed and written out in parallel:
//! one object per chunk for Zarr v2, packed into shards for Zarr v3.
//! A shard's index is appended once every chunk row it spans has been written.
use std::{collections::HashMap, io, sync::Arc};

use itertools::Itertools;
use log::{debug, error, info, warn};
use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn, Slice};
use thiserror::Error;

use crate::{
    addressing::{
        bytes_of_frame, bytes_per_chunk, chunk_internal_offset, chunks_along_dimension,
        chunks_per_shard, frames_per_chunk_row, number_of_chunks_in_memory,
        shard_index_for_chunk, shard_internal_index, shards_along_dimension, tile_group_offset,
        to_usize, AddressError,
    },
    chunk_key_encoding::{ChunkKeyEncoder, ChunkKeyEncoding},
    codecs::{BBCodec, BBCodecType},
    creator::{metadata_keys, CreationError, SinkCreator},
    data_type::bytes_of_type,
    dimension::{frame_axes, Dimension},
    object_store::{ConnectionPool, ObjectStoreError},
    settings::{S3Settings, SettingsError, StreamSettings},
    shard_index::{ChunkAddress, ShardIndex, ShardIndexError},
    sink::{Sink, SinkError, SinkType},
    thread_pool::{first_error, TaskPanicked, ThreadPool, ThreadPoolError},
    uri::join_key,
    ZarrVersion,
};

/// Key of the array node under the dataset root.
const ARRAY_KEY: &str = "0";

#[derive(Error, Debug)]
pub enum WriterError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Creation(#[from] CreationError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolError),
    #[error(transparent)]
    TaskPanicked(#[from] TaskPanicked),
    #[error(transparent)]
    ShardIndex(#[from] ShardIndexError),
    #[error("Could not tile frame: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Compression failed: {0}")]
    Codec(#[source] io::Error),
    #[error("Frame has {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("Array is full after {0} frames")]
    ArrayFull(u64),
    #[error("Writer is unusable after an earlier failure")]
    Poisoned,
    #[error("Writer is closed")]
    Closed,
}

/// The shards of the current shard row.
struct OpenShards {
    row: u64,
    sinks: Vec<Arc<SinkType>>,
    indices: Vec<ShardIndex>,
    /// Next free byte in each shard.
    ends: Vec<u64>,
}

/// Layout of one frame relative to its tiles.
struct FrameLayout {
    /// Frame extents, then element width.
    frame_shape: Vec<usize>,
    /// Frame chunk sizes, then element width.
    tile_shape: Vec<usize>,
    tile_bytes: usize,
    /// Coordinates of every chunk along the frame axes, in C order.
    chunk_coords: Vec<Vec<usize>>,
}

impl FrameLayout {
    fn new(dims: &[Dimension], item_bytes: usize) -> Result<Self, AddressError> {
        let frame_dims = &dims[dims.len() - frame_axes(dims)..];
        let mut frame_shape = Vec::with_capacity(frame_dims.len() + 1);
        let mut tile_shape = Vec::with_capacity(frame_dims.len() + 1);
        let mut counts = Vec::with_capacity(frame_dims.len());
        for d in frame_dims {
            frame_shape.push(to_usize(d.extent)?);
            tile_shape.push(to_usize(d.chunk_size)?);
            counts.push(to_usize(chunks_along_dimension(d)?)?);
        }
        frame_shape.push(item_bytes);
        tile_shape.push(item_bytes);
        let tile_bytes = tile_shape
            .iter()
            .try_fold(1usize, |acc, n| acc.checked_mul(*n))
            .ok_or(AddressError::AddressOverflow("tile size"))?;
        let chunk_coords = counts
            .into_iter()
            .map(|n| 0..n)
            .multi_cartesian_product()
            .collect();
        Ok(Self {
            frame_shape,
            tile_shape,
            tile_bytes,
            chunk_coords,
        })
    }
}

/// Writes a stream of frames to one array of a Zarr dataset.
///
/// Metadata documents are not generated here;
/// their sinks are available through [ArrayWriter::metadata_sink]
/// and are finalized when the writer is closed.
pub struct ArrayWriter {
    settings: StreamSettings,
    creator: SinkCreator,
    metadata_sinks: HashMap<String, SinkType>,
    layout: FrameLayout,
    chunk_buffers: Vec<Vec<u8>>,
    bytes_per_frame: usize,
    bytes_per_chunk: usize,
    frames_per_row: u64,
    max_frames: Option<u64>,
    frames_written: u64,
    /// Outermost chunk coordinate of the buffered row.
    row: u64,
    shards: Option<OpenShards>,
    poisoned: bool,
    closed: bool,
}

#[cfg(feature = "s3")]
fn s3_connection_pool(s3: &S3Settings, size: usize) -> Result<ConnectionPool, ObjectStoreError> {
    use crate::object_store::{ObjectClient, S3Client};
    ConnectionPool::from_fn(size, || {
        Ok(Box::new(S3Client::new(s3)?) as Box<dyn ObjectClient>)
    })
}

#[cfg(not(feature = "s3"))]
fn s3_connection_pool(_s3: &S3Settings, _size: usize) -> Result<ConnectionPool, ObjectStoreError> {
    Err(ObjectStoreError::Runtime(
        "built without S3 support".to_owned(),
    ))
}

impl ArrayWriter {
    /// Validate the settings, start the worker threads and connections,
    /// and create the metadata sinks.
    pub fn open(settings: StreamSettings) -> Result<Self, WriterError> {
        settings.validate()?;
        let thread_pool = Arc::new(ThreadPool::new(settings.max_threads)?);
        let connection_pool = match settings.effective_s3().map_err(SettingsError::from)? {
            Some(s3) => Some(Arc::new(s3_connection_pool(&s3, settings.max_connections)?)),
            None => None,
        };
        Self::with_pools(settings, thread_pool, connection_pool)
    }

    /// As [ArrayWriter::open], with externally managed pools.
    pub fn with_pools(
        settings: StreamSettings,
        thread_pool: Arc<ThreadPool>,
        connection_pool: Option<Arc<ConnectionPool>>,
    ) -> Result<Self, WriterError> {
        settings.validate()?;
        let dims = &settings.dimensions;
        let data_type = settings.data_type;

        let layout = FrameLayout::new(dims, bytes_of_type(data_type))?;
        let bytes_per_frame = to_usize(bytes_of_frame(dims, data_type)?)?;
        let bytes_per_chunk = to_usize(bytes_per_chunk(dims, data_type)?)?;
        let n_chunks = to_usize(number_of_chunks_in_memory(dims)?)?;
        let frames_per_row = frames_per_chunk_row(dims)?;
        let max_frames = if dims[0].is_unbounded() {
            None
        } else {
            let per_outer = frames_per_row / dims[0].chunk_size;
            Some(
                per_outer
                    .checked_mul(dims[0].extent)
                    .ok_or(AddressError::AddressOverflow("number of frames"))?,
            )
        };

        let creator =
            SinkCreator::new(thread_pool, connection_pool).with_part_size(settings.part_size);
        let metadata_sinks = creator.make_metadata_sinks(settings.version, &settings.store_path)?;

        info!(
            "Opened {} array at {} with {n_chunks} chunks of {bytes_per_chunk} bytes per row",
            settings.version, settings.store_path
        );

        Ok(Self {
            creator,
            metadata_sinks,
            layout,
            chunk_buffers: vec![vec![0; bytes_per_chunk]; n_chunks],
            bytes_per_frame,
            bytes_per_chunk,
            frames_per_row,
            max_frames,
            frames_written: 0,
            row: 0,
            shards: None,
            poisoned: false,
            closed: false,
            settings,
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Extent of the outermost dimension covered by the frames written so far.
    pub fn outer_extent(&self) -> u64 {
        let per_outer = self.frames_per_row / self.settings.dimensions[0].chunk_size;
        self.frames_written.div_ceil(per_outer)
    }

    /// The sink for a metadata document, by its path relative to the dataset root.
    pub fn metadata_sink(&self, path: &str) -> Option<&SinkType> {
        self.metadata_sinks.get(path)
    }

    pub fn metadata_keys(&self) -> Vec<&'static str> {
        metadata_keys(self.settings.version)
    }

    fn check_usable(&self) -> Result<(), WriterError> {
        if self.closed {
            Err(WriterError::Closed)
        } else if self.poisoned {
            Err(WriterError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn poison_on_err<T>(&mut self, res: Result<T, WriterError>) -> Result<T, WriterError> {
        if let Err(e) = &res {
            error!("Poisoning writer for {}: {e}", self.settings.store_path);
            self.poisoned = true;
        }
        res
    }

    /// Append one frame of `bytes_per_frame` bytes, in C order.
    pub fn append(&mut self, frame: &[u8]) -> Result<(), WriterError> {
        self.check_usable()?;
        if frame.len() != self.bytes_per_frame {
            return Err(WriterError::InvalidFrame {
                expected: self.bytes_per_frame,
                actual: frame.len(),
            });
        }
        if let Some(max) = self.max_frames {
            if self.frames_written >= max {
                return Err(WriterError::ArrayFull(max));
            }
        }

        self.tile_frame(frame)?;
        self.frames_written += 1;

        let row_full = self.frames_written % self.frames_per_row == 0
            || Some(self.frames_written) == self.max_frames;
        if row_full {
            let res = self.flush_row();
            self.poison_on_err(res)?;
        }
        Ok(())
    }

    fn tile_frame(&mut self, frame: &[u8]) -> Result<(), WriterError> {
        let dims = &self.settings.dimensions;
        let fid = self.frames_written;
        let group = to_usize(tile_group_offset(fid, dims)?)?;
        let offset = to_usize(chunk_internal_offset(fid, dims, self.settings.data_type)?)?;
        let layout = &self.layout;

        let src = ArrayViewD::from_shape(IxDyn(&layout.frame_shape), frame)?;
        for (j, coords) in layout.chunk_coords.iter().enumerate() {
            let region = src.slice_each_axis(|ax| match coords.get(ax.axis.index()) {
                Some(c) => {
                    let size = layout.tile_shape[ax.axis.index()];
                    let start = c * size;
                    Slice::from(start..(start + size).min(ax.len))
                }
                None => Slice::from(..),
            });
            let buf = &mut self.chunk_buffers[group + j][offset..offset + layout.tile_bytes];
            let mut tile = ArrayViewMutD::from_shape(IxDyn(&layout.tile_shape), buf)?;
            tile.slice_each_axis_mut(|ax| Slice::from(0..region.len_of(ax.axis)))
                .assign(&region);
        }
        Ok(())
    }

    /// Compress every buffered chunk, leaving fresh zeroed buffers behind.
    fn encode_row(&mut self) -> Result<Vec<Vec<u8>>, WriterError> {
        let n = self.chunk_buffers.len();
        let buffers = std::mem::replace(
            &mut self.chunk_buffers,
            vec![vec![0; self.bytes_per_chunk]; n],
        );
        let codec: Option<BBCodecType> = self.settings.compression.clone();
        let mut batch = self.creator.thread_pool().batch();
        for buf in buffers {
            let codec = codec.clone();
            batch.submit(move || codec.encode(&buf).map_err(WriterError::Codec))?;
        }
        first_error(batch.join())
    }

    fn flush_row(&mut self) -> Result<(), WriterError> {
        let encoded = self.encode_row()?;
        debug!(
            "Flushing chunk row {} ({} chunks, {} bytes)",
            self.row,
            encoded.len(),
            encoded.iter().map(|c| c.len()).sum::<usize>()
        );
        match self.settings.version {
            ZarrVersion::V2 => self.write_chunks(encoded)?,
            ZarrVersion::V3 => self.write_shard_chunks(encoded)?,
        }
        self.row += 1;
        Ok(())
    }

    fn data_root(&self, outer: u64) -> String {
        let key = ChunkKeyEncoding::for_version(self.settings.version).chunk_key(ARRAY_KEY, &[outer]);
        join_key(&self.settings.store_path, &key)
    }

    fn write_chunks(&mut self, encoded: Vec<Vec<u8>>) -> Result<(), WriterError> {
        let dims = &self.settings.dimensions[1..];
        let sinks = self
            .creator
            .make_data_sinks(&self.data_root(self.row), dims, chunks_along_dimension)?;
        let mut batch = self.creator.thread_pool().batch();
        for (sink, data) in sinks.into_iter().zip(encoded) {
            batch.submit(move || -> Result<(), WriterError> {
                sink.write(0, &data)?;
                sink.finalize()?;
                Ok(())
            })?;
        }
        first_error(batch.join())?;
        Ok(())
    }

    fn open_shards(&mut self, shard_row: u64) -> Result<(), WriterError> {
        let dims = &self.settings.dimensions;
        let sinks = self.creator.make_data_sinks(
            &self.data_root(shard_row),
            &dims[1..],
            shards_along_dimension,
        )?;
        let n_chunks = to_usize(chunks_per_shard(dims)?)?;
        debug!("Opened {} shards in shard row {shard_row}", sinks.len());
        self.shards = Some(OpenShards {
            row: shard_row,
            indices: vec![ShardIndex::new(n_chunks); sinks.len()],
            ends: vec![0; sinks.len()],
            sinks: sinks.into_iter().map(Arc::new).collect(),
        });
        Ok(())
    }

    fn write_shard_chunks(&mut self, encoded: Vec<Vec<u8>>) -> Result<(), WriterError> {
        let dims = self.settings.dimensions.clone();
        let outer_shard_size = dims[0].shard_size;
        let shard_row = self.row / outer_shard_size;
        if self.shards.as_ref().map(|s| s.row) != Some(shard_row) {
            self.close_shards()?;
            self.open_shards(shard_row)?;
        }
        let inner = &dims[1..];
        let inner_per_shard = chunks_per_shard(inner)?;
        let outer_internal = self.row % outer_shard_size;

        let Some(shards) = self.shards.as_mut() else {
            return Ok(());
        };
        let mut batch = self.creator.thread_pool().batch();
        for (chunk_idx, data) in encoded.into_iter().enumerate() {
            let chunk_idx = chunk_idx as u64;
            let shard = to_usize(shard_index_for_chunk(chunk_idx, inner)?)?;
            let inner_internal = shard_internal_index(chunk_idx, inner)?;
            let internal = outer_internal
                .checked_mul(inner_per_shard)
                .and_then(|n| n.checked_add(inner_internal))
                .ok_or(AddressError::AddressOverflow("shard internal index"))?;

            let offset = shards.ends[shard];
            let nbytes = data.len() as u64;
            shards.ends[shard] = offset
                .checked_add(nbytes)
                .ok_or(AddressError::AddressOverflow("shard size"))?;
            shards.indices[shard].set(to_usize(internal)?, ChunkAddress::new(offset, nbytes))?;

            let sink = shards.sinks[shard].clone();
            batch.submit(move || -> Result<(), WriterError> {
                sink.write(offset, &data)?;
                Ok(())
            })?;
        }
        first_error(batch.join())?;

        if outer_internal + 1 == outer_shard_size {
            self.close_shards()?;
        }
        Ok(())
    }

    /// Append the index to every open shard and finalize them.
    fn close_shards(&mut self) -> Result<(), WriterError> {
        let Some(shards) = self.shards.take() else {
            return Ok(());
        };
        debug!("Closing {} shards of shard row {}", shards.sinks.len(), shards.row);
        let mut batch = self.creator.thread_pool().batch();
        for ((sink, index), end) in shards
            .sinks
            .into_iter()
            .zip(shards.indices)
            .zip(shards.ends)
        {
            batch.submit(move || -> Result<(), WriterError> {
                sink.write(end, &index.to_bytes())?;
                sink.finalize()?;
                Ok(())
            })?;
        }
        first_error(batch.join())?;
        Ok(())
    }

    /// Flush any partial chunk row, complete open shards and finalize metadata sinks.
    ///
    /// Closing a closed writer does nothing.
    pub fn close(&mut self) -> Result<(), WriterError> {
        if self.closed {
            return Ok(());
        }
        if self.poisoned {
            self.closed = true;
            return Err(WriterError::Poisoned);
        }
        let res = self.finish();
        self.closed = true;
        self.poison_on_err(res)
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        if self.frames_written % self.frames_per_row != 0
            && Some(self.frames_written) != self.max_frames
        {
            self.flush_row()?;
        }
        self.close_shards()?;
        for (key, sink) in self.metadata_sinks.iter() {
            sink.finalize().map_err(|e| {
                warn!("Could not finalize metadata `{key}`");
                e
            })?;
        }
        info!(
            "Closed array at {} after {} frames",
            self.settings.store_path, self.frames_written
        );
        Ok(())
    }
}

impl Drop for ArrayWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                error!("Error closing writer on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, fs, io::Cursor, path::Path};

    use tempdir::TempDir;
    use walkdir::WalkDir;

    use super::*;
    use crate::{
        dimension::Dimension,
        object_store::{MemoryObjectStore, ObjectClient},
        DataType,
    };

    fn files_under(root: &Path) -> BTreeSet<String> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    /// t unbounded in chunks of 2, y 4 in chunks of 2, x 6 in chunks of 4 (ragged).
    fn tyx(root: &str, version: ZarrVersion) -> StreamSettings {
        let mut s = StreamSettings::new(
            root,
            version,
            DataType::UInt8,
            vec![
                Dimension::append("t", 0, 2),
                Dimension::frame("y", 4, 2),
                Dimension::frame("x", 6, 4),
            ],
        );
        s.max_threads = 2;
        s
    }

    /// Element (y, x) of frame t is `40 * t + 6 * y + x`.
    fn frame(t: u8) -> Vec<u8> {
        (0..24u8).map(|i| t * 40 + i).collect()
    }

    #[test]
    fn rejects_wrong_frame_size() {
        let tmp = TempDir::new("writer").unwrap();
        let mut w = ArrayWriter::open(tyx(tmp.path().to_str().unwrap(), ZarrVersion::V2)).unwrap();
        assert_eq!(w.bytes_per_frame(), 24);
        assert!(matches!(
            w.append(&[0; 23]),
            Err(WriterError::InvalidFrame {
                expected: 24,
                actual: 23
            })
        ));
        w.close().unwrap();
        assert!(matches!(w.append(&frame(0)), Err(WriterError::Closed)));
    }

    #[test]
    fn v2_chunk_layout() {
        let tmp = TempDir::new("writer").unwrap();
        let root = tmp.path().to_str().unwrap();
        let mut w = ArrayWriter::open(tyx(root, ZarrVersion::V2)).unwrap();
        for t in 0..3 {
            w.append(&frame(t)).unwrap();
        }
        assert_eq!(w.outer_extent(), 3);
        w.close().unwrap();

        let files = files_under(tmp.path());
        for key in [".zgroup", ".zattrs", "0/.zarray", "0/.zattrs"] {
            assert!(files.contains(key), "missing {key}");
        }
        // two chunk rows of 2 * 2 chunks
        for row in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    assert!(files.contains(&format!("0/{row}/{y}/{x}")));
                }
            }
        }

        // chunk (t=0, y=1, x=1): t in 0..2, y in 2..4, x in 4..6 padded to 4
        let chunk = fs::read(tmp.path().join("0").join("0").join("1").join("1")).unwrap();
        assert_eq!(chunk.len(), 2 * 2 * 4);
        assert_eq!(&chunk[0..4], &[16, 17, 0, 0]);
        assert_eq!(&chunk[4..8], &[22, 23, 0, 0]);
        assert_eq!(&chunk[8..12], &[56, 57, 0, 0]);

        // the last row holds one frame, the rest is fill
        let chunk = fs::read(tmp.path().join("0").join("1").join("0").join("0")).unwrap();
        assert_eq!(&chunk[0..8], &[80, 81, 82, 83, 86, 87, 88, 89]);
        assert!(chunk[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn bounded_outer_dimension_fills_up() {
        let tmp = TempDir::new("writer").unwrap();
        let mut s = tyx(tmp.path().to_str().unwrap(), ZarrVersion::V2);
        s.dimensions[0].extent = 3;
        let mut w = ArrayWriter::open(s).unwrap();
        for t in 0..3 {
            w.append(&frame(t)).unwrap();
        }
        assert!(matches!(w.append(&frame(3)), Err(WriterError::ArrayFull(3))));
        w.close().unwrap();
        assert!(files_under(tmp.path()).contains("0/1/1/1"));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn v3_shards_with_compression() {
        use crate::codecs::gzip_codec::GzipCodec;

        let tmp = TempDir::new("writer").unwrap();
        let root = tmp.path().to_str().unwrap();
        let mut s = tyx(root, ZarrVersion::V3).with_compression(GzipCodec::default());
        s.dimensions[0].shard_size = 2;
        s.dimensions[2].shard_size = 2;
        let mut w = ArrayWriter::open(s).unwrap();
        for t in 0..5 {
            w.append(&frame(t)).unwrap();
        }
        w.close().unwrap();

        let files = files_under(tmp.path());
        assert!(files.contains("zarr.json"));
        assert!(files.contains("0/zarr.json"));
        // 3 chunk rows over 2 shard rows; 2 shards per row along y, 1 along x
        let shards: Vec<_> = files
            .iter()
            .map(|f| f.as_str())
            .filter(|f| f.starts_with("0/c/"))
            .collect();
        assert_eq!(shards, vec!["0/c/0/0/0", "0/c/0/1/0", "0/c/1/0/0", "0/c/1/1/0"]);

        // shard (0, 1, 0) holds chunks t in 0..2, y = 1, x in 0..2
        let data = fs::read(tmp.path().join("0/c/0/1/0")).unwrap();
        let index = ShardIndex::from_shard(&mut Cursor::new(&data), 4).unwrap();
        let codec = GzipCodec::default();

        // chunk (t=1, y=1, x=1) is internal position 3
        let addr = index.get(3).unwrap();
        let start = addr.offset as usize;
        let chunk = codec
            .decode(&data[start..start + addr.nbytes as usize])
            .unwrap();
        assert_eq!(chunk.len(), 16);
        // t = 2, y = 2, x = 4..6
        assert_eq!(&chunk[0..4], &[96, 97, 0, 0]);
        // t = 3, y = 3
        assert_eq!(&chunk[12..16], &[142, 143, 0, 0]);

        // the second shard row only saw one chunk row
        let data = fs::read(tmp.path().join("0/c/1/0/0")).unwrap();
        let index = ShardIndex::from_shard(&mut Cursor::new(&data), 4).unwrap();
        assert!(!index.get(0).unwrap().is_empty());
        assert!(!index.get(1).unwrap().is_empty());
        assert!(index.get(2).unwrap().is_empty());
        assert!(index.get(3).unwrap().is_empty());
    }

    fn open_in_memory(
        store: &MemoryObjectStore,
        mut settings: StreamSettings,
    ) -> Result<ArrayWriter, WriterError> {
        let s = store.clone();
        let pool = Arc::new(
            ConnectionPool::from_fn(2, move || Ok(Box::new(s.clone()) as Box<dyn ObjectClient>))
                .unwrap(),
        );
        settings.part_size = 8;
        ArrayWriter::with_pools(settings, Arc::new(ThreadPool::new(4).unwrap()), Some(pool))
    }

    fn memory_writer(
        store: &MemoryObjectStore,
        version: ZarrVersion,
    ) -> Result<ArrayWriter, WriterError> {
        open_in_memory(store, tyx("s3://bucket/data.zarr", version))
    }

    #[test]
    fn writes_to_object_store() {
        let store = MemoryObjectStore::with_bucket("bucket");
        let mut w = memory_writer(&store, ZarrVersion::V2).unwrap();
        w.metadata_sink(".zgroup")
            .unwrap()
            .write(0, br#"{"zarr_format":2}"#)
            .unwrap();
        w.append(&frame(0)).unwrap();
        w.append(&frame(1)).unwrap();
        w.close().unwrap();

        let keys = store.keys("bucket");
        assert!(keys.contains(&"data.zarr/.zgroup".to_owned()));
        assert!(keys.contains(&"data.zarr/0/0/1/1".to_owned()));
        assert_eq!(
            store.get("bucket", "data.zarr/.zgroup").unwrap().as_ref(),
            br#"{"zarr_format":2}"#
        );
        // chunks of 16 bytes went up in parts of 8
        assert!(store.multipart_uploads_started() > 0);
    }

    #[test]
    fn missing_bucket_fails_open() {
        let store = MemoryObjectStore::default();
        assert!(matches!(
            memory_writer(&store, ZarrVersion::V3),
            Err(WriterError::Creation(CreationError::BucketNotFound(_)))
        ));
    }

    #[test]
    fn failure_poisons() {
        let store = MemoryObjectStore::with_bucket("bucket");
        let mut w = memory_writer(&store, ZarrVersion::V2).unwrap();
        store.fail_part_uploads(true);
        w.append(&frame(0)).unwrap();
        assert!(w.append(&frame(1)).is_err());
        assert!(matches!(w.append(&frame(2)), Err(WriterError::Poisoned)));
        assert!(matches!(w.close(), Err(WriterError::Poisoned)));
    }

    #[test]
    fn shards_to_object_store() {
        let store = MemoryObjectStore::with_bucket("bucket");
        let mut settings = tyx("s3://bucket/data.zarr", ZarrVersion::V3);
        settings.dimensions[0].shard_size = 2;
        settings.dimensions[2].shard_size = 2;
        let mut w = open_in_memory(&store, settings).unwrap();
        for t in 0..5 {
            w.append(&frame(t)).unwrap();
        }
        w.close().unwrap();

        let shards: Vec<_> = store
            .keys("bucket")
            .into_iter()
            .filter(|k| k.starts_with("data.zarr/0/c/"))
            .collect();
        assert_eq!(
            shards,
            vec![
                "data.zarr/0/c/0/0/0",
                "data.zarr/0/c/0/1/0",
                "data.zarr/0/c/1/0/0",
                "data.zarr/0/c/1/1/0",
            ]
        );

        // two chunk rows of two 16-byte chunks each, then the index
        let full = store.get("bucket", "data.zarr/0/c/0/0/0").unwrap();
        assert_eq!(full.len(), 4 * 16 + 4 * 16 + 4);
        let index = ShardIndex::from_shard(&mut Cursor::new(full.to_vec()), 4).unwrap();
        let addrs: Vec<_> = index.iter().copied().collect();
        assert_eq!(
            addrs,
            vec![
                ChunkAddress::new(0, 16),
                ChunkAddress::new(16, 16),
                ChunkAddress::new(32, 16),
                ChunkAddress::new(48, 16),
            ]
        );
        // chunk (t0, y0, x0) holds the top-left 2x4 tile of frames 0 and 1
        assert_eq!(
            &full[..16],
            &[0, 1, 2, 3, 6, 7, 8, 9, 40, 41, 42, 43, 46, 47, 48, 49]
        );

        // the last shard row only has its first chunk row
        let partial = store.get("bucket", "data.zarr/0/c/1/0/0").unwrap();
        let index = ShardIndex::from_shard(&mut Cursor::new(partial.to_vec()), 4).unwrap();
        assert_eq!(index.get(1), Some(&ChunkAddress::new(16, 16)));
        assert!(index.get(2).unwrap().is_empty());
        assert!(index.get(3).unwrap().is_empty());
    }
}
