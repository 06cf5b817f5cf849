//! Creation of the many sinks backing one dataset.
//!
//! Local targets are created in parallel on the shared [ThreadPool].
//! Object targets need a [ConnectionPool]; their bucket is checked once per call.
//!
//! When several targets are created at once, every task is waited for
//! and the first failure (in submission order) is reported.
//! Targets which were created before the failure are closed but not removed.
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use itertools::Itertools;
use log::{debug, error};
use thiserror::Error;

use crate::{
    addressing::{to_usize, AddressError},
    chunk_key_encoding::KEY_SEP,
    dimension::Dimension,
    object_store::{ConnectionPool, MIN_PART_SIZE},
    sink::{FileSink, ObjectSink, SinkError, SinkType},
    thread_pool::{first_error, TaskPanicked, ThreadPool, ThreadPoolError},
    uri::{join_key, InvalidUri, StoreUri},
    util::checked_product,
    ZarrVersion,
};

#[derive(Error, Debug)]
pub enum CreationError {
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Bucket `{0}` does not exist")]
    BucketNotFound(String),
    #[error("Object store targets need a connection pool")]
    NoConnectionPool,
    #[error("Could not create `{target}`: {source}")]
    CreationFailure {
        target: String,
        #[source]
        source: SinkError,
    },
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    TaskPanicked(#[from] TaskPanicked),
    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolError),
}

impl CreationError {
    fn failure<S: Into<SinkError>>(target: impl std::fmt::Display, source: S) -> Self {
        Self::CreationFailure {
            target: target.to_string(),
            source: source.into(),
        }
    }
}

/// Relative keys of every metadata document of a dataset.
pub fn metadata_keys(version: ZarrVersion) -> Vec<&'static str> {
    match version {
        ZarrVersion::V2 => vec![".zgroup", ".zattrs", "0/.zarray", "0/.zattrs"],
        ZarrVersion::V3 => vec!["zarr.json", "0/zarr.json"],
    }
}

pub struct SinkCreator {
    thread_pool: Arc<ThreadPool>,
    connection_pool: Option<Arc<ConnectionPool>>,
    part_size: usize,
}

impl SinkCreator {
    pub fn new(thread_pool: Arc<ThreadPool>, connection_pool: Option<Arc<ConnectionPool>>) -> Self {
        Self {
            thread_pool,
            connection_pool,
            part_size: MIN_PART_SIZE,
        }
    }

    /// Part size of multipart uploads made by object sinks.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn thread_pool(&self) -> &Arc<ThreadPool> {
        &self.thread_pool
    }

    /// Create the single target at `path` under `base_uri`.
    pub fn make_sink(&self, base_uri: &str, path: &str) -> Result<SinkType, CreationError> {
        match StoreUri::parse(base_uri)?.join(path) {
            StoreUri::Local(p) => {
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)
                            .map_err(|e| CreationError::failure(parent.display(), e))?;
                    }
                }
                let sink =
                    FileSink::create(&p).map_err(|e| CreationError::failure(p.display(), e))?;
                Ok(sink.into())
            }
            StoreUri::S3 { bucket, prefix, .. } => {
                if prefix.is_empty() {
                    return Err(CreationError::InvalidArgument(format!(
                        "`{base_uri}` with `{path}` names no object"
                    )));
                }
                self.check_bucket(&bucket)?;
                let mut sinks = self.make_s3_objects(&bucket, vec![prefix])?;
                sinks
                    .pop()
                    .ok_or_else(|| CreationError::InvalidArgument("no sink created".to_owned()))
            }
        }
    }

    /// Create one target per part of the lattice, at `base/i0/i1/.../in`.
    ///
    /// Sinks are returned in C order, so that a sink's position is the linear index of its part.
    pub fn make_data_sinks<F>(
        &self,
        base_uri: &str,
        dims: &[Dimension],
        parts_along_dimension: F,
    ) -> Result<Vec<SinkType>, CreationError>
    where
        F: Fn(&Dimension) -> Result<u64, AddressError>,
    {
        if dims.is_empty() {
            return Err(CreationError::InvalidArgument(
                "no dimensions given".to_owned(),
            ));
        }
        let parts = dims
            .iter()
            .map(&parts_along_dimension)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some((d, _)) = dims.iter().zip(parts.iter()).find(|(_, p)| **p == 0) {
            return Err(CreationError::InvalidArgument(format!(
                "dimension `{}` has no parts",
                d.name
            )));
        }
        let n_parts = checked_product(parts.iter().copied())
            .ok_or(AddressError::AddressOverflow("number of parts"))?;
        to_usize(n_parts)?;

        let keys = part_keys(&parts);
        debug!("Creating {} data sinks under {base_uri}", keys.len());

        match StoreUri::parse(base_uri)? {
            StoreUri::Local(base) => {
                let dirs = if parts.len() == 1 {
                    vec![base.clone()]
                } else {
                    part_keys(&parts[..parts.len() - 1])
                        .into_iter()
                        .map(|k| key_to_path(&base, &k))
                        .collect()
                };
                self.make_dirs(dirs)?;
                self.make_files(keys.iter().map(|k| key_to_path(&base, k)).collect())
            }
            StoreUri::S3 { bucket, prefix, .. } => {
                self.check_bucket(&bucket)?;
                self.make_s3_objects(
                    &bucket,
                    keys.iter().map(|k| join_key(&prefix, k)).collect(),
                )
            }
        }
    }

    /// Create the metadata targets of a dataset, keyed by their path relative to `base_uri`.
    pub fn make_metadata_sinks(
        &self,
        version: ZarrVersion,
        base_uri: &str,
    ) -> Result<HashMap<String, SinkType>, CreationError> {
        let keys: Vec<String> = metadata_keys(version)
            .into_iter()
            .map(|k| k.to_owned())
            .collect();
        match StoreUri::parse(base_uri)? {
            StoreUri::Local(base) => self.make_files_keyed(&base, keys),
            StoreUri::S3 { bucket, prefix, .. } => {
                self.check_bucket(&bucket)?;
                self.make_s3_objects_keyed(&bucket, &prefix, keys)
            }
        }
    }

    /// Run `f` on every item in parallel, reporting the first failure once all are done.
    fn run_batch<I, T, F>(&self, items: Vec<I>, f: F) -> Result<Vec<T>, CreationError>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T, CreationError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut batch = self.thread_pool.batch();
        for item in items {
            let f = f.clone();
            batch.submit(move || f(item))?;
        }

        first_error(batch.join())
    }

    /// Create every directory (and its parents); existing directories are fine.
    fn make_dirs(&self, dir_paths: Vec<PathBuf>) -> Result<(), CreationError> {
        let unique: Vec<PathBuf> = dir_paths
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        debug!("Creating {} directories", unique.len());
        self.run_batch(unique, |p| {
            fs::create_dir_all(&p).map_err(|e| CreationError::failure(p.display(), e))
        })?;
        Ok(())
    }

    /// Create one file sink per path, in the same order.
    fn make_files(&self, paths: Vec<PathBuf>) -> Result<Vec<SinkType>, CreationError> {
        self.run_batch(paths, |p| {
            FileSink::create(&p)
                .map(SinkType::from)
                .map_err(|e| CreationError::failure(p.display(), e))
        })
    }

    fn make_files_keyed(
        &self,
        base: &Path,
        keys: Vec<String>,
    ) -> Result<HashMap<String, SinkType>, CreationError> {
        let paths: Vec<_> = keys.iter().map(|k| key_to_path(base, k)).collect();
        let dirs = paths
            .iter()
            .filter_map(|p| p.parent().map(|d| d.to_path_buf()))
            .collect();
        self.make_dirs(dirs)?;
        let sinks = self.make_files(paths)?;
        Ok(keys.into_iter().zip(sinks).collect())
    }

    fn connection_pool(&self) -> Result<&Arc<ConnectionPool>, CreationError> {
        self.connection_pool
            .as_ref()
            .ok_or(CreationError::NoConnectionPool)
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool, CreationError> {
        let pool = self.connection_pool()?;
        let conn = pool
            .get()
            .map_err(|e| CreationError::failure(bucket, e))?;
        conn.bucket_exists(bucket)
            .map_err(|e| CreationError::failure(bucket, e))
    }

    fn check_bucket(&self, bucket: &str) -> Result<(), CreationError> {
        if self.bucket_exists(bucket)? {
            Ok(())
        } else {
            error!("Bucket `{bucket}` does not exist");
            Err(CreationError::BucketNotFound(bucket.to_owned()))
        }
    }

    /// Object sinks touch the store only when finalized, so creating them is local.
    fn make_s3_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> Result<Vec<SinkType>, CreationError> {
        let pool = self.connection_pool()?;
        keys.into_iter()
            .map(|k| {
                if k.is_empty() {
                    return Err(CreationError::InvalidArgument(format!(
                        "empty object key in bucket `{bucket}`"
                    )));
                }
                Ok(ObjectSink::new(bucket.to_owned(), k, pool.clone(), self.part_size).into())
            })
            .collect()
    }

    fn make_s3_objects_keyed(
        &self,
        bucket: &str,
        prefix: &str,
        keys: Vec<String>,
    ) -> Result<HashMap<String, SinkType>, CreationError> {
        let objects = keys.iter().map(|k| join_key(prefix, k)).collect();
        let sinks = self.make_s3_objects(bucket, objects)?;
        Ok(keys.into_iter().zip(sinks).collect())
    }
}

/// `i0/i1/.../in` for every part, in C order.
fn part_keys(parts: &[u64]) -> Vec<String> {
    parts
        .iter()
        .map(|n| 0..*n)
        .multi_cartesian_product()
        .map(|idx| idx.iter().join(KEY_SEP))
        .collect()
}

fn key_to_path(base: &Path, key: &str) -> PathBuf {
    let mut p = base.to_path_buf();
    for part in key.split(KEY_SEP) {
        p.push(part);
    }
    p
}
