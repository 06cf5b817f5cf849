//! Configuration of one streamed array.
use std::{fs::File, io::Read, path::Path};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    addressing::AddressError,
    codecs::BBCodecType,
    dimension::{validate_dimensions, Dimension},
    object_store::MIN_PART_SIZE,
    uri::{InvalidUri, StoreUri},
    DataType, ZarrVersion,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Dimension(#[from] AddressError),
    #[error(transparent)]
    Uri(#[from] InvalidUri),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

/// Connection details for an S3-compatible store.
///
/// Credentials not given here are read from the `AWS_*` environment variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

fn default_version() -> ZarrVersion {
    ZarrVersion::V3
}

fn default_max_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_max_connections() -> usize {
    8
}

fn default_part_size() -> usize {
    MIN_PART_SIZE
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Local path or web URI of the dataset root.
    pub store_path: String,
    #[serde(default)]
    pub s3: Option<S3Settings>,
    #[serde(default = "default_version")]
    pub version: ZarrVersion,
    pub data_type: DataType,
    /// Slowest-varying first.
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub compression: Option<BBCodecType>,
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Size of each part of a multipart upload.
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

impl StreamSettings {
    pub fn new<S: Into<String>>(
        store_path: S,
        version: ZarrVersion,
        data_type: DataType,
        dimensions: Vec<Dimension>,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            s3: None,
            version,
            data_type,
            dimensions,
            compression: None,
            max_threads: default_max_threads(),
            max_connections: default_max_connections(),
            part_size: default_part_size(),
        }
    }

    pub fn with_compression<C: Into<BBCodecType>>(mut self, codec: C) -> Self {
        self.compression = Some(codec.into());
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_reader<R: Read>(r: R) -> Result<Self, SettingsError> {
        Ok(serde_json::from_reader(r)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        Self::from_reader(File::open(path)?)
    }

    pub fn store_uri(&self) -> Result<StoreUri, InvalidUri> {
        StoreUri::parse(&self.store_path)
    }

    /// S3 settings with the endpoint filled in from the store path where it has one.
    pub fn effective_s3(&self) -> Result<Option<S3Settings>, InvalidUri> {
        match self.store_uri()? {
            StoreUri::Local(_) => Ok(None),
            StoreUri::S3 { endpoint, .. } => {
                let mut s3 = self.s3.clone().unwrap_or_default();
                if endpoint.is_some() {
                    s3.endpoint = endpoint;
                }
                Ok(Some(s3))
            }
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.store_uri()?;
        validate_dimensions(&self.dimensions)?;
        if self.max_threads == 0 {
            return Err(SettingsError::Invalid(
                "max_threads must be at least 1".to_owned(),
            ));
        }
        if self.max_connections == 0 {
            return Err(SettingsError::Invalid(
                "max_connections must be at least 1".to_owned(),
            ));
        }
        if self.part_size == 0 {
            return Err(SettingsError::Invalid(
                "part_size must be nonzero".to_owned(),
            ));
        }
        if self.part_size < MIN_PART_SIZE {
            warn!(
                "part_size {} is below the S3 minimum of {MIN_PART_SIZE}; multipart uploads may be rejected",
                self.part_size
            );
        }
        if self.version == ZarrVersion::V2 && self.dimensions.iter().any(|d| d.shard_size != 1) {
            return Err(SettingsError::Invalid(
                "sharding requires Zarr v3".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "store_path": "http://localhost:9000/bucket/out.zarr",
        "version": "2",
        "data_type": "uint16",
        "dimensions": [
            {"name": "t", "extent": 0, "chunk_size": 5, "role": "append"},
            {"name": "y", "extent": 48, "chunk_size": 16, "role": "frame"},
            {"name": "x", "extent": 64, "chunk_size": 16, "role": "frame"}
        ],
        "s3": {"access_key_id": "id", "secret_access_key": "secret"}
    }"#;

    #[test]
    fn load_with_defaults() {
        let s = StreamSettings::from_json_str(JSON).unwrap();
        assert_eq!(s.version, ZarrVersion::V2);
        assert_eq!(s.data_type, DataType::UInt16);
        assert_eq!(s.dimensions.len(), 3);
        assert_eq!(s.max_connections, 8);
        assert_eq!(s.part_size, 5 << 20);
        assert!(s.max_threads >= 1);
        assert_eq!(s.compression, None);
        s.validate().unwrap();
    }

    #[test]
    fn endpoint_from_uri() {
        let s = StreamSettings::from_json_str(JSON).unwrap();
        let s3 = s.effective_s3().unwrap().unwrap();
        assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.access_key_id.as_deref(), Some("id"));
    }

    #[test]
    fn local_has_no_s3() {
        let s = StreamSettings::new(
            "/tmp/out.zarr",
            ZarrVersion::V3,
            DataType::UInt8,
            vec![Dimension::append("t", 0, 1), Dimension::frame("x", 4, 4)],
        );
        assert_eq!(s.effective_s3().unwrap(), None);
        s.validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let mut s = StreamSettings::from_json_str(JSON).unwrap();
        s.max_threads = 0;
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));

        let mut s = StreamSettings::from_json_str(JSON).unwrap();
        s.dimensions[0].shard_size = 2;
        assert!(s.validate().is_err());

        let mut s = StreamSettings::from_json_str(JSON).unwrap();
        s.dimensions.pop();
        s.dimensions.pop();
        assert!(matches!(s.validate(), Err(SettingsError::Dimension(_))));

        assert!(matches!(
            StreamSettings::from_json_str("{}"),
            Err(SettingsError::Json(_))
        ));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn compression_config() {
        let json = JSON.replace(
            r#""version": "2","#,
            r#""version": "3", "compression": {"name": "gzip", "configuration": {"level": 1}},"#,
        );
        let s = StreamSettings::from_json_str(&json).unwrap();
        assert_eq!(s.version, ZarrVersion::V3);
        assert!(s.compression.is_some());
    }
}
