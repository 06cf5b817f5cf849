//! Bytes-to-bytes compression applied to each chunk before it is written.
use std::io;

use serde::{Deserialize, Serialize};

#[cfg(feature = "gzip")]
pub mod gzip_codec;

#[cfg(feature = "gzip")]
use crate::variant_from_data;

/// Common interface for compressors.
pub trait BBCodec {
    fn encode(&self, decoded: &[u8]) -> io::Result<Vec<u8>>;

    fn decode(&self, encoded: &[u8]) -> io::Result<Vec<u8>>;
}

/// Serialized as `{"name": ..., "configuration": {...}}`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(rename_all = "lowercase", tag = "name", content = "configuration")]
pub enum BBCodecType {
    #[cfg(feature = "gzip")]
    Gzip(gzip_codec::GzipCodec),
}

impl BBCodec for BBCodecType {
    fn encode(&self, decoded: &[u8]) -> io::Result<Vec<u8>> {
        match *self {
            #[cfg(feature = "gzip")]
            Self::Gzip(ref c) => c.encode(decoded),
        }
    }

    fn decode(&self, encoded: &[u8]) -> io::Result<Vec<u8>> {
        match *self {
            #[cfg(feature = "gzip")]
            Self::Gzip(ref c) => c.decode(encoded),
        }
    }
}

/// No compressor at all is a pass-through.
impl BBCodec for Option<BBCodecType> {
    fn encode(&self, decoded: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Some(c) => c.encode(decoded),
            None => Ok(decoded.to_vec()),
        }
    }

    fn decode(&self, encoded: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Some(c) => c.decode(encoded),
            None => Ok(encoded.to_vec()),
        }
    }
}

#[cfg(feature = "gzip")]
variant_from_data!(BBCodecType, Gzip, gzip_codec::GzipCodec);
