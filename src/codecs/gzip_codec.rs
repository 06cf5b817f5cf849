use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BBCodec;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum GzipLevel {
    None = 0,
    L1 = 1,
    L2 = 2,
    L3 = 3,
    L4 = 4,
    L5 = 5,
    L6 = 6,
    L7 = 7,
    L8 = 8,
    L9 = 9,
}

#[derive(Error, Debug)]
#[error("Invalid GZIP level {0} (must be 0-9)")]
pub struct InvalidGzipLevel(u32);

impl TryFrom<u32> for GzipLevel {
    type Error = InvalidGzipLevel;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::L1),
            2 => Ok(Self::L2),
            3 => Ok(Self::L3),
            4 => Ok(Self::L4),
            5 => Ok(Self::L5),
            6 => Ok(Self::L6),
            7 => Ok(Self::L7),
            8 => Ok(Self::L8),
            9 => Ok(Self::L9),
            other => Err(InvalidGzipLevel(other)),
        }
    }
}

// levels are plain integers in JSON
impl Serialize for GzipLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(*self as u32)
    }
}

impl<'de> Deserialize<'de> for GzipLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = u32::deserialize(deserializer)?;
        n.try_into().map_err(serde::de::Error::custom)
    }
}

fn default_gzip_level() -> GzipLevel {
    GzipLevel::L6
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct GzipCodec {
    #[serde(default = "default_gzip_level")]
    pub level: GzipLevel,
}

impl GzipCodec {
    pub fn from_level(level: u32) -> Result<Self, InvalidGzipLevel> {
        Ok(Self {
            level: level.try_into()?,
        })
    }

    pub fn best() -> Self {
        Self {
            level: GzipLevel::L9,
        }
    }

    pub fn fastest() -> Self {
        Self {
            level: GzipLevel::L1,
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: default_gzip_level(),
        }
    }
}

impl BBCodec for GzipCodec {
    fn encode(&self, decoded: &[u8]) -> io::Result<Vec<u8>> {
        let mut enc = GzEncoder::new(Vec::new(), GzCompression::new(self.level as u32));
        enc.write_all(decoded)?;
        enc.finish()
    }

    fn decode(&self, encoded: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(encoded).read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compresses_repetitive_data() {
        let data = vec![42u8; 4096];
        let c = GzipCodec::best();
        let enc = c.encode(&data).unwrap();
        assert!(enc.len() < data.len() / 10);
        assert_eq!(c.decode(&enc).unwrap(), data);
    }

    #[test]
    fn level_bounds() {
        assert!(GzipCodec::from_level(9).is_ok());
        assert!(GzipCodec::from_level(10).is_err());
        assert!(serde_json::from_str::<GzipCodec>(r#"{"level": 12}"#).is_err());
        assert_eq!(
            serde_json::from_str::<GzipCodec>("{}").unwrap(),
            GzipCodec::default()
        );
    }

    #[test]
    fn level_zero_still_framed() {
        let c = GzipCodec::from_level(0).unwrap();
        let enc = c.encode(b"abc").unwrap();
        assert_eq!(&enc[..2], &[0x1f, 0x8b]);
        assert_eq!(c.decode(&enc).unwrap(), b"abc");
    }
}
