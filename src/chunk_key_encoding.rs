use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use crate::{CoordVec, ZarrVersion};

pub const KEY_SEP: &str = "/";

/// Maps (partial) chunk grid coordinates to the key components under an array node.
#[enum_delegate::register]
pub trait ChunkKeyEncoder {
    fn components(&self, coord: &[u64]) -> CoordVec<String>;

    fn encode(&self, coord: &[u64]) -> String {
        let components = self.components(coord);
        components.join(KEY_SEP)
    }

    /// Key of the given coordinates under `prefix`.
    fn chunk_key(&self, prefix: &str, coord: &[u64]) -> String {
        let encoded = self.encode(coord);
        let prefix = prefix.trim_end_matches(KEY_SEP);
        if prefix.is_empty() {
            encoded
        } else {
            format!("{prefix}{KEY_SEP}{encoded}")
        }
    }
}

/// `c/i0/i1/...`, always `/`-separated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct DefaultChunkKeyEncoding {}

impl ChunkKeyEncoder for DefaultChunkKeyEncoding {
    fn components(&self, coord: &[u64]) -> CoordVec<String> {
        let mut out: CoordVec<String> = smallvec!["c".to_owned()];
        out.extend(coord.iter().map(|n| n.to_string()));
        out
    }
}

/// Nested (`/`-separated) V2 keys.
///
/// Chunk files of a streamed array are created one directory level per axis,
/// so the flat `.`-separated V2 layout is not offered.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct V2ChunkKeyEncoding {}

impl ChunkKeyEncoder for V2ChunkKeyEncoding {
    fn components(&self, coord: &[u64]) -> CoordVec<String> {
        if coord.is_empty() {
            return smallvec!["0".to_owned()];
        }
        coord.iter().map(|n| n.to_string()).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "name", content = "configuration", rename_all = "lowercase")]
#[enum_delegate::implement(ChunkKeyEncoder)]
pub enum ChunkKeyEncoding {
    Default(DefaultChunkKeyEncoding),
    V2(V2ChunkKeyEncoding),
}

impl ChunkKeyEncoding {
    /// The key layout used for data written in the given format.
    pub fn for_version(version: ZarrVersion) -> Self {
        match version {
            ZarrVersion::V2 => Self::V2(V2ChunkKeyEncoding::default()),
            ZarrVersion::V3 => Self::Default(DefaultChunkKeyEncoding::default()),
        }
    }
}

impl Default for ChunkKeyEncoding {
    fn default() -> Self {
        Self::Default(DefaultChunkKeyEncoding::default())
    }
}
