use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod addressing;
pub mod chunk_key_encoding;
pub mod codecs;
pub mod creator;
mod data_type;
pub mod dimension;
pub mod object_store;
pub mod prelude;
pub mod settings;
pub mod shard_index;
pub mod sink;
pub mod thread_pool;
pub mod uri;
mod util;
pub mod writer;

pub use data_type::{bytes_of_type, DataType, UnknownDataType};
pub use util::DimensionMismatch;

const COORD_SMALLVEC_SIZE: usize = 6;

pub type CoordVec<T> = SmallVec<[T; COORD_SMALLVEC_SIZE]>;
pub type GridCoord = CoordVec<u64>;

/// Zarr format version to lay the dataset out for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZarrVersion {
    #[serde(rename = "2")]
    V2,
    #[serde(rename = "3")]
    V3,
}

impl ZarrVersion {
    pub fn zarr_format(&self) -> usize {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }
}

impl std::fmt::Display for ZarrVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.zarr_format())
    }
}
