pub use crate::addressing::{
    chunks_along_dimension, chunks_per_shard, number_of_shards, shards_along_dimension,
    AddressError,
};
pub use crate::codecs::{BBCodec, BBCodecType};
pub use crate::creator::{CreationError, SinkCreator};
pub use crate::dimension::{Dimension, DimensionRole};
pub use crate::object_store::{ConnectionPool, MemoryObjectStore, ObjectClient};
pub use crate::settings::{S3Settings, StreamSettings};
pub use crate::sink::{Sink, SinkError, SinkType};
pub use crate::thread_pool::ThreadPool;
pub use crate::writer::{ArrayWriter, WriterError};
pub use crate::{bytes_of_type, DataType, ZarrVersion};

pub use serde_json;
