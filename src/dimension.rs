use serde::{Deserialize, Serialize};

use crate::addressing::AddressError;

/// Whether an axis is written whole on every append, or indexed by the frame counter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DimensionRole {
    Frame,
    Append,
}

/// One axis of the streamed array.
///
/// An `extent` of 0 on the outermost axis means the axis is unbounded:
/// its length is only known once the stream ends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub extent: u64,
    pub chunk_size: u64,
    #[serde(default = "default_shard_size")]
    pub shard_size: u64,
    pub role: DimensionRole,
}

fn default_shard_size() -> u64 {
    1
}

impl Dimension {
    pub fn new<S: Into<String>>(
        name: S,
        role: DimensionRole,
        extent: u64,
        chunk_size: u64,
        shard_size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            extent,
            chunk_size,
            shard_size,
            role,
        }
    }

    pub fn frame<S: Into<String>>(name: S, extent: u64, chunk_size: u64) -> Self {
        Self::new(name, DimensionRole::Frame, extent, chunk_size, 1)
    }

    pub fn append<S: Into<String>>(name: S, extent: u64, chunk_size: u64) -> Self {
        Self::new(name, DimensionRole::Append, extent, chunk_size, 1)
    }

    /// Set the number of chunks per shard along this axis.
    pub fn with_shard_size(mut self, shard_size: u64) -> Self {
        self.shard_size = shard_size;
        self
    }

    pub fn is_frame(&self) -> bool {
        self.role == DimensionRole::Frame
    }

    pub fn is_append(&self) -> bool {
        self.role == DimensionRole::Append
    }

    pub fn is_unbounded(&self) -> bool {
        self.extent == 0
    }

    /// Check this axis in isolation.
    pub fn validate(&self) -> Result<(), AddressError> {
        if self.chunk_size == 0 {
            return Err(AddressError::InvalidDimension(format!(
                "dimension `{}` has zero chunk size",
                self.name
            )));
        }
        if self.shard_size == 0 {
            return Err(AddressError::InvalidDimension(format!(
                "dimension `{}` has zero shard size",
                self.name
            )));
        }
        if !self.is_unbounded() && self.chunk_size > self.extent {
            return Err(AddressError::InvalidDimension(format!(
                "dimension `{}` has chunk size {} larger than its extent {}",
                self.name, self.chunk_size, self.extent
            )));
        }
        Ok(())
    }
}

/// Check a whole dimension sequence, as done once when an array is opened.
///
/// Every axis must be valid on its own, there must be at least one append axis
/// followed by at least one frame axis, frame axes must be the trailing ones,
/// and only the outermost axis may be unbounded.
pub fn validate_dimensions(dims: &[Dimension]) -> Result<(), AddressError> {
    for d in dims.iter() {
        d.validate()?;
    }
    let n_frame = frame_axes(dims);
    if n_frame == 0 {
        return Err(AddressError::InvalidDimension(
            "at least one frame dimension is required".to_owned(),
        ));
    }
    if n_frame == dims.len() {
        return Err(AddressError::InvalidDimension(
            "at least one append dimension is required".to_owned(),
        ));
    }
    if dims[..dims.len() - n_frame].iter().any(|d| d.is_frame()) {
        return Err(AddressError::InvalidDimension(
            "frame dimensions must be the fastest-varying dimensions".to_owned(),
        ));
    }
    for d in dims.iter().skip(1) {
        if d.is_unbounded() {
            return Err(AddressError::InvalidDimension(format!(
                "only the outermost dimension may be unbounded, but `{}` is",
                d.name
            )));
        }
    }
    Ok(())
}

/// Number of trailing frame axes.
pub fn frame_axes(dims: &[Dimension]) -> usize {
    dims.iter().rev().take_while(|d| d.is_frame()).count()
}
