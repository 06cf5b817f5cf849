//! Chunk and shard addressing.
//!
//! Pure functions mapping a frame counter and a sequence of [Dimension]s
//! onto the chunk and shard lattices, and onto byte offsets within chunks.
//!
//! Dimensions are ordered slowest-varying first.
//! The frame counter is decomposed over the *extents* of the append axes,
//! row-major, with the outermost axis varying slowest (and possibly unbounded).
//! An append axis' element coordinate divided by its chunk size is its chunk coordinate.
//!
//! The chunk buffers held in memory at any time form one "chunk row":
//! all chunks sharing the outermost chunk coordinate,
//! laid out row-major over the remaining dimensions.
//! Inside a chunk, each frame occupies one tile of
//! `product(chunk_size(frame axes)) * bytes_of_type` bytes,
//! tiles being ordered row-major by the frame's within-chunk append coordinates.
use thiserror::Error;

use crate::{
    data_type::bytes_of_type,
    dimension::{frame_axes, Dimension},
    util::checked_product,
    DataType, DimensionMismatch, GridCoord,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Overflow computing {0}")]
    AddressOverflow(&'static str),
}

impl From<DimensionMismatch> for AddressError {
    fn from(value: DimensionMismatch) -> Self {
        Self::InvalidArgument(value.to_string())
    }
}

fn checked_chunk_size(dim: &Dimension) -> Result<u64, AddressError> {
    if dim.chunk_size == 0 {
        Err(AddressError::InvalidDimension(format!(
            "dimension `{}` has zero chunk size",
            dim.name
        )))
    } else {
        Ok(dim.chunk_size)
    }
}

fn checked_shard_size(dim: &Dimension) -> Result<u64, AddressError> {
    if dim.shard_size == 0 {
        Err(AddressError::InvalidDimension(format!(
            "dimension `{}` has zero shard size",
            dim.name
        )))
    } else {
        Ok(dim.shard_size)
    }
}

fn product<I: IntoIterator<Item = u64>>(it: I, what: &'static str) -> Result<u64, AddressError> {
    checked_product(it).ok_or(AddressError::AddressOverflow(what))
}

fn n_append(dims: &[Dimension]) -> usize {
    dims.len() - frame_axes(dims)
}

/// Number of append axes, which must be at least one and bounded below the outermost.
fn checked_append_axes(dims: &[Dimension]) -> Result<usize, AddressError> {
    let n = n_append(dims);
    if n == 0 {
        return Err(AddressError::InvalidDimension(
            "no append dimension".to_owned(),
        ));
    }
    if let Some(d) = dims[1..n].iter().find(|d| d.is_unbounded()) {
        return Err(AddressError::InvalidDimension(format!(
            "only the outermost dimension may be unbounded, not `{}`",
            d.name
        )));
    }
    Ok(n)
}

pub fn to_usize(n: u64) -> Result<usize, AddressError> {
    usize::try_from(n).map_err(|_| AddressError::AddressOverflow("platform size"))
}

/// Number of (possibly ragged) chunks along a dimension.
pub fn chunks_along_dimension(dim: &Dimension) -> Result<u64, AddressError> {
    let cs = checked_chunk_size(dim)?;
    Ok(dim.extent.div_ceil(cs))
}

/// Number of (possibly ragged) shards along a dimension.
pub fn shards_along_dimension(dim: &Dimension) -> Result<u64, AddressError> {
    let ss = checked_shard_size(dim)?;
    Ok(chunks_along_dimension(dim)?.div_ceil(ss))
}

/// Total number of shards in the lattice described by `dims`.
pub fn number_of_shards(dims: &[Dimension]) -> Result<u64, AddressError> {
    let per_dim = dims
        .iter()
        .map(shards_along_dimension)
        .collect::<Result<Vec<_>, _>>()?;
    product(per_dim, "number of shards")
}

/// Nominal number of chunks in an interior shard.
///
/// Boundary shards may hold fewer.
pub fn chunks_per_shard(dims: &[Dimension]) -> Result<u64, AddressError> {
    let per_dim = dims
        .iter()
        .map(checked_shard_size)
        .collect::<Result<Vec<_>, _>>()?;
    product(per_dim, "chunks per shard")
}

/// Decompose a row-major linear index.
///
/// The outermost extent only bounds the index; an extent of 0 there means unbounded.
fn decompose(index: u64, extents: &[u64]) -> Result<GridCoord, AddressError> {
    let mut coords = GridCoord::from_elem(0, extents.len());
    let mut rem = index;
    for (i, n) in extents.iter().enumerate().skip(1).rev() {
        if *n == 0 {
            return Err(AddressError::InvalidDimension(
                "inner dimension has no parts".to_owned(),
            ));
        }
        coords[i] = rem % n;
        rem /= n;
    }
    if let Some(n) = extents.first() {
        if *n != 0 && rem >= *n {
            return Err(AddressError::InvalidArgument(format!(
                "index {index} is out of bounds"
            )));
        }
        coords[0] = rem;
    }
    Ok(coords)
}

/// Recompose a row-major linear index.
fn compose(coords: &[u64], extents: &[u64]) -> Result<u64, AddressError> {
    DimensionMismatch::check_coords(coords.len(), extents.len())?;
    let mut total: u64 = 0;
    let mut stride: u64 = 1;
    for (i, (c, n)) in coords.iter().zip(extents.iter()).enumerate().rev() {
        let bounded = i > 0 || *n != 0;
        if bounded && c >= n {
            return Err(AddressError::InvalidArgument(format!(
                "coordinate {c} is out of bounds of {n} along axis {i}"
            )));
        }
        total = c
            .checked_mul(stride)
            .and_then(|t| t.checked_add(total))
            .ok_or(AddressError::AddressOverflow("linear index"))?;
        if i > 0 {
            stride = stride
                .checked_mul(*n)
                .ok_or(AddressError::AddressOverflow("stride"))?;
        }
    }
    Ok(total)
}

fn chunk_extents(dims: &[Dimension]) -> Result<GridCoord, AddressError> {
    dims.iter().map(chunks_along_dimension).collect()
}

/// Chunk lattice coordinates of a row-major linear chunk index.
pub fn chunk_coords(chunk_index: u64, dims: &[Dimension]) -> Result<GridCoord, AddressError> {
    decompose(chunk_index, &chunk_extents(dims)?)
}

/// Row-major linear chunk index of chunk lattice coordinates.
pub fn linear_chunk_index(coords: &[u64], dims: &[Dimension]) -> Result<u64, AddressError> {
    compose(coords, &chunk_extents(dims)?)
}

/// Index of the shard containing the given chunk.
pub fn shard_index_for_chunk(chunk_index: u64, dims: &[Dimension]) -> Result<u64, AddressError> {
    let coords = chunk_coords(chunk_index, dims)?;
    let mut shard_coords = GridCoord::with_capacity(dims.len());
    for (c, d) in coords.iter().zip(dims.iter()) {
        shard_coords.push(c / checked_shard_size(d)?);
    }
    let shard_extents: GridCoord = dims
        .iter()
        .map(shards_along_dimension)
        .collect::<Result<_, _>>()?;
    compose(&shard_coords, &shard_extents)
}

/// Position of the given chunk within its own shard.
pub fn shard_internal_index(chunk_index: u64, dims: &[Dimension]) -> Result<u64, AddressError> {
    let coords = chunk_coords(chunk_index, dims)?;
    let mut internal = GridCoord::with_capacity(dims.len());
    let mut shard_shape = GridCoord::with_capacity(dims.len());
    for (c, d) in coords.iter().zip(dims.iter()) {
        let ss = checked_shard_size(d)?;
        internal.push(c % ss);
        shard_shape.push(ss);
    }
    compose(&internal, &shard_shape)
}

/// Number of frames which fill one chunk row.
pub fn frames_per_chunk_row(dims: &[Dimension]) -> Result<u64, AddressError> {
    let n = checked_append_axes(dims)?;
    let outer = dims
        .first()
        .ok_or_else(|| AddressError::InvalidArgument("no dimensions".to_owned()))?;
    let mut sizes = vec![checked_chunk_size(outer)?];
    sizes.extend(dims[1..n].iter().map(|d| d.extent));
    product(sizes, "frames per chunk row")
}

/// Chunk coordinate of frame `frame_id` along the append axis `dimension_idx`.
///
/// Frame axes are always swept in full by every frame,
/// so asking for their chunk coordinate is an error.
pub fn chunk_lattice_index(
    frame_id: u64,
    dimension_idx: usize,
    dims: &[Dimension],
) -> Result<u64, AddressError> {
    let dim = dims.get(dimension_idx).ok_or_else(|| {
        AddressError::InvalidArgument(format!(
            "dimension index {dimension_idx} out of range for {} dimensions",
            dims.len()
        ))
    })?;
    if dim.is_frame() {
        return Err(AddressError::InvalidArgument(format!(
            "dimension `{}` is a frame dimension",
            dim.name
        )));
    }
    let n = checked_append_axes(dims)?;
    let cs = checked_chunk_size(dim)?;

    if dimension_idx == 0 {
        return Ok(frame_id / frames_per_chunk_row(dims)?);
    }

    let inner = product(
        dims[dimension_idx + 1..n].iter().map(|d| d.extent),
        "frame stride",
    )?;
    let mod_divisor = inner
        .checked_mul(dim.extent)
        .ok_or(AddressError::AddressOverflow("frame stride"))?;
    let div_divisor = inner
        .checked_mul(cs)
        .ok_or(AddressError::AddressOverflow("frame stride"))?;
    Ok((frame_id % mod_divisor) / div_divisor)
}

/// Index, among the in-memory chunk buffers, of the first chunk the frame is written to.
///
/// The frame's other chunks follow contiguously, one per chunk of the frame axes.
pub fn tile_group_offset(frame_id: u64, dims: &[Dimension]) -> Result<u64, AddressError> {
    let n = checked_append_axes(dims)?;
    let mut offset: u64 = 0;
    let mut stride: u64 = 1;
    for i in (1..dims.len()).rev() {
        if i < n {
            let idx = chunk_lattice_index(frame_id, i, dims)?;
            offset = idx
                .checked_mul(stride)
                .and_then(|o| o.checked_add(offset))
                .ok_or(AddressError::AddressOverflow("tile group offset"))?;
        }
        stride = stride
            .checked_mul(chunks_along_dimension(&dims[i])?)
            .ok_or(AddressError::AddressOverflow("tile group offset"))?;
    }
    Ok(offset)
}

/// Byte offset, within each of its chunks, at which the frame's tile starts.
pub fn chunk_internal_offset(
    frame_id: u64,
    dims: &[Dimension],
    data_type: DataType,
) -> Result<u64, AddressError> {
    let n = checked_append_axes(dims)?;
    let tile_px = product(
        dims[n..]
            .iter()
            .map(checked_chunk_size)
            .collect::<Result<Vec<_>, _>>()?,
        "tile size",
    )?;
    let tile_bytes = tile_px
        .checked_mul(bytes_of_type(data_type) as u64)
        .ok_or(AddressError::AddressOverflow("tile size"))?;

    let mut offset: u64 = 0;
    let mut array_stride: u64 = 1;
    let mut chunk_stride: u64 = 1;
    for i in (0..n).rev() {
        let d = &dims[i];
        let cs = checked_chunk_size(d)?;
        let element = if i == 0 {
            frame_id / array_stride
        } else {
            (frame_id / array_stride) % d.extent
        };
        offset = (element % cs)
            .checked_mul(chunk_stride)
            .and_then(|o| o.checked_add(offset))
            .ok_or(AddressError::AddressOverflow("chunk internal offset"))?;
        if i > 0 {
            array_stride = array_stride
                .checked_mul(d.extent)
                .ok_or(AddressError::AddressOverflow("chunk internal offset"))?;
        }
        chunk_stride = chunk_stride
            .checked_mul(cs)
            .ok_or(AddressError::AddressOverflow("chunk internal offset"))?;
    }
    offset
        .checked_mul(tile_bytes)
        .ok_or(AddressError::AddressOverflow("chunk internal offset"))
}

/// Number of bytes in one frame.
pub fn bytes_of_frame(dims: &[Dimension], data_type: DataType) -> Result<u64, AddressError> {
    let n = n_append(dims);
    let px = product(dims[n..].iter().map(|d| d.extent), "bytes of frame")?;
    px.checked_mul(bytes_of_type(data_type) as u64)
        .ok_or(AddressError::AddressOverflow("bytes of frame"))
}

/// Number of bytes in one raw (uncompressed, unpadded-to-shard) chunk.
pub fn bytes_per_chunk(dims: &[Dimension], data_type: DataType) -> Result<u64, AddressError> {
    let sizes = dims
        .iter()
        .map(checked_chunk_size)
        .collect::<Result<Vec<_>, _>>()?;
    let px = product(sizes, "bytes per chunk")?;
    px.checked_mul(bytes_of_type(data_type) as u64)
        .ok_or(AddressError::AddressOverflow("bytes per chunk"))
}

/// Number of chunk buffers in one chunk row.
pub fn number_of_chunks_in_memory(dims: &[Dimension]) -> Result<u64, AddressError> {
    let per_dim = dims
        .iter()
        .skip(1)
        .map(chunks_along_dimension)
        .collect::<Result<Vec<_>, _>>()?;
    product(per_dim, "chunks in memory")
}

/// Round `n` up to the next multiple of `align`.
pub fn align_up(n: u64, align: u64) -> Result<u64, AddressError> {
    if align == 0 {
        return Err(AddressError::InvalidArgument(
            "alignment must be nonzero".to_owned(),
        ));
    }
    n.div_ceil(align)
        .checked_mul(align)
        .ok_or(AddressError::AddressOverflow("alignment"))
}
