//! The table of chunk locations appended to every shard.
//!
//! One `(offset, nbytes)` pair of little-endian `u64`s per nominal chunk position
//! in the shard (C order), followed by the CRC32C checksum of those pairs.
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32c::crc32c;
use thiserror::Error;

const CHECKSUM_LEN: usize = std::mem::size_of::<u32>();

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChunkAddress {
    pub offset: u64,
    pub nbytes: u64,
}

impl ChunkAddress {
    pub fn new(offset: u64, nbytes: u64) -> Self {
        Self { offset, nbytes }
    }

    /// Marks a chunk position with nothing written to it.
    pub fn empty() -> Self {
        Self {
            offset: u64::MAX,
            nbytes: u64::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offset == u64::MAX && self.nbytes == u64::MAX
    }

    /// Encoded size of one address.
    pub fn nbytes_on_disk() -> usize {
        std::mem::size_of::<u64>() + std::mem::size_of::<u64>()
    }

    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self, io::Error> {
        let offset = r.read_u64::<LittleEndian>()?;
        let nbytes = r.read_u64::<LittleEndian>()?;
        Ok(Self { offset, nbytes })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), io::Error> {
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u64::<LittleEndian>(self.nbytes)?;
        Ok(())
    }

    pub fn end_offset(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            self.offset.checked_add(self.nbytes)
        }
    }
}

impl Default for ChunkAddress {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Error, Debug)]
pub enum ShardIndexError {
    #[error("Chunk position {index} is out of bounds of a shard with {len} chunks")]
    OutOfBounds { index: usize, len: usize },
    #[error("Could not read shard index")]
    Io(#[from] io::Error),
    #[error("Shard index does not match checksum")]
    ChecksumFailure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardIndex {
    addresses: Vec<ChunkAddress>,
}

impl ShardIndex {
    /// An index with every position empty.
    pub fn new(n_chunks: usize) -> Self {
        Self {
            addresses: vec![ChunkAddress::empty(); n_chunks],
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn set(&mut self, index: usize, address: ChunkAddress) -> Result<(), ShardIndexError> {
        let len = self.addresses.len();
        let slot = self
            .addresses
            .get_mut(index)
            .ok_or(ShardIndexError::OutOfBounds { index, len })?;
        *slot = address;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&ChunkAddress> {
        self.addresses.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkAddress> {
        self.addresses.iter()
    }

    /// Encoded size of the whole index, checksum included.
    pub fn nbytes_on_disk(&self) -> usize {
        self.addresses.len() * ChunkAddress::nbytes_on_disk() + CHECKSUM_LEN
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.nbytes_on_disk());
        for c in self.addresses.iter() {
            buf.extend_from_slice(&c.offset.to_le_bytes());
            buf.extend_from_slice(&c.nbytes.to_le_bytes());
        }
        let chksum = crc32c(&buf);
        buf.extend_from_slice(&chksum.to_le_bytes());
        buf
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), io::Error> {
        w.write_all(&self.to_bytes())
    }

    /// From a [Read]er positioned at the start of the index.
    pub fn from_reader<R: Read>(r: &mut R, n_chunks: usize) -> Result<Self, ShardIndexError> {
        let buf_len = n_chunks * ChunkAddress::nbytes_on_disk() + CHECKSUM_LEN;
        let mut buf = vec![0; buf_len];
        r.read_exact(&mut buf)?;
        let chksum_offset = buf.len() - CHECKSUM_LEN;
        let chksum_calc = crc32c(&buf[..chksum_offset]);

        let mut addresses = Vec::with_capacity(n_chunks);
        let mut curs = Cursor::new(buf);
        for _ in 0..n_chunks {
            addresses.push(ChunkAddress::from_reader(&mut curs)?);
        }
        let chksum_read = curs.read_u32::<LittleEndian>()?;
        if chksum_calc == chksum_read {
            Ok(Self { addresses })
        } else {
            Err(ShardIndexError::ChecksumFailure)
        }
    }

    /// From a [Seek]able [Read]er representing a whole shard.
    pub fn from_shard<R: Read + Seek>(r: &mut R, n_chunks: usize) -> Result<Self, ShardIndexError> {
        let len = (n_chunks * ChunkAddress::nbytes_on_disk() + CHECKSUM_LEN) as i64;
        r.seek(SeekFrom::End(-len))?;
        Self::from_reader(r, n_chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ShardIndex {
        let mut idx = ShardIndex::new(4);
        idx.set(0, ChunkAddress::new(0, 100)).unwrap();
        idx.set(2, ChunkAddress::new(100, 50)).unwrap();
        idx
    }

    #[test]
    fn layout() {
        let idx = sample();
        let bytes = idx.to_bytes();
        assert_eq!(bytes.len(), idx.nbytes_on_disk());
        assert_eq!(bytes.len(), 4 * 16 + 4);
        assert_eq!(&bytes[0..8], &0u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &100u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &u64::MAX.to_le_bytes());
        let chksum = crc32c(&bytes[..64]);
        assert_eq!(&bytes[64..], &chksum.to_le_bytes());
    }

    #[test]
    fn read_from_shard() {
        let idx = sample();
        let mut shard = vec![9u8; 150];
        idx.write_to(&mut shard).unwrap();
        let read = ShardIndex::from_shard(&mut Cursor::new(shard), 4).unwrap();
        assert_eq!(read, idx);
        assert!(read.get(1).unwrap().is_empty());
        assert_eq!(read.get(2).unwrap().end_offset(), Some(150));
    }

    #[test]
    fn corrupt_index_detected() {
        let mut bytes = sample().to_bytes();
        bytes[3] ^= 0xff;
        assert!(matches!(
            ShardIndex::from_reader(&mut Cursor::new(bytes), 4),
            Err(ShardIndexError::ChecksumFailure)
        ));
    }

    #[test]
    fn set_out_of_bounds() {
        let mut idx = ShardIndex::new(2);
        assert!(matches!(
            idx.set(2, ChunkAddress::new(0, 1)),
            Err(ShardIndexError::OutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn entries_match_address_encoding() {
        let idx = sample();
        let bytes = idx.to_bytes();
        let mut expected = Vec::new();
        for c in idx.iter() {
            c.write_to(&mut expected).unwrap();
        }
        assert_eq!(&bytes[..expected.len()], &expected[..]);
        assert_eq!(bytes.len(), expected.len() + CHECKSUM_LEN);
    }
}
