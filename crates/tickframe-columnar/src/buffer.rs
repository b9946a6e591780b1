//! Block-structured byte storage for columns.
//!
//! A [`ChunkedBuffer`] is an ordered list of blocks addressed by a logical byte offset.
//! Blocks are either owned (`Vec<u8>`) or external (`bytes::Bytes` views into decode
//! input, never reallocated). Dynamic block capacities are multiples of 8 bytes, so no
//! fixed-width element ever straddles two blocks.
//!
//! Variable-length payload that belongs to a fixed-width column (e.g. the UTF-8 bytes
//! referenced by an offsets block) lives in *extra buffers*, keyed by the logical byte
//! offset of the primary block they belong to.

use crate::error::{internal_check, ColumnarError, ColumnarResult};
use bytes::Bytes;
use std::collections::BTreeMap;

pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationType {
    /// Growable storage made of fixed-capacity blocks.
    Dynamic,
    /// A single block sized up front.
    Presized,
    /// One block per row slice; each block is handed off (detached) independently on export.
    Detachable,
}

#[derive(Clone, Debug)]
enum BlockData {
    Owned(Vec<u8>),
    External(Bytes),
}

#[derive(Clone, Debug)]
pub struct Block {
    offset: usize,
    data: BlockData,
}

impl Block {
    /// Logical byte offset of the first byte of this block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_external(&self) -> bool {
        matches!(self.data, BlockData::External(_))
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.data {
            BlockData::Owned(v) => v,
            BlockData::External(b) => b,
        }
    }

    /// Hand the block's storage off without copying.
    pub fn into_bytes(self) -> Bytes {
        match self.data {
            BlockData::Owned(v) => Bytes::from(v),
            BlockData::External(b) => b,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtraBuffer {
    data: Vec<u8>,
    allocation: AllocationType,
}

impl ExtraBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn allocation(&self) -> AllocationType {
        self.allocation
    }
}

#[derive(Clone, Debug)]
pub struct ChunkedBuffer {
    blocks: Vec<Block>,
    bytes: usize,
    block_size: usize,
    allocation: AllocationType,
    external: bool,
    extra: BTreeMap<usize, ExtraBuffer>,
}

impl ChunkedBuffer {
    /// An empty growable buffer with the default block capacity.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            bytes: 0,
            block_size: block_size.max(8).next_multiple_of(8),
            allocation: AllocationType::Dynamic,
            external: false,
            extra: BTreeMap::new(),
        }
    }

    /// A single zeroed block of `bytes` bytes.
    pub fn presized(bytes: usize) -> Self {
        let mut out = Self::with_block_size(bytes);
        out.allocation = AllocationType::Presized;
        if bytes > 0 {
            out.blocks.push(Block {
                offset: 0,
                data: BlockData::Owned(vec![0u8; bytes]),
            });
        }
        out.bytes = bytes;
        out
    }

    /// One zeroed block per entry of `block_bytes`, laid out back to back.
    pub fn detachable(block_bytes: &[usize]) -> Self {
        let mut out = Self::new();
        out.allocation = AllocationType::Detachable;
        for &len in block_bytes {
            out.blocks.push(Block {
                offset: out.bytes,
                data: BlockData::Owned(vec![0u8; len]),
            });
            out.bytes += len;
        }
        out
    }

    /// A growable buffer whose first block takes ownership of `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let mut out = Self::new();
        out.bytes = data.len();
        if !data.is_empty() {
            out.blocks.push(Block {
                offset: 0,
                data: BlockData::Owned(data),
            });
        }
        out
    }

    /// An empty buffer that only accepts borrowed blocks.
    pub fn external() -> Self {
        let mut out = Self::new();
        out.external = true;
        out
    }

    pub fn allocation(&self) -> AllocationType {
        self.allocation
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Logical length in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Append bytes at the logical end, opening new blocks as needed.
    pub fn append(&mut self, mut data: &[u8]) -> ColumnarResult<()> {
        internal_check(!self.external, || {
            "cannot append owned bytes to an external buffer".to_owned()
        })?;
        internal_check(self.allocation == AllocationType::Dynamic, || {
            format!("cannot grow a {:?} buffer", self.allocation)
        })?;

        while !data.is_empty() {
            let block_size = self.block_size;
            let needs_block = match self.blocks.last() {
                Some(last) => last.len() >= block_size,
                None => true,
            };
            if needs_block {
                self.blocks.push(Block {
                    offset: self.bytes,
                    data: BlockData::Owned(Vec::with_capacity(block_size)),
                });
            }
            let Some(Block {
                data: BlockData::Owned(last),
                ..
            }) = self.blocks.last_mut()
            else {
                return Err(ColumnarError::AssertionFailure(
                    "dynamic buffer holds a borrowed block".to_owned(),
                ));
            };
            let take = (block_size - last.len()).min(data.len());
            last.extend_from_slice(&data[..take]);
            self.bytes += take;
            data = &data[take..];
        }
        Ok(())
    }

    /// Append `bytes` zeroed bytes.
    pub fn ensure_zeroed(&mut self, bytes: usize) -> ColumnarResult<()> {
        const ZEROS: [u8; 512] = [0u8; 512];
        let mut remaining = bytes;
        while remaining > 0 {
            let take = remaining.min(ZEROS.len());
            self.append(&ZEROS[..take])?;
            remaining -= take;
        }
        Ok(())
    }

    /// Attach a borrowed block at logical byte offset `block_offset`.
    ///
    /// Blocks must be attached in order and back to back.
    pub fn add_external_block(&mut self, data: Bytes, block_offset: usize) -> ColumnarResult<()> {
        internal_check(self.external, || {
            "external blocks can only be attached to an external buffer".to_owned()
        })?;
        internal_check(block_offset == self.bytes, || {
            format!(
                "external block at offset {block_offset} is not contiguous with buffer end {}",
                self.bytes
            )
        })?;
        self.bytes += data.len();
        self.blocks.push(Block {
            offset: block_offset,
            data: BlockData::External(data),
        });
        Ok(())
    }

    /// Swap the owned block starting at `block_offset` for a borrowed block of identical size.
    pub fn replace_block(&mut self, block_offset: usize, data: Bytes) -> ColumnarResult<()> {
        let idx = self.block_index_at(block_offset).filter(|&i| {
            self.blocks[i].offset == block_offset && self.blocks[i].len() == data.len()
        });
        let Some(idx) = idx else {
            return Err(ColumnarError::AssertionFailure(format!(
                "no block of {} bytes starts at offset {block_offset}",
                data.len()
            )));
        };
        self.blocks[idx].data = BlockData::External(data);
        Ok(())
    }

    /// Contiguous view of `len` bytes at logical `offset`, if they lie within one block.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let block = &self.blocks[self.block_index_at(offset)?];
        let start = offset - block.offset;
        block.as_slice().get(start..start.checked_add(len)?)
    }

    /// Mutable view of `len` bytes at logical `offset`. Borrowed blocks are read-only.
    pub fn bytes_at_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let idx = self.block_index_at(offset)?;
        let block = &mut self.blocks[idx];
        let start = offset - block.offset;
        match &mut block.data {
            BlockData::Owned(v) => v.get_mut(start..start.checked_add(len)?),
            BlockData::External(_) => None,
        }
    }

    /// Mutable views of the bytes in `offset..offset + len`, one slice per block they span.
    /// Fails if the range reaches past the end or touches a borrowed block.
    pub fn range_mut(
        &mut self,
        offset: usize,
        len: usize,
    ) -> ColumnarResult<impl Iterator<Item = &mut [u8]> + '_> {
        let end = offset.saturating_add(len);
        internal_check(end <= self.bytes, || {
            format!("range {offset}..{end} is past the end of a {} byte buffer", self.bytes)
        })?;
        let overlaps = move |b: &Block| b.offset < end && b.offset + b.len() > offset;
        internal_check(
            self.blocks.iter().filter(|b| overlaps(b)).all(|b| !b.is_external()),
            || "cannot write into a borrowed block".to_owned(),
        )?;
        Ok(self
            .blocks
            .iter_mut()
            .filter(move |b| overlaps(b))
            .filter_map(move |b| {
                let start = offset.saturating_sub(b.offset);
                let stop = (end - b.offset).min(b.len());
                match &mut b.data {
                    BlockData::Owned(v) => v.get_mut(start..stop),
                    BlockData::External(_) => None,
                }
            }))
    }

    /// Copy the whole logical contents into one vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes);
        for block in &self.blocks {
            out.extend_from_slice(block.as_slice());
        }
        out
    }

    /// Allocate a zeroed auxiliary buffer of `bytes` bytes owned by this buffer and keyed by
    /// the logical offset of the primary storage it belongs to.
    pub fn create_extra_buffer(
        &mut self,
        offset: usize,
        bytes: usize,
        allocation: AllocationType,
    ) -> ColumnarResult<&mut [u8]> {
        internal_check(!self.extra.contains_key(&offset), || {
            format!("extra buffer already attached at offset {offset}")
        })?;
        let extra = self.extra.entry(offset).or_insert(ExtraBuffer {
            data: vec![0u8; bytes],
            allocation,
        });
        Ok(&mut extra.data)
    }

    pub fn extra_buffer(&self, offset: usize) -> Option<&ExtraBuffer> {
        self.extra.get(&offset)
    }

    pub fn has_extra_buffer(&self, offset: usize) -> bool {
        self.extra.contains_key(&offset)
    }

    /// Consume the buffer, returning its blocks and extra buffers as shareable byte handles.
    pub fn into_parts(self) -> (Vec<(usize, Bytes)>, BTreeMap<usize, Bytes>) {
        let blocks = self
            .blocks
            .into_iter()
            .map(|b| (b.offset, b.into_bytes()))
            .collect();
        let extra = self
            .extra
            .into_iter()
            .map(|(offset, e)| (offset, Bytes::from(e.data)))
            .collect();
        (blocks, extra)
    }

    fn block_index_at(&self, offset: usize) -> Option<usize> {
        if offset >= self.bytes {
            return None;
        }
        // Last block whose start is <= offset.
        let idx = self.blocks.partition_point(|b| b.offset <= offset);
        idx.checked_sub(1)
    }
}

impl Default for ChunkedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_spills_into_new_blocks_at_capacity() {
        let mut buf = ChunkedBuffer::with_block_size(8);
        buf.append(&[1u8; 12]).unwrap();
        buf.append(&[2u8; 6]).unwrap();
        assert_eq!(buf.bytes(), 18);
        assert_eq!(buf.num_blocks(), 3);
        let offsets: Vec<usize> = buf.blocks().iter().map(Block::offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(buf.bytes_at(8, 4), Some(&[1u8, 1, 1, 1][..]));
        assert_eq!(buf.bytes_at(12, 4), Some(&[2u8; 4][..]));
        // Spans two blocks.
        assert_eq!(buf.bytes_at(6, 4), None);
    }

    #[test]
    fn external_blocks_must_be_contiguous() {
        let mut buf = ChunkedBuffer::external();
        buf.add_external_block(Bytes::from_static(&[1, 2, 3, 4]), 0)
            .unwrap();
        let err = buf
            .add_external_block(Bytes::from_static(&[5]), 8)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(buf.append(&[0]).is_err());
        assert!(buf.bytes_at_mut(0, 1).is_none());
    }

    #[test]
    fn detachable_blocks_keep_slice_boundaries() {
        let mut buf = ChunkedBuffer::detachable(&[4, 8]);
        buf.bytes_at_mut(4, 8).unwrap().copy_from_slice(&[9u8; 8]);
        assert_eq!(buf.bytes_at(4, 8), Some(&[9u8; 8][..]));
        buf.replace_block(0, Bytes::from_static(&[7, 7, 7, 7]))
            .unwrap();
        assert!(buf.blocks()[0].is_external());
        assert!(buf.replace_block(4, Bytes::from_static(&[1])).is_err());
    }

    #[test]
    fn extra_buffers_are_keyed_by_offset() {
        let mut buf = ChunkedBuffer::presized(16);
        buf.create_extra_buffer(8, 3, AllocationType::Detachable)
            .unwrap()
            .copy_from_slice(b"abc");
        assert_eq!(buf.extra_buffer(8).unwrap().as_slice(), b"abc");
        assert!(buf
            .create_extra_buffer(8, 1, AllocationType::Detachable)
            .is_err());
        let (blocks, extra) = buf.into_parts();
        assert_eq!(blocks.len(), 1);
        assert_eq!(extra.get(&8).map(|b| b.as_ref()), Some(&b"abc"[..]));
    }
}
