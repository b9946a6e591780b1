use super::{string_views, ColumnMapping, DecodeContext, HandlerData, HandlerDataFactory, TypeHandler};
use crate::bitmap::BitSet;
use crate::buffer::{AllocationType, ChunkedBuffer};
use crate::column::Column;
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::string_pool::StringPool;
use ahash::AHashMap;
use std::sync::Mutex;

/// What the string handler produced for one destination block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringBlockInfo {
    pub rows: usize,
    pub payload_bytes: usize,
    /// `None` when every row holds a string.
    pub validity: Option<BitSet>,
}

/// Session state for Arrow output.
///
/// Offsets and payload of a string block are produced by different passes; export reunites
/// them through this map, keyed by `(column_index, block_offset_bytes)`.
#[derive(Debug, Default)]
pub struct ArrowHandlerData {
    blocks: Mutex<AHashMap<(usize, usize), StringBlockInfo>>,
}

impl ArrowHandlerData {
    pub fn record(&self, column_index: usize, offset_bytes: usize, info: StringBlockInfo) -> ColumnarResult<()> {
        self.lock()?.insert((column_index, offset_bytes), info);
        Ok(())
    }

    pub fn block(&self, column_index: usize, offset_bytes: usize) -> ColumnarResult<Option<StringBlockInfo>> {
        Ok(self.lock()?.get(&(column_index, offset_bytes)).cloned())
    }

    fn lock(
        &self,
    ) -> ColumnarResult<std::sync::MutexGuard<'_, AHashMap<(usize, usize), StringBlockInfo>>> {
        self.blocks.lock().map_err(|_| {
            ColumnarError::AssertionFailure("arrow block map lock poisoned".to_owned())
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ArrowHandlerDataFactory;

impl HandlerDataFactory for ArrowHandlerDataFactory {
    fn create(&self) -> HandlerData {
        HandlerData::new(ArrowHandlerData::default())
    }
}

/// Converts pool offsets into Arrow `Utf8` layout: 32-bit end offsets in the destination
/// block and the concatenated UTF-8 payload in an extra buffer at the same byte offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArrowStringHandler;

impl TypeHandler for ArrowStringHandler {
    fn convert_type(
        &self,
        source: &Column,
        dest: &mut Column,
        mapping: &ColumnMapping,
        _ctx: &DecodeContext<'_>,
        data: &HandlerData,
        string_pool: Option<&StringPool>,
    ) -> ColumnarResult<()> {
        internal_check(source.row_count() == mapping.num_rows, || {
            format!(
                "column {} decoded {} rows, expected {}",
                mapping.column_index,
                source.row_count(),
                mapping.num_rows
            )
        })?;
        let state = data.expect_ref::<ArrowHandlerData>("arrow string handler")?;
        let views = string_views(source, string_pool)?.collect::<ColumnarResult<Vec<_>>>()?;

        // Prefix sum of payload lengths; the implicit leading 0 is added on export.
        let mut ends = Vec::with_capacity(views.len());
        let mut total = 0usize;
        for view in &views {
            total += view.map_or(0, <[u8]>::len);
            ends.push(u32::try_from(total).map_err(|_| ColumnarError::OffsetOverflow { bytes: total })?);
        }

        let buffer = dest.buffer_mut();
        if !ends.is_empty() {
            let slots = buffer
                .bytes_at_mut(mapping.offset_bytes, ends.len() * 4)
                .ok_or_else(|| {
                    ColumnarError::AssertionFailure(format!(
                        "no {}-row offsets block at {} in column {}",
                        ends.len(),
                        mapping.offset_bytes,
                        mapping.column_index
                    ))
                })?;
            for (slot, end) in slots.chunks_exact_mut(4).zip(&ends) {
                slot.copy_from_slice(&end.to_le_bytes());
            }
        }

        let payload =
            buffer.create_extra_buffer(mapping.offset_bytes, total, AllocationType::Detachable)?;
        let mut pos = 0;
        for bytes in views.iter().flatten() {
            payload[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        }

        let validity = views
            .iter()
            .any(Option::is_none)
            .then(|| BitSet::from_bools(&views.iter().map(Option::is_some).collect::<Vec<_>>()));
        log::debug!(
            "arrow strings: column {} block @{}: {} rows, {total} payload bytes",
            mapping.column_index,
            mapping.offset_bytes,
            views.len()
        );
        state.record(
            mapping.column_index,
            mapping.offset_bytes,
            StringBlockInfo {
                rows: views.len(),
                payload_bytes: total,
                validity,
            },
        )
    }

    fn default_initialize(
        &self,
        buffer: &mut ChunkedBuffer,
        column_index: usize,
        offset: usize,
        byte_size: usize,
        _ctx: &DecodeContext<'_>,
        data: &HandlerData,
    ) -> ColumnarResult<()> {
        let state = data.expect_ref::<ArrowHandlerData>("arrow string handler")?;
        if byte_size > 0 {
            let range = buffer.bytes_at_mut(offset, byte_size).ok_or_else(|| {
                ColumnarError::AssertionFailure(format!(
                    "cannot default-initialize {byte_size} bytes at {offset} in column {column_index}"
                ))
            })?;
            range.fill(0);
        }
        buffer.create_extra_buffer(offset, 0, AllocationType::Detachable)?;
        let rows = byte_size / self.type_size();
        state.record(
            column_index,
            offset,
            StringBlockInfo {
                rows,
                payload_bytes: 0,
                validity: Some(BitSet::with_len_all_false(rows)),
            },
        )
    }

    fn type_size(&self) -> usize {
        4
    }
}
