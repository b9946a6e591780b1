use super::{source_view, ColumnMapping, DecodeContext, HandlerData, HandlerDataFactory, TypeHandler};
use crate::buffer::ChunkedBuffer;
use crate::column::Column;
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::string_pool::{is_sentinel, StringPool, NONE_OFFSET};
use std::sync::{Arc, Mutex};

/// Session state for native output: the single pool every decoded segment re-interns into.
#[derive(Debug, Default)]
pub struct NativeHandlerData {
    pool: Mutex<StringPool>,
}

impl NativeHandlerData {
    /// Move the accumulated pool out, leaving an empty one behind.
    pub fn take_pool(&self) -> ColumnarResult<Arc<StringPool>> {
        let mut pool = self.lock()?;
        Ok(Arc::new(std::mem::take(&mut *pool)))
    }

    fn lock(&self) -> ColumnarResult<std::sync::MutexGuard<'_, StringPool>> {
        self.pool.lock().map_err(|_| {
            ColumnarError::AssertionFailure("native string pool lock poisoned".to_owned())
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeHandlerDataFactory;

impl HandlerDataFactory for NativeHandlerDataFactory {
    fn create(&self) -> HandlerData {
        HandlerData::new(NativeHandlerData::default())
    }
}

/// Keeps strings as 64-bit offsets, rewritten to point into the session-wide output pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeStringHandler;

impl TypeHandler for NativeStringHandler {
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
        let state = data.expect_ref::<NativeHandlerData>("native string handler")?;

        // Sentinels keep their meaning in native output; absent rows become NONE_OFFSET.
        let mut offsets = Vec::with_capacity(mapping.num_rows);
        {
            let mut pool = state.lock()?;
            for offset in source.iter_rows::<u64>()? {
                offsets.push(match offset {
                    None => NONE_OFFSET,
                    Some(offset) if is_sentinel(offset) => offset,
                    Some(offset) => pool.get(source_view(string_pool, offset)?),
                });
            }
        }

        let slots = dest
            .buffer_mut()
            .bytes_at_mut(mapping.offset_bytes, offsets.len() * 8)
            .ok_or_else(|| {
                ColumnarError::AssertionFailure(format!(
                    "no {}-row block at offset {} in column {}",
                    offsets.len(),
                    mapping.offset_bytes,
                    mapping.column_index
                ))
            })?;
        for (slot, offset) in slots.chunks_exact_mut(8).zip(offsets) {
            slot.copy_from_slice(&offset.to_le_bytes());
        }
        Ok(())
    }

    fn default_initialize(
        &self,
        buffer: &mut ChunkedBuffer,
        column_index: usize,
        offset: usize,
        byte_size: usize,
        _ctx: &DecodeContext<'_>,
        _data: &HandlerData,
    ) -> ColumnarResult<()> {
        if byte_size == 0 {
            return Ok(());
        }
        let range = buffer.bytes_at_mut(offset, byte_size).ok_or_else(|| {
            ColumnarError::AssertionFailure(format!(
                "cannot default-initialize {byte_size} bytes at {offset} in column {column_index}"
            ))
        })?;
        for slot in range.chunks_exact_mut(8) {
            slot.copy_from_slice(&NONE_OFFSET.to_le_bytes());
        }
        Ok(())
    }

    fn type_size(&self) -> usize {
        8
    }
}
