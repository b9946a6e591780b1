//! Arrow C data interface export.
//!
//! A decoded [`Frame`] becomes one Arrow array per (column, block). Fixed-width blocks are
//! handed to Arrow without copying: the block's `Bytes` becomes the array's value buffer.

use crate::bitmap::BitSet;
use crate::column::ColumnWithStrings;
use crate::dispatch::{visit_type, ScalarTag, TypeVisitor};
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::frame::{default_value, Frame};
use crate::handlers::{ArrowHandlerData, HandlerData, OutputFormat};
use crate::types::{DataType, NativeType};
use arrow_array::ffi::{FFI_ArrowArray, FFI_ArrowSchema};
use arrow_array::{make_array, ArrayRef, BooleanArray, NullArray, StringArray};
use arrow_buffer::{BooleanBuffer, Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_data::ArrayData;
use arrow_schema::{DataType as ArrowType, Field as ArrowField, TimeUnit};
use bytes::Bytes;
use std::sync::Arc;

/// One exported array and its schema, at stable heap addresses.
pub struct ArrowData {
    array: Box<FFI_ArrowArray>,
    schema: Box<FFI_ArrowSchema>,
}

impl ArrowData {
    pub fn new(array: &ArrayRef, name: &str) -> ColumnarResult<Self> {
        let field = ArrowField::new(name, array.data_type().clone(), true);
        Ok(Self {
            array: Box::new(FFI_ArrowArray::new(&array.to_data())),
            schema: Box::new(FFI_ArrowSchema::try_from(&field)?),
        })
    }

    /// Address of the `ArrowArray` struct, valid while `self` is alive.
    pub fn array_address(&self) -> usize {
        &*self.array as *const FFI_ArrowArray as usize
    }

    /// Address of the `ArrowSchema` struct, valid while `self` is alive.
    pub fn schema_address(&self) -> usize {
        &*self.schema as *const FFI_ArrowSchema as usize
    }

    pub fn into_parts(self) -> (Box<FFI_ArrowArray>, Box<FFI_ArrowSchema>) {
        (self.array, self.schema)
    }
}

impl std::fmt::Debug for ArrowData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrowData")
            .field("array", &self.array_address())
            .field("schema", &self.schema_address())
            .finish()
    }
}

/// Exported frame: `data[column][block]`.
#[derive(Debug)]
pub struct ArrowOutputFrame {
    data: Vec<Vec<ArrowData>>,
    names: Vec<String>,
}

impl ArrowOutputFrame {
    pub fn new(data: Vec<Vec<ArrowData>>, names: Vec<String>) -> Self {
        Self { data, names }
    }

    pub fn arrays(&self) -> Vec<Vec<usize>> {
        self.data
            .iter()
            .map(|blocks| blocks.iter().map(ArrowData::array_address).collect())
            .collect()
    }

    pub fn schemas(&self) -> Vec<Vec<usize>> {
        self.data
            .iter()
            .map(|blocks| blocks.iter().map(ArrowData::schema_address).collect())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_columns(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<Vec<ArrowData>> {
        self.data
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedItem {
    pub symbol: String,
    pub version: u64,
    pub timestamp_ns: i64,
}

#[derive(Debug)]
pub struct ArrowReadResult {
    pub versioned_item: VersionedItem,
    pub frame: ArrowOutputFrame,
    pub user_metadata: Bytes,
}

pub fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Empty => ArrowType::Null,
        DataType::Bool8 => ArrowType::Boolean,
        DataType::Uint8 => ArrowType::UInt8,
        DataType::Uint16 => ArrowType::UInt16,
        DataType::Uint32 => ArrowType::UInt32,
        DataType::Uint64 => ArrowType::UInt64,
        DataType::Int8 => ArrowType::Int8,
        DataType::Int16 => ArrowType::Int16,
        DataType::Int32 => ArrowType::Int32,
        DataType::Int64 => ArrowType::Int64,
        DataType::Float32 => ArrowType::Float32,
        DataType::Float64 => ArrowType::Float64,
        DataType::NanosecondsSinceEpoch => ArrowType::Timestamp(TimeUnit::Nanosecond, None),
        DataType::FixedString64 | DataType::DynamicString64 => ArrowType::Utf8,
    }
}

/// Copy a standalone column (e.g. an operation result) into one Arrow array.
///
/// Absent rows and string sentinels become nulls.
pub fn arrow_array_from_column(column: &ColumnWithStrings) -> ColumnarResult<ArrayRef> {
    let data_type = column.data_type();
    let rows = column.row_count();
    if data_type.is_empty() {
        return Ok(Arc::new(NullArray::new(rows)));
    }
    if data_type.is_sequence() {
        let strings: Vec<Option<&str>> = (0..rows).map(|row| column.string_at(row)).collect();
        return Ok(Arc::new(StringArray::from(strings)));
    }
    visit_type(data_type, CopyColumn { column })
}

pub fn arrow_data_from_column(column: &ColumnWithStrings) -> ColumnarResult<ArrowData> {
    ArrowData::new(&arrow_array_from_column(column)?, &column.column_name)
}

/// Hand every block of every column of `frame` to Arrow: `arrays[column][block]`.
///
/// The frame must have been decoded with [`OutputFormat::Arrow`]; `handler_data` is the
/// session state it was decoded with.
pub fn frame_to_arrow_arrays(
    frame: Frame,
    handler_data: &HandlerData,
) -> ColumnarResult<Vec<Vec<ArrayRef>>> {
    if frame.output_format != OutputFormat::Arrow {
        return Err(ColumnarError::invalid_argument(
            "arrow export",
            format!("frame was decoded for {:?} output", frame.output_format),
        ));
    }
    let Frame {
        columns,
        validity,
        block_rows,
        ..
    } = frame;
    let string_state = handler_data.downcast_ref::<ArrowHandlerData>();

    columns
        .into_iter()
        .zip(validity)
        .enumerate()
        .map(|(index, (column, validity))| -> ColumnarResult<Vec<ArrayRef>> {
            let data_type = column.data_type();
            let element_size = column.element_size();
            let (blocks, mut extra) = column.into_buffer().into_parts();
            let mut blocks = blocks.into_iter();
            let mut first_row = 0;
            let mut arrays = Vec::with_capacity(block_rows.len());
            for &rows in &block_rows {
                let offset = first_row * element_size;
                let bytes = if element_size == 0 {
                    Bytes::new()
                } else {
                    let (block_offset, bytes) = blocks.next().ok_or_else(|| {
                        ColumnarError::AssertionFailure(format!(
                            "column {index} has fewer blocks than the frame"
                        ))
                    })?;
                    internal_check(
                        block_offset == offset && bytes.len() == rows * element_size,
                        || {
                            format!(
                                "column {index}: block at {block_offset} does not hold rows {first_row}..{}",
                                first_row + rows
                            )
                        },
                    )?;
                    bytes
                };
                let block = BlockExport {
                    column_index: index,
                    data_type,
                    rows,
                    offset,
                    bytes,
                };
                let array = if data_type.is_sequence() {
                    // A zero-row block shares its offset with the next block's payload.
                    let payload = if rows == 0 { None } else { extra.remove(&offset) };
                    block.string_array(payload, string_state)?
                } else {
                    let nulls = validity
                        .as_ref()
                        .and_then(|v| null_buffer(v, first_row, rows));
                    block.fixed_width_array(nulls)?
                };
                log::trace!(
                    "exported column {index} block @{offset}: {rows} rows as {}",
                    array.data_type()
                );
                arrays.push(array);
                first_row += rows;
            }
            Ok(arrays)
        })
        .collect()
}

/// Export `frame` through the C data interface: `data[column][block]`.
pub fn segment_to_arrow_data(
    frame: Frame,
    handler_data: &HandlerData,
) -> ColumnarResult<Vec<Vec<ArrowData>>> {
    let names = names_from_frame(&frame);
    frame_to_arrow_arrays(frame, handler_data)?
        .into_iter()
        .zip(&names)
        .map(|(arrays, name)| {
            arrays
                .iter()
                .map(|a| ArrowData::new(a, name))
                .collect::<ColumnarResult<Vec<_>>>()
        })
        .collect()
}

pub fn names_from_frame(frame: &Frame) -> Vec<String> {
    frame.fields().iter().map(|f| f.name.clone()).collect()
}

pub fn create_arrow_read_result(
    versioned_item: VersionedItem,
    frame: Frame,
    handler_data: &HandlerData,
    user_metadata: Bytes,
) -> ColumnarResult<ArrowReadResult> {
    let names = names_from_frame(&frame);
    let data = segment_to_arrow_data(frame, handler_data)?;
    log::debug!(
        "arrow read result for {}@{}: {} columns",
        versioned_item.symbol,
        versioned_item.version,
        data.len()
    );
    Ok(ArrowReadResult {
        versioned_item,
        frame: ArrowOutputFrame::new(data, names),
        user_metadata,
    })
}

fn null_buffer(validity: &BitSet, first_row: usize, rows: usize) -> Option<NullBuffer> {
    let valid: Vec<bool> = (first_row..first_row + rows).map(|row| validity.get(row)).collect();
    valid.contains(&false).then(|| NullBuffer::from(valid))
}

struct BlockExport {
    column_index: usize,
    data_type: DataType,
    rows: usize,
    offset: usize,
    bytes: Bytes,
}

impl BlockExport {
    fn fixed_width_array(self, nulls: Option<NullBuffer>) -> ColumnarResult<ArrayRef> {
        match self.data_type {
            DataType::Empty => Ok(Arc::new(NullArray::new(self.rows))),
            DataType::Bool8 => {
                let values: BooleanBuffer = self.bytes.iter().map(|&b| b != 0).collect();
                Ok(Arc::new(BooleanArray::new(values, nulls)))
            }
            data_type => {
                let data = ArrayData::builder(arrow_type(data_type))
                    .len(self.rows)
                    .add_buffer(Buffer::from(self.bytes))
                    .nulls(nulls)
                    .align_buffers(true)
                    .build()?;
                Ok(make_array(data))
            }
        }
    }

    /// Offsets come from the block (end offsets), the payload from the extra buffer at the
    /// block's offset and validity from the handler state.
    fn string_array(
        self,
        payload: Option<Bytes>,
        state: Option<&ArrowHandlerData>,
    ) -> ColumnarResult<ArrayRef> {
        if self.rows == 0 {
            return Ok(Arc::new(StringArray::from(Vec::<Option<&str>>::new())));
        }
        let state = state.ok_or_else(|| {
            ColumnarError::AssertionFailure("string export without arrow session state".to_owned())
        })?;
        let info = state
            .block(self.column_index, self.offset)?
            .ok_or_else(|| {
                ColumnarError::AssertionFailure(format!(
                    "no string block recorded for column {} at {}",
                    self.column_index, self.offset
                ))
            })?;
        let payload = payload.ok_or_else(|| {
            ColumnarError::AssertionFailure(format!(
                "column {} block @{} has no string payload",
                self.column_index, self.offset
            ))
        })?;
        internal_check(info.rows == self.rows && info.payload_bytes == payload.len(), || {
            format!(
                "column {} block @{}: recorded {} rows / {} bytes, found {} rows / {} bytes",
                self.column_index,
                self.offset,
                info.rows,
                info.payload_bytes,
                self.rows,
                payload.len()
            )
        })?;

        let mut offsets = Vec::with_capacity(self.rows + 1);
        offsets.push(0i32);
        for end in self.bytes.chunks_exact(4) {
            let end = u32::from_le_bytes([end[0], end[1], end[2], end[3]]);
            offsets.push(i32::try_from(end).map_err(|_| ColumnarError::OffsetOverflow {
                bytes: end as usize,
            })?);
        }
        let nulls = info.validity.map(|v| NullBuffer::from(v.iter().collect::<Vec<_>>()));
        let array = StringArray::try_new(
            OffsetBuffer::new(ScalarBuffer::from(offsets)),
            Buffer::from(payload),
            nulls,
        )?;
        Ok(Arc::new(array))
    }
}

struct CopyColumn<'a> {
    column: &'a ColumnWithStrings,
}

impl TypeVisitor for CopyColumn<'_> {
    type Output = ColumnarResult<ArrayRef>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        let column = &self.column.column;
        let rows = column.row_count();
        let mut valid = Vec::with_capacity(rows);
        let mut bytes = vec![0u8; rows * T::Raw::SIZE];
        for (slot, value) in bytes.chunks_exact_mut(T::Raw::SIZE).zip(column.iter_rows::<T::Raw>()?) {
            valid.push(value.is_some());
            value.unwrap_or_else(default_value::<T>).write_le(slot);
        }
        let nulls = valid.contains(&false).then(|| NullBuffer::from(valid));
        BlockExport {
            column_index: 0,
            data_type: T::DATA_TYPE,
            rows,
            offset: 0,
            bytes: Bytes::from(bytes),
        }
        .fixed_width_array(nulls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Bool8Tag, Int32Tag};
    use arrow_array::{Array, BooleanArray, Int32Array};

    #[test]
    fn standalone_column_nulls_follow_sparse_map() {
        let column = crate::column::Column::from_options::<Int32Tag>(&[Some(1), None, Some(3)]);
        let column = ColumnWithStrings::new(Arc::new(column), None, "c");
        let array = arrow_array_from_column(&column).unwrap();
        let ints = array.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ints.len(), 3);
        assert!(ints.is_null(1));
        assert_eq!(ints.value(2), 3);
    }

    #[test]
    fn bool_bytes_are_bit_packed() {
        let column = crate::column::Column::from_values::<Bool8Tag>(&[true, false, true]);
        let column = ColumnWithStrings::new(Arc::new(column), None, "b");
        let array = arrow_array_from_column(&column).unwrap();
        let bools = array.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert_eq!(bools.iter().collect::<Vec<_>>(), vec![Some(true), Some(false), Some(true)]);
    }

    #[test]
    fn time_maps_to_nanosecond_timestamps() {
        assert_eq!(
            arrow_type(DataType::NanosecondsSinceEpoch),
            ArrowType::Timestamp(TimeUnit::Nanosecond, None)
        );
        assert_eq!(arrow_type(DataType::FixedString64), ArrowType::Utf8);
    }
}
