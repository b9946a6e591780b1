//! Decoding encoded segments into a frame.
//!
//! A frame has one [`Column`] per field, allocated up front with one detachable block per
//! segment. Each segment's field is decoded into its own block: through the registered
//! [`TypeHandler`](crate::handlers::TypeHandler) for its type if there is one, otherwise
//! directly (zero-copy when the field is dense and already of the frame's type). Rows a segment
//! does not provide are default-initialized.

use crate::bitmap::BitSet;
use crate::codec::{DecodeCursor, EncodedField, EncodingVersion, FieldDecoder, PlainCodec};
use crate::column::{transform_with_default, Column, ColumnWithStrings};
use crate::config::ReadOptions;
use crate::dispatch::{visit_type, ScalarTag, TypeVisitor};
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::handlers::{
    decode_staging, ColumnMapping, DecodeContext, HandlerData, NativeHandlerData, OutputFormat,
    TypeHandlerRegistry,
};
use crate::promotion::common_type;
use crate::string_pool::StringPool;
use crate::types::{DataType, NativeType, TypeDescriptor};
use ahash::AHashMap;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_desc: TypeDescriptor,
}

impl Field {
    pub fn new(name: impl Into<String>, type_desc: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            type_desc,
        }
    }
}

/// One encoded row slice: field metadata, the encoded bytes of every field laid out back to
/// back, and the string pool the slice's string offsets point into.
pub struct EncodedSegment {
    row_count: usize,
    fields: Vec<Field>,
    encoded: Vec<Box<dyn EncodedField>>,
    field_offsets: Vec<usize>,
    data: Bytes,
    string_pool: Option<Arc<StringPool>>,
}

impl EncodedSegment {
    pub fn new(
        row_count: usize,
        fields: Vec<Field>,
        encoded: Vec<Box<dyn EncodedField>>,
        data: Bytes,
        string_pool: Option<Arc<StringPool>>,
    ) -> ColumnarResult<Self> {
        if fields.len() != encoded.len() {
            return Err(ColumnarError::Decode(format!(
                "{} fields described by {} encoded fields",
                fields.len(),
                encoded.len()
            )));
        }
        let mut field_offsets = Vec::with_capacity(encoded.len());
        let mut end = 0usize;
        for (field, enc) in fields.iter().zip(&encoded) {
            if enc.row_count() != row_count {
                return Err(ColumnarError::Decode(format!(
                    "field '{}' has {} rows in a {row_count}-row segment",
                    field.name,
                    enc.row_count()
                )));
            }
            field_offsets.push(end);
            end += enc.encoded_byte_length();
        }
        if end > data.len() {
            return Err(ColumnarError::Decode(format!(
                "fields need {end} bytes but the segment holds {}",
                data.len()
            )));
        }
        Ok(Self {
            row_count,
            fields,
            encoded,
            field_offsets,
            data,
            string_pool,
        })
    }

    /// Encode `columns` with [`PlainCodec`].
    pub fn encode_plain(
        columns: &[(&str, &Column)],
        string_pool: Option<Arc<StringPool>>,
        version: EncodingVersion,
    ) -> ColumnarResult<Self> {
        let row_count = columns.first().map_or(0, |(_, c)| c.row_count());
        let mut data = Vec::new();
        let mut fields = Vec::with_capacity(columns.len());
        let mut encoded: Vec<Box<dyn EncodedField>> = Vec::with_capacity(columns.len());
        for (name, column) in columns {
            if column.row_count() != row_count {
                return Err(ColumnarError::invalid_argument(
                    "encode segment",
                    format!(
                        "column '{name}' has {} rows, expected {row_count}",
                        column.row_count()
                    ),
                ));
            }
            fields.push(Field::new(*name, column.type_desc()));
            encoded.push(Box::new(PlainCodec::encode(column, version, &mut data)));
        }
        Self::new(row_count, fields, encoded, Bytes::from(data), string_pool)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn string_pool(&self) -> Option<&Arc<StringPool>> {
        self.string_pool.as_ref()
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn cursor_at(&self, index: usize) -> ColumnarResult<DecodeCursor> {
        let mut cursor = DecodeCursor::new(self.data.clone());
        cursor.seek(self.field_offsets[index])?;
        Ok(cursor)
    }
}

/// Decoded output: one column per field, with one block per source segment.
#[derive(Debug)]
pub struct Frame {
    pub(crate) fields: Vec<Field>,
    pub(crate) columns: Vec<Column>,
    /// Rows with no value for columns decoded without a handler; `None` when all are valid.
    pub(crate) validity: Vec<Option<BitSet>>,
    pub(crate) block_rows: Vec<usize>,
    pub(crate) output_format: OutputFormat,
    pub(crate) string_pool: Option<Arc<StringPool>>,
}

impl Frame {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        self.columns.get(index)
    }

    /// Like [`Frame::column_by_name`], failing with [`ColumnarError::KeyNotFound`].
    pub fn try_column(&self, name: &str) -> ColumnarResult<&Column> {
        self.column_by_name(name)
            .ok_or_else(|| ColumnarError::KeyNotFound(name.to_owned()))
    }

    pub fn validity(&self, index: usize) -> Option<&BitSet> {
        self.validity.get(index)?.as_ref()
    }

    pub fn row_count(&self) -> usize {
        self.block_rows.iter().sum()
    }

    pub fn block_rows(&self) -> &[usize] {
        &self.block_rows
    }

    pub fn num_blocks(&self) -> usize {
        self.block_rows.len()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Pool backing native string columns.
    pub fn string_pool(&self) -> Option<&Arc<StringPool>> {
        self.string_pool.as_ref()
    }

    pub fn into_columns_with_strings(self) -> Vec<ColumnWithStrings> {
        let pool = self.string_pool;
        self.fields
            .into_iter()
            .zip(self.columns)
            .map(|(field, column)| {
                let pool = column.data_type().is_sequence().then(|| pool.clone()).flatten();
                ColumnWithStrings::new(Arc::new(column), pool, field.name)
            })
            .collect()
    }
}

/// The "no value" element of fixed-width types: NaN for floats, NaT for time, zero otherwise.
pub fn default_value<T: ScalarTag>() -> T::Raw {
    if T::Raw::IS_FLOAT {
        T::Raw::from_f64(f64::NAN)
    } else if T::DATA_TYPE.is_time() {
        T::Raw::from_i128(i128::from(i64::MIN))
    } else {
        T::Raw::default()
    }
}

/// Decode every field of `segments` into a new frame.
///
/// Fields are matched by name; a field's frame type is the common type of its types across
/// segments. `handler_data` must come from `registry.handler_data(options.output_format)` and
/// is needed again to export the frame.
pub fn decode_segments_into_frame(
    segments: &[EncodedSegment],
    registry: &TypeHandlerRegistry,
    decoder: &dyn FieldDecoder,
    options: &ReadOptions,
    handler_data: &HandlerData,
) -> ColumnarResult<Frame> {
    let fields = unify_fields(segments)?;
    let block_rows: Vec<usize> = segments.iter().map(EncodedSegment::row_count).collect();
    let format = options.output_format;
    let ctx = DecodeContext {
        decoder,
        encoding_version: options.encoding_version,
        output_format: format,
    };

    let mut columns = fields
        .iter()
        .map(|field| {
            let data_type =
                field
                    .type_desc
                    .data_type()
                    .ok_or(ColumnarError::UnsupportedColumnType {
                        operation: "decode",
                        type_desc: field.type_desc,
                    })?;
            let element_size = match registry.get_handler(format, data_type) {
                Some(handler) => handler.type_size(),
                None if data_type.is_empty() => 0,
                None => data_type.size_bytes(),
            };
            Ok(Column::detachable(data_type, element_size, &block_rows))
        })
        .collect::<ColumnarResult<Vec<_>>>()?;
    let mut validity: Vec<Option<BitSet>> = vec![None; fields.len()];

    log::debug!(
        "decoding {} fields from {} segments ({:?})",
        fields.len(),
        segments.len(),
        format
    );
    for_each_column(
        options.parallel,
        &mut columns,
        &mut validity,
        |index, column, validity| {
            let job = ColumnJob {
                index,
                field: &fields[index],
                segments,
                registry,
                ctx: &ctx,
                handler_data,
            };
            job.decode(column, validity)
        },
    )?;

    let string_pool = match (
        format,
        handler_data.downcast_ref::<NativeHandlerData>(),
    ) {
        (OutputFormat::Native, Some(state)) => Some(state.take_pool()?),
        _ => None,
    };
    Ok(Frame {
        fields,
        columns,
        validity,
        block_rows,
        output_format: format,
        string_pool,
    })
}

fn unify_fields(segments: &[EncodedSegment]) -> ColumnarResult<Vec<Field>> {
    let mut fields: Vec<Field> = Vec::new();
    let mut by_name: AHashMap<&str, usize> = AHashMap::new();
    for segment in segments {
        for field in &segment.fields {
            match by_name.get(field.name.as_str()) {
                Some(&index) => {
                    let existing = fields[index].type_desc;
                    fields[index].type_desc =
                        common_type(&existing, &field.type_desc).ok_or_else(|| {
                            ColumnarError::invalid_argument(
                                "decode",
                                format!(
                                    "field '{}' is {existing} in one segment and {} in another",
                                    field.name, field.type_desc
                                ),
                            )
                        })?;
                }
                None => {
                    by_name.insert(field.name.as_str(), fields.len());
                    fields.push(field.clone());
                }
            }
        }
    }
    Ok(fields)
}

#[cfg_attr(
    not(all(feature = "parallel", not(target_arch = "wasm32"))),
    allow(unused_variables)
)]
fn for_each_column<F>(
    parallel: bool,
    columns: &mut [Column],
    validity: &mut [Option<BitSet>],
    f: F,
) -> ColumnarResult<()>
where
    F: Fn(usize, &mut Column, &mut Option<BitSet>) -> ColumnarResult<()> + Send + Sync,
{
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    if parallel && columns.len() > 1 {
        if let Some(pool) = crate::parallel::rayon_pool() {
            use rayon::prelude::*;
            return pool.install(|| {
                columns
                    .par_iter_mut()
                    .zip(validity.par_iter_mut())
                    .enumerate()
                    .try_for_each(|(index, (column, validity))| f(index, column, validity))
            });
        }
    }

    columns
        .iter_mut()
        .zip(validity.iter_mut())
        .enumerate()
        .try_for_each(|(index, (column, validity))| f(index, column, validity))
}

struct ColumnJob<'a> {
    index: usize,
    field: &'a Field,
    segments: &'a [EncodedSegment],
    registry: &'a TypeHandlerRegistry,
    ctx: &'a DecodeContext<'a>,
    handler_data: &'a HandlerData,
}

impl ColumnJob<'_> {
    fn decode(&self, column: &mut Column, validity: &mut Option<BitSet>) -> ColumnarResult<()> {
        let data_type = column.data_type();
        let handler = self.registry.get_handler(self.ctx.output_format, data_type);
        let total_rows = column.row_count();
        let mut first_row = 0;

        for segment in self.segments {
            let rows = segment.row_count();
            if rows == 0 {
                continue;
            }
            let offset_bytes = first_row * column.element_size();
            let source = segment
                .field_index(&self.field.name)
                .filter(|&i| !segment.fields[i].type_desc.data_type().is_some_and(DataType::is_empty));

            match (source, handler) {
                (Some(i), Some(handler)) => {
                    let mapping = self.mapping(segment, i, offset_bytes, rows);
                    log::debug!("field '{}' -> handler ({})", self.field.name, mapping.source_type_desc);
                    let mut cursor = segment.cursor_at(i)?;
                    handler.handle_type(
                        &mut cursor,
                        column,
                        segment.encoded[i].as_ref(),
                        &mapping,
                        self.ctx,
                        self.handler_data,
                        segment.string_pool.as_deref(),
                    )?;
                }
                (Some(i), None) => {
                    let mapping = self.mapping(segment, i, offset_bytes, rows);
                    log::debug!("field '{}' -> direct ({})", self.field.name, mapping.source_type_desc);
                    let mut cursor = segment.cursor_at(i)?;
                    let absent = self.decode_direct(&mut cursor, column, segment, i, &mapping, first_row)?;
                    if let Some(map) = absent {
                        log::warn!(
                            "field '{}': {} sparse rows back-filled with defaults",
                            self.field.name,
                            rows - map.count_ones()
                        );
                        let missing = (0..rows).filter(|&row| !map.get(row));
                        mark_absent(validity, total_rows, missing.map(|row| first_row + row));
                    }
                }
                (None, Some(handler)) => {
                    let byte_size = rows * column.element_size();
                    handler.default_initialize(
                        column.buffer_mut(),
                        self.index,
                        offset_bytes,
                        byte_size,
                        self.ctx,
                        self.handler_data,
                    )?;
                }
                (None, None) => {
                    if !data_type.is_empty() {
                        visit_type(
                            data_type,
                            FillDefault {
                                column: &mut *column,
                                first_row,
                                rows,
                            },
                        )?;
                    }
                    mark_absent(validity, total_rows, first_row..first_row + rows);
                }
            }
            first_row += rows;
        }
        Ok(())
    }

    fn mapping(
        &self,
        segment: &EncodedSegment,
        field_index: usize,
        offset_bytes: usize,
        num_rows: usize,
    ) -> ColumnMapping {
        ColumnMapping {
            source_type_desc: segment.fields[field_index].type_desc,
            dest_type_desc: self.field.type_desc,
            offset_bytes,
            num_rows,
            column_index: self.index,
        }
    }

    /// Decode without a handler. Returns the segment's sparse map if it has absent rows.
    fn decode_direct(
        &self,
        cursor: &mut DecodeCursor,
        dest: &mut Column,
        segment: &EncodedSegment,
        field_index: usize,
        mapping: &ColumnMapping,
        first_row: usize,
    ) -> ColumnarResult<Option<BitSet>> {
        let (staging, _) = decode_staging(
            cursor,
            segment.encoded[field_index].as_ref(),
            mapping,
            self.ctx,
        )?;
        internal_check(staging.row_count() == mapping.num_rows, || {
            format!(
                "field '{}' decoded {} rows, expected {}",
                self.field.name,
                staging.row_count(),
                mapping.num_rows
            )
        })?;

        let zero_copy = staging.data_type() == dest.data_type()
            && !staging.is_sparse()
            && staging.element_size() == dest.element_size()
            && staging.buffer().num_blocks() == 1;
        if zero_copy {
            let (blocks, _) = staging.into_buffer().into_parts();
            for (_, bytes) in blocks {
                dest.replace_block(mapping.offset_bytes, bytes)?;
            }
            return Ok(None);
        }

        let promoted = staging.cast(dest.data_type())?;
        visit_type(
            dest.data_type(),
            ScatterWithDefault {
                source: &promoted,
                dest,
                first_row,
            },
        )?;
        Ok(staging.opt_sparse_map().cloned())
    }
}

fn mark_absent(validity: &mut Option<BitSet>, total_rows: usize, rows: impl Iterator<Item = usize>) {
    let bits = validity.get_or_insert_with(|| BitSet::with_len_all_true(total_rows));
    for row in rows {
        bits.set(row, false);
    }
}

struct FillDefault<'a> {
    column: &'a mut Column,
    first_row: usize,
    rows: usize,
}

impl TypeVisitor for FillDefault<'_> {
    type Output = ColumnarResult<()>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        self.column
            .fill(self.first_row, self.rows, default_value::<T>())
    }
}

struct ScatterWithDefault<'a> {
    source: &'a Column,
    dest: &'a mut Column,
    first_row: usize,
}

impl TypeVisitor for ScatterWithDefault<'_> {
    type Output = ColumnarResult<()>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        transform_with_default::<T, T>(
            self.source,
            self.dest,
            self.first_row,
            default_value::<T>(),
            |v| v,
        )
    }
}
