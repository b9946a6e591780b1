//! Typed column storage.
//!
//! A [`Column`] is either dense (one physical element per logical row) or sparse (a
//! [`BitSet`] sparse map selects which logical rows are physically stored, packed in
//! ascending row order). Element bytes live in a [`ChunkedBuffer`].

use crate::bitmap::BitSet;
use crate::buffer::ChunkedBuffer;
use crate::dispatch::{visit_type_pair, PairVisitor, ScalarTag};
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::stats::Statistics;
use crate::string_pool::StringPool;
use crate::types::{cast, DataType, NativeType, TypeDescriptor};
use bytes::Bytes;
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sparsity {
    Permitted,
    NotPermitted,
}

#[derive(Clone, Debug)]
pub struct Column {
    type_desc: TypeDescriptor,
    data_type: DataType,
    row_count: usize,
    buffer: ChunkedBuffer,
    sparse_map: Option<BitSet>,
    sparsity: Sparsity,
    /// Bytes per physical element. Usually the data type's width, but output columns may store
    /// a narrower representation (e.g. 32-bit string offsets).
    element_size: usize,
    statistics: Statistics,
}

/// `EMPTYVAL` columns carry a row count and no storage.
fn storage_width(data_type: DataType) -> usize {
    if data_type.is_empty() {
        0
    } else {
        data_type.size_bytes()
    }
}

impl Column {
    /// An empty growable column.
    pub fn new(data_type: DataType, sparsity: Sparsity) -> Self {
        Self::with_buffer(data_type, sparsity, ChunkedBuffer::new())
    }

    pub fn with_block_size(data_type: DataType, sparsity: Sparsity, block_size: usize) -> Self {
        Self::with_buffer(data_type, sparsity, ChunkedBuffer::with_block_size(block_size))
    }

    /// A dense column of `rows` zeroed rows in a single block.
    pub fn presized(data_type: DataType, rows: usize) -> Self {
        let mut out = Self::with_buffer(
            data_type,
            Sparsity::NotPermitted,
            ChunkedBuffer::presized(rows * storage_width(data_type)),
        );
        out.row_count = rows;
        out
    }

    /// A dense column with one zeroed block per entry of `block_rows`, each element
    /// `element_size` bytes wide.
    pub fn detachable(data_type: DataType, element_size: usize, block_rows: &[usize]) -> Self {
        let block_bytes: Vec<usize> = block_rows.iter().map(|rows| rows * element_size).collect();
        let mut out = Self::with_buffer(
            data_type,
            Sparsity::NotPermitted,
            ChunkedBuffer::detachable(&block_bytes),
        );
        out.element_size = element_size;
        out.row_count = block_rows.iter().sum();
        out
    }

    /// A column that only accepts borrowed blocks (see [`Column::add_external_block`]).
    pub fn external(data_type: DataType, sparsity: Sparsity) -> Self {
        Self::with_buffer(data_type, sparsity, ChunkedBuffer::external())
    }

    /// An `EMPTYVAL` column of `rows` rows.
    pub fn empty_rows(rows: usize) -> Self {
        let mut out = Self::new(DataType::Empty, Sparsity::NotPermitted);
        out.row_count = rows;
        out
    }

    /// Resolve `type_desc` and build an empty growable column for it.
    pub fn from_type_desc(type_desc: TypeDescriptor, sparsity: Sparsity) -> ColumnarResult<Self> {
        let data_type = type_desc
            .data_type()
            .ok_or(ColumnarError::UnsupportedColumnType {
                operation: "allocate column",
                type_desc,
            })?;
        let mut out = Self::new(data_type, sparsity);
        out.type_desc = type_desc;
        Ok(out)
    }

    /// A dense column holding `values`.
    pub fn from_values<T: ScalarTag>(values: &[T::Raw]) -> Self {
        let mut data = vec![0u8; values.len() * T::Raw::SIZE];
        for (slot, &v) in data.chunks_exact_mut(T::Raw::SIZE).zip(values) {
            v.write_le(slot);
        }
        let mut out = Self::with_buffer(
            T::DATA_TYPE,
            Sparsity::NotPermitted,
            ChunkedBuffer::from_vec(data),
        );
        out.row_count = values.len();
        out
    }

    /// A column holding `values`, sparse if any entry is `None`.
    pub fn from_options<T: ScalarTag>(values: &[Option<T::Raw>]) -> Self {
        let present: Vec<T::Raw> = values.iter().flatten().copied().collect();
        let mut out = Self::from_values::<T>(&present);
        out.sparsity = Sparsity::Permitted;
        if present.len() != values.len() {
            let map = BitSet::from_bools(&values.iter().map(Option::is_some).collect::<Vec<_>>());
            out.row_count = map.len();
            out.sparse_map = Some(map);
        }
        out
    }

    fn with_buffer(data_type: DataType, sparsity: Sparsity, buffer: ChunkedBuffer) -> Self {
        Self {
            type_desc: TypeDescriptor::scalar(data_type),
            data_type,
            row_count: 0,
            buffer,
            sparse_map: None,
            sparsity,
            element_size: storage_width(data_type),
            statistics: Statistics::Empty,
        }
    }

    pub fn type_desc(&self) -> TypeDescriptor {
        self.type_desc
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Logical number of rows.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Number of physically stored elements.
    pub fn physical_row_count(&self) -> usize {
        match &self.sparse_map {
            Some(map) => map.count_ones(),
            None => self.row_count,
        }
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn sparsity(&self) -> Sparsity {
        self.sparsity
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse_map.is_some()
    }

    pub fn opt_sparse_map(&self) -> Option<&BitSet> {
        self.sparse_map.as_ref()
    }

    pub fn buffer(&self) -> &ChunkedBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ChunkedBuffer {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> ChunkedBuffer {
        self.buffer
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn set_statistics(&mut self, statistics: Statistics) {
        self.statistics = statistics;
    }

    /// Whether logical row `row` has a stored value.
    pub fn is_present(&self, row: usize) -> bool {
        row < self.row_count && self.sparse_map.as_ref().map_or(true, |map| map.get(row))
    }

    pub fn push<T: NativeType>(&mut self, value: T) -> ColumnarResult<()> {
        self.check_width::<T>()?;
        let mut raw = [0u8; 8];
        value.write_le(&mut raw);
        self.buffer.append(&raw[..T::SIZE])?;
        if let Some(map) = &mut self.sparse_map {
            map.push(true);
        }
        self.row_count += 1;
        Ok(())
    }

    /// Append an absent row, switching the column to sparse storage on first use.
    pub fn push_none(&mut self) -> ColumnarResult<()> {
        if self.sparsity == Sparsity::NotPermitted {
            return Err(ColumnarError::invalid_argument(
                "push_none",
                format!("{} column does not permit missing rows", self.type_desc),
            ));
        }
        let row_count = self.row_count;
        self.sparse_map
            .get_or_insert_with(|| BitSet::with_len_all_true(row_count))
            .push(false);
        self.row_count += 1;
        Ok(())
    }

    /// Overwrite the value at dense row `row`.
    pub fn set_scalar<T: NativeType>(&mut self, row: usize, value: T) -> ColumnarResult<()> {
        self.check_width::<T>()?;
        internal_check(self.sparse_map.is_none(), || {
            "set_scalar on a sparse column".to_owned()
        })?;
        let slot = self
            .buffer
            .bytes_at_mut(row * T::SIZE, T::SIZE)
            .ok_or_else(|| {
                ColumnarError::AssertionFailure(format!(
                    "row {row} is out of bounds or read-only"
                ))
            })?;
        value.write_le(slot);
        Ok(())
    }

    /// Value at logical row `row`, or `None` if the row is absent or out of range.
    pub fn scalar_at<T: NativeType>(&self, row: usize) -> Option<T> {
        if T::SIZE != self.element_size || !self.is_present(row) {
            return None;
        }
        let physical = match &self.sparse_map {
            Some(map) => map.rank(row),
            None => row,
        };
        self.buffer
            .bytes_at(physical * T::SIZE, T::SIZE)
            .map(T::read_le)
    }

    /// Physically stored values in order.
    pub fn values<T: NativeType>(&self) -> ColumnarResult<impl Iterator<Item = T> + '_> {
        self.check_width::<T>()?;
        Ok(self.raw_values::<T>())
    }

    /// `(logical_row, value)` for every present row, ascending.
    pub fn iter_present<T: NativeType>(
        &self,
    ) -> ColumnarResult<impl Iterator<Item = (usize, T)> + '_> {
        self.check_width::<T>()?;
        let positions = match &self.sparse_map {
            Some(map) => RowPositions::Sparse(map.iter_ones()),
            None => RowPositions::Dense(0..self.row_count),
        };
        Ok(positions.zip(self.raw_values::<T>()))
    }

    /// Every logical row, `None` where absent.
    pub fn iter_rows<T: NativeType>(&self) -> ColumnarResult<impl Iterator<Item = Option<T>> + '_> {
        self.check_width::<T>()?;
        let map = self.sparse_map.as_ref();
        let mut values = self.raw_values::<T>();
        Ok((0..self.row_count).map(move |row| match map {
            Some(map) if !map.get(row) => None,
            _ => values.next(),
        }))
    }

    fn raw_values<T: NativeType>(&self) -> impl Iterator<Item = T> + '_ {
        self.buffer
            .blocks()
            .iter()
            .flat_map(|block| block.as_slice().chunks_exact(T::SIZE))
            .take(self.physical_row_count())
            .map(T::read_le)
    }

    /// Write `value` into `rows` dense rows starting at `first_row`.
    pub fn fill<T: NativeType>(&mut self, first_row: usize, rows: usize, value: T) -> ColumnarResult<()> {
        self.check_width::<T>()?;
        if rows == 0 {
            return Ok(());
        }
        let range = self
            .buffer
            .bytes_at_mut(first_row * T::SIZE, rows * T::SIZE)
            .ok_or_else(|| {
                ColumnarError::AssertionFailure(format!(
                    "rows {first_row}..{} are not one writable block",
                    first_row + rows
                ))
            })?;
        for slot in range.chunks_exact_mut(T::SIZE) {
            value.write_le(slot);
        }
        Ok(())
    }

    /// Attach a borrowed block of packed values after the current storage.
    pub fn add_external_block(&mut self, data: Bytes) -> ColumnarResult<()> {
        internal_check(
            self.element_size > 0 && data.len() % self.element_size == 0,
            || {
                format!(
                    "block of {} bytes is not a whole number of {} elements",
                    data.len(),
                    self.type_desc
                )
            },
        )?;
        internal_check(self.sparse_map.is_none(), || {
            "external blocks must be attached before the sparse map".to_owned()
        })?;
        let rows = data.len() / self.element_size;
        let offset = self.buffer.bytes();
        self.buffer.add_external_block(data, offset)?;
        self.row_count += rows;
        Ok(())
    }

    /// Swap the block at `block_offset` for borrowed bytes of the same size.
    pub fn replace_block(&mut self, block_offset: usize, data: Bytes) -> ColumnarResult<()> {
        self.buffer.replace_block(block_offset, data)
    }

    /// Install the sparse map describing which logical rows the stored values belong to.
    pub fn set_sparse_map(&mut self, map: BitSet) -> ColumnarResult<()> {
        if self.sparsity == Sparsity::NotPermitted {
            return Err(ColumnarError::invalid_argument(
                "set_sparse_map",
                format!("{} column does not permit missing rows", self.type_desc),
            ));
        }
        let stored = if self.element_size == 0 {
            0
        } else {
            self.buffer.bytes() / self.element_size
        };
        internal_check(map.count_ones() == stored, || {
            format!(
                "sparse map selects {} rows but {stored} are stored",
                map.count_ones()
            )
        })?;
        self.row_count = map.len();
        self.sparse_map = Some(map);
        Ok(())
    }

    /// Promote to `target`, borrowing when the type already matches.
    ///
    /// Values are converted with [`cast`]; the conversion is exact whenever
    /// `is_valid_promotion` accepts the pair. An `EMPTYVAL` column becomes a column of
    /// `target` with every row absent.
    pub fn cast(&self, target: DataType) -> ColumnarResult<Cow<'_, Column>> {
        if self.data_type == target {
            return Ok(Cow::Borrowed(self));
        }
        if self.data_type.is_empty() {
            let mut out = Column::new(target, Sparsity::Permitted);
            if self.row_count > 0 {
                out.row_count = self.row_count;
                out.sparse_map = Some(BitSet::with_len_all_false(self.row_count));
            }
            return Ok(Cow::Owned(out));
        }
        if target.is_empty() {
            return Err(ColumnarError::UnsupportedColumnType {
                operation: "cast",
                type_desc: self.type_desc,
            });
        }

        let mut out = Column::presized(target, self.physical_row_count());
        visit_type_pair(
            self.data_type,
            target,
            CastValues {
                source: self,
                dest: &mut out,
            },
        )?;
        out.sparsity = self.sparsity;
        out.row_count = self.row_count;
        out.sparse_map = self.sparse_map.clone();
        Ok(Cow::Owned(out))
    }

    /// Densify, setting absent rows to `default`.
    pub fn materialize_dense<T: ScalarTag>(&self, default: T::Raw) -> ColumnarResult<Column> {
        let mut out = Column::presized(T::DATA_TYPE, self.row_count);
        transform_with_default::<T, T>(self, &mut out, 0, default, |v| v)?;
        Ok(out)
    }

    fn check_width<T: NativeType>(&self) -> ColumnarResult<()> {
        internal_check(T::SIZE == self.element_size, || {
            format!(
                "{}-byte access to a column of {}-byte {} elements",
                T::SIZE,
                self.element_size,
                self.type_desc
            )
        })
    }
}

enum RowPositions<'a> {
    Dense(std::ops::Range<usize>),
    Sparse(crate::bitmap::Ones<'a>),
}

impl Iterator for RowPositions<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            Self::Dense(range) => range.next(),
            Self::Sparse(ones) => ones.next(),
        }
    }
}

struct CastValues<'a> {
    source: &'a Column,
    dest: &'a mut Column,
}

impl PairVisitor for CastValues<'_> {
    type Output = ColumnarResult<()>;

    fn visit<S: ScalarTag, D: ScalarTag>(self) -> Self::Output {
        let mut values = self.source.values::<S::Raw>()?;
        let bytes = self.dest.buffer.bytes();
        for block in self.dest.buffer.range_mut(0, bytes)? {
            for slot in block.chunks_exact_mut(D::Raw::SIZE) {
                let Some(v) = values.next() else {
                    return Ok(());
                };
                cast::<S::Raw, D::Raw>(v).write_le(slot);
            }
        }
        Ok(())
    }
}

/// Apply `f` to every present row of `source`, writing into the same logical rows of the
/// dense column `dest`. Absent rows of `dest` are left untouched.
pub fn transform<S, D>(
    source: &Column,
    dest: &mut Column,
    f: impl FnMut(S::Raw) -> D::Raw,
) -> ColumnarResult<()>
where
    S: ScalarTag,
    D: ScalarTag,
{
    transform_rows::<S, D>(source, dest, 0, None, f)
}

/// Like [`transform`], but writing into `dest` starting at `dest_row` and setting absent rows
/// to `default`.
pub fn transform_with_default<S, D>(
    source: &Column,
    dest: &mut Column,
    dest_row: usize,
    default: D::Raw,
    f: impl FnMut(S::Raw) -> D::Raw,
) -> ColumnarResult<()>
where
    S: ScalarTag,
    D: ScalarTag,
{
    transform_rows::<S, D>(source, dest, dest_row, Some(default), f)
}

fn transform_rows<S, D>(
    source: &Column,
    dest: &mut Column,
    dest_row: usize,
    default: Option<D::Raw>,
    mut f: impl FnMut(S::Raw) -> D::Raw,
) -> ColumnarResult<()>
where
    S: ScalarTag,
    D: ScalarTag,
{
    dest.check_width::<D::Raw>()?;
    internal_check(dest.sparse_map.is_none(), || {
        "transform destination must be dense".to_owned()
    })?;
    internal_check(dest_row + source.row_count <= dest.row_count, || {
        format!(
            "transform of {} rows at row {dest_row} overruns destination of {} rows",
            source.row_count, dest.row_count
        )
    })?;

    let mut rows = source.iter_rows::<S::Raw>()?;
    let slots = dest
        .buffer
        .range_mut(dest_row * D::Raw::SIZE, source.row_count * D::Raw::SIZE)?
        .flat_map(|block| block.chunks_exact_mut(D::Raw::SIZE));
    for slot in slots {
        match rows.next() {
            Some(Some(v)) => f(v).write_le(slot),
            Some(None) => {
                if let Some(default) = default {
                    default.write_le(slot);
                }
            }
            None => break,
        }
    }
    Ok(())
}

/// A column together with the string pool its offsets point into.
#[derive(Clone, Debug)]
pub struct ColumnWithStrings {
    pub column: Arc<Column>,
    pub string_pool: Option<Arc<StringPool>>,
    pub column_name: String,
}

impl ColumnWithStrings {
    pub fn new(
        column: Arc<Column>,
        string_pool: Option<Arc<StringPool>>,
        column_name: impl Into<String>,
    ) -> Self {
        Self {
            column,
            string_pool,
            column_name: column_name.into(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.column.data_type()
    }

    pub fn row_count(&self) -> usize {
        self.column.row_count()
    }

    /// Bytes interned at `offset`; `None` for sentinels or when no pool is attached.
    pub fn bytes_at_offset(&self, offset: u64) -> Option<&[u8]> {
        self.string_pool.as_deref()?.get_view(offset)
    }

    pub fn string_at_offset(&self, offset: u64) -> Option<&str> {
        std::str::from_utf8(self.bytes_at_offset(offset)?).ok()
    }

    /// String at logical row `row` of a string column.
    pub fn string_at(&self, row: usize) -> Option<&str> {
        if !self.data_type().is_sequence() {
            return None;
        }
        self.string_at_offset(self.column.scalar_at::<u64>(row)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Float64Tag, Int16Tag, Int64Tag, Uint8Tag};
    use pretty_assertions::assert_eq;

    #[test]
    fn push_none_switches_to_sparse_storage() {
        let mut col = Column::new(DataType::Int64, Sparsity::Permitted);
        col.push(1i64).unwrap();
        col.push(2i64).unwrap();
        col.push_none().unwrap();
        col.push(4i64).unwrap();

        assert_eq!(col.row_count(), 4);
        assert_eq!(col.physical_row_count(), 3);
        assert_eq!(col.buffer().bytes(), 3 * 8);
        assert_eq!(
            col.iter_rows::<i64>().unwrap().collect::<Vec<_>>(),
            vec![Some(1), Some(2), None, Some(4)]
        );
        assert_eq!(col.scalar_at::<i64>(3), Some(4));
        assert_eq!(col.scalar_at::<i64>(2), None);
    }

    #[test]
    fn push_none_requires_permitted_sparsity() {
        let mut col = Column::new(DataType::Int64, Sparsity::NotPermitted);
        let err = col.push_none().unwrap_err();
        assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
    }

    #[test]
    fn typed_access_checks_element_width() {
        let col = Column::from_values::<Int16Tag>(&[1, 2]);
        assert!(col.values::<i64>().is_err());
        assert_eq!(col.scalar_at::<i64>(0), None);
    }

    #[test]
    fn values_span_multiple_blocks() {
        let mut col = Column::with_block_size(DataType::Int16, Sparsity::NotPermitted, 8);
        for v in 0..9i16 {
            col.push(v).unwrap();
        }
        assert_eq!(col.buffer().num_blocks(), 3);
        assert_eq!(
            col.values::<i16>().unwrap().collect::<Vec<_>>(),
            (0..9).collect::<Vec<_>>()
        );
    }

    #[test]
    fn iter_present_yields_logical_positions() {
        let col = Column::from_options::<Uint8Tag>(&[None, Some(3), None, Some(5)]);
        assert_eq!(
            col.iter_present::<u8>().unwrap().collect::<Vec<_>>(),
            vec![(1, 3), (3, 5)]
        );
    }

    #[test]
    fn transform_only_touches_present_rows() {
        let source = Column::from_options::<Int16Tag>(&[Some(1), None, Some(3)]);
        let mut dest = Column::presized(DataType::Int64, 3);
        dest.fill(0, 3, -1i64).unwrap();
        transform::<Int16Tag, Int64Tag>(&source, &mut dest, |v| i64::from(v) * 10).unwrap();
        assert_eq!(
            dest.values::<i64>().unwrap().collect::<Vec<_>>(),
            vec![10, -1, 30]
        );
    }

    #[test]
    fn materialize_dense_fills_defaults() {
        let col = Column::from_options::<Float64Tag>(&[None, Some(1.5), None]);
        let dense = col.materialize_dense::<Float64Tag>(0.0).unwrap();
        assert!(!dense.is_sparse());
        assert_eq!(
            dense.values::<f64>().unwrap().collect::<Vec<_>>(),
            vec![0.0, 1.5, 0.0]
        );
    }

    #[test]
    fn cast_widens_and_keeps_sparse_map() {
        let col = Column::from_options::<Int16Tag>(&[Some(-3), None, Some(7)]);
        let cast = col.cast(DataType::Float64).unwrap();
        assert_eq!(cast.data_type(), DataType::Float64);
        assert_eq!(
            cast.iter_rows::<f64>().unwrap().collect::<Vec<_>>(),
            vec![Some(-3.0), None, Some(7.0)]
        );
        assert!(matches!(col.cast(DataType::Int16).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn empty_column_casts_to_all_absent() {
        let cast = Column::empty_rows(2).cast(DataType::Int32).unwrap().into_owned();
        assert_eq!(cast.row_count(), 2);
        assert_eq!(cast.physical_row_count(), 0);
    }

    #[test]
    fn external_blocks_extend_row_count() {
        let mut col = Column::external(DataType::Int32, Sparsity::Permitted);
        col.add_external_block(Bytes::from(vec![1, 0, 0, 0, 2, 0, 0, 0]))
            .unwrap();
        assert_eq!(col.row_count(), 2);
        col.set_sparse_map(BitSet::from_bools(&[false, true, true]))
            .unwrap();
        assert_eq!(
            col.iter_rows::<i32>().unwrap().collect::<Vec<_>>(),
            vec![None, Some(1), Some(2)]
        );
        assert!(col
            .set_sparse_map(BitSet::from_bools(&[true, true, true]))
            .is_err());
    }
}
