//! Elementwise operators over columns, scalar values and bitsets.
//!
//! Every operator resolves runtime types through `crate::dispatch` and derives its output type
//! from `crate::promotion`. Operands that are the "no data" marker ([`VariantData::Empty`])
//! short-circuit: the operator returns the marker without looking at the other operands.

mod binary;
mod ternary;
mod unary;

pub use binary::binary_operation;
pub use ternary::{ternary_bitset, ternary_operation};
pub use unary::unary_operation;

use crate::bitmap::BitSet;
use crate::column::{Column, ColumnWithStrings};
use crate::dispatch::{visit_type, ScalarTag, TypeVisitor};
use crate::error::{ColumnarError, ColumnarResult};
use crate::string_pool::StringPool;
use crate::types::{cast, DataType, NativeType};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    Ternary,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Neg,
    Abs,
    Not,
}

impl OperationType {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Ternary => "?",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Neg => "-",
            Self::Abs => "abs",
            Self::Not => "~",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor)
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Abs | Self::Not)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Ternary => "ternary",
            Self::Add => "add",
            Self::Sub => "subtract",
            Self::Mul => "multiply",
            Self::Div => "divide",
            Self::Eq => "equals",
            Self::Ne => "not equals",
            Self::Lt => "less than",
            Self::Le => "less than or equal",
            Self::Gt => "greater than",
            Self::Ge => "greater than or equal",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Neg => "negate",
            Self::Abs => "abs",
            Self::Not => "not",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A scalar operand, broadcast to the length of the column it is combined with.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Nanoseconds(i64),
    String(Arc<str>),
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool8,
            Value::Uint8(_) => DataType::Uint8,
            Value::Uint16(_) => DataType::Uint16,
            Value::Uint32(_) => DataType::Uint32,
            Value::Uint64(_) => DataType::Uint64,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float32(_) => DataType::Float32,
            Value::Float64(_) => DataType::Float64,
            Value::Nanoseconds(_) => DataType::NanosecondsSinceEpoch,
            Value::String(_) => DataType::DynamicString64,
        }
    }

    /// The value converted to a native element type. Strings convert to the default.
    pub fn raw<T: NativeType>(&self) -> T {
        match self {
            Value::Bool(v) => cast(*v),
            Value::Uint8(v) => cast(*v),
            Value::Uint16(v) => cast(*v),
            Value::Uint32(v) => cast(*v),
            Value::Uint64(v) => cast(*v),
            Value::Int8(v) => cast(*v),
            Value::Int16(v) => cast(*v),
            Value::Int32(v) => cast(*v),
            Value::Int64(v) | Value::Nanoseconds(v) => cast(*v),
            Value::Float32(v) => cast(*v),
            Value::Float64(v) => cast(*v),
            Value::String(_) => T::default(),
        }
    }

    /// Build a value of data type `T` from a raw element. `None` for string and empty types.
    pub fn from_raw<T: ScalarTag>(raw: T::Raw) -> Option<Value> {
        Some(match T::DATA_TYPE {
            DataType::Bool8 => Value::Bool(cast(raw)),
            DataType::Uint8 => Value::Uint8(cast(raw)),
            DataType::Uint16 => Value::Uint16(cast(raw)),
            DataType::Uint32 => Value::Uint32(cast(raw)),
            DataType::Uint64 => Value::Uint64(cast(raw)),
            DataType::Int8 => Value::Int8(cast(raw)),
            DataType::Int16 => Value::Int16(cast(raw)),
            DataType::Int32 => Value::Int32(cast(raw)),
            DataType::Int64 => Value::Int64(cast(raw)),
            DataType::Float32 => Value::Float32(cast(raw)),
            DataType::Float64 => Value::Float64(cast(raw)),
            DataType::NanosecondsSinceEpoch => Value::Nanoseconds(cast(raw)),
            DataType::Empty | DataType::FixedString64 | DataType::DynamicString64 => return None,
        })
    }

    /// Value at logical row `row` of `column`, or `None` if the row is absent.
    pub fn from_column_row(column: &ColumnWithStrings, row: usize) -> Option<Value> {
        let data_type = column.data_type();
        if data_type.is_sequence() {
            let offset = column.column.scalar_at::<u64>(row)?;
            return column.string_at_offset(offset).map(Value::from);
        }
        visit_type(
            data_type,
            ReadValue {
                column: &column.column,
                row,
            },
        )
    }

    /// A dense column of `rows` copies of this value.
    pub fn broadcast(&self, rows: usize) -> ColumnarResult<ColumnWithStrings> {
        let name = self.to_string();
        if let Value::String(s) = self {
            let mut pool = StringPool::new();
            let offset = pool.get_str(s);
            let mut column = Column::presized(DataType::DynamicString64, rows);
            column.fill(0, rows, offset)?;
            return Ok(ColumnWithStrings::new(
                Arc::new(column),
                Some(Arc::new(pool)),
                name,
            ));
        }
        let column = visit_type(self.data_type(), Broadcast { value: self, rows })?;
        Ok(ColumnWithStrings::new(Arc::new(column), None, name))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Uint8(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Uint64(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Nanoseconds(v) => write!(f, "{v}ns"),
            Value::String(v) => write!(f, "{v:?}"),
        }
    }
}

struct ReadValue<'a> {
    column: &'a Column,
    row: usize,
}

impl TypeVisitor for ReadValue<'_> {
    type Output = Option<Value>;

    fn visit<T: ScalarTag>(self) -> Option<Value> {
        Value::from_raw::<T>(self.column.scalar_at::<T::Raw>(self.row)?)
    }
}

struct Broadcast<'a> {
    value: &'a Value,
    rows: usize,
}

impl TypeVisitor for Broadcast<'_> {
    type Output = ColumnarResult<Column>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        let mut column = Column::presized(T::DATA_TYPE, self.rows);
        column.fill(0, self.rows, self.value.raw::<T::Raw>())?;
        Ok(column)
    }
}

/// Operand or result of an operator.
#[derive(Clone, Debug)]
pub enum VariantData {
    /// No data; propagated unchanged by every operator.
    Empty,
    Bitset(BitSet),
    Column(ColumnWithStrings),
    Value(Value),
}

impl VariantData {
    pub fn is_empty(&self) -> bool {
        matches!(self, VariantData::Empty)
    }

    /// Logical length, if the operand has one.
    pub fn len(&self) -> Option<usize> {
        match self {
            VariantData::Bitset(bits) => Some(bits.len()),
            VariantData::Column(col) => Some(col.row_count()),
            VariantData::Empty | VariantData::Value(_) => None,
        }
    }

    pub fn as_bitset(&self) -> Option<&BitSet> {
        match self {
            VariantData::Bitset(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn as_column(&self) -> Option<&ColumnWithStrings> {
        match self {
            VariantData::Column(col) => Some(col),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> String {
        match self {
            VariantData::Empty => "EMPTY".to_owned(),
            VariantData::Bitset(_) => "BITSET".to_owned(),
            VariantData::Column(col) => col.column_name.clone(),
            VariantData::Value(v) => v.to_string(),
        }
    }
}

impl From<BitSet> for VariantData {
    fn from(bits: BitSet) -> Self {
        VariantData::Bitset(bits)
    }
}

impl From<ColumnWithStrings> for VariantData {
    fn from(col: ColumnWithStrings) -> Self {
        VariantData::Column(col)
    }
}

impl From<Value> for VariantData {
    fn from(value: Value) -> Self {
        VariantData::Value(value)
    }
}

/// Rows of a bool column that are present and true.
pub fn transform_to_bitset(column: &ColumnWithStrings) -> ColumnarResult<BitSet> {
    if !column.data_type().is_bool() {
        return Err(ColumnarError::invalid_argument(
            "transform_to_bitset",
            format!(
                "column '{}' of type {} is not boolean",
                column.column_name,
                column.column.type_desc()
            ),
        ));
    }
    let mut out = BitSet::with_len_all_false(column.row_count());
    for (row, v) in column.column.iter_present::<bool>()? {
        if v {
            out.set(row, true);
        }
    }
    Ok(out)
}

/// Resolve a bitset-like operand: a bitset, a bool column, or a bool value broadcast to `len`.
pub(crate) fn operand_to_bitset(
    operand: &VariantData,
    len: Option<usize>,
    operation: OperationType,
) -> ColumnarResult<BitSet> {
    match operand {
        VariantData::Bitset(bits) => Ok(bits.clone()),
        VariantData::Column(col) => transform_to_bitset(col),
        VariantData::Value(Value::Bool(v)) => match len {
            Some(len) if *v => Ok(BitSet::with_len_all_true(len)),
            Some(len) => Ok(BitSet::with_len_all_false(len)),
            None => Err(ColumnarError::invalid_argument(
                operation.name(),
                "cannot broadcast a value without a column or bitset operand",
            )),
        },
        other => Err(ColumnarError::invalid_argument(
            operation.name(),
            format!("operand {} is not boolean", other.name()),
        )),
    }
}

/// Resolve a column-like operand, broadcasting values to `len` rows.
pub(crate) fn operand_to_column(
    operand: &VariantData,
    len: usize,
    operation: OperationType,
) -> ColumnarResult<ColumnWithStrings> {
    match operand {
        VariantData::Column(col) => {
            if col.data_type().is_empty() {
                return Err(ColumnarError::UnsupportedColumnType {
                    operation: operation.name(),
                    type_desc: col.column.type_desc(),
                });
            }
            Ok(col.clone())
        }
        VariantData::Value(v) => v.broadcast(len),
        other => Err(ColumnarError::invalid_argument(
            operation.name(),
            format!("operand {} is not a column or value", other.name()),
        )),
    }
}

pub fn dispatch_unary(operand: &VariantData, op: OperationType) -> ColumnarResult<VariantData> {
    unary_operation(operand, op)
}

pub fn dispatch_binary(
    left: &VariantData,
    right: &VariantData,
    op: OperationType,
) -> ColumnarResult<VariantData> {
    binary_operation(left, right, op)
}

pub fn dispatch_ternary(
    condition: &VariantData,
    left: &VariantData,
    right: &VariantData,
) -> ColumnarResult<VariantData> {
    ternary_operation(condition, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Bool8Tag;

    #[test]
    fn bool_column_to_bitset_treats_absent_as_false() {
        let col = ColumnWithStrings::new(
            Arc::new(Column::from_options::<Bool8Tag>(&[Some(true), None, Some(false), Some(true)])),
            None,
            "flag",
        );
        let bits = transform_to_bitset(&col).unwrap();
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![true, false, false, true]);
    }

    #[test]
    fn value_round_trips_through_a_broadcast_column() {
        let col = Value::Int16(-7).broadcast(3).unwrap();
        assert_eq!(col.data_type(), DataType::Int16);
        assert_eq!(Value::from_column_row(&col, 2), Some(Value::Int16(-7)));

        let s = Value::from("abc").broadcast(2).unwrap();
        assert_eq!(s.string_at(1), Some("abc"));
        assert_eq!(Value::from_column_row(&s, 0), Some(Value::from("abc")));
    }

    #[test]
    fn dispatch_validates_unary_operators() {
        let err = dispatch_unary(&VariantData::Value(Value::Int8(1)), OperationType::Add)
            .unwrap_err();
        assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
    }
}
