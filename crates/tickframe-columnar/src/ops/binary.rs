//! Arithmetic, comparison and boolean operators over two operands.

use super::{operand_to_bitset, operand_to_column, OperationType, Value, VariantData};
use crate::bitmap::BitSet;
use crate::column::{Column, ColumnWithStrings};
use crate::dispatch::{visit_type, visit_type_pair, PairVisitor, ScalarTag, TypeVisitor};
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::promotion::arithmetic_promoted_type;
use crate::string_pool::is_sentinel;
use crate::types::{DataType, NativeType};
use std::cmp::Ordering;
use std::sync::Arc;

pub fn binary_operation(
    left: &VariantData,
    right: &VariantData,
    op: OperationType,
) -> ColumnarResult<VariantData> {
    if left.is_empty() || right.is_empty() {
        return Ok(VariantData::Empty);
    }
    if op.is_boolean() {
        return boolean(left, right, op).map(VariantData::Bitset);
    }
    if !(op.is_arithmetic() || op.is_comparison()) {
        return Err(ColumnarError::invalid_argument(
            op.name(),
            format!("'{op}' is not a binary operator"),
        ));
    }

    let name = format!("({} {op} {})", left.name(), right.name());
    let len = match (left.len(), right.len()) {
        (Some(l), Some(r)) => {
            internal_check(l == r, || {
                format!("{} operands have {l} and {r} rows", op.name())
            })?;
            l
        }
        (Some(len), None) | (None, Some(len)) => len,
        // Two scalars: evaluate over a single row and unwrap the result.
        (None, None) => 1,
    };
    let scalar_result = left.len().is_none() && right.len().is_none();

    let left = operand_to_column(left, len, op)?;
    let right = operand_to_column(right, len, op)?;
    if op.is_comparison() {
        let bits = compare(&left, &right, op)?;
        if scalar_result {
            return Ok(VariantData::Value(Value::Bool(bits.get(0))));
        }
        return Ok(VariantData::Bitset(bits));
    }

    let mut out = arithmetic(&left, &right, op)?;
    if scalar_result {
        return Ok(match Value::from_column_row(&out, 0) {
            Some(value) => VariantData::Value(value),
            None => VariantData::Empty,
        });
    }
    out.column_name = name;
    Ok(VariantData::Column(out))
}

fn boolean(left: &VariantData, right: &VariantData, op: OperationType) -> ColumnarResult<BitSet> {
    let len = left.len().or(right.len());
    let mut out = operand_to_bitset(left, len, op)?;
    let other = operand_to_bitset(right, len, op)?;
    internal_check(out.len() == other.len(), || {
        format!("{} operands have {} and {} rows", op.name(), out.len(), other.len())
    })?;
    match op {
        OperationType::And => out.and_inplace(&other),
        OperationType::Or => out.or_inplace(&other),
        _ => out.xor_inplace(&other),
    }
    Ok(out)
}

fn arithmetic(
    left: &ColumnWithStrings,
    right: &ColumnWithStrings,
    op: OperationType,
) -> ColumnarResult<ColumnWithStrings> {
    let (left_type, right_type) = (left.data_type(), right.data_type());
    let promoted = if left_type.is_numeric() && right_type.is_numeric() {
        arithmetic_promoted_type(left_type, right_type)
    } else {
        None
    };
    let Some(promoted) = promoted else {
        return Err(ColumnarError::invalid_argument(
            op.name(),
            format!(
                "no arithmetic type for {} and {}",
                left.column.type_desc(),
                right.column.type_desc()
            ),
        ));
    };
    let output_type = if op == OperationType::Div {
        DataType::Float64
    } else {
        promoted
    };

    let left_cast = left.column.cast(output_type)?;
    let right_cast = right.column.cast(output_type)?;
    let column = visit_type(
        output_type,
        Arithmetic {
            op,
            left: &left_cast,
            right: &right_cast,
        },
    )?;
    Ok(ColumnWithStrings::new(Arc::new(column), None, String::new()))
}

struct Arithmetic<'a> {
    op: OperationType,
    left: &'a Column,
    right: &'a Column,
}

impl TypeVisitor for Arithmetic<'_> {
    type Output = ColumnarResult<Column>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        let op = self.op;
        let rows: Vec<Option<T::Raw>> = self
            .left
            .iter_rows::<T::Raw>()?
            .zip(self.right.iter_rows::<T::Raw>()?)
            .map(|(l, r)| Some(apply_arithmetic(op, l?, r?)))
            .collect();
        Ok(Column::from_options::<T>(&rows))
    }
}

/// Integers wrap at the output width; floats follow IEEE 754.
fn apply_arithmetic<T: NativeType>(op: OperationType, l: T, r: T) -> T {
    if T::IS_FLOAT {
        let (l, r) = (l.to_f64(), r.to_f64());
        return T::from_f64(match op {
            OperationType::Add => l + r,
            OperationType::Sub => l - r,
            OperationType::Mul => l * r,
            _ => l / r,
        });
    }
    let (l, r) = (l.to_i128(), r.to_i128());
    T::from_i128(match op {
        OperationType::Add => l.wrapping_add(r),
        OperationType::Sub => l.wrapping_sub(r),
        OperationType::Mul => l.wrapping_mul(r),
        _ => l.checked_div(r).unwrap_or(0),
    })
}

fn compare(
    left: &ColumnWithStrings,
    right: &ColumnWithStrings,
    op: OperationType,
) -> ColumnarResult<BitSet> {
    let (left_type, right_type) = (left.data_type(), right.data_type());
    if left_type.is_sequence() && right_type.is_sequence() {
        return compare_strings(left, right, op);
    }
    let comparable = (left_type.is_numeric() && right_type.is_numeric())
        || (left_type.is_time() && right_type.is_time())
        || (left_type.is_bool() && right_type.is_bool());
    if !comparable {
        return Err(ColumnarError::invalid_argument(
            op.name(),
            format!(
                "cannot compare {} with {}",
                left.column.type_desc(),
                right.column.type_desc()
            ),
        ));
    }
    visit_type_pair(
        left_type,
        right_type,
        Compare {
            op,
            left: &left.column,
            right: &right.column,
        },
    )
}

struct Compare<'a> {
    op: OperationType,
    left: &'a Column,
    right: &'a Column,
}

impl PairVisitor for Compare<'_> {
    type Output = ColumnarResult<BitSet>;

    fn visit<L: ScalarTag, R: ScalarTag>(self) -> Self::Output {
        let mut out = BitSet::with_capacity_bits(self.left.row_count());
        let rows = self
            .left
            .iter_rows::<L::Raw>()?
            .zip(self.right.iter_rows::<R::Raw>()?);
        for (l, r) in rows {
            let ordering = match (l, r) {
                (Some(l), Some(r)) if L::Raw::IS_FLOAT || R::Raw::IS_FLOAT => {
                    l.to_f64().partial_cmp(&r.to_f64())
                }
                (Some(l), Some(r)) => Some(l.to_i128().cmp(&r.to_i128())),
                _ => {
                    out.push(false);
                    continue;
                }
            };
            out.push(ordering_matches(self.op, ordering));
        }
        Ok(out)
    }
}

/// NaN compares unordered: only `!=` holds.
fn ordering_matches(op: OperationType, ordering: Option<Ordering>) -> bool {
    match (op, ordering) {
        (OperationType::Ne, None) => true,
        (_, None) => false,
        (OperationType::Eq, Some(o)) => o == Ordering::Equal,
        (OperationType::Ne, Some(o)) => o != Ordering::Equal,
        (OperationType::Lt, Some(o)) => o == Ordering::Less,
        (OperationType::Le, Some(o)) => o != Ordering::Greater,
        (OperationType::Gt, Some(o)) => o == Ordering::Greater,
        (OperationType::Ge, Some(o)) => o != Ordering::Less,
        _ => false,
    }
}

fn compare_strings(
    left: &ColumnWithStrings,
    right: &ColumnWithStrings,
    op: OperationType,
) -> ColumnarResult<BitSet> {
    if !matches!(op, OperationType::Eq | OperationType::Ne) {
        return Err(ColumnarError::invalid_argument(
            op.name(),
            format!(
                "{} and {} only support equality",
                left.column.type_desc(),
                right.column.type_desc()
            ),
        ));
    }
    let want_equal = op == OperationType::Eq;
    let same_pool = match (&left.string_pool, &right.string_pool) {
        (Some(l), Some(r)) => Arc::ptr_eq(l, r),
        _ => false,
    };

    let mut out = BitSet::with_capacity_bits(left.row_count());
    let rows = left
        .column
        .iter_rows::<u64>()?
        .zip(right.column.iter_rows::<u64>()?);
    for (l, r) in rows {
        let equal = match (l, r) {
            (Some(l), Some(r)) if is_sentinel(l) || is_sentinel(r) => None,
            (Some(l), Some(r)) if same_pool => Some(l == r),
            (Some(l), Some(r)) => Some(left.bytes_at_offset(l) == right.bytes_at_offset(r)),
            _ => None,
        };
        // Missing strings are neither equal nor unequal to anything.
        out.push(equal.is_some_and(|eq| eq == want_equal));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Int64Tag, Uint64Tag, Uint8Tag};

    fn col(column: Column) -> VariantData {
        VariantData::Column(ColumnWithStrings::new(Arc::new(column), None, "c"))
    }

    #[test]
    fn uint64_and_int64_compare_exactly() {
        let left = col(Column::from_values::<Uint64Tag>(&[u64::MAX, 5]));
        let right = col(Column::from_values::<Int64Tag>(&[-1, 5]));
        let out = binary_operation(&left, &right, OperationType::Gt).unwrap();
        let bits = out.as_bitset().unwrap();
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![true, false]);
    }

    #[test]
    fn integer_addition_wraps_at_output_width() {
        let left = col(Column::from_values::<Uint8Tag>(&[250, 1]));
        let out = binary_operation(&left, &VariantData::Value(Value::Uint8(10)), OperationType::Add)
            .unwrap();
        let out = out.as_column().unwrap();
        assert_eq!(out.data_type(), DataType::Uint8);
        assert_eq!(
            out.column.values::<u8>().unwrap().collect::<Vec<_>>(),
            vec![4, 11]
        );
        assert_eq!(out.column_name, "(c + 10)");
    }

    #[test]
    fn nan_is_only_unequal() {
        assert!(ordering_matches(OperationType::Ne, None));
        assert!(!ordering_matches(OperationType::Eq, None));
        assert!(!ordering_matches(OperationType::Le, None));
    }

    #[test]
    fn scalar_operands_produce_a_scalar() {
        let out = binary_operation(
            &VariantData::Value(Value::Int32(7)),
            &VariantData::Value(Value::Int64(2)),
            OperationType::Div,
        )
        .unwrap();
        assert!(matches!(out, VariantData::Value(Value::Float64(v)) if v == 3.5));
    }
}
