//! Ternary selection: `condition ? left : right`, row by row.

use super::{operand_to_bitset, operand_to_column, OperationType, VariantData};
use crate::bitmap::BitSet;
use crate::column::{Column, ColumnWithStrings, Sparsity};
use crate::dispatch::{visit_type, ScalarTag, TypeVisitor};
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::promotion::arithmetic_promoted_type;
use crate::string_pool::{is_sentinel, StringPool};
use crate::types::DataType;
use std::sync::Arc;

const OP: OperationType = OperationType::Ternary;

/// `output[i] = left[i] if condition[i] else right[i]`.
///
/// All three bitsets must have the same length; a mismatch is an internal error.
pub fn ternary_bitset(
    condition: &BitSet,
    left: &BitSet,
    right: &BitSet,
) -> ColumnarResult<BitSet> {
    internal_check(
        condition.len() == left.len() && condition.len() == right.len(),
        || {
            format!(
                "ternary bitset length mismatch: condition {}, left {}, right {}",
                condition.len(),
                left.len(),
                right.len()
            )
        },
    )?;
    let mut chosen_left = left.clone();
    chosen_left.and_inplace(condition);
    let mut chosen_right = condition.clone();
    chosen_right.not_inplace();
    chosen_right.and_inplace(right);
    chosen_left.or_inplace(&chosen_right);
    Ok(chosen_left)
}

/// Select between `left` and `right` per row of `condition`.
///
/// `condition` must be a bitset or a bool column. Bitsets (and bool columns or values combined
/// with a bitset) produce a bitset; columns and values produce a column of their arithmetic
/// promoted type, or of their shared string type backed by a fresh string pool.
pub fn ternary_operation(
    condition: &VariantData,
    left: &VariantData,
    right: &VariantData,
) -> ColumnarResult<VariantData> {
    if condition.is_empty() || left.is_empty() || right.is_empty() {
        return Ok(VariantData::Empty);
    }
    for operand in [condition, left, right] {
        if let VariantData::Column(col) = operand {
            if col.data_type().is_empty() {
                return Err(ColumnarError::UnsupportedColumnType {
                    operation: OP.name(),
                    type_desc: col.column.type_desc(),
                });
            }
        }
    }

    let condition = match condition {
        VariantData::Value(_) => {
            return Err(ColumnarError::invalid_argument(
                OP.name(),
                "condition must be a bitset or a boolean column",
            ))
        }
        other => operand_to_bitset(other, None, OP)?,
    };
    let len = Some(condition.len());

    match (left, right) {
        (VariantData::Bitset(_), _) | (_, VariantData::Bitset(_)) => {
            let left = operand_to_bitset(left, len, OP)?;
            let right = operand_to_bitset(right, len, OP)?;
            Ok(VariantData::Bitset(ternary_bitset(&condition, &left, &right)?))
        }
        _ => {
            let name = format!("(COND ? {} : {})", left.name(), right.name());
            let left = operand_to_column(left, condition.len(), OP)?;
            let right = operand_to_column(right, condition.len(), OP)?;
            let mut out = ternary_columns(&condition, &left, &right)?;
            out.column_name = name;
            Ok(VariantData::Column(out))
        }
    }
}

fn ternary_columns(
    condition: &BitSet,
    left: &ColumnWithStrings,
    right: &ColumnWithStrings,
) -> ColumnarResult<ColumnWithStrings> {
    internal_check(
        condition.len() == left.row_count() && condition.len() == right.row_count(),
        || {
            format!(
                "ternary length mismatch: condition {}, '{}' {}, '{}' {}",
                condition.len(),
                left.column_name,
                left.row_count(),
                right.column_name,
                right.row_count()
            )
        },
    )?;

    let (left_type, right_type) = (left.data_type(), right.data_type());
    if left_type.is_sequence() || right_type.is_sequence() {
        // Only dynamic strings on both sides can be re-interned into a fresh pool.
        if !(left_type.is_dynamic_string() && right_type.is_dynamic_string()) {
            return Err(type_pair_error(left, right));
        }
        return ternary_strings(condition, left, right, left_type);
    }

    let Some(output_type) = arithmetic_promoted_type(left_type, right_type) else {
        return Err(type_pair_error(left, right));
    };
    log::trace!(
        "ternary {} / {} -> {}",
        left_type,
        right_type,
        output_type
    );
    let left_cast = left.column.cast(output_type)?;
    let right_cast = right.column.cast(output_type)?;
    let column = visit_type(
        output_type,
        SelectRows {
            condition,
            left: &left_cast,
            right: &right_cast,
        },
    )?;
    Ok(ColumnWithStrings::new(Arc::new(column), None, String::new()))
}

fn type_pair_error(left: &ColumnWithStrings, right: &ColumnWithStrings) -> ColumnarError {
    let (l, r) = (left.column.type_desc(), right.column.type_desc());
    let message = if matches!(
        (left.data_type(), right.data_type()),
        (DataType::Uint64, t) | (t, DataType::Uint64) if t.is_signed()
    ) {
        format!("{l} and {r} have no common type that holds every value of both")
    } else {
        format!("cannot select between {l} and {r}")
    };
    ColumnarError::invalid_argument(OP.name(), message)
}

struct SelectRows<'a> {
    condition: &'a BitSet,
    left: &'a Column,
    right: &'a Column,
}

impl TypeVisitor for SelectRows<'_> {
    type Output = ColumnarResult<Column>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        let rows: Vec<Option<T::Raw>> = self
            .condition
            .iter()
            .zip(self.left.iter_rows::<T::Raw>()?)
            .zip(self.right.iter_rows::<T::Raw>()?)
            .map(|((take_left, l), r)| if take_left { l } else { r })
            .collect();
        Ok(Column::from_options::<T>(&rows))
    }
}

fn ternary_strings(
    condition: &BitSet,
    left: &ColumnWithStrings,
    right: &ColumnWithStrings,
    data_type: DataType,
) -> ColumnarResult<ColumnWithStrings> {
    let mut pool = StringPool::new();
    let mut column = Column::new(data_type, Sparsity::Permitted);
    let rows = condition
        .iter()
        .zip(left.column.iter_rows::<u64>()?)
        .zip(right.column.iter_rows::<u64>()?);
    for ((take_left, l), r) in rows {
        let (side, offset) = if take_left { (left, l) } else { (right, r) };
        match offset {
            None => column.push_none()?,
            Some(offset) if is_sentinel(offset) => column.push(offset)?,
            Some(offset) => {
                let view = side.bytes_at_offset(offset).ok_or_else(|| {
                    ColumnarError::AssertionFailure(format!(
                        "offset {offset} of column '{}' is not in its string pool",
                        side.column_name
                    ))
                })?;
                column.push(pool.get(view))?;
            }
        }
    }
    Ok(ColumnWithStrings::new(
        Arc::new(column),
        Some(Arc::new(pool)),
        String::new(),
    ))
}
