use super::{transform_to_bitset, OperationType, Value, VariantData};
use crate::column::{transform, Column, ColumnWithStrings};
use crate::dispatch::{visit_type_pair, PairVisitor, ScalarTag};
use crate::error::{ColumnarError, ColumnarResult};
use crate::types::{DataType, NativeType};
use std::sync::Arc;

pub fn unary_operation(operand: &VariantData, op: OperationType) -> ColumnarResult<VariantData> {
    if !op.is_unary() {
        return Err(ColumnarError::invalid_argument(
            op.name(),
            format!("'{op}' is not a unary operator"),
        ));
    }
    match operand {
        VariantData::Empty => Ok(VariantData::Empty),
        VariantData::Bitset(bits) if op == OperationType::Not => {
            let mut out = bits.clone();
            out.not_inplace();
            Ok(VariantData::Bitset(out))
        }
        VariantData::Column(col) if op == OperationType::Not => {
            // Absent rows stay false.
            let mut out = transform_to_bitset(col)?;
            out.not_inplace();
            if let Some(map) = col.column.opt_sparse_map() {
                out.and_inplace(map);
            }
            Ok(VariantData::Bitset(out))
        }
        VariantData::Value(Value::Bool(v)) if op == OperationType::Not => {
            Ok(VariantData::Value(Value::Bool(!v)))
        }
        VariantData::Column(col) => {
            let mut out = numeric(col, op)?;
            out.column_name = format!("{}({})", op.symbol(), col.column_name);
            Ok(VariantData::Column(out))
        }
        VariantData::Value(v) => {
            let out = numeric(&v.broadcast(1)?, op)?;
            Ok(Value::from_column_row(&out, 0).map_or(VariantData::Empty, VariantData::Value))
        }
        VariantData::Bitset(_) => Err(ColumnarError::invalid_argument(
            op.name(),
            "bitsets only support logical not",
        )),
    }
}

/// Output type of `Neg`/`Abs`. Negating an unsigned type needs the next wider signed type.
fn unary_output_type(input: DataType, op: OperationType) -> Option<DataType> {
    if !input.is_numeric() || op == OperationType::Not {
        return None;
    }
    if op == OperationType::Abs || !input.is_unsigned() {
        return Some(input);
    }
    match input {
        DataType::Uint8 => Some(DataType::Int16),
        DataType::Uint16 => Some(DataType::Int32),
        DataType::Uint32 => Some(DataType::Int64),
        _ => None,
    }
}

fn numeric(col: &ColumnWithStrings, op: OperationType) -> ColumnarResult<ColumnWithStrings> {
    if col.data_type().is_empty() {
        return Err(ColumnarError::UnsupportedColumnType {
            operation: op.name(),
            type_desc: col.column.type_desc(),
        });
    }
    let output_type = unary_output_type(col.data_type(), op).ok_or_else(|| {
        ColumnarError::invalid_argument(
            op.name(),
            format!("unsupported operand type {}", col.column.type_desc()),
        )
    })?;
    let column = visit_type_pair(
        col.data_type(),
        output_type,
        NumericUnary {
            op,
            source: &col.column,
        },
    )?;
    Ok(ColumnWithStrings::new(Arc::new(column), None, String::new()))
}

struct NumericUnary<'a> {
    op: OperationType,
    source: &'a Column,
}

impl PairVisitor for NumericUnary<'_> {
    type Output = ColumnarResult<Column>;

    fn visit<S: ScalarTag, D: ScalarTag>(self) -> Self::Output {
        let op = self.op;
        let mut dense = Column::presized(D::DATA_TYPE, self.source.row_count());
        transform::<S, D>(self.source, &mut dense, |v| apply_unary::<D::Raw>(op, v))?;
        if let Some(map) = self.source.opt_sparse_map() {
            // Re-pack the present rows behind the source's sparse map.
            let rows: Vec<Option<D::Raw>> = dense
                .values::<D::Raw>()?
                .zip(map.iter())
                .map(|(v, present)| present.then_some(v))
                .collect();
            return Ok(Column::from_options::<D>(&rows));
        }
        Ok(dense)
    }
}

fn apply_unary<D: NativeType>(op: OperationType, value: impl NativeType) -> D {
    if D::IS_FLOAT {
        let v = value.to_f64();
        return D::from_f64(if op == OperationType::Neg { -v } else { v.abs() });
    }
    let v = value.to_i128();
    // Wraps at the output width, e.g. -INT8_MIN == INT8_MIN.
    D::from_i128(if op == OperationType::Neg { -v } else { v.abs() })
}
