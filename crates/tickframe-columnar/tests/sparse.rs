use bytes::Bytes;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use tickframe_columnar::{
    transform, transform_with_default, BitSet, Column, ColumnWithStrings, ColumnarError,
    DataType, Float64Tag, Int32Tag, Int64Tag, Sparsity, Statistics, Value,
};

proptest! {
    #[test]
    fn logical_rows_survive_sparse_storage(rows in proptest::collection::vec(proptest::option::of(any::<i32>()), 0..200)) {
        let column = Column::from_options::<Int32Tag>(&rows);
        prop_assert_eq!(column.row_count(), rows.len());
        prop_assert_eq!(column.iter_rows::<i32>().unwrap().collect::<Vec<_>>(), rows.clone());
        for (row, expected) in rows.iter().enumerate() {
            prop_assert_eq!(column.scalar_at::<i32>(row), *expected);
        }
        let present = rows.iter().flatten().count();
        prop_assert_eq!(column.physical_row_count(), present);
    }
}

#[test]
fn incremental_building_matches_bulk_construction() {
    let mut column = Column::new(DataType::Int64, Sparsity::Permitted);
    column.push(1i64).unwrap();
    column.push_none().unwrap();
    column.push_none().unwrap();
    column.push(4i64).unwrap();

    let bulk = Column::from_options::<Int64Tag>(&[Some(1), None, None, Some(4)]);
    assert_eq!(
        column.iter_rows::<i64>().unwrap().collect::<Vec<_>>(),
        bulk.iter_rows::<i64>().unwrap().collect::<Vec<_>>()
    );
    assert_eq!(
        column.opt_sparse_map().map(BitSet::count_ones),
        Some(2)
    );
}

#[test]
fn sparse_map_must_match_stored_values() {
    let mut column = Column::external(DataType::Int32, Sparsity::Permitted);
    column
        .add_external_block(Bytes::from(vec![1, 0, 0, 0, 2, 0, 0, 0]))
        .unwrap();
    let err = column
        .set_sparse_map(BitSet::from_bools(&[true, false, false]))
        .unwrap_err();
    assert!(err.is_fatal());

    column
        .set_sparse_map(BitSet::from_bools(&[false, true, false, true]))
        .unwrap();
    assert_eq!(column.row_count(), 4);
    assert_eq!(
        column.iter_present::<i32>().unwrap().collect::<Vec<_>>(),
        vec![(1, 1), (3, 2)]
    );

    let mut dense = Column::external(DataType::Int32, Sparsity::NotPermitted);
    let err = dense.set_sparse_map(BitSet::new()).unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
}

#[test]
fn writes_after_a_borrowed_block_reach_later_blocks() {
    let mut dest = Column::detachable(DataType::Int64, 8, &[2, 3]);
    let borrowed: Vec<u8> = [5i64, 6].iter().flat_map(|v| v.to_le_bytes()).collect();
    dest.replace_block(0, Bytes::from(borrowed)).unwrap();

    let source = Column::from_options::<Int64Tag>(&[Some(7), None, Some(9)]);
    transform_with_default::<Int64Tag, Int64Tag>(&source, &mut dest, 2, -1, |v| v * 10).unwrap();
    assert_eq!(
        dest.values::<i64>().unwrap().collect::<Vec<_>>(),
        vec![5, 6, 70, -1, 90]
    );

    // The borrowed block itself stays read-only.
    let err = transform::<Int64Tag, Int64Tag>(&source, &mut dest, |v| v).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn widening_cast_preserves_absent_rows() {
    let narrow = Column::from_options::<Int32Tag>(&[None, Some(-7)]);
    let wide = narrow.cast(DataType::Float64).unwrap();
    assert_eq!(
        wide.iter_rows::<f64>().unwrap().collect::<Vec<_>>(),
        vec![None, Some(-7.0)]
    );
    let dense = wide.materialize_dense::<Float64Tag>(f64::NAN).unwrap();
    let values: Vec<f64> = dense.values::<f64>().unwrap().collect();
    assert!(values[0].is_nan());
    assert_eq!(values[1], -7.0);
    assert!(!dense.is_sparse());
}

#[test]
fn fill_and_set_scalar_on_presized_columns() {
    let mut column = Column::presized(DataType::Int32, 4);
    column.fill(1, 2, 9i32).unwrap();
    column.set_scalar(3, -1i32).unwrap();
    assert_eq!(
        column.values::<i32>().unwrap().collect::<Vec<_>>(),
        vec![0, 9, 9, -1]
    );
    assert!(column.fill(0, 2, 1i64).unwrap_err().is_fatal());
}

#[test]
fn statistics_skip_absent_rows() {
    let column = Column::from_options::<Int32Tag>(&[None, Some(3), None, Some(1)]);
    let column = ColumnWithStrings::new(Arc::new(column), None, "c");
    let stats = Statistics::compute(&column).unwrap();
    assert_eq!(stats.unique_count(), Some(2));

    assert_eq!(Value::from_column_row(&column, 0), None);
    assert_eq!(Value::from_column_row(&column, 3), Some(Value::Int32(1)));
}
