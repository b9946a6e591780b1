use pretty_assertions::assert_eq;
use std::sync::Arc;
use tickframe_columnar::{
    binary_operation, dispatch_binary, dispatch_ternary, dispatch_unary, transform_to_bitset,
    unary_operation, BitSet, Bool8Tag, Column, ColumnWithStrings, ColumnarError, DataType,
    DynamicStringTag, Float64Tag, Int32Tag, Int64Tag, IntegerValue, NanosecondsTag,
    OperationType, Sortedness, Statistics, StringPool, Uint16Tag, Uint64Tag, Value, VariantData,
};

fn col(column: Column, name: &str) -> VariantData {
    VariantData::Column(ColumnWithStrings::new(Arc::new(column), None, name))
}

fn bits_of(result: &VariantData) -> Vec<bool> {
    result
        .as_bitset()
        .unwrap_or_else(|| panic!("expected a bitset, got {result:?}"))
        .iter()
        .collect()
}

#[test]
fn arithmetic_promotes_and_names_the_result() {
    let left = col(Column::from_values::<Int32Tag>(&[1, 2, 3]), "a");
    let right = col(Column::from_values::<Int64Tag>(&[10, 20, 30]), "b");
    let out = binary_operation(&left, &right, OperationType::Mul).unwrap();
    let out = out.as_column().unwrap();
    assert_eq!(out.data_type(), DataType::Int64);
    assert_eq!(out.column_name, "(a * b)");
    assert_eq!(
        out.column.values::<i64>().unwrap().collect::<Vec<_>>(),
        vec![10, 40, 90]
    );
}

#[test]
fn division_always_produces_float64() {
    let left = col(Column::from_values::<Int32Tag>(&[7, 1, 0]), "n");
    let out = binary_operation(&left, &VariantData::Value(Value::Int32(2)), OperationType::Div)
        .unwrap();
    let out = out.as_column().unwrap();
    assert_eq!(out.data_type(), DataType::Float64);
    assert_eq!(
        out.column.values::<f64>().unwrap().collect::<Vec<_>>(),
        vec![3.5, 0.5, 0.0]
    );
}

#[test]
fn arithmetic_on_absent_rows_stays_absent() {
    let left = col(
        Column::from_options::<Float64Tag>(&[Some(1.0), None, Some(3.0)]),
        "x",
    );
    let out = binary_operation(&left, &VariantData::Value(Value::Float64(1.0)), OperationType::Sub)
        .unwrap();
    let out = out.as_column().unwrap();
    assert_eq!(
        out.column.iter_rows::<f64>().unwrap().collect::<Vec<_>>(),
        vec![Some(0.0), None, Some(2.0)]
    );
}

#[test]
fn arithmetic_rejects_non_numeric_and_unrepresentable_pairs() {
    let unsigned = col(Column::from_values::<Uint64Tag>(&[1]), "u");
    let signed = col(Column::from_values::<Int64Tag>(&[1]), "i");
    let err = binary_operation(&unsigned, &signed, OperationType::Add).unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));

    let flags = col(Column::from_values::<Bool8Tag>(&[true]), "b");
    let err = binary_operation(&flags, &flags, OperationType::Add).unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
}

#[test]
fn comparisons_produce_bitsets() {
    let left = col(Column::from_values::<Int64Tag>(&[1, 5, 9]), "l");
    let right = col(Column::from_values::<Float64Tag>(&[1.0, 4.5, f64::NAN]), "r");
    assert_eq!(
        bits_of(&binary_operation(&left, &right, OperationType::Eq).unwrap()),
        vec![true, false, false]
    );
    assert_eq!(
        bits_of(&binary_operation(&left, &right, OperationType::Ge).unwrap()),
        vec![true, true, false]
    );
    assert_eq!(
        bits_of(&binary_operation(&left, &right, OperationType::Ne).unwrap()),
        vec![false, true, true]
    );
}

#[test]
fn comparison_with_absent_rows_is_false() {
    let left = col(Column::from_options::<Int64Tag>(&[None, Some(2)]), "l");
    let out = binary_operation(&left, &VariantData::Value(Value::Int64(0)), OperationType::Ne)
        .unwrap();
    assert_eq!(bits_of(&out), vec![false, true]);
}

#[test]
fn time_compares_with_time_only() {
    let stamps = col(Column::from_values::<NanosecondsTag>(&[100, 200]), "t");
    let out = binary_operation(
        &stamps,
        &VariantData::Value(Value::Nanoseconds(150)),
        OperationType::Lt,
    )
    .unwrap();
    assert_eq!(bits_of(&out), vec![true, false]);

    let err = binary_operation(&stamps, &VariantData::Value(Value::Int64(1)), OperationType::Lt)
        .unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
}

#[test]
fn strings_compare_by_content_across_pools() {
    let mut left_pool = StringPool::new();
    let left = Column::from_values::<DynamicStringTag>(&[
        left_pool.get_str("a"),
        left_pool.get_str("b"),
    ]);
    let left = VariantData::Column(ColumnWithStrings::new(
        Arc::new(left),
        Some(Arc::new(left_pool)),
        "l",
    ));
    let right = VariantData::Value(Value::from("b"));

    assert_eq!(
        bits_of(&binary_operation(&left, &right, OperationType::Eq).unwrap()),
        vec![false, true]
    );
    let err = binary_operation(&left, &right, OperationType::Lt).unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
}

#[test]
fn boolean_operators_combine_bitsets_and_bool_columns() {
    let bits = VariantData::Bitset(BitSet::from_bools(&[true, true, false]));
    let flags = col(
        Column::from_options::<Bool8Tag>(&[Some(true), None, Some(true)]),
        "f",
    );
    assert_eq!(
        bits_of(&binary_operation(&bits, &flags, OperationType::And).unwrap()),
        vec![true, false, false]
    );
    assert_eq!(
        bits_of(&binary_operation(&bits, &flags, OperationType::Xor).unwrap()),
        vec![false, true, true]
    );
    assert_eq!(
        bits_of(
            &binary_operation(&bits, &VariantData::Value(Value::Bool(true)), OperationType::Or)
                .unwrap()
        ),
        vec![true, true, true]
    );
}

#[test]
fn unary_not_negate_and_abs() {
    let flags = col(
        Column::from_options::<Bool8Tag>(&[Some(true), None, Some(false)]),
        "f",
    );
    assert_eq!(
        bits_of(&unary_operation(&flags, OperationType::Not).unwrap()),
        vec![false, false, true]
    );

    let unsigned = col(Column::from_values::<Uint16Tag>(&[3, 0]), "u");
    let negated = unary_operation(&unsigned, OperationType::Neg).unwrap();
    let negated = negated.as_column().unwrap();
    assert_eq!(negated.data_type(), DataType::Int32);
    assert_eq!(negated.column_name, "-(u)");
    assert_eq!(
        negated.column.values::<i32>().unwrap().collect::<Vec<_>>(),
        vec![-3, 0]
    );

    let signed = col(Column::from_options::<Int64Tag>(&[Some(-4), None]), "s");
    let abs = unary_operation(&signed, OperationType::Abs).unwrap();
    assert_eq!(
        abs.as_column()
            .unwrap()
            .column
            .iter_rows::<i64>()
            .unwrap()
            .collect::<Vec<_>>(),
        vec![Some(4), None]
    );

    let widest = col(Column::from_values::<Uint64Tag>(&[1]), "w");
    let err = unary_operation(&widest, OperationType::Neg).unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
}

#[test]
fn dispatch_routes_by_operation() {
    let left = col(Column::from_values::<Int64Tag>(&[1, 2]), "l");
    let right = VariantData::Value(Value::Int64(1));
    let sum = dispatch_binary(&left, &right, OperationType::Add).unwrap();
    assert_eq!(
        sum.as_column()
            .unwrap()
            .column
            .values::<i64>()
            .unwrap()
            .collect::<Vec<_>>(),
        vec![2, 3]
    );

    let condition = dispatch_binary(&left, &right, OperationType::Gt).unwrap();
    let picked = dispatch_ternary(&condition, &left, &right).unwrap();
    assert_eq!(
        picked
            .as_column()
            .unwrap()
            .column
            .values::<i64>()
            .unwrap()
            .collect::<Vec<_>>(),
        vec![1, 2]
    );

    let negated = dispatch_unary(&VariantData::Value(Value::Int8(5)), OperationType::Neg).unwrap();
    assert!(matches!(negated, VariantData::Value(Value::Int8(-5))));
    assert!(dispatch_unary(&VariantData::Empty, OperationType::Not)
        .unwrap()
        .is_empty());
}

#[test]
fn bool_column_to_bitset() {
    let flags = ColumnWithStrings::new(
        Arc::new(Column::from_options::<Bool8Tag>(&[Some(false), Some(true), None])),
        None,
        "f",
    );
    let bits = transform_to_bitset(&flags).unwrap();
    assert_eq!(bits.iter().collect::<Vec<_>>(), vec![false, true, false]);

    let ints = ColumnWithStrings::new(
        Arc::new(Column::from_values::<Int32Tag>(&[1])),
        None,
        "i",
    );
    assert!(transform_to_bitset(&ints).is_err());
}

#[test]
fn statistics_by_category() {
    let ints = ColumnWithStrings::new(
        Arc::new(Column::from_options::<Int64Tag>(&[Some(-3), None, Some(7), Some(7)])),
        None,
        "i",
    );
    match Statistics::compute(&ints).unwrap() {
        Statistics::Integer(stats) => {
            assert_eq!(stats.min, IntegerValue::Signed(-3));
            assert_eq!(stats.max, IntegerValue::Signed(7));
            assert_eq!(stats.unique_count, 2);
        }
        other => panic!("expected integer statistics, got {other:?}"),
    }

    let floats = ColumnWithStrings::new(
        Arc::new(Column::from_values::<Float64Tag>(&[f64::NAN, 2.5, 1.0])),
        None,
        "f",
    );
    match Statistics::compute(&floats).unwrap() {
        Statistics::FloatingPoint(stats) => {
            assert_eq!((stats.min, stats.max), (1.0, 2.5));
            assert_eq!(stats.unique_count, 2);
        }
        other => panic!("expected float statistics, got {other:?}"),
    }

    let mut pool = StringPool::new();
    let offsets = [pool.get_str("x"), pool.get_str("y"), pool.get_str("x")];
    let strings = ColumnWithStrings::new(
        Arc::new(Column::from_values::<DynamicStringTag>(&offsets)),
        Some(Arc::new(pool)),
        "s",
    );
    let mut stats = Statistics::compute(&strings).unwrap();
    assert_eq!(stats.unique_count(), Some(2));
    stats.set_sorted(Sortedness::Unsorted);
    assert_eq!(stats.sorted(), Sortedness::Unsorted);

    let empty = ColumnWithStrings::new(Arc::new(Column::empty_rows(3)), None, "e");
    assert!(Statistics::compute(&empty).unwrap().is_empty());
}
