#![cfg(feature = "arrow")]

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type, TimestampNanosecondType};
use arrow_array::{Array, ArrayRef};
use arrow_schema::{DataType as ArrowType, TimeUnit};
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::error::Error;
use std::sync::Arc;
use tickframe_columnar::{
    arrow_data_from_column, create_arrow_read_result, decode_segments_into_frame,
    frame_to_arrow_arrays, Bool8Tag, Column, ColumnWithStrings, ColumnarError,
    DynamicStringTag, EncodedSegment, EncodingVersion, Float64Tag, Frame, HandlerData, Int64Tag,
    NanosecondsTag, OutputFormat, PlainCodec, ReadOptions, StringPool, TypeHandlerRegistry,
    VersionedItem, NAN_OFFSET,
};

type TestResult = Result<(), Box<dyn Error>>;

fn strings(values: &[Option<&str>]) -> (Column, Arc<StringPool>) {
    let mut pool = StringPool::new();
    let offsets: Vec<Option<u64>> = values.iter().map(|v| v.map(|s| pool.get_str(s))).collect();
    (Column::from_options::<DynamicStringTag>(&offsets), Arc::new(pool))
}

fn segments() -> Result<Vec<EncodedSegment>, ColumnarError> {
    let index_a = Column::from_values::<NanosecondsTag>(&[1, 2]);
    let close_a = Column::from_values::<Float64Tag>(&[10.0, 11.0]);
    let (sym_a, pool_a) = strings(&[Some("ab"), Some("cde")]);

    let index_b = Column::from_values::<NanosecondsTag>(&[3]);
    let close_b = Column::from_options::<Float64Tag>(&[None]);
    let flag_b = Column::from_values::<Bool8Tag>(&[true]);

    Ok(vec![
        EncodedSegment::encode_plain(
            &[("index", &index_a), ("close", &close_a), ("sym", &sym_a)],
            Some(pool_a),
            EncodingVersion::V1,
        )?,
        EncodedSegment::encode_plain(
            &[("index", &index_b), ("close", &close_b), ("flag", &flag_b)],
            None,
            EncodingVersion::V1,
        )?,
    ])
}

fn decode(parallel: bool) -> Result<(Frame, HandlerData), ColumnarError> {
    let registry = TypeHandlerRegistry::with_default_handlers();
    let options = ReadOptions {
        output_format: OutputFormat::Arrow,
        parallel,
        ..ReadOptions::default()
    };
    let data = registry.handler_data(OutputFormat::Arrow);
    let frame = decode_segments_into_frame(&segments()?, &registry, &PlainCodec, &options, &data)?;
    Ok((frame, data))
}

fn arrays(parallel: bool) -> Result<Vec<Vec<ArrayRef>>, ColumnarError> {
    let (frame, data) = decode(parallel)?;
    frame_to_arrow_arrays(frame, &data)
}

#[test]
fn one_array_per_column_block() -> TestResult {
    let arrays = arrays(false)?;
    assert_eq!(arrays.len(), 4);
    assert!(arrays.iter().all(|blocks| blocks.len() == 2));

    let index = &arrays[0];
    assert_eq!(
        index[0].data_type(),
        &ArrowType::Timestamp(TimeUnit::Nanosecond, None)
    );
    let stamps: Vec<i64> = index
        .iter()
        .flat_map(|a| a.as_primitive::<TimestampNanosecondType>().values().to_vec())
        .collect();
    assert_eq!(stamps, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn absent_values_export_as_nulls() -> TestResult {
    let arrays = arrays(true)?;
    let close = &arrays[1];
    let first = close[0].as_primitive::<Float64Type>();
    assert_eq!(first.null_count(), 0);
    assert_eq!(first.values().to_vec(), vec![10.0, 11.0]);
    let second = close[1].as_primitive::<Float64Type>();
    assert_eq!(second.len(), 1);
    assert!(second.is_null(0));

    // Missing from the second segment entirely.
    let sym = &arrays[2];
    assert_eq!(sym[1].len(), 1);
    assert_eq!(sym[1].null_count(), 1);

    let flag = &arrays[3];
    assert_eq!(flag[0].null_count(), 2);
    assert!(flag[1].as_boolean().value(0));
    Ok(())
}

#[test]
fn strings_become_utf8_with_prefix_offsets() -> TestResult {
    let arrays = arrays(false)?;
    let sym = arrays[2][0].as_string::<i32>();
    assert_eq!(sym.value_offsets(), &[0, 2, 5]);
    assert_eq!(sym.value(0), "ab");
    assert_eq!(sym.value(1), "cde");
    assert_eq!(sym.value_data(), b"abcde");
    Ok(())
}

#[test]
fn read_result_exposes_c_data_interface_pointers() -> TestResult {
    let (frame, data) = decode(false)?;
    let item = VersionedItem {
        symbol: "prices".to_owned(),
        version: 3,
        timestamp_ns: 1_700_000_000_000_000_000,
    };
    let result = create_arrow_read_result(item.clone(), frame, &data, Bytes::from_static(b"meta"))?;
    assert_eq!(result.versioned_item, item);
    assert_eq!(result.user_metadata.as_ref(), b"meta");
    assert_eq!(result.frame.names(), &["index", "close", "sym", "flag"]);

    let arrays = result.frame.arrays();
    let schemas = result.frame.schemas();
    assert_eq!(arrays.len(), 4);
    assert!(arrays.iter().zip(&schemas).all(|(a, s)| a.len() == 2 && s.len() == 2));
    assert!(arrays.iter().flatten().all(|&ptr| ptr != 0));

    let mut columns = result.frame.into_data().into_iter();
    let close = columns.nth(1).ok_or("missing close column")?;
    let (array, schema) = close.into_iter().next().ok_or("missing block")?.into_parts();
    // SAFETY: both structs were produced by `ArrowData::new` and are consumed exactly once.
    let imported = unsafe { arrow_array::ffi::from_ffi(*array, &schema) }?;
    let imported = arrow_array::make_array(imported);
    assert_eq!(
        imported.as_primitive::<Float64Type>().values().to_vec(),
        vec![10.0, 11.0]
    );
    Ok(())
}

#[test]
fn standalone_columns_export_with_sentinels_as_nulls() -> TestResult {
    let mut pool = StringPool::new();
    let x = pool.get_str("x");
    let column = Column::from_options::<DynamicStringTag>(&[Some(x), Some(NAN_OFFSET), None]);
    let column = ColumnWithStrings::new(Arc::new(column), Some(Arc::new(pool)), "s");
    let (array, schema) = arrow_data_from_column(&column)?.into_parts();
    // SAFETY: produced by `ArrowData::new` and consumed once.
    let imported = arrow_array::make_array(unsafe { arrow_array::ffi::from_ffi(*array, &schema) }?);
    let strings = imported.as_string::<i32>();
    assert_eq!(strings.len(), 3);
    assert_eq!(strings.value(0), "x");
    assert!(strings.is_null(1) && strings.is_null(2));

    let ints = Column::from_values::<Int64Tag>(&[5, 6]);
    let ints = ColumnWithStrings::new(Arc::new(ints), None, "i");
    let (array, schema) = arrow_data_from_column(&ints)?.into_parts();
    // SAFETY: as above.
    let imported = arrow_array::make_array(unsafe { arrow_array::ffi::from_ffi(*array, &schema) }?);
    assert_eq!(imported.as_primitive::<Int64Type>().values().to_vec(), vec![5, 6]);
    Ok(())
}

#[test]
fn native_frames_cannot_be_exported() -> TestResult {
    let registry = TypeHandlerRegistry::with_default_handlers();
    let options = ReadOptions::default();
    let data = registry.handler_data(options.output_format);
    let frame = decode_segments_into_frame(&segments()?, &registry, &PlainCodec, &options, &data)?;
    let err = frame_to_arrow_arrays(frame, &data).unwrap_err();
    assert!(matches!(err, ColumnarError::InvalidUserArgument { .. }));
    Ok(())
}

#[test]
fn zero_row_segment_between_string_segments_exports_empty() -> TestResult {
    let (first, first_pool) = strings(&[Some("a")]);
    let (empty, empty_pool) = strings(&[]);
    let (last, last_pool) = strings(&[Some("bc"), Some("d")]);
    let segments = [
        EncodedSegment::encode_plain(&[("s", &first)], Some(first_pool), EncodingVersion::V1)?,
        EncodedSegment::encode_plain(&[("s", &empty)], Some(empty_pool), EncodingVersion::V1)?,
        EncodedSegment::encode_plain(&[("s", &last)], Some(last_pool), EncodingVersion::V1)?,
    ];
    let registry = TypeHandlerRegistry::with_default_handlers();
    let options = ReadOptions {
        output_format: OutputFormat::Arrow,
        parallel: false,
        ..ReadOptions::default()
    };
    let data = registry.handler_data(OutputFormat::Arrow);
    let frame = decode_segments_into_frame(&segments, &registry, &PlainCodec, &options, &data)?;
    let arrays = frame_to_arrow_arrays(frame, &data)?;

    let blocks = &arrays[0];
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].as_string::<i32>().value(0), "a");
    assert_eq!(blocks[1].len(), 0);
    let last = blocks[2].as_string::<i32>();
    assert_eq!(last.value_offsets(), &[0, 2, 3]);
    assert_eq!(last.value(0), "bc");
    assert_eq!(last.value(1), "d");
    Ok(())
}
