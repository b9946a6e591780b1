use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tickframe_columnar::{
    binary_operation, ternary_operation, BitSet, Column, ColumnWithStrings, Float64Tag,
    Int32Tag, Int64Tag, OperationType, Value, VariantData,
};

fn bench_rows() -> usize {
    std::env::var("TICKFRAME_TERNARY_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (10_000..=10_000_000).contains(&v))
        .unwrap_or(1_000_000)
}

fn column(column: Column, name: &str) -> VariantData {
    VariantData::Column(ColumnWithStrings::new(Arc::new(column), None, name))
}

fn bench_ternary(c: &mut Criterion) {
    let rows = bench_rows();
    let condition = VariantData::Bitset(BitSet::from_positions(rows, (0..rows).step_by(3)));

    let ints: Vec<i32> = (0..rows).map(|i| (i % 1_000) as i32).collect();
    let longs: Vec<i64> = (0..rows).map(|i| i as i64 * 7).collect();
    // Every fourth row absent.
    let sparse: Vec<Option<f64>> = (0..rows)
        .map(|i| (i % 4 != 0).then_some(i as f64 * 0.5))
        .collect();

    let left = column(Column::from_values::<Int32Tag>(&ints), "left");
    let right = column(Column::from_values::<Int64Tag>(&longs), "right");
    let sparse = column(Column::from_options::<Float64Tag>(&sparse), "sparse");

    let mut group = c.benchmark_group("ternary");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(rows as u64));

    group.bench_with_input(BenchmarkId::new("dense_promoted", rows), &rows, |b, _| {
        b.iter(|| {
            let out = ternary_operation(&condition, &left, &right).unwrap();
            black_box(out);
        })
    });

    group.bench_with_input(BenchmarkId::new("sparse_vs_value", rows), &rows, |b, _| {
        let value = VariantData::Value(Value::Float64(-1.0));
        b.iter(|| {
            let out = ternary_operation(&condition, &sparse, &value).unwrap();
            black_box(out);
        })
    });

    group.bench_with_input(BenchmarkId::new("compare_then_select", rows), &rows, |b, _| {
        let threshold = VariantData::Value(Value::Int32(500));
        b.iter(|| {
            let mask = binary_operation(&left, &threshold, OperationType::Gt).unwrap();
            let out = ternary_operation(&mask, &left, &right).unwrap();
            black_box(out);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_ternary);
criterion_main!(benches);
