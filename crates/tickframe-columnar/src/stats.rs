//! Per-column statistics.
//!
//! Statistics are read and written alongside a column but never influence how the column is
//! stored. Each category holds its concrete fields directly; absence is [`Statistics::Empty`].

use crate::column::ColumnWithStrings;
use crate::dispatch::{visit_type, ScalarTag, TypeVisitor};
use crate::error::ColumnarResult;
use crate::string_pool::is_sentinel;
use crate::types::NativeType;
use ahash::AHashSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sortedness {
    #[default]
    Unknown,
    Ascending,
    Descending,
    Unsorted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegerValue {
    Signed(i64),
    Unsigned(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegerStatistics {
    pub min: IntegerValue,
    pub max: IntegerValue,
    pub unique_count: u64,
    pub sorted: Sortedness,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FloatingPointStatistics {
    pub min: f64,
    pub max: f64,
    pub unique_count: u64,
    pub sorted: Sortedness,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringStatistics {
    pub unique_count: u64,
    pub sorted: Sortedness,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Statistics {
    #[default]
    Empty,
    Integer(IntegerStatistics),
    FloatingPoint(FloatingPointStatistics),
    String(StringStatistics),
}

impl Statistics {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn unique_count(&self) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Integer(s) => Some(s.unique_count),
            Self::FloatingPoint(s) => Some(s.unique_count),
            Self::String(s) => Some(s.unique_count),
        }
    }

    pub fn set_unique_count(&mut self, unique_count: u64) {
        match self {
            Self::Empty => {}
            Self::Integer(s) => s.unique_count = unique_count,
            Self::FloatingPoint(s) => s.unique_count = unique_count,
            Self::String(s) => s.unique_count = unique_count,
        }
    }

    pub fn sorted(&self) -> Sortedness {
        match self {
            Self::Empty => Sortedness::Unknown,
            Self::Integer(s) => s.sorted,
            Self::FloatingPoint(s) => s.sorted,
            Self::String(s) => s.sorted,
        }
    }

    pub fn set_sorted(&mut self, sorted: Sortedness) {
        match self {
            Self::Empty => {}
            Self::Integer(s) => s.sorted = sorted,
            Self::FloatingPoint(s) => s.sorted = sorted,
            Self::String(s) => s.sorted = sorted,
        }
    }

    /// Scan the present rows of `column` and build the statistics for its type.
    ///
    /// Columns with no present rows, and `EMPTYVAL` columns, produce [`Statistics::Empty`].
    pub fn compute(column: &ColumnWithStrings) -> ColumnarResult<Self> {
        let data_type = column.column.data_type();
        if data_type.is_empty() || column.column.physical_row_count() == 0 {
            return Ok(Self::Empty);
        }
        visit_type(
            data_type,
            ComputeStatistics {
                column: &column.column,
            },
        )
    }
}

struct ComputeStatistics<'a> {
    column: &'a crate::column::Column,
}

impl TypeVisitor for ComputeStatistics<'_> {
    type Output = ColumnarResult<Statistics>;

    fn visit<T: ScalarTag>(self) -> Self::Output {
        let dt = T::DATA_TYPE;
        let mut distinct = DistinctCounter::new();

        if dt.is_sequence() {
            for offset in self.column.values::<u64>()? {
                if is_sentinel(offset) {
                    continue;
                }
                // Offsets come from one deduplicating pool, so equal offsets mean equal strings.
                distinct.insert_hash(splitmix64(offset));
            }
            return Ok(Statistics::String(StringStatistics {
                unique_count: distinct.estimate(),
                sorted: Sortedness::Unknown,
            }));
        }

        if T::Raw::IS_FLOAT {
            let mut order = OrderTracker::<f64>::default();
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for v in self.column.values::<T::Raw>()? {
                let v = v.to_f64();
                if v.is_nan() {
                    continue;
                }
                min = min.min(v);
                max = max.max(v);
                order.observe(v);
                distinct.insert_hash(splitmix64(normalize_zero(v).to_bits()));
            }
            if min > max {
                // Only NaNs.
                return Ok(Statistics::Empty);
            }
            return Ok(Statistics::FloatingPoint(FloatingPointStatistics {
                min,
                max,
                unique_count: distinct.estimate(),
                sorted: order.finish(),
            }));
        }

        let mut order = OrderTracker::<i128>::default();
        let mut min = i128::MAX;
        let mut max = i128::MIN;
        for v in self.column.values::<T::Raw>()? {
            let v = v.to_i128();
            min = min.min(v);
            max = max.max(v);
            order.observe(v);
            distinct.insert_hash(splitmix64(v as u64));
        }
        let to_value = |v: i128| {
            if dt.is_unsigned() || dt.is_bool() {
                IntegerValue::Unsigned(v as u64)
            } else {
                IntegerValue::Signed(v as i64)
            }
        };
        Ok(Statistics::Integer(IntegerStatistics {
            min: to_value(min),
            max: to_value(max),
            unique_count: distinct.estimate(),
            sorted: order.finish(),
        }))
    }
}

fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

#[derive(Default)]
struct OrderTracker<T> {
    prev: Option<T>,
    ascending: bool,
    descending: bool,
    seen_pair: bool,
}

impl<T: PartialOrd + Copy> OrderTracker<T> {
    fn observe(&mut self, value: T) {
        if let Some(prev) = self.prev {
            if !self.seen_pair {
                self.ascending = true;
                self.descending = true;
                self.seen_pair = true;
            }
            if value < prev {
                self.ascending = false;
            }
            if value > prev {
                self.descending = false;
            }
        }
        self.prev = Some(value);
    }

    fn finish(&self) -> Sortedness {
        match (self.seen_pair, self.ascending, self.descending) {
            (false, _, _) => Sortedness::Unknown,
            (true, true, _) => Sortedness::Ascending,
            (true, false, true) => Sortedness::Descending,
            (true, false, false) => Sortedness::Unsorted,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct HyperLogLog {
    p: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn with_precision(p: u8) -> Self {
        debug_assert!((4..=16).contains(&p));
        Self {
            p,
            registers: vec![0u8; 1 << p],
        }
    }

    pub fn insert_hash(&mut self, hash: u64) {
        let idx = (hash >> (64 - self.p)) as usize;
        let rank = ((hash << self.p).leading_zeros() + 1) as u8;
        self.registers[idx] = self.registers[idx].max(rank);
    }

    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let (inv_sum, zeros) = self
            .registers
            .iter()
            .fold((0.0f64, 0u32), |(sum, zeros), &r| {
                (sum + 2f64.powi(-i32::from(r)), zeros + u32::from(r == 0))
            });
        let raw = alpha * m * m / inv_sum;

        // Linear counting below 2.5m.
        if raw <= 2.5 * m && zeros > 0 {
            return (m * (m / f64::from(zeros)).ln()).round().max(0.0) as u64;
        }
        raw.round().max(0.0) as u64
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Exact distinct counting that spills into a HyperLogLog past a fixed cardinality.
#[derive(Clone, Debug)]
pub(crate) enum DistinctCounter {
    Exact(AHashSet<u64>),
    Hll(HyperLogLog),
}

impl DistinctCounter {
    const EXACT_LIMIT: usize = 2048;

    pub fn new() -> Self {
        Self::Exact(AHashSet::new())
    }

    pub fn insert_hash(&mut self, hash: u64) {
        match self {
            Self::Exact(set) => {
                if set.len() >= Self::EXACT_LIMIT && !set.contains(&hash) {
                    let mut hll = HyperLogLog::with_precision(10);
                    for &h in set.iter() {
                        hll.insert_hash(h);
                    }
                    hll.insert_hash(hash);
                    *self = Self::Hll(hll);
                } else {
                    set.insert(hash);
                }
            }
            Self::Hll(hll) => hll.insert_hash(hash),
        }
    }

    pub fn estimate(&self) -> u64 {
        match self {
            Self::Exact(set) => set.len() as u64,
            Self::Hll(hll) => hll.estimate(),
        }
    }
}
