//! Runtime type descriptors and the native element types backing them.
//!
//! A [`TypeDescriptor`] is the loosely-typed triple stored alongside every field
//! (`value_kind`, `size_bits`, `dimension`). Only a closed set of combinations is
//! materializable; those are enumerated by [`DataType`], which is what the dispatch
//! layer (`crate::dispatch`) resolves to a concrete Rust element type.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Unknown,
    Empty,
    Bool,
    Uint,
    Int,
    Float,
    /// Nanoseconds since the Unix epoch; the time-series index type.
    Nanoseconds,
    FixedString,
    DynamicString,
}

impl ValueKind {
    pub const ALL: [ValueKind; 9] = [
        ValueKind::Unknown,
        ValueKind::Empty,
        ValueKind::Bool,
        ValueKind::Uint,
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Nanoseconds,
        ValueKind::FixedString,
        ValueKind::DynamicString,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SizeBits {
    Unknown,
    S8,
    S16,
    S32,
    S64,
}

impl SizeBits {
    pub const ALL: [SizeBits; 5] = [
        SizeBits::Unknown,
        SizeBits::S8,
        SizeBits::S16,
        SizeBits::S32,
        SizeBits::S64,
    ];

    pub const fn bits(self) -> usize {
        match self {
            SizeBits::Unknown => 0,
            SizeBits::S8 => 8,
            SizeBits::S16 => 16,
            SizeBits::S32 => 32,
            SizeBits::S64 => 64,
        }
    }

    pub const fn bytes(self) -> usize {
        self.bits() / 8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Dim0,
    Dim1,
    Dim2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    value_kind: ValueKind,
    size_bits: SizeBits,
    dimension: Dimension,
}

impl TypeDescriptor {
    pub const fn new(value_kind: ValueKind, size_bits: SizeBits, dimension: Dimension) -> Self {
        Self {
            value_kind,
            size_bits,
            dimension,
        }
    }

    /// Scalar (`Dim0`) descriptor for a concrete data type.
    pub const fn scalar(data_type: DataType) -> Self {
        Self::new(data_type.value_kind(), data_type.size_bits(), Dimension::Dim0)
    }

    pub const fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    pub const fn size_bits(&self) -> SizeBits {
        self.size_bits
    }

    pub const fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_scalar(&self) -> bool {
        self.dimension == Dimension::Dim0
    }

    /// Resolve the `(value_kind, size_bits)` pair to a concrete data type.
    ///
    /// Returns `None` for combinations that have no storage representation, e.g.
    /// `Unknown` kinds or a 16-bit float.
    pub fn data_type(&self) -> Option<DataType> {
        use SizeBits::*;
        use ValueKind::*;
        let dt = match (self.value_kind, self.size_bits) {
            (Empty, _) => DataType::Empty,
            (Bool, _) => DataType::Bool8,
            (Uint, S8) => DataType::Uint8,
            (Uint, S16) => DataType::Uint16,
            (Uint, S32) => DataType::Uint32,
            (Uint, S64) => DataType::Uint64,
            (Int, S8) => DataType::Int8,
            (Int, S16) => DataType::Int16,
            (Int, S32) => DataType::Int32,
            (Int, S64) => DataType::Int64,
            (Float, S32) => DataType::Float32,
            (Float, S64) => DataType::Float64,
            (Nanoseconds, _) => DataType::NanosecondsSinceEpoch,
            (FixedString, _) => DataType::FixedString64,
            (DynamicString, _) => DataType::DynamicString64,
            _ => return None,
        };
        Some(dt)
    }

    /// Width in bytes of one stored element, if the descriptor is materializable.
    pub fn element_size(&self) -> Option<usize> {
        self.data_type().map(DataType::size_bytes)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.data_type(), self.dimension) {
            (Some(dt), Dimension::Dim0) => write!(f, "{dt}"),
            (Some(dt), dim) => write!(f, "{dt}[{dim:?}]"),
            (None, dim) => write!(
                f,
                "{:?}{}[{dim:?}]",
                self.value_kind,
                self.size_bits.bits()
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Empty,
    Bool8,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    NanosecondsSinceEpoch,
    /// Fixed-width string; elements are 64-bit string pool offsets.
    FixedString64,
    /// Variable-width string; elements are 64-bit string pool offsets.
    DynamicString64,
}

impl DataType {
    pub const ALL: [DataType; 15] = [
        DataType::Empty,
        DataType::Bool8,
        DataType::Uint8,
        DataType::Uint16,
        DataType::Uint32,
        DataType::Uint64,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
        DataType::NanosecondsSinceEpoch,
        DataType::FixedString64,
        DataType::DynamicString64,
    ];

    pub const fn value_kind(self) -> ValueKind {
        match self {
            DataType::Empty => ValueKind::Empty,
            DataType::Bool8 => ValueKind::Bool,
            DataType::Uint8 | DataType::Uint16 | DataType::Uint32 | DataType::Uint64 => {
                ValueKind::Uint
            }
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => ValueKind::Int,
            DataType::Float32 | DataType::Float64 => ValueKind::Float,
            DataType::NanosecondsSinceEpoch => ValueKind::Nanoseconds,
            DataType::FixedString64 => ValueKind::FixedString,
            DataType::DynamicString64 => ValueKind::DynamicString,
        }
    }

    pub const fn size_bits(self) -> SizeBits {
        match self {
            DataType::Bool8 | DataType::Uint8 | DataType::Int8 => SizeBits::S8,
            DataType::Uint16 | DataType::Int16 => SizeBits::S16,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => SizeBits::S32,
            DataType::Empty
            | DataType::Uint64
            | DataType::Int64
            | DataType::Float64
            | DataType::NanosecondsSinceEpoch
            | DataType::FixedString64
            | DataType::DynamicString64 => SizeBits::S64,
        }
    }

    pub const fn size_bytes(self) -> usize {
        self.size_bits().bytes()
    }

    pub const fn is_empty(self) -> bool {
        matches!(self, DataType::Empty)
    }

    pub const fn is_bool(self) -> bool {
        matches!(self, DataType::Bool8)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(self.value_kind(), ValueKind::Uint)
    }

    pub const fn is_signed(self) -> bool {
        matches!(self.value_kind(), ValueKind::Int)
    }

    pub const fn is_integer(self) -> bool {
        self.is_unsigned() || self.is_signed()
    }

    pub const fn is_floating_point(self) -> bool {
        matches!(self.value_kind(), ValueKind::Float)
    }

    /// Integer or floating point; time and bool are separate categories.
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating_point()
    }

    pub const fn is_time(self) -> bool {
        matches!(self, DataType::NanosecondsSinceEpoch)
    }

    pub const fn is_sequence(self) -> bool {
        matches!(self, DataType::FixedString64 | DataType::DynamicString64)
    }

    pub const fn is_dynamic_string(self) -> bool {
        matches!(self, DataType::DynamicString64)
    }

    pub const fn is_fixed_string(self) -> bool {
        matches!(self, DataType::FixedString64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::Empty => "EMPTYVAL",
            DataType::Bool8 => "BOOL8",
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Uint32 => "UINT32",
            DataType::Uint64 => "UINT64",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Float32 => "FLOAT32",
            DataType::Float64 => "FLOAT64",
            DataType::NanosecondsSinceEpoch => "NANOSECONDS_UTC64",
            DataType::FixedString64 => "UTF_FIXED64",
            DataType::DynamicString64 => "UTF_DYNAMIC64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-width element type that can be stored little-endian in a column buffer.
///
/// Conversions go through `i128` for integers and `f64` for floats so that any
/// promotion accepted by `crate::promotion` is exact.
pub trait NativeType:
    Copy + Default + PartialEq + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    const SIZE: usize;
    const IS_FLOAT: bool;

    /// Read one element from the first `SIZE` bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;
    /// Write one element into the first `SIZE` bytes of `out`.
    fn write_le(self, out: &mut [u8]);

    fn to_i128(self) -> i128;
    fn to_f64(self) -> f64;
    fn from_i128(value: i128) -> Self;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_native_number {
    ($($ty:ty => $is_float:expr;)*) => {
        $(
            impl NativeType for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                const IS_FLOAT: bool = $is_float;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn to_i128(self) -> i128 {
                    self as i128
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_i128(value: i128) -> Self {
                    value as $ty
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_native_number! {
    u8 => false;
    u16 => false;
    u32 => false;
    u64 => false;
    i8 => false;
    i16 => false;
    i32 => false;
    i64 => false;
    f32 => true;
    f64 => true;
}

impl NativeType for bool {
    const SIZE: usize = 1;
    const IS_FLOAT: bool = false;

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    #[inline]
    fn to_i128(self) -> i128 {
        i128::from(self)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    #[inline]
    fn from_i128(value: i128) -> Self {
        value != 0
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}

/// Convert between native element types.
///
/// Exact for every promotion `crate::promotion::is_valid_promotion` accepts.
#[inline]
pub fn cast<S: NativeType, D: NativeType>(value: S) -> D {
    if S::IS_FLOAT || D::IS_FLOAT {
        D::from_f64(value.to_f64())
    } else {
        D::from_i128(value.to_i128())
    }
}
