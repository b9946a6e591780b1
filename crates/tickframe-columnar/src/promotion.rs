//! Static type-promotion algebra.
//!
//! [`is_valid_promotion`] is the one-way, lossless rule; [`common_type`] is its
//! symmetric closure, falling back to a wider type both sides fit into when neither
//! promotes directly to the other.

use crate::types::{DataType, SizeBits, TypeDescriptor, ValueKind};

/// Whether every value of `source` is representable as `target` without loss.
pub fn is_valid_promotion(source: &TypeDescriptor, target: &TypeDescriptor) -> bool {
    if source.dimension() != target.dimension() {
        return false;
    }
    if source.value_kind() == ValueKind::Empty {
        return true;
    }
    if target.value_kind() == ValueKind::Empty {
        return false;
    }
    if source == target {
        return true;
    }

    let source_bits = source.size_bits().bits();
    let target_bits = target.size_bits().bits();
    match (source.value_kind(), target.value_kind()) {
        (ValueKind::Uint, ValueKind::Uint)
        | (ValueKind::Int, ValueKind::Int)
        | (ValueKind::Float, ValueKind::Float) => target_bits >= source_bits,
        // The sign bit needs one extra bit of width.
        (ValueKind::Uint, ValueKind::Int) => target_bits > source_bits,
        (ValueKind::Uint | ValueKind::Int, ValueKind::Float) => match target.size_bits() {
            SizeBits::S64 => true,
            SizeBits::S32 => source_bits > 0 && source_bits <= 32,
            _ => false,
        },
        (ValueKind::Bool, ValueKind::Bool) | (ValueKind::Nanoseconds, ValueKind::Nanoseconds) => {
            true
        }
        (ValueKind::FixedString, ValueKind::FixedString)
        | (ValueKind::FixedString | ValueKind::DynamicString, ValueKind::DynamicString) => true,
        _ => false,
    }
}

/// Smallest type both `left` and `right` promote to, if any. Symmetric in its arguments.
pub fn common_type(left: &TypeDescriptor, right: &TypeDescriptor) -> Option<TypeDescriptor> {
    if left.dimension() != right.dimension() {
        return None;
    }

    match (
        left.value_kind() == ValueKind::Empty,
        right.value_kind() == ValueKind::Empty,
    ) {
        (true, true) => return Some(wider(left, right)),
        (true, false) => return Some(*right),
        (false, true) => return Some(*left),
        (false, false) => {}
    }

    match (
        is_valid_promotion(left, right),
        is_valid_promotion(right, left),
    ) {
        (true, true) => return Some(wider(left, right)),
        (true, false) => return Some(*right),
        (false, true) => return Some(*left),
        (false, false) => {}
    }

    match (left.value_kind(), right.value_kind()) {
        // No direct promotion means the integer side is too wide for the float side, so only
        // a 64-bit float holds both.
        (ValueKind::Float, ValueKind::Int | ValueKind::Uint)
        | (ValueKind::Int | ValueKind::Uint, ValueKind::Float) => Some(TypeDescriptor::new(
            ValueKind::Float,
            SizeBits::S64,
            left.dimension(),
        )),
        (ValueKind::Uint, ValueKind::Int) | (ValueKind::Int, ValueKind::Uint) => {
            let unsigned = if left.value_kind() == ValueKind::Uint {
                left
            } else {
                right
            };
            // INT64 dominates every signed width and every unsigned width below 64 bits.
            (unsigned.size_bits() < SizeBits::S64).then(|| {
                TypeDescriptor::new(ValueKind::Int, SizeBits::S64, left.dimension())
            })
        }
        _ => None,
    }
}

/// Output type of an elementwise operator over two scalar element types.
///
/// Both sides must be numeric, both bool, or both time. `UINT64` mixed with any signed type
/// has no lossless representation and yields `None`.
pub fn arithmetic_promoted_type(left: DataType, right: DataType) -> Option<DataType> {
    if left.is_bool() && right.is_bool() {
        return Some(DataType::Bool8);
    }
    if left.is_time() && right.is_time() {
        return Some(DataType::NanosecondsSinceEpoch);
    }
    if !(left.is_numeric() && right.is_numeric()) {
        return None;
    }
    common_type(&TypeDescriptor::scalar(left), &TypeDescriptor::scalar(right))?.data_type()
}

fn wider(left: &TypeDescriptor, right: &TypeDescriptor) -> TypeDescriptor {
    if left.size_bits() >= right.size_bits() {
        *left
    } else {
        *right
    }
}
