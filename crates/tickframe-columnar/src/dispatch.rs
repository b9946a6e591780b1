//! Type-tag dispatch.
//!
//! A runtime [`DataType`] is resolved once to a zero-sized tag type implementing
//! [`ScalarTag`]; the visitor body is then monomorphized per tag, so the hot loop inside
//! it carries no per-element type branching. The `match` tables below are the only place
//! a runtime type becomes a static one; every operator, cast and output handler goes
//! through them.
//!
//! Two-argument dispatch nests two single dispatches, reaching every `(left, right)` pair.

use crate::types::{DataType, NativeType};
use std::marker::PhantomData;

/// Static representation of one concrete [`DataType`].
pub trait ScalarTag: Send + Sync + 'static {
    /// Element type as stored in a column buffer.
    type Raw: NativeType;
    const DATA_TYPE: DataType;
}

macro_rules! scalar_tags {
    ($($tag:ident => $dt:ident, $raw:ty;)*) => {
        $(
            #[derive(Clone, Copy, Debug, Default)]
            pub struct $tag;

            impl ScalarTag for $tag {
                type Raw = $raw;
                const DATA_TYPE: DataType = DataType::$dt;
            }
        )*

        /// Resolve `data_type` to its tag and run `visitor` specialized for it.
        pub fn visit_type<V: TypeVisitor>(data_type: DataType, visitor: V) -> V::Output {
            match data_type {
                $(DataType::$dt => visitor.visit::<$tag>(),)*
            }
        }
    };
}

scalar_tags! {
    EmptyTag => Empty, u64;
    Bool8Tag => Bool8, bool;
    Uint8Tag => Uint8, u8;
    Uint16Tag => Uint16, u16;
    Uint32Tag => Uint32, u32;
    Uint64Tag => Uint64, u64;
    Int8Tag => Int8, i8;
    Int16Tag => Int16, i16;
    Int32Tag => Int32, i32;
    Int64Tag => Int64, i64;
    Float32Tag => Float32, f32;
    Float64Tag => Float64, f64;
    NanosecondsTag => NanosecondsSinceEpoch, i64;
    FixedStringTag => FixedString64, u64;
    DynamicStringTag => DynamicString64, u64;
}

/// Generic body run by [`visit_type`].
pub trait TypeVisitor {
    type Output;

    fn visit<T: ScalarTag>(self) -> Self::Output;
}

/// Generic body run by [`visit_type_pair`].
pub trait PairVisitor {
    type Output;

    fn visit<L: ScalarTag, R: ScalarTag>(self) -> Self::Output;
}

/// Resolve both data types and run `visitor` specialized for the pair.
pub fn visit_type_pair<V: PairVisitor>(left: DataType, right: DataType, visitor: V) -> V::Output {
    visit_type(left, OuterPair { right, visitor })
}

struct OuterPair<V> {
    right: DataType,
    visitor: V,
}

impl<V: PairVisitor> TypeVisitor for OuterPair<V> {
    type Output = V::Output;

    fn visit<L: ScalarTag>(self) -> V::Output {
        visit_type(
            self.right,
            InnerPair::<L, V> {
                visitor: self.visitor,
                _left: PhantomData,
            },
        )
    }
}

struct InnerPair<L, V> {
    visitor: V,
    _left: PhantomData<L>,
}

impl<L: ScalarTag, V: PairVisitor> TypeVisitor for InnerPair<L, V> {
    type Output = V::Output;

    fn visit<R: ScalarTag>(self) -> V::Output {
        self.visitor.visit::<L, R>()
    }
}
