//! In-memory columnar core for the tickframe time-series dataframe store.
//!
//! This crate focuses on:
//! - Typed columns over chunked byte buffers, with optional sparse maps for absent rows.
//! - Type promotion rules shared by reads, appends and computed columns.
//! - Ternary selection and arithmetic/comparison/boolean operations over columns, scalars and
//!   bitsets.
//! - Decoding encoded segments into a frame through pluggable per-format type handlers, and
//!   exporting frames through the Arrow C data interface (`arrow` feature).

#![forbid(unsafe_code)]

#[cfg(feature = "arrow")]
mod arrow;
mod bitmap;
mod buffer;
mod codec;
mod column;
mod config;
mod dispatch;
mod error;
mod frame;
mod handlers;
mod ops;
mod parallel;
mod promotion;
mod stats;
mod string_pool;
mod types;

#[cfg(feature = "arrow")]
pub use crate::arrow::{
    arrow_array_from_column, arrow_data_from_column, arrow_type, create_arrow_read_result,
    frame_to_arrow_arrays, names_from_frame, segment_to_arrow_data, ArrowData, ArrowOutputFrame,
    ArrowReadResult, VersionedItem,
};
pub use crate::bitmap::{BitSet, Ones};
pub use crate::buffer::{AllocationType, Block, ChunkedBuffer, ExtraBuffer, DEFAULT_BLOCK_SIZE};
pub use crate::codec::{
    DecodeCursor, EncodedField, EncodingVersion, FieldDecoder, PlainCodec, PlainEncodedField,
};
pub use crate::column::{transform, transform_with_default, Column, ColumnWithStrings, Sparsity};
pub use crate::config::ReadOptions;
pub use crate::dispatch::*;
pub use crate::error::{ColumnarError, ColumnarResult};
pub use crate::frame::{decode_segments_into_frame, default_value, EncodedSegment, Field, Frame};
pub use crate::handlers::{
    decode_staging, ArrowHandlerData, ArrowHandlerDataFactory, ArrowStringHandler, ColumnMapping,
    DecodeContext, HandlerData, HandlerDataFactory, NativeHandlerData, NativeHandlerDataFactory,
    NativeStringHandler, OutputFormat, StringBlockInfo, TypeHandler, TypeHandlerRegistry,
    TypeHandlerRegistryBuilder,
};
pub use crate::ops::{
    binary_operation, dispatch_binary, dispatch_ternary, dispatch_unary, ternary_bitset,
    ternary_operation, transform_to_bitset, unary_operation, OperationType, Value, VariantData,
};
pub use crate::promotion::{arithmetic_promoted_type, common_type, is_valid_promotion};
pub use crate::stats::{
    FloatingPointStatistics, IntegerStatistics, IntegerValue, Sortedness, Statistics,
    StringStatistics,
};
pub use crate::string_pool::{is_sentinel, StringPool, NAN_OFFSET, NONE_OFFSET};
pub use crate::types::{
    cast, DataType, Dimension, NativeType, SizeBits, TypeDescriptor, ValueKind,
};
