//! Output type handlers.
//!
//! A handler converts decoded internal columns of one data type into the representation an
//! output format expects (e.g. 64-bit pool offsets into 32-bit Arrow offsets plus a payload
//! buffer). Handlers are looked up in a [`TypeHandlerRegistry`] built once per session; types
//! without a handler decode straight into the destination frame.

mod arrow;
mod native;

pub use self::arrow::{ArrowHandlerData, ArrowHandlerDataFactory, ArrowStringHandler, StringBlockInfo};
pub use self::native::{NativeHandlerData, NativeHandlerDataFactory, NativeStringHandler};

use crate::buffer::ChunkedBuffer;
use crate::codec::{DecodeCursor, EncodedField, EncodingVersion, FieldDecoder};
use crate::column::{Column, Sparsity};
use crate::error::{ColumnarError, ColumnarResult};
use crate::string_pool::StringPool;
use crate::types::{DataType, TypeDescriptor};
use ahash::AHashMap;
use std::any::Any;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Dataframe-library arrays: dense buffers, strings as offsets into one shared pool.
    #[default]
    Native,
    /// Arrow C data interface arrays.
    Arrow,
}

/// Where one segment's field lands in the destination frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source_type_desc: TypeDescriptor,
    pub dest_type_desc: TypeDescriptor,
    /// Byte offset of the segment's block within the destination column.
    pub offset_bytes: usize,
    pub num_rows: usize,
    pub column_index: usize,
}

#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub decoder: &'a dyn FieldDecoder,
    pub encoding_version: EncodingVersion,
    pub output_format: OutputFormat,
}

/// Opaque per-session state shared by every handler call of one output format.
#[derive(Default)]
pub struct HandlerData(Option<Box<dyn Any + Send + Sync>>);

impl HandlerData {
    pub fn new<T: Any + Send + Sync>(data: T) -> Self {
        Self(Some(Box::new(data)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref()
    }

    pub(crate) fn expect_ref<T: Any>(&self, handler: &'static str) -> ColumnarResult<&T> {
        self.downcast_ref().ok_or_else(|| {
            ColumnarError::AssertionFailure(format!(
                "{handler} called without its session state"
            ))
        })
    }
}

impl std::fmt::Debug for HandlerData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HandlerData")
            .field(&self.0.as_ref().map(|_| ".."))
            .finish()
    }
}

pub trait HandlerDataFactory: Send + Sync {
    fn create(&self) -> HandlerData;
}

pub trait TypeHandler: Send + Sync {
    /// Decode one encoded field and convert it into `dest` at `mapping.offset_bytes`.
    ///
    /// Returns the number of encoded bytes consumed.
    #[allow(clippy::too_many_arguments)]
    fn handle_type(
        &self,
        cursor: &mut DecodeCursor,
        dest: &mut Column,
        field: &dyn EncodedField,
        mapping: &ColumnMapping,
        ctx: &DecodeContext<'_>,
        data: &HandlerData,
        string_pool: Option<&StringPool>,
    ) -> ColumnarResult<usize> {
        let (staging, consumed) = decode_staging(cursor, field, mapping, ctx)?;
        self.convert_type(&staging, dest, mapping, ctx, data, string_pool)?;
        Ok(consumed)
    }

    /// Convert an already decoded column into `dest` at `mapping.offset_bytes`.
    fn convert_type(
        &self,
        source: &Column,
        dest: &mut Column,
        mapping: &ColumnMapping,
        ctx: &DecodeContext<'_>,
        data: &HandlerData,
        string_pool: Option<&StringPool>,
    ) -> ColumnarResult<()>;

    /// Fill `byte_size` bytes at `offset` (rows with no source data) with the format's
    /// "no value" pattern.
    fn default_initialize(
        &self,
        buffer: &mut ChunkedBuffer,
        column_index: usize,
        offset: usize,
        byte_size: usize,
        ctx: &DecodeContext<'_>,
        data: &HandlerData,
    ) -> ColumnarResult<()>;

    /// Width in bytes of one destination element.
    fn type_size(&self) -> usize;
}

/// Decode `field` into a fresh column that borrows the encoded bytes.
pub fn decode_staging(
    cursor: &mut DecodeCursor,
    field: &dyn EncodedField,
    mapping: &ColumnMapping,
    ctx: &DecodeContext<'_>,
) -> ColumnarResult<(Column, usize)> {
    let source = mapping.source_type_desc;
    let data_type = source
        .data_type()
        .ok_or(ColumnarError::UnsupportedColumnType {
            operation: "decode",
            type_desc: source,
        })?;
    let mut staging = Column::external(data_type, Sparsity::Permitted);
    let consumed =
        ctx.decoder
            .decode_field(&source, field, cursor, &mut staging, ctx.encoding_version)?;
    Ok((staging, consumed))
}

/// Handlers keyed by output format and data type, plus per-format session state factories.
///
/// Built once before decoding starts and never mutated afterwards.
pub struct TypeHandlerRegistry {
    handlers: AHashMap<(OutputFormat, DataType), Arc<dyn TypeHandler>>,
    format_handlers: AHashMap<OutputFormat, Arc<dyn TypeHandler>>,
    data_factories: AHashMap<OutputFormat, Arc<dyn HandlerDataFactory>>,
}

impl TypeHandlerRegistry {
    pub fn builder() -> TypeHandlerRegistryBuilder {
        TypeHandlerRegistryBuilder::default()
    }

    /// String handlers and session state for every output format.
    pub fn with_default_handlers() -> Self {
        let native: Arc<dyn TypeHandler> = Arc::new(NativeStringHandler);
        let arrow: Arc<dyn TypeHandler> = Arc::new(ArrowStringHandler);
        let mut builder = Self::builder();
        for data_type in [DataType::DynamicString64, DataType::FixedString64] {
            builder = builder
                .register_handler(OutputFormat::Native, data_type, Arc::clone(&native))
                .register_handler(OutputFormat::Arrow, data_type, Arc::clone(&arrow));
        }
        builder
            .set_handler_data(OutputFormat::Native, Arc::new(NativeHandlerDataFactory))
            .set_handler_data(OutputFormat::Arrow, Arc::new(ArrowHandlerDataFactory))
            .build()
    }

    /// The handler for `data_type`, falling back to the format-wide handler.
    pub fn get_handler(&self, format: OutputFormat, data_type: DataType) -> Option<&dyn TypeHandler> {
        self.handlers
            .get(&(format, data_type))
            .or_else(|| self.format_handlers.get(&format))
            .map(|h| h.as_ref())
    }

    /// Fresh session state for `format`.
    pub fn handler_data(&self, format: OutputFormat) -> HandlerData {
        self.data_factories
            .get(&format)
            .map_or_else(HandlerData::none, |factory| factory.create())
    }
}

#[derive(Default)]
pub struct TypeHandlerRegistryBuilder {
    handlers: AHashMap<(OutputFormat, DataType), Arc<dyn TypeHandler>>,
    format_handlers: AHashMap<OutputFormat, Arc<dyn TypeHandler>>,
    data_factories: AHashMap<OutputFormat, Arc<dyn HandlerDataFactory>>,
}

impl TypeHandlerRegistryBuilder {
    pub fn register_handler(
        mut self,
        format: OutputFormat,
        data_type: DataType,
        handler: Arc<dyn TypeHandler>,
    ) -> Self {
        self.handlers.insert((format, data_type), handler);
        self
    }

    /// A handler used for every data type of `format` without a specific registration.
    pub fn register_format_handler(
        mut self,
        format: OutputFormat,
        handler: Arc<dyn TypeHandler>,
    ) -> Self {
        self.format_handlers.insert(format, handler);
        self
    }

    pub fn set_handler_data(
        mut self,
        format: OutputFormat,
        factory: Arc<dyn HandlerDataFactory>,
    ) -> Self {
        self.data_factories.insert(format, factory);
        self
    }

    pub fn build(self) -> TypeHandlerRegistry {
        TypeHandlerRegistry {
            handlers: self.handlers,
            format_handlers: self.format_handlers,
            data_factories: self.data_factories,
        }
    }
}

/// Bytes of every logical row of a staged string column; `None` for absent rows and sentinels.
pub(crate) fn string_views<'a>(
    source: &'a Column,
    string_pool: Option<&'a StringPool>,
) -> ColumnarResult<impl Iterator<Item = ColumnarResult<Option<&'a [u8]>>> + 'a> {
    let rows = source.iter_rows::<u64>()?;
    Ok(rows.map(move |offset| match offset {
        None => Ok(None),
        Some(offset) if crate::string_pool::is_sentinel(offset) => Ok(None),
        Some(offset) => source_view(string_pool, offset).map(Some),
    }))
}

/// Bytes of the pool entry at `offset`, which must not be a sentinel.
pub(crate) fn source_view(string_pool: Option<&StringPool>, offset: u64) -> ColumnarResult<&[u8]> {
    string_pool
        .and_then(|pool| pool.get_view(offset))
        .ok_or_else(|| {
            ColumnarError::AssertionFailure(format!(
                "string offset {offset} is missing from the segment's pool"
            ))
        })
}
