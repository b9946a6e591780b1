//! Decode contract between the storage codec and the column store.
//!
//! The codec owns the byte layout of encoded fields; this crate only needs to know how many
//! bytes a field occupies and how to turn it into a [`Column`]. [`PlainCodec`] is a minimal
//! uncompressed codec implementing the contract.

use crate::bitmap::BitSet;
use crate::column::Column;
use crate::error::{internal_check, ColumnarError, ColumnarResult};
use crate::types::TypeDescriptor;
use bytes::Bytes;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EncodingVersion {
    /// Values followed by the sparse map.
    #[default]
    V1,
    /// Sparse map followed by values.
    V2,
}

/// Metadata of one encoded field, as written by the storage codec.
pub trait EncodedField: Send + Sync {
    fn has_array(&self) -> bool;
    fn sparse_map_byte_length(&self) -> usize;
    fn uncompressed_byte_length(&self) -> usize;
    /// Logical rows described by the field, including absent ones.
    fn row_count(&self) -> usize;

    /// Bytes the field occupies in its segment.
    fn encoded_byte_length(&self) -> usize {
        self.uncompressed_byte_length() + self.sparse_map_byte_length()
    }
}

/// Read position within a segment's encoded bytes. Slices share the segment's storage.
#[derive(Clone, Debug)]
pub struct DecodeCursor {
    data: Bytes,
    pos: usize,
}

impl DecodeCursor {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) -> ColumnarResult<()> {
        if pos > self.data.len() {
            return Err(ColumnarError::Decode(format!(
                "seek to {pos} past end of {} byte segment",
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// The next `len` bytes, without copying.
    pub fn take(&mut self, len: usize) -> ColumnarResult<Bytes> {
        if len > self.remaining() {
            return Err(ColumnarError::Decode(format!(
                "field needs {len} bytes but only {} remain",
                self.remaining()
            )));
        }
        let out = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }
}

pub trait FieldDecoder: Send + Sync {
    /// Decode `field` from `cursor` into `dest` and return the number of bytes consumed.
    ///
    /// `dest` must be an external column of `type_desc`; sparse fields install their sparse map
    /// on it.
    fn decode_field(
        &self,
        type_desc: &TypeDescriptor,
        field: &dyn EncodedField,
        cursor: &mut DecodeCursor,
        dest: &mut Column,
        version: EncodingVersion,
    ) -> ColumnarResult<usize>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlainEncodedField {
    pub row_count: usize,
    pub values_bytes: usize,
    pub sparse_map_bytes: usize,
}

impl EncodedField for PlainEncodedField {
    fn has_array(&self) -> bool {
        true
    }

    fn sparse_map_byte_length(&self) -> usize {
        self.sparse_map_bytes
    }

    fn uncompressed_byte_length(&self) -> usize {
        self.values_bytes
    }

    fn row_count(&self) -> usize {
        self.row_count
    }
}

/// Packed little-endian values plus the sparse map as little-endian `u64` words.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainCodec;

impl PlainCodec {
    /// Encode `column`, appending its bytes to `out`.
    pub fn encode(
        column: &Column,
        version: EncodingVersion,
        out: &mut Vec<u8>,
    ) -> PlainEncodedField {
        let values = column.buffer().to_vec();
        let sparse: Vec<u8> = column
            .opt_sparse_map()
            .map(|map| map.as_words().iter().flat_map(|w| w.to_le_bytes()).collect())
            .unwrap_or_default();
        match version {
            EncodingVersion::V1 => {
                out.extend_from_slice(&values);
                out.extend_from_slice(&sparse);
            }
            EncodingVersion::V2 => {
                out.extend_from_slice(&sparse);
                out.extend_from_slice(&values);
            }
        }
        PlainEncodedField {
            row_count: column.row_count(),
            values_bytes: values.len(),
            sparse_map_bytes: sparse.len(),
        }
    }

    fn read_sparse_map(
        cursor: &mut DecodeCursor,
        field: &dyn EncodedField,
    ) -> ColumnarResult<Option<BitSet>> {
        let len = field.sparse_map_byte_length();
        if len == 0 {
            return Ok(None);
        }
        if len % 8 != 0 {
            return Err(ColumnarError::Decode(format!(
                "sparse map of {len} bytes is not a whole number of words"
            )));
        }
        let raw = cursor.take(len)?;
        let words = raw
            .chunks_exact(8)
            .map(|w| {
                let mut word = [0u8; 8];
                word.copy_from_slice(w);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(Some(BitSet::from_words(words, field.row_count())))
    }
}

impl FieldDecoder for PlainCodec {
    fn decode_field(
        &self,
        type_desc: &TypeDescriptor,
        field: &dyn EncodedField,
        cursor: &mut DecodeCursor,
        dest: &mut Column,
        version: EncodingVersion,
    ) -> ColumnarResult<usize> {
        if !field.has_array() {
            return Err(ColumnarError::Decode(format!(
                "{type_desc} field has no value array"
            )));
        }
        internal_check(type_desc.data_type() == Some(dest.data_type()), || {
            format!(
                "decoding {type_desc} field into {} column",
                dest.type_desc()
            )
        })?;

        let start = cursor.position();
        let (values, sparse_map) = match version {
            EncodingVersion::V1 => {
                let values = cursor.take(field.uncompressed_byte_length())?;
                (values, Self::read_sparse_map(cursor, field)?)
            }
            EncodingVersion::V2 => {
                let sparse_map = Self::read_sparse_map(cursor, field)?;
                (cursor.take(field.uncompressed_byte_length())?, sparse_map)
            }
        };
        log::debug!(
            "decoded {type_desc} field: {} value bytes, sparse: {}",
            values.len(),
            sparse_map.is_some()
        );

        if !values.is_empty() {
            dest.add_external_block(values)?;
        }
        match sparse_map {
            Some(map) => dest.set_sparse_map(map)?,
            None => internal_check(dest.row_count() == field.row_count(), || {
                format!(
                    "dense field declares {} rows but holds {}",
                    field.row_count(),
                    dest.row_count()
                )
            })?,
        }
        Ok(cursor.position() - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Sparsity;
    use crate::dispatch::Int32Tag;
    use crate::types::DataType;

    fn round_trip(column: &Column, version: EncodingVersion) -> Column {
        let mut bytes = Vec::new();
        let field = PlainCodec::encode(column, version, &mut bytes);
        let mut cursor = DecodeCursor::new(Bytes::from(bytes));
        let mut dest = Column::external(DataType::Int32, Sparsity::Permitted);
        let consumed = PlainCodec
            .decode_field(
                &column.type_desc(),
                &field,
                &mut cursor,
                &mut dest,
                version,
            )
            .unwrap();
        assert_eq!(consumed, field.encoded_byte_length());
        assert_eq!(cursor.remaining(), 0);
        dest
    }

    #[test]
    fn sparse_field_decodes_in_both_layouts() {
        let column = Column::from_options::<Int32Tag>(&[None, Some(4), Some(5), None]);
        for version in [EncodingVersion::V1, EncodingVersion::V2] {
            let dest = round_trip(&column, version);
            assert_eq!(
                dest.iter_rows::<i32>().unwrap().collect::<Vec<_>>(),
                vec![None, Some(4), Some(5), None]
            );
            assert!(dest.buffer().blocks()[0].is_external());
        }
    }

    #[test]
    fn short_input_is_a_decode_error() {
        let field = PlainEncodedField {
            row_count: 2,
            values_bytes: 8,
            sparse_map_bytes: 0,
        };
        let mut cursor = DecodeCursor::new(Bytes::from_static(&[0, 0, 0, 0]));
        let mut dest = Column::external(DataType::Int32, Sparsity::Permitted);
        let err = PlainCodec
            .decode_field(
                &dest.type_desc(),
                &field,
                &mut cursor,
                &mut dest,
                EncodingVersion::V1,
            )
            .unwrap_err();
        assert!(matches!(err, ColumnarError::Decode(_)));
    }
}
