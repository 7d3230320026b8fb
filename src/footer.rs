//! Footer location and decoding.
//!
//! A parquet file ends with `<thrift FileMetaData><u32 LE metadata length>PAR1`. The parser
//! accepts either the complete file or any suffix of it that contains the metadata block, which
//! lets the async reader fetch only the tail of a remote file.

use std::sync::Arc;

use parquet::{errors::ParquetError, file::metadata::ParquetMetaDataReader};
use thrift::protocol::{
    TCompactOutputProtocol, TFieldIdentifier, TListIdentifier, TOutputProtocol,
    TStructIdentifier, TType,
};

use crate::{
    error::{Error, Result},
    metadata::FileMetadata,
};

/// Magic marker at both ends of a parquet file.
pub const PARQUET_MAGIC: [u8; 4] = *b"PAR1";

/// Length of the trailing `<metadata length><magic>` block.
pub const FOOTER_TAIL_LEN: usize = 8;

/// The decoded 8 byte tail of a parquet file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterTail {
    metadata_len: usize,
}

impl FooterTail {
    /// Length of the thrift metadata block preceding the tail.
    pub fn metadata_len(&self) -> usize {
        self.metadata_len
    }

    /// Bytes needed from the end of the file to decode the metadata: block plus tail.
    pub fn footer_len(&self) -> usize {
        self.metadata_len + FOOTER_TAIL_LEN
    }
}

/// Decode the last 8 bytes of `bytes`.
pub fn decode_footer_tail(bytes: &[u8]) -> Result<FooterTail> {
    if bytes.len() < FOOTER_TAIL_LEN {
        return Err(Error::TruncatedInput {
            needed: FOOTER_TAIL_LEN,
            available: bytes.len(),
        });
    }
    let tail = &bytes[bytes.len() - FOOTER_TAIL_LEN..];
    if tail[4..] != PARQUET_MAGIC {
        return Err(Error::InvalidFormat(format!(
            "expected trailing magic {:?}, found {:?}",
            PARQUET_MAGIC,
            &tail[4..]
        )));
    }
    let metadata_len = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
    Ok(FooterTail { metadata_len })
}

/// Parse [`FileMetadata`] from a complete file or from a suffix that holds the whole footer.
///
/// A suffix too short to hold the metadata block fails with [`Error::TruncatedInput`] whose
/// `needed` is the exact number of trailing bytes required.
pub fn parse_footer(bytes: &[u8]) -> Result<FileMetadata> {
    let tail = decode_footer_tail(bytes)?;
    if bytes.len() < tail.footer_len() {
        return Err(Error::TruncatedInput {
            needed: tail.footer_len(),
            available: bytes.len(),
        });
    }
    let end = bytes.len() - FOOTER_TAIL_LEN;
    decode_metadata_block(&bytes[end - tail.metadata_len()..end])
}

/// Decode the thrift metadata block alone, without the trailing length and magic.
pub fn decode_metadata_block(block: &[u8]) -> Result<FileMetadata> {
    let metadata = ParquetMetaDataReader::decode_metadata(block).map_err(|err| match err {
        ParquetError::EOF(msg) => Error::InvalidFormat(format!("metadata block ends early: {msg}")),
        other => Error::InvalidFormat(other.to_string()),
    })?;
    FileMetadata::try_new(Arc::new(metadata))
}

/// Encode a complete parquet file with a root-only schema and no row groups.
///
/// Used for tables with zero fields, which have no leaf columns to hand to a column writer.
pub(crate) fn encode_empty_file(
    created_by: &str,
    key_value_metadata: &[(String, String)],
) -> Result<Vec<u8>> {
    let mut block = Vec::new();
    write_empty_metadata(&mut block, created_by, key_value_metadata).map_err(thrift_error)?;

    let metadata_len = u32::try_from(block.len())
        .map_err(|_| Error::InvalidConfig("key/value metadata too large".into()))?;
    let mut file = Vec::with_capacity(block.len() + 12);
    file.extend_from_slice(&PARQUET_MAGIC);
    file.extend_from_slice(&block);
    file.extend_from_slice(&metadata_len.to_le_bytes());
    file.extend_from_slice(&PARQUET_MAGIC);
    Ok(file)
}

fn write_empty_metadata(
    out: &mut Vec<u8>,
    created_by: &str,
    key_value_metadata: &[(String, String)],
) -> thrift::Result<()> {
    let mut o = TCompactOutputProtocol::new(out);
    o.write_struct_begin(&TStructIdentifier::new("FileMetaData"))?;

    o.write_field_begin(&TFieldIdentifier::new("version", TType::I32, 1))?;
    o.write_i32(1)?;
    o.write_field_end()?;

    o.write_field_begin(&TFieldIdentifier::new("schema", TType::List, 2))?;
    o.write_list_begin(&TListIdentifier::new(TType::Struct, 1))?;
    o.write_struct_begin(&TStructIdentifier::new("SchemaElement"))?;
    o.write_field_begin(&TFieldIdentifier::new("name", TType::String, 4))?;
    o.write_string("schema")?;
    o.write_field_end()?;
    o.write_field_begin(&TFieldIdentifier::new("num_children", TType::I32, 5))?;
    o.write_i32(0)?;
    o.write_field_end()?;
    o.write_field_stop()?;
    o.write_struct_end()?;
    o.write_list_end()?;
    o.write_field_end()?;

    o.write_field_begin(&TFieldIdentifier::new("num_rows", TType::I64, 3))?;
    o.write_i64(0)?;
    o.write_field_end()?;

    o.write_field_begin(&TFieldIdentifier::new("row_groups", TType::List, 4))?;
    o.write_list_begin(&TListIdentifier::new(TType::Struct, 0))?;
    o.write_list_end()?;
    o.write_field_end()?;

    if !key_value_metadata.is_empty() {
        o.write_field_begin(&TFieldIdentifier::new(
            "key_value_metadata",
            TType::List,
            5,
        ))?;
        o.write_list_begin(&TListIdentifier::new(
            TType::Struct,
            key_value_metadata.len() as i32,
        ))?;
        for (key, value) in key_value_metadata {
            o.write_struct_begin(&TStructIdentifier::new("KeyValue"))?;
            o.write_field_begin(&TFieldIdentifier::new("key", TType::String, 1))?;
            o.write_string(key)?;
            o.write_field_end()?;
            o.write_field_begin(&TFieldIdentifier::new("value", TType::String, 2))?;
            o.write_string(value)?;
            o.write_field_end()?;
            o.write_field_stop()?;
            o.write_struct_end()?;
        }
        o.write_list_end()?;
        o.write_field_end()?;
    }

    o.write_field_begin(&TFieldIdentifier::new("created_by", TType::String, 6))?;
    o.write_string(created_by)?;
    o.write_field_end()?;

    o.write_field_stop()?;
    o.write_struct_end()?;
    o.flush()
}

fn thrift_error(err: thrift::Error) -> Error {
    Error::Parquet(ParquetError::General(format!("thrift encoding failed: {err}")))
}
