use std::{collections::HashMap, ops::Range, sync::Arc};

use arrow_schema::{Schema, SchemaRef};
use parquet::{
    arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions},
    basic::{Compression, Encoding},
    file::metadata::{ColumnChunkMetaData, ParquetMetaData, RowGroupMetaData},
};

use crate::{
    codec::Codec,
    error::{Error, Result},
};

/// Key under which arrow writers embed the serialized arrow schema.
pub(crate) const ARROW_SCHEMA_META_KEY: &str = "ARROW:schema";

/// Immutable metadata of one parquet file.
///
/// Cloning is cheap: the parsed footer is shared behind an [`Arc`] so concurrent row group reads
/// can each hold their own copy without any locking.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    reader_metadata: ArrowReaderMetadata,
    schema: SchemaRef,
    key_value_metadata: HashMap<String, String>,
    row_groups: Vec<RowGroupMetadata>,
}

impl FileMetadata {
    pub(crate) fn try_new(metadata: Arc<ParquetMetaData>) -> Result<Self> {
        let row_groups: Vec<RowGroupMetadata> = metadata
            .row_groups()
            .iter()
            .enumerate()
            .map(|(idx, row_group)| RowGroupMetadata::from_parquet(idx, row_group))
            .collect::<Result<_>>()?;

        let declared = metadata.file_metadata().num_rows();
        let summed = row_groups
            .iter()
            .try_fold(0u64, |total, rg| total.checked_add(rg.num_rows));
        if summed.and_then(|summed| i64::try_from(summed).ok()) != Some(declared) {
            let summed = summed.map_or_else(|| "more than u64::MAX".to_string(), |s| s.to_string());
            return Err(Error::InvalidFormat(format!(
                "file declares {declared} rows but its row groups hold {summed}"
            )));
        }

        let key_value_metadata: HashMap<String, String> = metadata
            .file_metadata()
            .key_value_metadata()
            .into_iter()
            .flatten()
            .filter_map(|kv| kv.value.as_ref().map(|value| (kv.key.clone(), value.clone())))
            .collect();

        let reader_metadata =
            ArrowReaderMetadata::try_new(metadata, ArrowReaderOptions::new()).map_err(|err| {
                Error::InvalidFormat(format!("schema cannot be mapped to arrow: {err}"))
            })?;

        // Unrecognized keys travel onto the schema untouched.
        let decoded = reader_metadata.schema();
        let mut schema_metadata = decoded.metadata().clone();
        for (key, value) in &key_value_metadata {
            if key != ARROW_SCHEMA_META_KEY {
                schema_metadata
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        let schema = Arc::new(Schema::new_with_metadata(
            decoded.fields().clone(),
            schema_metadata,
        ));

        Ok(Self {
            reader_metadata,
            schema,
            key_value_metadata,
            row_groups,
        })
    }

    /// Format version recorded by the writer.
    pub fn version(&self) -> i32 {
        self.parquet_metadata().file_metadata().version()
    }

    /// Total number of rows across all row groups.
    pub fn num_rows(&self) -> u64 {
        self.row_groups.iter().map(|rg| rg.num_rows).sum()
    }

    /// Application that wrote the file, e.g. `parquet-rs version 55.1.0`.
    pub fn created_by(&self) -> Option<&str> {
        self.parquet_metadata().file_metadata().created_by()
    }

    pub fn num_row_groups(&self) -> usize {
        self.row_groups.len()
    }

    pub fn row_groups(&self) -> &[RowGroupMetadata] {
        &self.row_groups
    }

    pub fn row_group(&self, index: usize) -> Result<&RowGroupMetadata> {
        self.row_groups
            .get(index)
            .ok_or(Error::RowGroupIndexOutOfRange {
                index,
                count: self.row_groups.len(),
            })
    }

    /// Arrow schema of the file, with file level key/value metadata on the schema metadata.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// File level key/value metadata exactly as stored in the footer.
    pub fn key_value_metadata(&self) -> &HashMap<String, String> {
        &self.key_value_metadata
    }

    /// The underlying parquet footer.
    pub fn parquet_metadata(&self) -> &Arc<ParquetMetaData> {
        self.reader_metadata.metadata()
    }

    pub(crate) fn reader_metadata(&self) -> &ArrowReaderMetadata {
        &self.reader_metadata
    }
}

impl PartialEq for FileMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.version() == other.version()
            && self.created_by() == other.created_by()
            && self.schema == other.schema
            && self.key_value_metadata == other.key_value_metadata
            && self.row_groups == other.row_groups
    }
}

/// Layout of one row group.
#[derive(Debug, Clone, PartialEq)]
pub struct RowGroupMetadata {
    num_rows: u64,
    total_byte_size: i64,
    compressed_size: i64,
    columns: Vec<ColumnChunkMetadata>,
}

impl RowGroupMetadata {
    fn from_parquet(index: usize, row_group: &RowGroupMetaData) -> Result<Self> {
        let num_rows = u64::try_from(row_group.num_rows()).map_err(|_| {
            Error::InvalidFormat(format!(
                "row group {index} declares {} rows",
                row_group.num_rows()
            ))
        })?;
        Ok(Self {
            num_rows,
            total_byte_size: row_group.total_byte_size(),
            compressed_size: row_group.compressed_size(),
            columns: row_group
                .columns()
                .iter()
                .map(|column| ColumnChunkMetadata::from_parquet(index, column))
                .collect::<Result<_>>()?,
        })
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Total uncompressed size of all column data.
    pub fn total_byte_size(&self) -> i64 {
        self.total_byte_size
    }

    /// Total compressed size of all column data.
    pub fn compressed_size(&self) -> i64 {
        self.compressed_size
    }

    pub fn columns(&self) -> &[ColumnChunkMetadata] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Byte ranges of the leaf column chunks selected by `leaf_included`.
    pub(crate) fn chunk_ranges(&self, leaf_included: impl Fn(usize) -> bool) -> Vec<Range<u64>> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| leaf_included(*idx))
            .map(|(_, column)| column.byte_range())
            .collect()
    }
}

/// Storage of one leaf column inside a row group.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChunkMetadata {
    path: String,
    byte_offset: u64,
    compressed_size: u64,
    uncompressed_size: u64,
    num_values: i64,
    compression: Compression,
    encodings: Vec<Encoding>,
}

impl ColumnChunkMetadata {
    fn from_parquet(row_group: usize, column: &ColumnChunkMetaData) -> Result<Self> {
        let path = column.column_path().string();
        // the chunk starts at the dictionary page when there is one
        let start = column
            .dictionary_page_offset()
            .unwrap_or_else(|| column.data_page_offset());
        let invalid = |what: &str, value: i64| {
            Error::InvalidFormat(format!(
                "column {path} in row group {row_group} has {what} {value}"
            ))
        };
        let byte_offset = u64::try_from(start).map_err(|_| invalid("offset", start))?;
        let compressed_size = u64::try_from(column.compressed_size())
            .map_err(|_| invalid("compressed size", column.compressed_size()))?;
        let uncompressed_size = u64::try_from(column.uncompressed_size())
            .map_err(|_| invalid("uncompressed size", column.uncompressed_size()))?;
        Ok(Self {
            path,
            byte_offset,
            compressed_size,
            uncompressed_size,
            num_values: column.num_values(),
            compression: column.compression(),
            encodings: column.encodings().to_vec(),
        })
    }

    /// Dotted leaf path, e.g. `location.lat`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File offset of the first page of the chunk (dictionary page when present).
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Number of values including nulls, counted at the leaf level.
    pub fn num_values(&self) -> i64 {
        self.num_values
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// The registry codec for this chunk, [`Error::UnsupportedCodec`] when there is none.
    pub fn codec(&self) -> Result<Codec> {
        Codec::try_from(self.compression)
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    pub fn byte_range(&self) -> Range<u64> {
        self.byte_offset..self.byte_offset + self.compressed_size
    }
}
