//! Reading parquet bytes into arrow tables.
//!
//! [`ParquetFile`] is the synchronous facade over a complete in-memory file: opening it parses
//! the footer, after which row groups can be read one at a time, as an iterator, or all at once.
//! [`AsyncParquetFile`] runs the same row group decode over a [`RangeSource`](crate::fetch::RangeSource),
//! fetching only the footer and the column chunks a read needs.

use std::collections::VecDeque;

use arrow::array::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;

use crate::{
    error::{Error, Result},
    footer::parse_footer,
    metadata::FileMetadata,
    options::ReaderOptions,
    selection::{RowGroupSlice, plan_row_groups},
    table::{IpcFraming, Table},
};

mod async_reader;
mod range_reader;
mod row_group;

pub use async_reader::{AsyncParquetFile, BatchStream};
pub(crate) use row_group::{ResolvedProjection, decode_row_group};

/// A complete parquet file held in memory, with its footer parsed.
#[derive(Debug, Clone)]
pub struct ParquetFile {
    bytes: Bytes,
    metadata: FileMetadata,
}

impl ParquetFile {
    /// Parse the footer of `bytes`.
    ///
    /// Fails with [`Error::EmptyInput`] before any parsing when `bytes` is empty.
    pub fn open(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let metadata = read_metadata(&bytes)?;
        Ok(Self { bytes, metadata })
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &SchemaRef {
        self.metadata.schema()
    }

    /// Read one whole row group as a single batch.
    ///
    /// Only the column selection of `options` applies; row group, limit, offset and batch size
    /// settings are ignored.
    pub fn read_row_group(&self, index: usize, options: &ReaderOptions) -> Result<RecordBatch> {
        let num_rows = self.metadata.row_group(index)?.num_rows() as usize;
        let projection = ResolvedProjection::new(&self.metadata, options)?;
        let slice = RowGroupSlice {
            index,
            offset: 0,
            length: num_rows,
            num_rows,
        };
        let mut batches = self.decode(&slice, &projection, options, None)?;
        match batches.pop() {
            Some(batch) if batches.is_empty() => Ok(batch),
            _ => Err(Error::decode(format!(
                "row group {index} did not decode to a single batch"
            ))),
        }
    }

    /// Iterate over the batches a read produces, in row group order.
    ///
    /// Each row group touched yields one batch, or batches of at most
    /// [`ReaderOptions::batch_size`] rows when that is set.
    pub fn batches(&self, options: &ReaderOptions) -> Result<RowGroupBatches<'_>> {
        let projection = ResolvedProjection::new(&self.metadata, options)?;
        let plan = plan_row_groups(&self.metadata, options)?;
        Ok(RowGroupBatches {
            file: self,
            options: options.clone(),
            projection,
            plan: plan.into_iter(),
            pending: VecDeque::new(),
        })
    }

    /// Read every selected row group into one table.
    pub fn read_table(&self, options: &ReaderOptions) -> Result<Table> {
        let batches = self.batches(options)?;
        let schema = batches.schema().clone();
        let batches = batches.collect::<Result<Vec<_>>>()?;
        Table::try_new(schema, batches)
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub(crate) fn decode(
        &self,
        slice: &RowGroupSlice,
        projection: &ResolvedProjection,
        options: &ReaderOptions,
        batch_size: Option<usize>,
    ) -> Result<Vec<RecordBatch>> {
        let available = self.bytes.len();
        let ranges = self
            .metadata
            .row_group(slice.index)?
            .chunk_ranges(|idx| projection.includes_leaf(idx));
        if let Some(end) = ranges.iter().map(|range| range.end as usize).max() {
            if end > available {
                return Err(Error::TruncatedInput {
                    needed: end,
                    available,
                });
            }
        }
        decode_row_group(
            self.bytes.clone(),
            &self.metadata,
            slice,
            projection,
            options,
            batch_size,
        )
    }
}

/// Iterator over the row group batches of a [`ParquetFile`] read.
pub struct RowGroupBatches<'a> {
    file: &'a ParquetFile,
    options: ReaderOptions,
    projection: ResolvedProjection,
    plan: std::vec::IntoIter<RowGroupSlice>,
    /// Decoded batches of the current row group not handed out yet
    pending: VecDeque<RecordBatch>,
}

impl RowGroupBatches<'_> {
    /// Schema of every batch the iterator yields.
    pub fn schema(&self) -> &SchemaRef {
        &self.projection.output
    }
}

impl Iterator for RowGroupBatches<'_> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                return Some(Ok(batch));
            }
            let slice = self.plan.next()?;
            match self.file.decode(
                &slice,
                &self.projection,
                &self.options,
                self.options.batch_size(),
            ) {
                Ok(batches) => self.pending.extend(batches),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Parse file metadata from a complete file or from a suffix holding the whole footer.
pub fn read_metadata(bytes: &[u8]) -> Result<FileMetadata> {
    if bytes.is_empty() {
        return Err(Error::EmptyInput);
    }
    parse_footer(bytes)
}

/// Arrow schema of a file, from a complete file or a footer suffix.
pub fn read_schema(bytes: &[u8]) -> Result<SchemaRef> {
    Ok(read_metadata(bytes)?.schema().clone())
}

/// Read a complete file into a table.
pub fn read_table(bytes: impl Into<Bytes>, options: &ReaderOptions) -> Result<Table> {
    ParquetFile::open(bytes)?.read_table(options)
}

/// Read one row group of a complete file whose metadata was parsed beforehand.
pub fn read_row_group(
    bytes: impl Into<Bytes>,
    metadata: &FileMetadata,
    index: usize,
    options: &ReaderOptions,
) -> Result<RecordBatch> {
    let bytes = bytes.into();
    if bytes.is_empty() {
        return Err(Error::EmptyInput);
    }
    let file = ParquetFile {
        bytes,
        metadata: metadata.clone(),
    };
    file.read_row_group(index, options)
}

/// Read a complete file and serialize the result as arrow IPC.
pub fn read_parquet_to_ipc(
    bytes: impl Into<Bytes>,
    options: &ReaderOptions,
    framing: IpcFraming,
) -> Result<Vec<u8>> {
    read_table(bytes, options)?.to_ipc(framing)
}
