use std::sync::Arc;

use arrow::{
    array::{RecordBatch, RecordBatchOptions, RecordBatchReader},
    compute::concat_batches,
};
use arrow_schema::{Schema, SchemaRef};
use bytes::Bytes;
use log::debug;
use parquet::arrow::{
    ProjectionMask,
    arrow_reader::{ArrowReaderBuilder, ParquetRecordBatchReaderBuilder},
};

use crate::{
    decode::{normalize_batch, output_schema, page::read_pages},
    error::{Error, Result},
    metadata::FileMetadata,
    options::ReaderOptions,
    selection::{RowGroupSlice, projection_mask},
};

/// Column selection resolved against one file.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedProjection {
    pub(crate) mask: ProjectionMask,
    /// Schema of the arrays the parquet reader produces for `mask`
    pub(crate) decoded: SchemaRef,
    /// Caller visible schema after normalization
    pub(crate) output: SchemaRef,
}

impl ResolvedProjection {
    pub(crate) fn new(metadata: &FileMetadata, options: &ReaderOptions) -> Result<Self> {
        let parquet_schema = metadata.reader_metadata().parquet_schema();
        let mask = projection_mask(options.columns(), parquet_schema)?;

        let decoded = if metadata.schema().fields().is_empty() {
            metadata.schema().clone()
        } else {
            // a reader over no row groups reports the projected schema without reading anything
            let reader = ParquetRecordBatchReaderBuilder::new_with_metadata(
                Bytes::new(),
                metadata.reader_metadata().clone(),
            )
            .with_projection(mask.clone())
            .with_row_groups(vec![])
            .build()
            .map_err(Error::from_decoder)?;
            Arc::new(Schema::new_with_metadata(
                reader.schema().fields().clone(),
                metadata.schema().metadata().clone(),
            ))
        };
        let output = output_schema(&decoded, options);

        Ok(Self {
            mask,
            decoded,
            output,
        })
    }

    /// Whether leaf column `idx` is part of the projection.
    pub(crate) fn includes_leaf(&self, idx: usize) -> bool {
        self.mask.leaf_included(idx)
    }

    /// Whether the projection keeps no column at all, so only row counts are produced.
    pub(crate) fn is_empty(&self) -> bool {
        self.decoded.fields().is_empty()
    }
}

/// Apply the row group, column and row selection of `slice` to a parquet reader builder, sync
/// or async alike.
pub(crate) fn configure<T>(
    builder: ArrowReaderBuilder<T>,
    slice: &RowGroupSlice,
    projection: &ResolvedProjection,
    batch_size: Option<usize>,
) -> ArrowReaderBuilder<T> {
    let builder = builder
        .with_row_groups(vec![slice.index])
        .with_projection(projection.mask.clone())
        .with_batch_size(batch_size.unwrap_or(slice.length).max(1));
    match slice.row_selection() {
        Some(selection) => builder.with_row_selection(selection),
        None => builder,
    }
}

/// Walk every page of the selected column chunks of row group `index` through the codec
/// registry. `chunk` returns the bytes of one column chunk.
pub(crate) fn validate_pages(
    metadata: &FileMetadata,
    index: usize,
    projection: &ResolvedProjection,
    mut chunk: impl FnMut(usize) -> Result<Bytes>,
) -> Result<()> {
    let row_group = metadata.row_group(index)?;
    for (idx, column) in row_group.columns().iter().enumerate() {
        if projection.includes_leaf(idx) {
            read_pages(&chunk(idx)?, column)?;
        }
    }
    Ok(())
}

/// Batches carrying only a row count, for projections without columns.
pub(crate) fn row_count_batches(
    slice: &RowGroupSlice,
    projection: &ResolvedProjection,
    batch_size: Option<usize>,
) -> Result<Vec<RecordBatch>> {
    let sizes: Vec<usize> = match batch_size {
        None => vec![slice.length],
        Some(step) => {
            let step = step.max(1);
            (0..slice.length)
                .step_by(step)
                .map(|start| step.min(slice.length - start))
                .collect()
        }
    };
    sizes
        .into_iter()
        .map(|rows| {
            let options = RecordBatchOptions::new().with_row_count(Some(rows));
            let batch =
                RecordBatch::try_new_with_options(projection.decoded.clone(), vec![], &options)?;
            normalize_batch(batch, &projection.output, rows)
        })
        .collect()
}

/// Check the decoded batches of `slice` add up to its rows and convert them to the output
/// schema. Without a batch size the row group comes out as a single batch.
pub(crate) fn finish_row_group(
    batches: Vec<RecordBatch>,
    slice: &RowGroupSlice,
    projection: &ResolvedProjection,
    batch_size: Option<usize>,
) -> Result<Vec<RecordBatch>> {
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    if rows != slice.length {
        return Err(Error::decode(format!(
            "row group {} decoded {rows} rows, expected {}",
            slice.index, slice.length
        )));
    }

    match batch_size {
        None => {
            let batch = concat_batches(&projection.decoded, &batches)?;
            Ok(vec![normalize_batch(batch, &projection.output, slice.length)?])
        }
        Some(_) => batches
            .into_iter()
            .map(|batch| {
                let rows = batch.num_rows();
                normalize_batch(batch, &projection.output, rows)
            })
            .collect(),
    }
}

/// Decode the rows `slice` selects from one row group of a complete file.
///
/// Batches hold at most `batch_size` rows; `None` yields the whole slice as one batch. Failures
/// of the parquet decoder are reported as [`Error::CorruptPayload`] or [`Error::DecodeError`].
pub(crate) fn decode_row_group(
    bytes: Bytes,
    metadata: &FileMetadata,
    slice: &RowGroupSlice,
    projection: &ResolvedProjection,
    options: &ReaderOptions,
    batch_size: Option<usize>,
) -> Result<Vec<RecordBatch>> {
    debug!(
        "decoding row group {} rows {}..{}",
        slice.index,
        slice.offset,
        slice.offset + slice.length
    );

    if options.validate_pages() {
        let row_group = metadata.row_group(slice.index)?;
        validate_pages(metadata, slice.index, projection, |idx| {
            let range = row_group.columns()[idx].byte_range();
            Ok(bytes.slice(range.start as usize..range.end as usize))
        })?;
    }

    if projection.is_empty() {
        return row_count_batches(slice, projection, batch_size);
    }

    let builder = configure(
        ParquetRecordBatchReaderBuilder::new_with_metadata(
            bytes,
            metadata.reader_metadata().clone(),
        ),
        slice,
        projection,
        batch_size,
    );
    let batches = builder
        .build()
        .map_err(Error::from_decoder)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::from_decoder_arrow)?;
    finish_row_group(batches, slice, projection, batch_size)
}
