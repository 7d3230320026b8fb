use std::{future::Future, pin::Pin, sync::Arc};

use arrow::array::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use log::debug;
use parquet::arrow::ParquetRecordBatchStreamBuilder;

use super::{
    ResolvedProjection,
    range_reader::RangeSourceReader,
    row_group::{configure, finish_row_group, row_count_batches, validate_pages},
};
use crate::{
    error::{Error, Result},
    fetch::RangeSource,
    footer::parse_footer,
    metadata::FileMetadata,
    options::{AsyncReaderOptions, ReaderOptions},
    selection::{RowGroupSlice, plan_row_groups},
    table::Table,
};

/// Lazy, forward only sequence of decoded batches.
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>>;

/// A parquet file read through a [`RangeSource`].
///
/// Opening fetches only the footer. Every row group read afterwards fetches just the column
/// chunks it selects, with nearby chunks merged into one request. Clones share the source and
/// the parsed metadata.
#[derive(Debug, Clone)]
pub struct AsyncParquetFile<S> {
    source: S,
    content_length: u64,
    metadata: Arc<FileMetadata>,
    options: Arc<AsyncReaderOptions>,
}

impl<S: RangeSource> AsyncParquetFile<S> {
    /// Fetch and parse the footer of `source`.
    ///
    /// The first request asks for the trailing `footer_prefetch` bytes. When the footer turns out
    /// to be longer, a second request fetches exactly the footer.
    pub async fn open(source: S, options: AsyncReaderOptions) -> Result<Self> {
        let prefetch = options.footer_prefetch();
        let (tail, content_length) = match options.content_length() {
            Some(0) => return Err(Error::EmptyInput),
            Some(len) => (
                source.read_range(len.saturating_sub(prefetch)..len).await?,
                len,
            ),
            None => source.read_suffix(prefetch).await?,
        };
        if content_length == 0 {
            return Err(Error::EmptyInput);
        }
        debug!(
            "fetched {} footer bytes of a {content_length} byte file",
            tail.len()
        );

        let metadata = match parse_footer(&tail) {
            Err(Error::TruncatedInput { needed, .. }) if tail.len() as u64 >= 8 => {
                let needed = needed as u64;
                if needed > content_length {
                    return Err(Error::InvalidFormat(format!(
                        "footer of {needed} bytes does not fit a {content_length} byte file"
                    )));
                }
                debug!("footer needs {needed} bytes, fetching again");
                let footer = source
                    .read_range(content_length - needed..content_length)
                    .await?;
                parse_footer(&footer)?
            }
            other => other?,
        };

        Ok(Self {
            source,
            content_length,
            metadata: Arc::new(metadata),
            options: Arc::new(options),
        })
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &SchemaRef {
        self.metadata.schema()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Fetch and decode one whole row group with the configured column selection.
    pub async fn read_row_group(&self, index: usize) -> Result<RecordBatch> {
        let num_rows = self.metadata.row_group(index)?.num_rows() as usize;
        let projection = Arc::new(ResolvedProjection::new(
            &self.metadata,
            self.options.reader(),
        )?);
        let slice = RowGroupSlice {
            index,
            offset: 0,
            length: num_rows,
            num_rows,
        };
        let mut batches = self.fetch_and_decode(slice, projection, None).await?;
        match batches.pop() {
            Some(batch) if batches.is_empty() => Ok(batch),
            _ => Err(Error::decode(format!(
                "row group {index} did not decode to a single batch"
            ))),
        }
    }

    /// Schema of the batches [`AsyncParquetFile::stream`] yields.
    pub fn output_schema(&self) -> Result<SchemaRef> {
        Ok(ResolvedProjection::new(&self.metadata, self.options.reader())?.output)
    }

    /// Stream the selected row groups as batches, in row group order.
    ///
    /// Each row group yields one batch, or batches of at most [`ReaderOptions::batch_size`]
    /// rows when that is set. Up to `concurrency` row groups are fetched and decoded at once;
    /// results are delivered by row group index whatever order the fetches finish in. Dropping
    /// the stream stops the read, fetches already in flight are discarded.
    pub fn stream(&self) -> Result<BatchStream> {
        let projection = Arc::new(ResolvedProjection::new(
            &self.metadata,
            self.options.reader(),
        )?);
        let plan = plan_row_groups(&self.metadata, self.options.reader())?;
        let batch_size = self.options.reader().batch_size();
        let file = self.clone();

        let batches = stream::iter(plan)
            .map(move |slice| {
                let file = file.clone();
                let projection = projection.clone();
                run_task(async move { file.fetch_and_decode(slice, projection, batch_size).await })
            })
            .buffered(self.options.concurrency())
            .map_ok(|batches| stream::iter(batches.into_iter().map(Ok::<_, Error>)))
            .try_flatten();
        Ok(Box::pin(batches))
    }

    /// Read every selected row group into one table.
    pub async fn read_table(&self) -> Result<Table> {
        let schema = self.output_schema()?;
        let batches = self.stream()?.try_collect::<Vec<_>>().await?;
        Table::try_new(schema, batches)
    }

    async fn fetch_and_decode(
        &self,
        slice: RowGroupSlice,
        projection: Arc<ResolvedProjection>,
        batch_size: Option<usize>,
    ) -> Result<Vec<RecordBatch>> {
        let reader = RangeSourceReader::new(
            self.source.clone(),
            self.metadata.parquet_metadata().clone(),
            self.options.coalesce(),
        );

        if self.options.reader().validate_pages() {
            let ranges = self
                .metadata
                .row_group(slice.index)?
                .chunk_ranges(|idx| projection.includes_leaf(idx));
            let mut chunks = reader.fetch_ranges(ranges).await?.into_iter();
            validate_pages(&self.metadata, slice.index, &projection, |idx| {
                chunks.next().ok_or_else(|| {
                    Error::decode(format!("column chunk {idx} was not fetched"))
                })
            })?;
        }

        if projection.is_empty() {
            return row_count_batches(&slice, &projection, batch_size);
        }

        debug!(
            "fetching row group {} rows {}..{}",
            slice.index,
            slice.offset,
            slice.offset + slice.length
        );
        let builder = configure(
            ParquetRecordBatchStreamBuilder::new_with_metadata(
                reader,
                self.metadata.reader_metadata().clone(),
            ),
            &slice,
            &projection,
            batch_size,
        );
        let batches = builder
            .build()
            .map_err(Error::from_decoder)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(Error::from_decoder)?;
        finish_row_group(batches, &slice, &projection, batch_size)
    }
}

/// Run one row group read as its own task when a tokio runtime is available, inline otherwise.
/// The task is aborted when the returned future is dropped.
#[cfg(feature = "tokio")]
async fn run_task<F>(task: F) -> Result<Vec<RecordBatch>>
where
    F: Future<Output = Result<Vec<RecordBatch>>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let mut tasks = tokio::task::JoinSet::new();
            tasks.spawn_on(task, &handle);
            match tasks.join_next().await {
                Some(result) => result.map_err(|err| Error::Io(std::io::Error::other(err)))?,
                None => Err(Error::Io(std::io::Error::other("row group task was lost"))),
            }
        }
        Err(_) => task.await,
    }
}

#[cfg(not(feature = "tokio"))]
async fn run_task<F>(task: F) -> Result<Vec<RecordBatch>>
where
    F: Future<Output = Result<Vec<RecordBatch>>> + Send + 'static,
{
    task.await
}

impl AsyncParquetFile<Bytes> {
    /// Async reader over an in-memory file, mostly useful to compare against remote reads.
    pub async fn from_bytes(bytes: Bytes, reader: ReaderOptions) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyInput);
        }
        let options = AsyncReaderOptions::builder()
            .content_length(bytes.len() as u64)
            .reader(reader)
            .build();
        Self::open(bytes, options).await
    }
}

#[cfg(feature = "http")]
impl AsyncParquetFile<crate::fetch::HttpRangeSource> {
    /// Open a remote file over HTTP range requests.
    pub async fn open_url(url: impl reqwest::IntoUrl, options: AsyncReaderOptions) -> Result<Self> {
        let source = crate::fetch::HttpRangeSource::new(url, &options)?;
        Self::open(source, options).await
    }
}
