use std::{ops::Range, sync::Arc};

use bytes::Bytes;
use futures_util::{FutureExt, future::BoxFuture};
use log::debug;
use object_store::coalesce_ranges;
use parquet::{
    arrow::{arrow_reader::ArrowReaderOptions, async_reader::AsyncFileReader},
    errors::ParquetError,
    file::metadata::ParquetMetaData,
};

use crate::{
    error::{Error, NetworkErrorKind, Result},
    fetch::RangeSource,
};

/// Serves the parquet async reader from a [`RangeSource`].
///
/// The footer is parsed before a reader is created, so metadata requests are answered from
/// memory. Column chunk requests of one row group are coalesced before they reach the source.
/// Errors of the source travel through the parquet reader as [`ParquetError::External`] and are
/// recovered unchanged by [`Error::from_decoder`].
pub(crate) struct RangeSourceReader<S> {
    source: S,
    metadata: Arc<ParquetMetaData>,
    coalesce: u64,
}

impl<S: RangeSource> RangeSourceReader<S> {
    pub(crate) fn new(source: S, metadata: Arc<ParquetMetaData>, coalesce: u64) -> Self {
        Self {
            source,
            metadata,
            coalesce,
        }
    }

    /// Fetch `ranges`, merging ranges at most `coalesce` bytes apart into one request.
    pub(crate) async fn fetch_ranges(&self, ranges: Vec<Range<u64>>) -> Result<Vec<Bytes>> {
        let source = &self.source;
        coalesce_ranges(&ranges, |range| fetch_exact(source, range), self.coalesce).await
    }
}

async fn fetch_exact<S: RangeSource>(source: &S, range: Range<u64>) -> Result<Bytes> {
    let bytes = source.read_range(range.clone()).await?;
    if bytes.len() as u64 != range.end - range.start {
        return Err(Error::network(
            NetworkErrorKind::ShortRead,
            format!(
                "requested {} bytes at {}, received {}",
                range.end - range.start,
                range.start,
                bytes.len()
            ),
        ));
    }
    Ok(bytes)
}

fn external(err: Error) -> ParquetError {
    ParquetError::External(Box::new(err))
}

impl<S: RangeSource> AsyncFileReader for RangeSourceReader<S> {
    fn get_bytes(&mut self, range: Range<u64>) -> BoxFuture<'_, parquet::errors::Result<Bytes>> {
        async move { fetch_exact(&self.source, range).await.map_err(external) }.boxed()
    }

    fn get_byte_ranges(
        &mut self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, parquet::errors::Result<Vec<Bytes>>> {
        async move {
            debug!("fetching {} column chunk ranges", ranges.len());
            self.fetch_ranges(ranges).await.map_err(external)
        }
        .boxed()
    }

    fn get_metadata<'a>(
        &'a mut self,
        _options: Option<&'a ArrowReaderOptions>,
    ) -> BoxFuture<'a, parquet::errors::Result<Arc<ParquetMetaData>>> {
        let metadata = Arc::clone(&self.metadata);
        async move { Ok(metadata) }.boxed()
    }
}
