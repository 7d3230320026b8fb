//! Byte range sources for partial reads.

use std::{future::Future, ops::Range, sync::Arc};

use bytes::Bytes;

use crate::error::{Error, NetworkErrorKind, Result};

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpRangeSource;

/// How a source serves byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSupport {
    /// Each read fetches only the requested bytes
    Ranges,
    /// The source ignored range requests and the whole resource was downloaded once; reads are
    /// served from that copy
    FullDownload,
}

/// A resource that can be read at arbitrary byte ranges.
///
/// Sources are cloned into every concurrent fetch, so cloning must be cheap and clones must
/// share any connection or cache state.
pub trait RangeSource: Clone + Send + Sync + Unpin + 'static {
    /// Fetch exactly the bytes in `range`.
    ///
    /// A source holding fewer bytes than requested fails with a
    /// [`NetworkErrorKind::ShortRead`] network error.
    fn read_range(&self, range: Range<u64>) -> impl Future<Output = Result<Bytes>> + Send;

    /// Fetch the last `length` bytes (all of them when the resource is shorter) together with
    /// the total size of the resource.
    fn read_suffix(&self, length: u64) -> impl Future<Output = Result<(Bytes, u64)>> + Send;

    fn range_support(&self) -> RangeSupport {
        RangeSupport::Ranges
    }
}

impl<T: RangeSource> RangeSource for Arc<T> {
    fn read_range(&self, range: Range<u64>) -> impl Future<Output = Result<Bytes>> + Send {
        T::read_range(self, range)
    }

    fn read_suffix(&self, length: u64) -> impl Future<Output = Result<(Bytes, u64)>> + Send {
        T::read_suffix(self, length)
    }

    fn range_support(&self) -> RangeSupport {
        T::range_support(self)
    }
}

impl RangeSource for Bytes {
    async fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        slice_range(self, range)
    }

    async fn read_suffix(&self, length: u64) -> Result<(Bytes, u64)> {
        let total = self.len() as u64;
        let start = total.saturating_sub(length);
        Ok((self.slice(start as usize..), total))
    }
}

/// Slice `range` out of a fully available resource.
pub(crate) fn slice_range(bytes: &Bytes, range: Range<u64>) -> Result<Bytes> {
    if range.start > range.end || range.end > bytes.len() as u64 {
        return Err(Error::network(
            NetworkErrorKind::ShortRead,
            format!(
                "range {}..{} outside a resource of {} bytes",
                range.start,
                range.end,
                bytes.len()
            ),
        ));
    }
    Ok(bytes.slice(range.start as usize..range.end as usize))
}

/// Parse a `Content-Range` header value such as `bytes 100-199/1000` into the served range
/// (end exclusive) and the total size, `None` when the total is `*`.
pub fn parse_content_range(value: &str) -> Option<(Range<u64>, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        total => Some(total.parse().ok()?),
    };
    Some((start..end + 1, total))
}
