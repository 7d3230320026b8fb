use std::time::Duration;

/// Default number of trailing bytes requested when fetching a remote footer.
pub const DEFAULT_FOOTER_PREFETCH: u64 = 64 * 1024;
/// Default number of row group fetches kept in flight.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default largest gap between two column chunk ranges that still get merged into one request.
pub const DEFAULT_COALESCE: u64 = 1024 * 1024;

/// Options controlling what a read decodes and how columns are represented.
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    columns: Option<Vec<String>>,
    row_groups: Option<Vec<usize>>,
    limit: Option<usize>,
    offset: Option<usize>,
    batch_size: Option<usize>,
    string_view: bool,
    unpack_dictionaries: bool,
    validate_pages: bool,
}

impl ReaderOptions {
    /// Create a new builder for ReaderOptions
    ///
    /// # Example
    /// ```
    /// use parquet_bridge::ReaderOptions;
    ///
    /// let options = ReaderOptions::builder()
    ///     .columns(["id", "location.lat"])
    ///     .row_groups(vec![0, 2])
    ///     .limit(100)
    ///     .build();
    /// assert_eq!(options.limit(), Some(100));
    /// ```
    pub fn builder() -> ReaderOptionsBuilder {
        ReaderOptionsBuilder::default()
    }

    /// Selected column names or dotted paths, `None` for every column
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Selected row group indexes, `None` for every row group
    pub fn row_groups(&self) -> Option<&[usize]> {
        self.row_groups.as_deref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Largest number of rows per batch, `None` for one batch per row group
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Whether byte array columns are emitted as view arrays
    pub fn string_view(&self) -> bool {
        self.string_view
    }

    /// Whether dictionary typed columns are unpacked to their value type
    pub fn unpack_dictionaries(&self) -> bool {
        self.unpack_dictionaries
    }

    /// Whether column chunk pages are checked through the codec registry before decoding
    pub fn validate_pages(&self) -> bool {
        self.validate_pages
    }
}

/// Builder for ReaderOptions
#[derive(Clone, Debug, Default)]
pub struct ReaderOptionsBuilder {
    columns: Option<Vec<String>>,
    row_groups: Option<Vec<usize>>,
    limit: Option<usize>,
    offset: Option<usize>,
    batch_size: Option<usize>,
    string_view: Option<bool>,
    unpack_dictionaries: Option<bool>,
    validate_pages: Option<bool>,
}

impl ReaderOptionsBuilder {
    /// Only decode the given columns (default: all)
    ///
    /// Names may be top level field names or dotted paths into nested fields. Selecting a
    /// struct selects every leaf below it.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Only read the given row groups, in the given order (default: all)
    pub fn row_groups(mut self, row_groups: Vec<usize>) -> Self {
        self.row_groups = Some(row_groups);
        self
    }

    /// Stop after this many rows
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip this many leading rows
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Split row groups into batches of at most `rows` rows (default: one batch per row group)
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = Some(rows.max(1));
        self
    }

    /// Emit `Utf8View`/`BinaryView` instead of inline byte arrays (default: false)
    pub fn string_view(mut self, value: bool) -> Self {
        self.string_view = Some(value);
        self
    }

    /// Replace dictionary typed columns by their value type (default: false)
    pub fn unpack_dictionaries(mut self, value: bool) -> Self {
        self.unpack_dictionaries = Some(value);
        self
    }

    /// Walk and decompress every selected page through the codec registry before decoding,
    /// failing on size or value count mismatches (default: false)
    pub fn validate_pages(mut self, value: bool) -> Self {
        self.validate_pages = Some(value);
        self
    }

    /// Build the ReaderOptions
    pub fn build(self) -> ReaderOptions {
        ReaderOptions {
            columns: self.columns,
            row_groups: self.row_groups,
            limit: self.limit,
            offset: self.offset,
            batch_size: self.batch_size,
            string_view: self.string_view.unwrap_or(false),
            unpack_dictionaries: self.unpack_dictionaries.unwrap_or(false),
            validate_pages: self.validate_pages.unwrap_or(false),
        }
    }
}

/// Options for reading from a remote range source.
#[derive(Clone, Debug)]
pub struct AsyncReaderOptions {
    content_length: Option<u64>,
    footer_prefetch: u64,
    concurrency: usize,
    coalesce: u64,
    request_timeout: Option<Duration>,
    allow_full_download: bool,
    reader: ReaderOptions,
}

impl AsyncReaderOptions {
    pub fn builder() -> AsyncReaderOptionsBuilder {
        AsyncReaderOptionsBuilder::default()
    }

    /// Total size of the remote file when known up front
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn footer_prefetch(&self) -> u64 {
        self.footer_prefetch
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn coalesce(&self) -> u64 {
        self.coalesce
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn allow_full_download(&self) -> bool {
        self.allow_full_download
    }

    pub fn reader(&self) -> &ReaderOptions {
        &self.reader
    }
}

impl Default for AsyncReaderOptions {
    fn default() -> Self {
        AsyncReaderOptionsBuilder::default().build()
    }
}

/// Builder for AsyncReaderOptions
#[derive(Clone, Debug, Default)]
pub struct AsyncReaderOptionsBuilder {
    content_length: Option<u64>,
    footer_prefetch: Option<u64>,
    concurrency: Option<usize>,
    coalesce: Option<u64>,
    request_timeout: Option<Duration>,
    allow_full_download: Option<bool>,
    reader: Option<ReaderOptions>,
}

impl AsyncReaderOptionsBuilder {
    /// Known total size of the remote file. Lets the footer be fetched with a bounded range
    /// instead of a suffix range.
    pub fn content_length(mut self, value: u64) -> Self {
        self.content_length = Some(value);
        self
    }

    /// Trailing bytes requested by the first footer fetch (default: 64 KiB)
    ///
    /// When the footer is larger, a second request fetches exactly the missing length.
    pub fn footer_prefetch(mut self, value: u64) -> Self {
        self.footer_prefetch = Some(value);
        self
    }

    /// Maximum row group fetches in flight (default: 4, minimum 1)
    pub fn concurrency(mut self, value: usize) -> Self {
        self.concurrency = Some(value);
        self
    }

    /// Largest gap in bytes between column chunks merged into one request (default: 1 MiB)
    pub fn coalesce(mut self, value: u64) -> Self {
        self.coalesce = Some(value);
        self
    }

    /// Deadline for each individual range request (default: none)
    pub fn request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = Some(value);
        self
    }

    /// Whether a source that ignores range requests may fall back to one full download
    /// (default: true). When disabled such sources fail with a network error.
    pub fn allow_full_download(mut self, value: bool) -> Self {
        self.allow_full_download = Some(value);
        self
    }

    /// Options applied to every row group read
    pub fn reader(mut self, value: ReaderOptions) -> Self {
        self.reader = Some(value);
        self
    }

    pub fn build(self) -> AsyncReaderOptions {
        AsyncReaderOptions {
            content_length: self.content_length,
            footer_prefetch: self
                .footer_prefetch
                .unwrap_or(DEFAULT_FOOTER_PREFETCH)
                .max(crate::footer::FOOTER_TAIL_LEN as u64),
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            coalesce: self.coalesce.unwrap_or(DEFAULT_COALESCE),
            request_timeout: self.request_timeout,
            allow_full_download: self.allow_full_download.unwrap_or(true),
            reader: self.reader.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn async_defaults() {
        let options = AsyncReaderOptions::default();
        assert_eq!(options.footer_prefetch(), DEFAULT_FOOTER_PREFETCH);
        assert_eq!(options.concurrency(), DEFAULT_CONCURRENCY);
        assert!(options.allow_full_download());
        assert!(options.content_length().is_none());
    }

    #[test]
    fn degenerate_values_are_clamped() {
        let options = AsyncReaderOptions::builder()
            .concurrency(0)
            .footer_prefetch(2)
            .build();
        assert_eq!(options.concurrency(), 1);
        assert_eq!(options.footer_prefetch(), 8);
        assert_eq!(ReaderOptions::builder().batch_size(0).build().batch_size(), Some(1));
        assert_eq!(ReaderOptions::default().batch_size(), None);
    }
}
