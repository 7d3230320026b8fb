use arrow_schema::{ArrowError, DataType};
use parquet::errors::ParquetError;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while decoding, encoding or fetching Parquet data.
///
/// Format errors ([`Error::InvalidFormat`], [`Error::TruncatedInput`], [`Error::CorruptPayload`],
/// [`Error::DecodeError`]) mean the bytes themselves are bad and retrying will not help.
/// [`Error::Network`] errors are reported separately so callers can decide to retry them,
/// see [`Error::is_retryable`].
#[derive(Debug, Error)]
pub enum Error {
    /// The read entry point was handed nothing to read
    #[error("Empty input provided or not a byte buffer.")]
    EmptyInput,

    /// Bad magic number or a footer that does not decode
    #[error("Invalid parquet format: {0}")]
    InvalidFormat(String),

    /// Fewer bytes were available than a structural region requires
    #[error("Truncated input: needed {needed} bytes but only {available} available")]
    TruncatedInput {
        /// Bytes required to make progress
        needed: usize,
        /// Bytes actually provided
        available: usize,
    },

    /// Compression codec identifier that the registry does not know
    #[error("Unsupported compression codec: {0}")]
    UnsupportedCodec(String),

    /// Compressed bytes that do not decompress, or decompress to a size other than the one
    /// recorded in metadata
    #[error("Corrupt payload: {message}")]
    CorruptPayload {
        /// Size recorded in metadata, set for size mismatches
        expected: Option<usize>,
        /// Size actually produced, set for size mismatches
        actual: Option<usize>,
        message: String,
    },

    /// Structural inconsistency while decoding column data
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Row group index past the end of the file's row groups
    #[error("Row group index {index} out of range, file has {count} row groups")]
    RowGroupIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of row groups in the file
        count: usize,
    },

    /// Column selection names a column the file does not contain
    #[error("Column {0} not found in table")]
    UnknownColumn(String),

    /// Arrow type with no Parquet physical mapping
    #[error("Unsupported type for parquet writing: {0}")]
    UnsupportedType(DataType),

    /// Invalid writer or reader configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// FFI handle that does not belong to (or outlived) the table it is checked against
    #[error("Invalid FFI handle: {0}")]
    InvalidHandle(String),

    /// Range fetch failure
    #[error("Network error ({kind}): {message}")]
    Network {
        /// Failure category, drives [`Error::is_retryable`]
        kind: NetworkErrorKind,
        /// Human readable detail
        message: String,
    },

    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    Parquet(#[from] ParquetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Category of a [`Error::Network`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The per-request deadline elapsed
    Timeout,
    /// The server answered with a non-success status
    Status(u16),
    /// The server ignored the range header and full downloads are disabled
    RangeNotSupported,
    /// Connection level failure
    Transport,
    /// The server returned fewer bytes than requested
    ShortRead,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkErrorKind::Timeout => write!(f, "timeout"),
            NetworkErrorKind::Status(status) => write!(f, "status {status}"),
            NetworkErrorKind::RangeNotSupported => write!(f, "range requests not supported"),
            NetworkErrorKind::Transport => write!(f, "transport"),
            NetworkErrorKind::ShortRead => write!(f, "short read"),
        }
    }
}

impl Error {
    pub(crate) fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Error::Network {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::DecodeError(message.into())
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::CorruptPayload {
            expected: None,
            actual: None,
            message: message.into(),
        }
    }

    pub(crate) fn size_mismatch(expected: usize, actual: usize) -> Self {
        Error::CorruptPayload {
            expected: Some(expected),
            actual: Some(actual),
            message: format!("expected {expected} bytes after decompression, got {actual}"),
        }
    }

    /// Classify a failure raised inside the parquet decoder.
    ///
    /// Errors this crate handed to the decoder (fetch failures of an async read) come back
    /// unchanged. Codec failures become [`Error::CorruptPayload`], anything else about the data
    /// is a [`Error::DecodeError`].
    pub(crate) fn from_decoder(err: ParquetError) -> Self {
        match err {
            ParquetError::External(inner) => match inner.downcast::<Error>() {
                Ok(err) => *err,
                Err(inner) => Error::corrupt(inner.to_string()),
            },
            ParquetError::ArrowError(message) => Error::from_decoder_message(message),
            ParquetError::EOF(message) => Error::decode(format!("unexpected end of data: {message}")),
            other => Error::from_decoder_message(other.to_string()),
        }
    }

    /// Same as [`Error::from_decoder`] for errors that crossed the arrow reader interface, where
    /// parquet errors are flattened to text.
    pub(crate) fn from_decoder_arrow(err: ArrowError) -> Self {
        match err {
            ArrowError::ExternalError(inner) => match inner.downcast::<ParquetError>() {
                Ok(err) => Error::from_decoder(*err),
                Err(inner) => match inner.downcast::<Error>() {
                    Ok(err) => *err,
                    Err(inner) => Error::decode(inner.to_string()),
                },
            },
            ArrowError::ParquetError(message) => Error::from_decoder_message(message),
            other => Error::decode(other.to_string()),
        }
    }

    fn from_decoder_message(message: String) -> Self {
        // codec failures reach the arrow reader as `External: ..` text, size checks as general
        // errors mentioning decompression
        if message.contains("External:") || message.contains("decompress") {
            Error::corrupt(message)
        } else {
            Error::decode(message)
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Only transient network failures are retryable; format corruption never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { kind, .. } => match kind {
                NetworkErrorKind::Timeout | NetworkErrorKind::Transport => true,
                NetworkErrorKind::Status(status) => *status == 429 || *status >= 500,
                NetworkErrorKind::RangeNotSupported | NetworkErrorKind::ShortRead => false,
            },
            _ => false,
        }
    }

    /// Whether this error comes from the network rather than the file contents.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_message_is_stable() {
        assert_eq!(
            Error::EmptyInput.to_string(),
            "Empty input provided or not a byte buffer."
        );
    }

    #[test]
    fn only_transient_network_errors_retry() {
        assert!(Error::network(NetworkErrorKind::Timeout, "slow").is_retryable());
        assert!(Error::network(NetworkErrorKind::Status(503), "busy").is_retryable());
        assert!(Error::network(NetworkErrorKind::Status(429), "throttled").is_retryable());
        assert!(!Error::network(NetworkErrorKind::Status(404), "gone").is_retryable());
        assert!(!Error::network(NetworkErrorKind::RangeNotSupported, "200").is_retryable());
        assert!(!Error::InvalidFormat("bad magic".into()).is_retryable());
        assert!(!Error::decode("count mismatch").is_retryable());
        assert!(!Error::size_mismatch(10, 9).is_retryable());
    }

    #[test]
    fn decoder_errors_are_classified() {
        let err = Error::from_decoder(ParquetError::External(Box::new(Error::network(
            NetworkErrorKind::Timeout,
            "slow",
        ))));
        assert!(err.is_retryable());

        let err = Error::from_decoder(ParquetError::External(Box::new(std::io::Error::other(
            "snappy: corrupt input",
        ))));
        assert!(matches!(err, Error::CorruptPayload { expected: None, .. }));

        let err = Error::from_decoder(ParquetError::General("invalid rle run".into()));
        assert!(matches!(err, Error::DecodeError(_)));

        let err = Error::from_decoder_arrow(ArrowError::ParquetError(
            "External: zstd: unknown frame descriptor".into(),
        ));
        assert!(matches!(err, Error::CorruptPayload { .. }));

        let err = Error::from_decoder_arrow(ArrowError::ParquetError("EOF: out of data".into()));
        assert!(matches!(err, Error::DecodeError(_)));
    }
}
