//! Parquet and Arrow codec bridge.
//!
//! Decodes parquet files into arrow tables and encodes arrow tables back into parquet, from a
//! complete in-memory buffer or from a remote file read through byte range requests.
//!
//! ```
//! use arrow::array::{ArrayRef, Int32Array, RecordBatch};
//! use parquet_bridge::{ReaderOptions, Table, WriterProperties, read_table, write_table};
//! use std::sync::Arc;
//!
//! let batch = RecordBatch::try_from_iter([(
//!     "id",
//!     Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef,
//! )])
//! .unwrap();
//! let table = Table::from(batch);
//!
//! let bytes = write_table(&table, WriterProperties::default()).unwrap();
//! let decoded = read_table(bytes, &ReaderOptions::default()).unwrap();
//! assert_eq!(decoded.num_rows(), 3);
//! ```

pub mod codec;
pub mod decode;
mod error;
pub mod fetch;
pub mod ffi;
pub mod footer;
mod metadata;
mod options;
pub mod reader;
pub mod selection;
pub mod stream;
mod table;
pub mod writer;

pub use codec::Codec;
pub use decode::{ColumnKind, page::inspect_column_chunk};
pub use error::{Error, NetworkErrorKind, Result};
pub use fetch::{RangeSource, RangeSupport};
pub use ffi::{FfiHandle, FfiTable, OwnerToken};
pub use metadata::{ColumnChunkMetadata, FileMetadata, RowGroupMetadata};
pub use options::{
    AsyncReaderOptions, AsyncReaderOptionsBuilder, DEFAULT_COALESCE, DEFAULT_CONCURRENCY,
    DEFAULT_FOOTER_PREFETCH, ReaderOptions, ReaderOptionsBuilder,
};
pub use parquet::basic::Encoding;
pub use reader::{
    AsyncParquetFile, BatchStream, ParquetFile, RowGroupBatches, read_metadata,
    read_parquet_to_ipc, read_row_group, read_schema, read_table,
};
pub use stream::{ByteStream, parquet_stream_from_batches, parquet_to_ipc_stream};
pub use table::{ARROW_FILE_MAGIC, IpcFraming, Table};
pub use writer::{
    StatisticsLevel, WriterProperties, WriterPropertiesBuilder, WriterVersion, write_batch,
    write_parquet_from_ipc, write_table,
};

#[cfg(feature = "http")]
pub use fetch::HttpRangeSource;
