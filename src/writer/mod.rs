//! Encoding arrow tables as parquet.

use arrow::array::{RecordBatch, RecordBatchOptions};
use arrow_schema::Schema;
use bytes::Bytes;
use log::debug;
use parquet::arrow::ArrowWriter;

use crate::{
    decode::ColumnKind,
    error::Result,
    footer::encode_empty_file,
    table::Table,
};

mod properties;

pub use properties::{
    DEFAULT_CREATED_BY, DEFAULT_MAX_ROW_GROUP_SIZE, StatisticsLevel, WriterProperties,
    WriterPropertiesBuilder, WriterVersion,
};

/// Check that every field of `schema` has a parquet mapping.
pub fn check_supported(schema: &Schema) -> Result<()> {
    for field in schema.fields() {
        ColumnKind::of(field.data_type())?;
    }
    Ok(())
}

/// Encode `table` as a complete parquet file.
///
/// Rows are split into row groups of at most `max_row_group_size` rows. The table's schema
/// metadata is stored in the footer along with the key/value pairs of `properties`. Fails with
/// [`Error::UnsupportedType`](crate::Error::UnsupportedType) before producing any bytes when a
/// column type has no parquet mapping.
pub fn write_table(table: &Table, properties: WriterProperties) -> Result<Bytes> {
    let schema = table.schema();
    check_supported(schema)?;

    if schema.fields().is_empty() {
        let file = encode_empty_file(properties.created_by(), &properties.footer_metadata(schema))?;
        return Ok(Bytes::from(file));
    }

    let mut writer = ArrowWriter::try_new(
        Vec::new(),
        schema.clone(),
        Some(properties.to_parquet(schema)?),
    )?;
    for batch in table.batches() {
        // batches may carry their own schema metadata, the table schema is what gets written
        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        let batch =
            RecordBatch::try_new_with_options(schema.clone(), batch.columns().to_vec(), &options)?;
        writer.write(&batch)?;
    }
    let file = writer.into_inner()?;
    debug!(
        "wrote {} rows into {} parquet bytes",
        table.num_rows(),
        file.len()
    );
    Ok(Bytes::from(file))
}

/// Encode a single batch as a complete parquet file.
pub fn write_batch(batch: &RecordBatch, properties: WriterProperties) -> Result<Bytes> {
    write_table(&Table::from(batch.clone()), properties)
}

/// Encode arrow IPC bytes, in stream or file framing, as parquet.
pub fn write_parquet_from_ipc(ipc: &[u8], properties: WriterProperties) -> Result<Bytes> {
    write_table(&Table::from_ipc(ipc)?, properties)
}
