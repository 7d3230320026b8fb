use std::{io::Cursor, sync::Arc};

use arrow::{
    array::RecordBatch,
    compute::concat_batches,
    ipc::{
        reader::{FileReader, StreamReader},
        writer::{FileWriter, StreamWriter},
    },
};
use arrow_schema::{ArrowError, Schema, SchemaRef};

use crate::error::{Error, Result};

/// Leading magic of the arrow IPC file framing.
pub const ARROW_FILE_MAGIC: &[u8; 6] = b"ARROW1";

/// Arrow IPC framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpcFraming {
    /// Schema message followed by batch messages, readable incrementally
    #[default]
    Stream,
    /// Stream wrapped with magic and a footer indexing the batches, for random access
    File,
}

/// Ordered record batches sharing one schema, logically one concatenated sequence of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Build a table, checking that every batch carries `schema`'s fields.
    ///
    /// Batch level schema metadata may differ; the table's schema is authoritative.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for (idx, batch) in batches.iter().enumerate() {
            if batch.schema().fields() != schema.fields() {
                return Err(Error::Arrow(ArrowError::SchemaError(format!(
                    "batch {idx} has fields {:?}, table has {:?}",
                    batch.schema().fields(),
                    schema.fields()
                ))));
            }
        }
        Ok(Self { schema, batches })
    }

    /// A table with `schema` and no rows.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// All rows as one batch.
    pub fn concat(&self) -> Result<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }

    /// Serialize to arrow IPC bytes.
    pub fn to_ipc(&self, framing: IpcFraming) -> Result<Vec<u8>> {
        match framing {
            IpcFraming::Stream => self.to_ipc_stream(),
            IpcFraming::File => self.to_ipc_file(),
        }
    }

    pub fn to_ipc_stream(&self) -> Result<Vec<u8>> {
        let mut writer = StreamWriter::try_new(Vec::new(), &self.schema)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.finish()?;
        Ok(writer.into_inner()?)
    }

    pub fn to_ipc_file(&self) -> Result<Vec<u8>> {
        let mut writer = FileWriter::try_new(Vec::new(), &self.schema)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.finish()?;
        Ok(writer.into_inner()?)
    }

    /// Parse arrow IPC bytes in either framing, told apart by the file magic.
    pub fn from_ipc(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyInput);
        }
        if bytes.starts_with(ARROW_FILE_MAGIC) {
            Self::from_ipc_file(bytes)
        } else {
            Self::from_ipc_stream(bytes)
        }
    }

    pub fn from_ipc_stream(bytes: &[u8]) -> Result<Self> {
        let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Self::try_new(schema, batches)
    }

    pub fn from_ipc_file(bytes: &[u8]) -> Result<Self> {
        let reader = FileReader::try_new(Cursor::new(bytes), None)?;
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Self::try_new(schema, batches)
    }
}

impl From<RecordBatch> for Table {
    fn from(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::empty(Arc::new(Schema::empty()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use arrow::array::{ArrayRef, Int32Array, StringArray};
    use arrow_schema::{DataType, Field};

    use super::*;

    fn table() -> Table {
        let schema = Arc::new(Schema::new_with_metadata(
            vec![
                Field::new("id", DataType::Int32, false),
                Field::new("name", DataType::Utf8, true),
            ],
            HashMap::from([("source".to_string(), "test".to_string())]),
        ));
        let first = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();
        let second = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![3])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("c")])),
            ],
        )
        .unwrap();
        Table::try_new(schema, vec![first, second]).unwrap()
    }

    #[test]
    fn both_framings_round_trip() {
        let table = table();
        assert_eq!(table.num_rows(), 3);

        let stream = table.to_ipc(IpcFraming::Stream).unwrap();
        assert!(!stream.starts_with(ARROW_FILE_MAGIC));
        assert_eq!(Table::from_ipc(&stream).unwrap(), table);

        let file = table.to_ipc(IpcFraming::File).unwrap();
        assert!(file.starts_with(ARROW_FILE_MAGIC));
        let decoded = Table::from_ipc(&file).unwrap();
        assert_eq!(decoded.schema().metadata().get("source").unwrap(), "test");
        assert_eq!(decoded.concat().unwrap(), table.concat().unwrap());
    }

    #[test]
    fn mismatched_batch_is_rejected() {
        let other = RecordBatch::try_from_iter([(
            "x",
            Arc::new(Int32Array::from(vec![1])) as ArrayRef,
        )])
        .unwrap();
        assert!(Table::try_new(table().schema().clone(), vec![other]).is_err());
    }

    #[test]
    fn empty_ipc_input() {
        assert!(matches!(Table::from_ipc(&[]), Err(Error::EmptyInput)));
    }
}
