//! Column decoding.
//!
//! Page bytes are turned into arrow arrays by the parquet crate's array readers. This module
//! owns what happens around that: classifying columns into a closed set of kinds, deciding the
//! caller visible type of each column, and normalizing and checking decoded batches so that
//! nothing downstream depends on how a column was physically encoded.

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, RecordBatch, RecordBatchOptions},
    compute::cast,
};
use arrow_schema::{DataType, Field, FieldRef, Fields, Schema, SchemaRef};

use crate::{
    error::{Error, Result},
    options::ReaderOptions,
};

pub mod page;

/// Logical kind of a column, independent of its physical parquet encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Null,
    Boolean,
    /// Fixed width values; `byte_width` is the width of one value.
    PrimitiveFixed { byte_width: usize },
    /// Variable length bytes; `view` when stored as view arrays referencing shared buffers.
    PrimitiveVariable { view: bool },
    List(Box<ColumnKind>),
    Struct(Vec<ColumnKind>),
    Map(Box<ColumnKind>, Box<ColumnKind>),
    /// Dictionary backed column, normalized to `value` when unpacked.
    Dictionary(Box<ColumnKind>),
}

impl ColumnKind {
    /// Classify an arrow type, failing with [`Error::UnsupportedType`] for types that have no
    /// parquet mapping.
    pub fn of(data_type: &DataType) -> Result<Self> {
        let kind = match data_type {
            DataType::Null => ColumnKind::Null,
            DataType::Boolean => ColumnKind::Boolean,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Date32
            | DataType::Date64
            | DataType::Time32(_)
            | DataType::Time64(_)
            | DataType::Timestamp(_, _)
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _) => ColumnKind::PrimitiveFixed {
                byte_width: data_type.primitive_width().unwrap_or_default(),
            },
            DataType::FixedSizeBinary(width) => ColumnKind::PrimitiveFixed {
                byte_width: *width as usize,
            },
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
                ColumnKind::PrimitiveVariable { view: false }
            }
            DataType::Utf8View | DataType::BinaryView => {
                ColumnKind::PrimitiveVariable { view: true }
            }
            DataType::List(child)
            | DataType::LargeList(child)
            | DataType::FixedSizeList(child, _) => {
                ColumnKind::List(Box::new(ColumnKind::of(child.data_type())?))
            }
            DataType::Struct(fields) => {
                if fields.is_empty() {
                    return Err(Error::UnsupportedType(data_type.clone()));
                }
                ColumnKind::Struct(
                    fields
                        .iter()
                        .map(|field| ColumnKind::of(field.data_type()))
                        .collect::<Result<_>>()?,
                )
            }
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(kv) if kv.len() == 2 => ColumnKind::Map(
                    Box::new(ColumnKind::of(kv[0].data_type())?),
                    Box::new(ColumnKind::of(kv[1].data_type())?),
                ),
                _ => return Err(Error::UnsupportedType(data_type.clone())),
            },
            DataType::Dictionary(key, value) => {
                if !key.is_dictionary_key_type() {
                    return Err(Error::UnsupportedType(data_type.clone()));
                }
                ColumnKind::Dictionary(Box::new(ColumnKind::of(value)?))
            }
            _ => return Err(Error::UnsupportedType(data_type.clone())),
        };
        Ok(kind)
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            ColumnKind::List(_) | ColumnKind::Struct(_) | ColumnKind::Map(_, _)
        )
    }
}

/// Caller visible type for a decoded column under `options`.
pub fn output_type(data_type: &DataType, options: &ReaderOptions) -> DataType {
    match data_type {
        DataType::Dictionary(_, value) if options.unpack_dictionaries() => {
            output_type(value, options)
        }
        DataType::Utf8 | DataType::LargeUtf8 if options.string_view() => DataType::Utf8View,
        DataType::Binary | DataType::LargeBinary if options.string_view() => DataType::BinaryView,
        DataType::List(child) => DataType::List(output_field(child, options)),
        DataType::LargeList(child) => DataType::LargeList(output_field(child, options)),
        DataType::FixedSizeList(child, size) => {
            DataType::FixedSizeList(output_field(child, options), *size)
        }
        DataType::Struct(fields) => DataType::Struct(
            fields
                .iter()
                .map(|field| output_field(field, options))
                .collect::<Fields>(),
        ),
        other => other.clone(),
    }
}

fn output_field(field: &FieldRef, options: &ReaderOptions) -> FieldRef {
    let data_type = output_type(field.data_type(), options);
    if &data_type == field.data_type() {
        field.clone()
    } else {
        Arc::new(field.as_ref().clone().with_data_type(data_type))
    }
}

/// Output schema for batches decoded under `options`, keeping schema and field metadata.
pub fn output_schema(schema: &Schema, options: &ReaderOptions) -> SchemaRef {
    let fields: Fields = schema
        .fields()
        .iter()
        .map(|field| output_field(field, options))
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

/// Rebuild a decoded batch against `schema`, converting columns whose representation differs
/// and checking that every column holds `expected_rows` values.
pub fn normalize_batch(
    batch: RecordBatch,
    schema: &SchemaRef,
    expected_rows: usize,
) -> Result<RecordBatch> {
    if batch.num_rows() != expected_rows {
        return Err(Error::decode(format!(
            "decoded {} rows, metadata declares {expected_rows}",
            batch.num_rows()
        )));
    }
    if batch.num_columns() != schema.fields().len() {
        return Err(Error::decode(format!(
            "decoded {} columns, schema has {}",
            batch.num_columns(),
            schema.fields().len()
        )));
    }

    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(column, field)| normalize_column(column, field, expected_rows))
        .collect::<Result<Vec<_>>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(expected_rows));
    Ok(RecordBatch::try_new_with_options(
        schema.clone(),
        columns,
        &options,
    )?)
}

fn normalize_column(column: &ArrayRef, field: &Field, expected_rows: usize) -> Result<ArrayRef> {
    if column.len() != expected_rows {
        return Err(Error::decode(format!(
            "column {} holds {} values, expected {expected_rows}",
            field.name(),
            column.len()
        )));
    }
    if let Some(nulls) = column.nulls() {
        if nulls.len() != column.len() {
            return Err(Error::decode(format!(
                "column {} validity covers {} slots for {} values",
                field.name(),
                nulls.len(),
                column.len()
            )));
        }
    }
    if !field.is_nullable() && column.null_count() > 0 {
        return Err(Error::decode(format!(
            "non-nullable column {} decoded {} nulls",
            field.name(),
            column.null_count()
        )));
    }

    if column.data_type() == field.data_type() {
        Ok(column.clone())
    } else {
        Ok(cast(column.as_ref(), field.data_type())?)
    }
}
