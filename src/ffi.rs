//! Zero-copy handoff of decoded tables over the Arrow C data interface.
//!
//! An [`FfiTable`] exports every batch of a [`Table`] as an `ArrowArray`/`ArrowSchema` struct
//! pair at a fixed heap address and publishes those addresses, plus the addresses of the
//! underlying column buffers, as [`FfiHandle`]s. A consumer sharing the address space rebuilds
//! arrow arrays from them without copying any column data.
//!
//! # Lifetime contract
//!
//! Handles do not own anything. Every handle returned by an [`FfiTable`] stays valid until
//! [`FfiTable::dispose`] is called or the table is dropped, and must not be used afterwards.
//! This is not enforced across the boundary; [`FfiTable::check`] validates a handle against the
//! table's current generation so misuse can be caught on the Rust side.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use arrow::{
    array::{Array, ArrayData, StructArray},
    ffi::{FFI_ArrowArray, FFI_ArrowSchema, to_ffi},
};

use crate::{
    error::{Error, Result},
    table::Table,
};

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies the table, and the generation of its exports, a handle was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken {
    pub table_id: u64,
    pub generation: u64,
}

/// Borrowed view of memory owned by an [`FfiTable`].
///
/// `length` counts schema children for schema handles, rows for array handles and bytes for
/// buffer handles. Valid until the owning table is disposed or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FfiHandle {
    pub address: usize,
    pub length: usize,
    pub owner: OwnerToken,
}

struct ExportedBatch {
    array: NonNull<FFI_ArrowArray>,
    /// Per column data of the batch, kept to publish buffer addresses
    columns: Vec<ArrayData>,
    num_rows: usize,
}

/// A table exported over the C data interface.
pub struct FfiTable {
    id: u64,
    generation: u64,
    schema: Option<NonNull<FFI_ArrowSchema>>,
    batches: Vec<ExportedBatch>,
    num_fields: usize,
    table: Option<Table>,
}

impl FfiTable {
    /// Export `table`. Column buffers are shared, not copied.
    pub fn new(table: Table) -> Result<Self> {
        let schema = FFI_ArrowSchema::try_from(table.schema().as_ref())?;
        let mut batches = Vec::with_capacity(table.num_batches());
        for batch in table.batches() {
            let columns = batch.columns().iter().map(|column| column.to_data()).collect();
            let (array, _) = to_ffi(&StructArray::from(batch.clone()).to_data())?;
            batches.push(ExportedBatch {
                array: NonNull::from(Box::leak(Box::new(array))),
                columns,
                num_rows: batch.num_rows(),
            });
        }

        Ok(Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            num_fields: table.num_columns(),
            schema: Some(NonNull::from(Box::leak(Box::new(schema)))),
            batches,
            table: Some(table),
        })
    }

    fn owner(&self) -> OwnerToken {
        OwnerToken {
            table_id: self.id,
            generation: self.generation,
        }
    }

    fn handle(&self, address: usize, length: usize) -> FfiHandle {
        FfiHandle {
            address,
            length,
            owner: self.owner(),
        }
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.table.is_none()
    }

    /// Address of the `ArrowSchema` describing every batch as a struct of the table's fields.
    pub fn schema_handle(&self) -> Result<FfiHandle> {
        let schema = self.schema.ok_or_else(disposed)?;
        Ok(self.handle(schema.as_ptr() as usize, self.num_fields))
    }

    /// Address of the `ArrowArray` of batch `batch`.
    ///
    /// The consumer may move the struct out (leaving a released struct behind); the column
    /// buffers it references stay valid until the table is disposed.
    pub fn array_handle(&self, batch: usize) -> Result<FfiHandle> {
        let exported = self.batch(batch)?;
        Ok(self.handle(exported.array.as_ptr() as usize, exported.num_rows))
    }

    /// Addresses of the buffers of column `column` in batch `batch`: the validity bitmap first
    /// when the column has one, then its data buffers in C data interface order, then the
    /// buffers of every child array (struct fields, list values, dictionary values), depth first.
    pub fn buffer_handles(&self, batch: usize, column: usize) -> Result<Vec<FfiHandle>> {
        let data = self.column(batch, column)?;
        let mut buffers = Vec::new();
        collect_buffers(data, &mut buffers);
        Ok(buffers
            .into_iter()
            .map(|(address, len)| self.handle(address, len))
            .collect())
    }

    /// Validate that `handle` was issued by this table and its exports are still live.
    pub fn check(&self, handle: &FfiHandle) -> Result<()> {
        if handle.owner.table_id != self.id {
            return Err(Error::InvalidHandle(format!(
                "handle belongs to table {}, not {}",
                handle.owner.table_id, self.id
            )));
        }
        if handle.owner.generation != self.generation || self.is_disposed() {
            return Err(Error::InvalidHandle(format!(
                "handle from generation {} used after dispose (now {})",
                handle.owner.generation, self.generation
            )));
        }
        if !self.publishes(handle.address) {
            return Err(Error::InvalidHandle(format!(
                "address {:#x} is not published by table {}",
                handle.address, self.id
            )));
        }
        Ok(())
    }

    /// Release every export. Handles issued before this call become invalid.
    pub fn dispose(&mut self) {
        self.release();
        self.generation += 1;
    }

    fn publishes(&self, address: usize) -> bool {
        if self.schema.is_some_and(|schema| schema.as_ptr() as usize == address) {
            return true;
        }
        self.batches.iter().any(|batch| {
            batch.array.as_ptr() as usize == address
                || batch.columns.iter().any(|data| {
                    let mut buffers = Vec::new();
                    collect_buffers(data, &mut buffers);
                    buffers.iter().any(|(published, _)| *published == address)
                })
        })
    }

    fn batch(&self, batch: usize) -> Result<&ExportedBatch> {
        if self.is_disposed() {
            return Err(disposed());
        }
        self.batches.get(batch).ok_or_else(|| {
            Error::InvalidHandle(format!(
                "batch {batch} out of range, table has {}",
                self.batches.len()
            ))
        })
    }

    fn column(&self, batch: usize, column: usize) -> Result<&ArrayData> {
        self.batch(batch)?.columns.get(column).ok_or_else(|| {
            Error::InvalidHandle(format!(
                "column {column} out of range, table has {}",
                self.num_fields
            ))
        })
    }

    fn release(&mut self) {
        for batch in self.batches.drain(..) {
            // SAFETY: the pointer came from Box::leak in `new` and is released exactly once.
            // A consumer that moved the struct out left a released struct, dropping it is a no-op.
            drop(unsafe { Box::from_raw(batch.array.as_ptr()) });
        }
        if let Some(schema) = self.schema.take() {
            // SAFETY: as above.
            drop(unsafe { Box::from_raw(schema.as_ptr()) });
        }
        self.table = None;
    }
}

impl Drop for FfiTable {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FfiTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfiTable")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("batches", &self.batches.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Address and length of every buffer reachable from `data`, children included.
fn collect_buffers(data: &ArrayData, out: &mut Vec<(usize, usize)>) {
    if let Some(nulls) = data.nulls() {
        let validity = nulls.buffer();
        out.push((validity.as_ptr() as usize, validity.len()));
    }
    for buffer in data.buffers() {
        out.push((buffer.as_ptr() as usize, buffer.len()));
    }
    for child in data.child_data() {
        collect_buffers(child, out);
    }
}

fn disposed() -> Error {
    Error::InvalidHandle("table exports were disposed".into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, Int32Array, RecordBatch, StringArray, make_array},
        ffi::from_ffi,
    };

    use super::*;

    fn table() -> Table {
        let batch = RecordBatch::try_from_iter([
            ("id", Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef),
            (
                "name",
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])) as ArrayRef,
            ),
        ])
        .unwrap();
        Table::from(batch)
    }

    #[test]
    fn import_shares_buffers() {
        let table = table();
        let original = table.batches()[0].column(0).to_data().buffers()[0].as_ptr();
        let exported = FfiTable::new(table).unwrap();

        let schema = exported.schema_handle().unwrap();
        let array = exported.array_handle(0).unwrap();
        exported.check(&schema).unwrap();
        exported.check(&array).unwrap();
        assert_eq!(array.length, 3);

        let buffers = exported.buffer_handles(0, 0).unwrap();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].address, original as usize);
        assert_eq!(exported.buffer_handles(0, 1).unwrap().len(), 3);

        let imported = unsafe {
            let array = FFI_ArrowArray::from_raw(array.address as *mut FFI_ArrowArray);
            let schema = &*(schema.address as *const FFI_ArrowSchema);
            make_array(from_ffi(array, schema).unwrap())
        };
        let imported = imported.as_any().downcast_ref::<StructArray>().unwrap();
        assert_eq!(imported.len(), 3);
        assert_eq!(
            imported.column(0).to_data().buffers()[0].as_ptr(),
            original
        );
        let names = imported
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(names.is_null(1));
        assert_eq!(names.value(2), "c");
    }

    #[test]
    fn disposed_handles_are_rejected() {
        let mut exported = FfiTable::new(table()).unwrap();
        let other = FfiTable::new(table()).unwrap();
        let handle = exported.array_handle(0).unwrap();

        assert!(matches!(
            other.check(&handle),
            Err(Error::InvalidHandle(_))
        ));

        exported.dispose();
        assert!(exported.is_disposed());
        assert!(matches!(
            exported.check(&handle),
            Err(Error::InvalidHandle(_))
        ));
        assert!(exported.array_handle(0).is_err());
        assert!(exported.schema_handle().is_err());
    }
}
