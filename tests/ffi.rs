use std::sync::Arc;

use arrow::{
    array::{
        Array, ArrayRef, AsArray, Int64Array, RecordBatch, StringArray, StructArray, make_array,
    },
    datatypes::{DataType, Field, Int64Type},
    ffi::{FFI_ArrowArray, FFI_ArrowSchema, from_ffi},
};
use parquet_bridge::{
    Error, FfiTable, ReaderOptions, WriterProperties, read_table, write_batch,
};

fn decoded_table() -> parquet_bridge::Table {
    let batch = RecordBatch::try_from_iter([
        ("id", Arc::new(Int64Array::from_iter_values(0..1_000)) as ArrayRef),
        (
            "note",
            Arc::new(StringArray::from_iter(
                (0..1_000).map(|v| (v % 3 == 0).then(|| format!("note {v}"))),
            )) as ArrayRef,
        ),
    ])
    .unwrap();
    let properties = WriterProperties::builder()
        .max_row_group_size(400)
        .build()
        .unwrap();
    let bytes = write_batch(&batch, properties).unwrap();
    read_table(bytes, &ReaderOptions::default()).unwrap()
}

/// Rebuild batch `index` the way a foreign consumer would, from addresses alone.
fn import(exported: &FfiTable, index: usize) -> StructArray {
    let schema = exported.schema_handle().unwrap();
    let array = exported.array_handle(index).unwrap();
    let data = unsafe {
        let array = FFI_ArrowArray::from_raw(array.address as *mut FFI_ArrowArray);
        let schema = &*(schema.address as *const FFI_ArrowSchema);
        from_ffi(array, schema).unwrap()
    };
    make_array(data).as_struct().clone()
}

#[test]
fn decoded_batches_cross_without_copies() {
    let table = decoded_table();
    let expected = table.clone();
    let exported = FfiTable::new(table).unwrap();
    assert_eq!(exported.num_batches(), 3);
    assert_eq!(exported.schema_handle().unwrap().length, 2);

    for index in 0..exported.num_batches() {
        let ids = exported.buffer_handles(index, 0).unwrap();
        let imported = import(&exported, index);
        let source = &expected.batches()[index];
        assert_eq!(imported.len(), source.num_rows());

        let imported_ids = imported.column(0).as_primitive::<Int64Type>();
        assert_eq!(imported_ids.values().inner().as_ptr() as usize, ids.last().unwrap().address);
        assert_eq!(
            imported_ids.values(),
            source.column(0).as_primitive::<Int64Type>().values()
        );

        let notes = imported.column(1).as_string::<i32>();
        assert_eq!(notes, source.column(1).as_string::<i32>());
        // validity bitmap, offsets, values
        assert_eq!(exported.buffer_handles(index, 1).unwrap().len(), 3);
    }
}

#[test]
fn handles_expire_with_the_table() {
    let mut exported = FfiTable::new(decoded_table()).unwrap();
    let handles: Vec<_> = (0..exported.num_batches())
        .map(|index| exported.array_handle(index).unwrap())
        .chain(exported.buffer_handles(0, 1).unwrap())
        .collect();
    for handle in &handles {
        exported.check(handle).unwrap();
    }

    exported.dispose();
    for handle in &handles {
        assert!(matches!(exported.check(handle), Err(Error::InvalidHandle(_))));
    }
    assert!(matches!(exported.array_handle(0), Err(Error::InvalidHandle(_))));
    assert!(matches!(exported.buffer_handles(0, 0), Err(Error::InvalidHandle(_))));
}

#[test]
fn out_of_range_requests_are_invalid() {
    let exported = FfiTable::new(decoded_table()).unwrap();
    assert!(matches!(exported.array_handle(3), Err(Error::InvalidHandle(_))));
    assert!(matches!(exported.buffer_handles(0, 2), Err(Error::InvalidHandle(_))));

    let mut forged = exported.array_handle(0).unwrap();
    forged.address += 1;
    assert!(matches!(exported.check(&forged), Err(Error::InvalidHandle(_))));
}

#[test]
fn nested_columns_publish_child_buffers() {
    let points = StructArray::from(vec![
        (
            Arc::new(Field::new("x", DataType::Int64, false)),
            Arc::new(Int64Array::from_iter_values(0..100)) as ArrayRef,
        ),
        (
            Arc::new(Field::new("label", DataType::Utf8, false)),
            Arc::new(StringArray::from_iter_values((0..100).map(|v| format!("p{v}")))) as ArrayRef,
        ),
    ]);
    let batch = RecordBatch::try_from_iter([("point", Arc::new(points) as ArrayRef)]).unwrap();
    let bytes = write_batch(&batch, WriterProperties::default()).unwrap();
    let exported = FfiTable::new(read_table(bytes, &ReaderOptions::default()).unwrap()).unwrap();

    // the struct owns no data buffers, its fields do
    let handles = exported.buffer_handles(0, 0).unwrap();
    assert!(handles.len() >= 3);
    for handle in &handles {
        exported.check(handle).unwrap();
    }

    let imported = import(&exported, 0);
    let point = imported.column(0).as_struct();
    let x = point.column(0).as_primitive::<Int64Type>();
    let label = point.column(1).as_string::<i32>();
    for address in [
        x.values().inner().as_ptr() as usize,
        label.values().as_ptr() as usize,
    ] {
        assert!(handles.iter().any(|handle| handle.address == address));
    }
}
