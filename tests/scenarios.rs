use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Int32Array, RecordBatch, StringArray, UInt8Array};
use arrow_schema::{DataType, Field, Schema};
use parquet_bridge::{
    Codec, IpcFraming, ReaderOptions, Table, WriterProperties, read_metadata,
    read_parquet_to_ipc, read_table, write_parquet_from_ipc, write_table,
};

fn reference_batch() -> RecordBatch {
    RecordBatch::try_from_iter([
        (
            "str",
            Arc::new(StringArray::from(vec!["a", "b", "c", "d"])) as ArrayRef,
        ),
        ("uint8", Arc::new(UInt8Array::from(vec![1, 2, 3, 4])) as ArrayRef),
        ("int32", Arc::new(Int32Array::from(vec![0, -2147483638, 2147483637, 1])) as ArrayRef),
        (
            "bool",
            Arc::new(BooleanArray::from(vec![true, true, false, false])) as ArrayRef,
        ),
    ])
    .unwrap()
}

/// Arrow IPC file holding the same table the parquet fixture decodes to.
fn reference_ipc() -> Vec<u8> {
    Table::from(reference_batch()).to_ipc_file().unwrap()
}

#[test]
fn brotli_file_matches_the_reference_table() {
    let properties = WriterProperties::builder()
        .compression(Codec::Brotli)
        .max_row_group_size(2)
        .build()
        .unwrap();
    let parquet = write_parquet_from_ipc(&reference_ipc(), properties).unwrap();

    let metadata = read_metadata(&parquet).unwrap();
    assert_eq!(metadata.num_row_groups(), 2);
    assert_eq!(metadata.num_rows(), 4);
    for row_group in metadata.row_groups() {
        assert_eq!(row_group.num_rows(), 2);
        assert!(
            row_group
                .columns()
                .iter()
                .all(|column| column.codec().unwrap() == Codec::Brotli)
        );
    }

    let expected = Table::from_ipc(&reference_ipc()).unwrap();
    let decoded = read_table(parquet.clone(), &ReaderOptions::default()).unwrap();
    assert_eq!(decoded.num_batches(), 2);
    assert_eq!(decoded.schema().fields(), expected.schema().fields());
    assert_eq!(decoded.concat().unwrap(), expected.concat().unwrap());

    for framing in [IpcFraming::Stream, IpcFraming::File] {
        let ipc = read_parquet_to_ipc(parquet.clone(), &ReaderOptions::default(), framing).unwrap();
        let round = Table::from_ipc(&ipc).unwrap();
        assert_eq!(round.concat().unwrap(), expected.concat().unwrap());
    }
}

#[test]
fn zero_field_table_round_trips() {
    let table = Table::empty(Arc::new(Schema::empty()));
    let bytes = write_table(&table, WriterProperties::default()).unwrap();
    assert_eq!(&bytes[..4], b"PAR1");
    assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");

    let metadata = read_metadata(&bytes).unwrap();
    assert_eq!(metadata.num_rows(), 0);
    assert_eq!(metadata.num_row_groups(), 0);
    assert!(metadata.schema().fields().is_empty());

    let decoded = read_table(bytes, &ReaderOptions::default()).unwrap();
    assert_eq!(decoded.num_columns(), 0);
    assert_eq!(decoded.num_rows(), 0);
}

#[test]
fn zero_row_table_keeps_its_fields() {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new(
            "tags",
            DataType::List(Arc::new(Field::new_list_field(DataType::Utf8, true))),
            true,
        ),
    ]));
    let table = Table::empty(schema.clone());
    let bytes = write_table(&table, WriterProperties::default()).unwrap();

    let metadata = read_metadata(&bytes).unwrap();
    assert_eq!(metadata.num_rows(), 0);
    assert_eq!(metadata.schema().fields(), schema.fields());

    let decoded = read_table(bytes, &ReaderOptions::default()).unwrap();
    assert_eq!(decoded.num_rows(), 0);
    assert_eq!(decoded.schema().fields(), schema.fields());
}

#[test]
fn projected_columns_keep_file_order() {
    let properties = WriterProperties::builder()
        .compression(Codec::Gzip)
        .build()
        .unwrap();
    let parquet = write_table(&Table::from(reference_batch()), properties).unwrap();
    let options = ReaderOptions::builder().columns(["bool", "str"]).build();
    let decoded = read_table(parquet, &options).unwrap().concat().unwrap();

    let expected = reference_batch().project(&[0, 3]).unwrap();
    assert_eq!(decoded, expected);
}
