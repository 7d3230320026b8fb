use std::sync::Arc;

use arrow::{
    array::{ArrayRef, Float32Array, Int64Array, RecordBatch, StringArray},
    ipc::reader::StreamReader,
};
use arrow_schema::{DataType, Field, Schema};
use bytes::Bytes;
use futures_util::{TryStreamExt, stream};
use parquet_bridge::{
    Error, ReaderOptions, Table, WriterProperties, parquet_stream_from_batches,
    parquet_to_ipc_stream, read_metadata, read_table, write_table,
};

fn batch(start: i64, rows: i64) -> RecordBatch {
    RecordBatch::try_from_iter([
        (
            "id",
            Arc::new(Int64Array::from_iter_values(start..start + rows)) as ArrayRef,
        ),
        (
            "reading",
            Arc::new(Float32Array::from_iter_values(
                (start..start + rows).map(|v| v as f32 * 0.5),
            )) as ArrayRef,
        ),
        (
            "sensor",
            Arc::new(StringArray::from_iter_values(
                (start..start + rows).map(|v| format!("sensor-{}", v % 3)),
            )) as ArrayRef,
        ),
    ])
    .unwrap()
}

fn write_parquet(row_group_size: usize) -> Bytes {
    let table = Table::try_new(batch(0, 1).schema(), vec![batch(0, 1_000)]).unwrap();
    let properties = WriterProperties::builder()
        .max_row_group_size(row_group_size)
        .build()
        .unwrap();
    write_table(&table, properties).unwrap()
}

/// Split `bytes` into chunks of `size` bytes.
fn chunked(bytes: &Bytes, size: usize) -> Vec<parquet_bridge::Result<Bytes>> {
    (0..bytes.len())
        .step_by(size)
        .map(|start| Ok(bytes.slice(start..(start + size).min(bytes.len()))))
        .collect()
}

#[tokio::test]
async fn parquet_chunks_become_an_ipc_stream() {
    let parquet = write_parquet(300);
    let input = stream::iter(chunked(&parquet, 777));

    let chunks: Vec<Bytes> = parquet_to_ipc_stream(input, ReaderOptions::default())
        .try_collect()
        .await
        .unwrap();
    // schema message, four row groups, end of stream marker
    assert_eq!(chunks.len(), 6);
    assert!(chunks.iter().all(|chunk| !chunk.is_empty()));

    let ipc: Vec<u8> = chunks.concat();
    let reader = StreamReader::try_new(ipc.as_slice(), None).unwrap();
    let batches = reader.collect::<Result<Vec<_>, _>>().unwrap();
    let rows: Vec<usize> = batches.iter().map(RecordBatch::num_rows).collect();
    assert_eq!(rows, vec![300, 300, 300, 100]);

    let expected = read_table(parquet, &ReaderOptions::default()).unwrap();
    assert_eq!(Table::from_ipc(&ipc).unwrap(), expected);
}

#[tokio::test]
async fn ipc_stream_applies_reader_options() {
    let parquet = write_parquet(300);
    let options = ReaderOptions::builder()
        .columns(["sensor"])
        .offset(250)
        .limit(100)
        .build();
    let chunks: Vec<Bytes> =
        parquet_to_ipc_stream(stream::iter(chunked(&parquet, 4096)), options.clone())
            .try_collect()
            .await
            .unwrap();
    let table = Table::from_ipc(&chunks.concat()).unwrap();
    assert_eq!(table.num_columns(), 1);
    assert_eq!(table.num_rows(), 100);
    assert_eq!(table, read_table(parquet, &options).unwrap());
}

#[tokio::test]
async fn ipc_stream_reports_bad_input() {
    let input = stream::iter(vec![Ok(Bytes::from_static(b"not a parquet file"))]);
    let result: Result<Vec<Bytes>, Error> = parquet_to_ipc_stream(input, ReaderOptions::default())
        .try_collect()
        .await;
    assert!(matches!(result, Err(Error::InvalidFormat(_))));

    let input = stream::iter(Vec::<parquet_bridge::Result<Bytes>>::new());
    let result: Result<Vec<Bytes>, Error> = parquet_to_ipc_stream(input, ReaderOptions::default())
        .try_collect()
        .await;
    assert!(matches!(result, Err(Error::EmptyInput)));
}

#[tokio::test]
async fn batches_become_a_parquet_file() {
    let schema = batch(0, 1).schema();
    let batches: Vec<parquet_bridge::Result<RecordBatch>> =
        (0..10).map(|i| Ok(batch(i * 250, 250))).collect();
    let properties = WriterProperties::builder()
        .max_row_group_size(500)
        .build()
        .unwrap();

    let chunks: Vec<Bytes> =
        parquet_stream_from_batches(stream::iter(batches), schema.clone(), properties)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
    // finished row groups are emitted before the input ends
    assert!(chunks.len() > 1);

    let file = Bytes::from(chunks.concat());
    let metadata = read_metadata(&file).unwrap();
    assert_eq!(metadata.num_row_groups(), 5);
    assert_eq!(metadata.num_rows(), 2_500);

    let table = read_table(file, &ReaderOptions::default()).unwrap();
    let expected = Table::try_new(schema, (0..10).map(|i| batch(i * 250, 250)).collect()).unwrap();
    assert_eq!(table.concat().unwrap(), expected.concat().unwrap());
}

#[tokio::test]
async fn mismatched_batches_are_rejected() {
    let schema = batch(0, 1).schema();
    let stray = RecordBatch::try_from_iter([(
        "other",
        Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
    )])
    .unwrap();
    let result: Result<Vec<Bytes>, Error> = parquet_stream_from_batches(
        stream::iter(vec![Ok(batch(0, 10)), Ok(stray)]),
        schema,
        WriterProperties::default(),
    )
    .unwrap()
    .try_collect()
    .await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn unsupported_schemas_fail_up_front() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "elapsed",
        DataType::Duration(arrow_schema::TimeUnit::Millisecond),
        true,
    )]));
    let result = parquet_stream_from_batches(
        stream::iter(Vec::<parquet_bridge::Result<RecordBatch>>::new()),
        schema,
        WriterProperties::default(),
    );
    assert!(matches!(result, Err(Error::UnsupportedType(_))));
}
