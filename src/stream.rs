//! Streaming transforms between parquet bytes and arrow data.

use std::{
    io::Write,
    pin::Pin,
    sync::{Arc, Mutex},
};

use arrow::{array::RecordBatch, ipc::writer::StreamWriter};
use arrow_schema::SchemaRef;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use parquet::arrow::ArrowWriter;

use crate::{
    error::{Error, Result},
    footer::encode_empty_file,
    options::ReaderOptions,
    reader::{ParquetFile, ResolvedProjection},
    selection::{RowGroupSlice, plan_row_groups},
    writer::{WriterProperties, check_supported},
};

/// A stream of encoded byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

enum IpcTransform<St> {
    Collect {
        input: Pin<Box<St>>,
        buffer: BytesMut,
        options: ReaderOptions,
    },
    Emit {
        file: ParquetFile,
        projection: ResolvedProjection,
        plan: std::vec::IntoIter<RowGroupSlice>,
        options: ReaderOptions,
        writer: StreamWriter<Vec<u8>>,
    },
    Done,
}

/// Turn a stream of parquet byte chunks into a stream of arrow IPC stream framed chunks.
///
/// Input chunks may be split anywhere. Since the footer comes last, nothing is emitted until the
/// input ends; then the schema message comes first, one chunk follows per row group read, and the
/// end of stream marker closes the output.
pub fn parquet_to_ipc_stream<St>(input: St, options: ReaderOptions) -> ByteStream
where
    St: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let state = IpcTransform::Collect {
        input: Box::pin(input),
        buffer: BytesMut::new(),
        options,
    };
    Box::pin(stream::try_unfold(state, ipc_step))
}

async fn ipc_step<St>(state: IpcTransform<St>) -> Result<Option<(Bytes, IpcTransform<St>)>>
where
    St: Stream<Item = Result<Bytes>> + Send + 'static,
{
    match state {
        IpcTransform::Collect {
            mut input,
            mut buffer,
            options,
        } => {
            while let Some(chunk) = input.next().await {
                buffer.extend_from_slice(&chunk?);
            }
            let file = ParquetFile::open(buffer.freeze())?;
            let projection = ResolvedProjection::new(file.metadata(), &options)?;
            let plan = plan_row_groups(file.metadata(), &options)?;
            let mut writer = StreamWriter::try_new(Vec::new(), &projection.output)?;
            let schema_message = Bytes::from(std::mem::take(writer.get_mut()));
            Ok(Some((
                schema_message,
                IpcTransform::Emit {
                    file,
                    projection,
                    plan: plan.into_iter(),
                    options,
                    writer,
                },
            )))
        }
        IpcTransform::Emit {
            file,
            projection,
            mut plan,
            options,
            mut writer,
        } => match plan.next() {
            Some(slice) => {
                for batch in file.decode(&slice, &projection, &options, options.batch_size())? {
                    writer.write(&batch)?;
                }
                let chunk = Bytes::from(std::mem::take(writer.get_mut()));
                Ok(Some((
                    chunk,
                    IpcTransform::Emit {
                        file,
                        projection,
                        plan,
                        options,
                        writer,
                    },
                )))
            }
            None => {
                writer.finish()?;
                let end = Bytes::from(std::mem::take(writer.get_mut()));
                Ok(Some((end, IpcTransform::Done)))
            }
        },
        IpcTransform::Done => Ok(None),
    }
}

/// Write target whose contents are drained between writes.
#[derive(Clone, Default)]
struct SharedBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    fn take(&self) -> Result<Bytes> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("output buffer lock poisoned")))?;
        Ok(Bytes::from(std::mem::take(&mut *buffer)))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("output buffer lock poisoned"))?;
        Write::write(&mut *buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

enum ParquetTransform<St> {
    Write {
        input: Pin<Box<St>>,
        schema: SchemaRef,
        writer: ArrowWriter<SharedBuffer>,
        output: SharedBuffer,
    },
    Done,
}

/// Turn a stream of record batches into a stream of parquet byte chunks.
///
/// Output is produced as row groups fill up, so memory stays bounded by one row group. The
/// concatenated chunks form one complete parquet file. Every batch must carry `schema`'s fields.
pub fn parquet_stream_from_batches<St>(
    batches: St,
    schema: SchemaRef,
    properties: WriterProperties,
) -> Result<ByteStream>
where
    St: Stream<Item = Result<RecordBatch>> + Send + 'static,
{
    check_supported(&schema)?;
    if schema.fields().is_empty() {
        let file = encode_empty_file(properties.created_by(), &properties.footer_metadata(&schema))?;
        return Ok(Box::pin(stream::once(async move { Ok(Bytes::from(file)) })));
    }

    let output = SharedBuffer::default();
    let writer = ArrowWriter::try_new(
        output.clone(),
        schema.clone(),
        Some(properties.to_parquet(&schema)?),
    )?;
    let state = ParquetTransform::Write {
        input: Box::pin(batches),
        schema,
        writer,
        output,
    };

    Ok(Box::pin(stream::try_unfold(state, parquet_step)))
}

async fn parquet_step<St>(
    state: ParquetTransform<St>,
) -> Result<Option<(Bytes, ParquetTransform<St>)>>
where
    St: Stream<Item = Result<RecordBatch>> + Send + 'static,
{
    let ParquetTransform::Write {
        mut input,
        schema,
        mut writer,
        output,
    } = state
    else {
        return Ok(None);
    };

    while let Some(batch) = input.next().await {
        let batch = batch?;
        if batch.schema().fields() != schema.fields() {
            return Err(Error::InvalidConfig(format!(
                "batch fields {:?} differ from the stream schema",
                batch.schema().fields()
            )));
        }
        writer.write(&batch)?;
        let chunk = output.take()?;
        if !chunk.is_empty() {
            return Ok(Some((
                chunk,
                ParquetTransform::Write {
                    input,
                    schema,
                    writer,
                    output,
                },
            )));
        }
    }

    writer.close()?;
    Ok(Some((output.take()?, ParquetTransform::Done)))
}
