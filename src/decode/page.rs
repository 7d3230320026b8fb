//! Column chunk page walking.
//!
//! Splits a column chunk into its pages, decompresses each one through the codec registry and
//! checks the sizes and value counts recorded in page headers against the chunk metadata.

use std::io::Cursor;

use parquet::{
    basic::Encoding,
    format::{PageHeader, PageType},
    thrift::TSerializable,
};
use thrift::protocol::TCompactInputProtocol;

use crate::{
    codec::{Codec, decompress},
    error::{Error, Result},
    metadata::{ColumnChunkMetadata, FileMetadata},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Dictionary,
    DataV1,
    DataV2,
    Index,
}

/// Summary of one page of a column chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub kind: PageKind,
    /// Value encoding, `None` for index pages
    pub encoding: Option<Encoding>,
    /// Values in the page including nulls, 0 for index pages
    pub num_values: usize,
    pub compressed_size: usize,
    pub uncompressed_size: usize,
}

/// A page with its payload decompressed.
#[derive(Debug, Clone)]
pub struct Page {
    pub info: PageInfo,
    pub payload: Vec<u8>,
}

/// Walk every page of a column chunk.
///
/// `chunk` holds exactly the chunk's bytes, from its first page header to the end of its last
/// page. Fails with [`Error::DecodeError`] when headers run past the chunk or data page value
/// counts do not add up to the chunk's value count, and with [`Error::CorruptPayload`] when a
/// page decompresses to a size other than the one its header records.
pub fn read_pages(chunk: &[u8], column: &ColumnChunkMetadata) -> Result<Vec<Page>> {
    let codec = column.codec()?;
    let mut pages = Vec::new();
    let mut values = 0usize;
    let mut pos = 0usize;

    while pos < chunk.len() {
        let (header, header_len) = read_page_header(&chunk[pos..])?;
        let compressed_size = size_field(header.compressed_page_size, "compressed_page_size")?;
        let uncompressed_size =
            size_field(header.uncompressed_page_size, "uncompressed_page_size")?;

        let start = pos + header_len;
        let end = start
            .checked_add(compressed_size)
            .filter(|end| *end <= chunk.len())
            .ok_or_else(|| {
                Error::decode(format!(
                    "page of column {} at chunk offset {pos} runs past the chunk end",
                    column.path()
                ))
            })?;
        let raw = &chunk[start..end];
        pos = end;

        let page = decode_page(&header, raw, codec, compressed_size, uncompressed_size)?;
        if matches!(page.info.kind, PageKind::DataV1 | PageKind::DataV2) {
            values += page.info.num_values;
        }
        pages.push(page);
    }

    let declared = column.num_values().max(0) as usize;
    if values != declared {
        return Err(Error::decode(format!(
            "column {} pages hold {values} values, metadata declares {declared}",
            column.path()
        )));
    }
    Ok(pages)
}

/// List the pages of column `column` in row group `row_group` of a complete file.
pub fn inspect_column_chunk(
    bytes: &[u8],
    metadata: &FileMetadata,
    row_group: usize,
    column: usize,
) -> Result<Vec<PageInfo>> {
    let chunk_meta = metadata
        .row_group(row_group)?
        .columns()
        .get(column)
        .ok_or_else(|| Error::UnknownColumn(format!("leaf column #{column}")))?;
    let range = chunk_meta.byte_range();
    let end = range.end as usize;
    if end > bytes.len() {
        return Err(Error::TruncatedInput {
            needed: end,
            available: bytes.len(),
        });
    }
    let pages = read_pages(&bytes[range.start as usize..end], chunk_meta)?;
    Ok(pages.into_iter().map(|page| page.info).collect())
}

fn read_page_header(bytes: &[u8]) -> Result<(PageHeader, usize)> {
    let mut cursor = Cursor::new(bytes);
    let header = {
        let mut protocol = TCompactInputProtocol::new(&mut cursor);
        PageHeader::read_from_in_protocol(&mut protocol)
            .map_err(|err| Error::decode(format!("malformed page header: {err}")))?
    };
    Ok((header, cursor.position() as usize))
}

fn decode_page(
    header: &PageHeader,
    raw: &[u8],
    codec: Codec,
    compressed_size: usize,
    uncompressed_size: usize,
) -> Result<Page> {
    let (kind, encoding, num_values, payload) = if header.type_ == PageType::DICTIONARY_PAGE {
        let dict = header
            .dictionary_page_header
            .as_ref()
            .ok_or_else(|| Error::decode("dictionary page without dictionary header"))?;
        (
            PageKind::Dictionary,
            Some(encoding(dict.encoding)?),
            size_field(dict.num_values, "num_values")?,
            decompress(codec, raw, Some(uncompressed_size))?,
        )
    } else if header.type_ == PageType::DATA_PAGE {
        let data = header
            .data_page_header
            .as_ref()
            .ok_or_else(|| Error::decode("data page without data page header"))?;
        (
            PageKind::DataV1,
            Some(encoding(data.encoding)?),
            size_field(data.num_values, "num_values")?,
            decompress(codec, raw, Some(uncompressed_size))?,
        )
    } else if header.type_ == PageType::DATA_PAGE_V2 {
        let data = header
            .data_page_header_v2
            .as_ref()
            .ok_or_else(|| Error::decode("v2 data page without v2 header"))?;
        // repetition and definition levels precede the values and are never compressed
        let levels = size_field(data.repetition_levels_byte_length, "levels byte length")?
            + size_field(data.definition_levels_byte_length, "levels byte length")?;
        if levels > raw.len() || levels > uncompressed_size {
            return Err(Error::decode(format!(
                "v2 page levels take {levels} bytes of a {}-byte page",
                raw.len()
            )));
        }
        let mut payload = raw[..levels].to_vec();
        if data.is_compressed.unwrap_or(true) {
            payload.extend(decompress(
                codec,
                &raw[levels..],
                Some(uncompressed_size - levels),
            )?);
        } else {
            payload.extend_from_slice(&raw[levels..]);
        }
        (
            PageKind::DataV2,
            Some(encoding(data.encoding)?),
            size_field(data.num_values, "num_values")?,
            payload,
        )
    } else {
        (PageKind::Index, None, 0, Vec::new())
    };

    Ok(Page {
        info: PageInfo {
            kind,
            encoding,
            num_values,
            compressed_size,
            uncompressed_size,
        },
        payload,
    })
}

fn encoding(value: parquet::format::Encoding) -> Result<Encoding> {
    Encoding::try_from(value).map_err(|err| Error::decode(err.to_string()))
}

fn size_field(value: i32, name: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::decode(format!("negative {name}: {value}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray};
    use parquet::{
        arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties,
    };

    use super::*;
    use crate::footer::parse_footer;

    fn sample_file(compression: Compression) -> Vec<u8> {
        let ids = Int64Array::from_iter_values(0..1000);
        let names = StringArray::from_iter((0..1000).map(|i| {
            if i % 7 == 0 {
                None
            } else {
                Some(format!("name-{}", i % 13))
            }
        }));
        let batch = RecordBatch::try_from_iter([
            ("id", Arc::new(ids) as ArrayRef),
            ("name", Arc::new(names) as ArrayRef),
        ])
        .unwrap();

        let props = WriterProperties::builder()
            .set_compression(compression)
            .set_data_page_row_count_limit(100)
            .set_write_batch_size(100)
            .build();
        let mut out = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut out, batch.schema(), Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        out
    }

    #[test]
    fn pages_add_up_to_the_chunk() {
        for compression in [Compression::UNCOMPRESSED, Compression::SNAPPY] {
            let file = sample_file(compression);
            let metadata = parse_footer(&file).unwrap();

            for column in 0..2 {
                let pages = inspect_column_chunk(&file, &metadata, 0, column).unwrap();
                let values: usize = pages
                    .iter()
                    .filter(|page| page.kind != PageKind::Dictionary)
                    .map(|page| page.num_values)
                    .sum();
                assert_eq!(values, 1000);
                assert!(pages.iter().any(|page| page.kind == PageKind::DataV1));
            }

            // the string column is dictionary encoded by default
            let pages = inspect_column_chunk(&file, &metadata, 0, 1).unwrap();
            assert_eq!(pages[0].kind, PageKind::Dictionary);
        }
    }

    #[test]
    fn corrupted_page_is_rejected() {
        let file = sample_file(Compression::SNAPPY);
        let metadata = parse_footer(&file).unwrap();
        let chunk = metadata.row_group(0).unwrap().columns()[0].clone();
        let range = chunk.byte_range();

        let mut bytes = file[range.start as usize..range.end as usize].to_vec();
        // cut the chunk short so the last page runs past the end
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            read_pages(&bytes, &chunk),
            Err(Error::DecodeError(_))
        ));
    }

    #[test]
    fn out_of_range_column() {
        let file = sample_file(Compression::UNCOMPRESSED);
        let metadata = parse_footer(&file).unwrap();
        assert!(matches!(
            inspect_column_chunk(&file, &metadata, 0, 5),
            Err(Error::UnknownColumn(_))
        ));
        assert!(matches!(
            inspect_column_chunk(&file, &metadata, 3, 0),
            Err(Error::RowGroupIndexOutOfRange { index: 3, count: 1 })
        ));
    }
}
