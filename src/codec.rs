//! Compression codec registry.
//!
//! A uniform `compress`/`decompress` interface over the fixed set of codecs Parquet files use.
//! Every call is stateless, so the functions can be invoked concurrently without coordination.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};

use crate::error::{Error, Result};

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 1;
const BROTLI_LG_WINDOW_SIZE: u32 = 22;
const ZSTD_LEVEL: i32 = 1;

/// Hadoop lz4 frames are prefixed by two big endian u32: decompressed and compressed size.
const HADOOP_PREFIX_LEN: usize = 8;

/// Upper bound on how much an lz4 block can expand.
const LZ4_MAX_RATIO: usize = 255;

/// Output buffers are preallocated to at most this multiple of the input; sizes recorded in
/// metadata are not trusted before the data has been decoded.
const PREALLOCATE_RATIO: usize = 4;

/// Compression codecs understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Uncompressed,
    Snappy,
    Gzip,
    Brotli,
    /// Legacy parquet `LZ4`. Written with hadoop framing; on read both hadoop framed and raw
    /// block payloads are accepted since both appear in the wild.
    Lz4,
    Lz4Raw,
    Zstd,
}

impl Codec {
    /// Every codec the registry can compress and decompress.
    pub const ALL: [Codec; 7] = [
        Codec::Uncompressed,
        Codec::Snappy,
        Codec::Gzip,
        Codec::Brotli,
        Codec::Lz4,
        Codec::Lz4Raw,
        Codec::Zstd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Uncompressed => "uncompressed",
            Codec::Snappy => "snappy",
            Codec::Gzip => "gzip",
            Codec::Brotli => "brotli",
            Codec::Lz4 => "lz4",
            Codec::Lz4Raw => "lz4_raw",
            Codec::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Codec::Uncompressed),
            "snappy" => Ok(Codec::Snappy),
            "gzip" => Ok(Codec::Gzip),
            "brotli" => Ok(Codec::Brotli),
            "lz4" => Ok(Codec::Lz4),
            "lz4_raw" | "lz4raw" => Ok(Codec::Lz4Raw),
            "zstd" => Ok(Codec::Zstd),
            _ => Err(Error::UnsupportedCodec(s.to_string())),
        }
    }
}

impl TryFrom<Compression> for Codec {
    type Error = Error;

    fn try_from(value: Compression) -> Result<Self> {
        match value {
            Compression::UNCOMPRESSED => Ok(Codec::Uncompressed),
            Compression::SNAPPY => Ok(Codec::Snappy),
            Compression::GZIP(_) => Ok(Codec::Gzip),
            Compression::BROTLI(_) => Ok(Codec::Brotli),
            Compression::LZ4 => Ok(Codec::Lz4),
            Compression::LZ4_RAW => Ok(Codec::Lz4Raw),
            Compression::ZSTD(_) => Ok(Codec::Zstd),
            other => Err(Error::UnsupportedCodec(other.to_string())),
        }
    }
}

impl From<Codec> for Compression {
    fn from(value: Codec) -> Self {
        match value {
            Codec::Uncompressed => Compression::UNCOMPRESSED,
            Codec::Snappy => Compression::SNAPPY,
            Codec::Gzip => Compression::GZIP(GzipLevel::default()),
            Codec::Brotli => Compression::BROTLI(BrotliLevel::default()),
            Codec::Lz4 => Compression::LZ4,
            Codec::Lz4Raw => Compression::LZ4_RAW,
            Codec::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

/// Decompress `input` with `codec`.
///
/// When `expected_size` is known (it is recorded in page headers) the output length is checked
/// against it and a mismatch fails with [`Error::CorruptPayload`].
pub fn decompress(codec: Codec, input: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
    let output = match codec {
        Codec::Uncompressed => input.to_vec(),
        Codec::Snappy => snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| corrupt(codec, e))?,
        Codec::Gzip => {
            let mut output = Vec::with_capacity(capacity(input, expected_size));
            flate2::read::MultiGzDecoder::new(input)
                .read_to_end(&mut output)
                .map_err(|e| corrupt(codec, e))?;
            output
        }
        Codec::Brotli => {
            let mut output = Vec::with_capacity(capacity(input, expected_size));
            brotli::Decompressor::new(input, BROTLI_BUFFER_SIZE)
                .read_to_end(&mut output)
                .map_err(|e| corrupt(codec, e))?;
            output
        }
        Codec::Lz4 => decompress_lz4(input, expected_size)?,
        Codec::Lz4Raw => {
            let size = expected_size
                .ok_or_else(|| Error::corrupt("lz4_raw requires the uncompressed size"))?;
            check_lz4_size(input.len(), size)?;
            lz4_flex::block::decompress(input, size).map_err(|e| corrupt(codec, e))?
        }
        Codec::Zstd => zstd::stream::decode_all(input).map_err(|e| corrupt(codec, e))?,
    };

    match expected_size {
        Some(expected) if expected != output.len() => {
            Err(Error::size_mismatch(expected, output.len()))
        }
        _ => Ok(output),
    }
}

/// Compress `input` with `codec`.
pub fn compress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::Uncompressed => Ok(input.to_vec()),
        Codec::Snappy => snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(|e| corrupt(codec, e)),
        Codec::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(input)?;
            Ok(encoder.finish()?)
        }
        Codec::Brotli => {
            let mut writer = brotli::CompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_LG_WINDOW_SIZE,
            );
            writer.write_all(input)?;
            writer.flush()?;
            Ok(writer.into_inner())
        }
        Codec::Lz4 => {
            let block = lz4_flex::block::compress(input);
            let mut output = Vec::with_capacity(HADOOP_PREFIX_LEN + block.len());
            output.extend_from_slice(&frame_len(input.len())?.to_be_bytes());
            output.extend_from_slice(&frame_len(block.len())?.to_be_bytes());
            output.extend_from_slice(&block);
            Ok(output)
        }
        Codec::Lz4Raw => Ok(lz4_flex::block::compress(input)),
        Codec::Zstd => zstd::stream::encode_all(input, ZSTD_LEVEL).map_err(|e| corrupt(codec, e)),
    }
}

fn corrupt(codec: Codec, err: impl fmt::Display) -> Error {
    Error::corrupt(format!("{codec}: {err}"))
}

fn frame_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::corrupt(format!("lz4 block of {len} bytes is too large")))
}

fn capacity(input: &[u8], expected_size: Option<usize>) -> usize {
    let bound = input.len().saturating_mul(PREALLOCATE_RATIO);
    expected_size.unwrap_or(input.len() * 2).min(bound)
}

/// lz4 allocates the whole declared block size up front.
fn check_lz4_size(compressed: usize, decompressed: usize) -> Result<()> {
    if decompressed > compressed.saturating_mul(LZ4_MAX_RATIO).saturating_add(16) {
        return Err(Error::corrupt(format!(
            "lz4 block of {compressed} bytes cannot expand to {decompressed} bytes"
        )));
    }
    Ok(())
}

/// Try hadoop framing first, then a bare block, then the lz4 frame format older writers emitted.
fn decompress_lz4(input: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
    if let Some(output) = decompress_lz4_hadoop(input, expected_size) {
        return Ok(output);
    }
    if let Some(size) = expected_size {
        check_lz4_size(input.len(), size)?;
        if let Ok(output) = lz4_flex::block::decompress(input, size) {
            return Ok(output);
        }
    }
    let mut output = Vec::with_capacity(capacity(input, expected_size));
    lz4_flex::frame::FrameDecoder::new(input)
        .read_to_end(&mut output)
        .map_err(|e| corrupt(Codec::Lz4, e))?;
    Ok(output)
}

fn decompress_lz4_hadoop(mut input: &[u8], expected_size: Option<usize>) -> Option<Vec<u8>> {
    let mut output = Vec::with_capacity(capacity(input, expected_size.or(Some(0))));
    while input.len() >= HADOOP_PREFIX_LEN {
        let decompressed_size = u32::from_be_bytes(input[0..4].try_into().ok()?) as usize;
        let compressed_size = u32::from_be_bytes(input[4..8].try_into().ok()?) as usize;
        input = &input[HADOOP_PREFIX_LEN..];
        if compressed_size > input.len() || check_lz4_size(compressed_size, decompressed_size).is_err()
        {
            return None;
        }
        if let Some(expected) = expected_size {
            if output.len() + decompressed_size > expected {
                return None;
            }
        }
        let block = lz4_flex::block::decompress(&input[..compressed_size], decompressed_size).ok()?;
        if block.len() != decompressed_size {
            return None;
        }
        output.extend_from_slice(&block);
        input = &input[compressed_size..];
    }
    input.is_empty().then_some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Vec<u8> {
        (0..4096u32)
            .flat_map(|i| ((i % 97) as u16).to_le_bytes())
            .collect()
    }

    #[test]
    fn every_codec_restores_its_input() {
        let input = payload();
        for codec in Codec::ALL {
            let compressed = compress(codec, &input).unwrap();
            let restored = decompress(codec, &compressed, Some(input.len())).unwrap();
            assert_eq!(restored, input, "codec {codec}");
        }
    }

    #[test]
    fn size_mismatch_is_corrupt_payload() {
        let input = payload();
        let compressed = compress(Codec::Snappy, &input).unwrap();
        let err = decompress(Codec::Snappy, &compressed, Some(input.len() + 1)).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptPayload { expected: Some(expected), actual: Some(actual), .. }
                if expected == input.len() + 1 && actual == input.len()
        ));
    }

    #[test]
    fn lz4_accepts_raw_blocks_and_hadoop_frames() {
        let input = payload();

        let raw = lz4_flex::block::compress(&input);
        assert_eq!(decompress(Codec::Lz4, &raw, Some(input.len())).unwrap(), input);

        // two hadoop frames back to back
        let (left, right) = input.split_at(1000);
        let mut framed = Vec::new();
        for part in [left, right] {
            let block = lz4_flex::block::compress(part);
            framed.extend_from_slice(&(part.len() as u32).to_be_bytes());
            framed.extend_from_slice(&(block.len() as u32).to_be_bytes());
            framed.extend_from_slice(&block);
        }
        assert_eq!(decompress(Codec::Lz4, &framed, Some(input.len())).unwrap(), input);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decompress(Codec::Gzip, b"definitely not gzip", None).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptPayload { expected: None, ref message, .. } if message.starts_with("gzip")
        ));
    }

    #[test]
    fn declared_sizes_are_bounded_by_the_input() {
        // a page header claiming 2 GiB for 16 bytes of lz4
        let declared = i32::MAX as usize;
        let block = lz4_flex::block::compress(b"0123456789abcdef");
        for codec in [Codec::Lz4Raw, Codec::Lz4] {
            let err = decompress(codec, &block, Some(declared)).unwrap_err();
            assert!(matches!(err, Error::CorruptPayload { .. }), "codec {codec}");
        }

        let gzip = compress(Codec::Gzip, b"short").unwrap();
        assert!(capacity(&gzip, Some(declared)) <= gzip.len() * PREALLOCATE_RATIO);
        let err = decompress(Codec::Gzip, &gzip, Some(declared)).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptPayload { expected: Some(expected), actual: Some(5), .. }
                if expected == declared
        ));
    }

    #[test]
    fn codec_names() {
        assert_eq!("none".parse::<Codec>().unwrap(), Codec::Uncompressed);
        assert_eq!("ZSTD".parse::<Codec>().unwrap(), Codec::Zstd);
        assert!(matches!(
            "lzo".parse::<Codec>(),
            Err(Error::UnsupportedCodec(name)) if name == "lzo"
        ));
        assert!(matches!(
            Codec::try_from(Compression::LZO),
            Err(Error::UnsupportedCodec(_))
        ));
        for codec in Codec::ALL {
            assert_eq!(Codec::try_from(Compression::from(codec)).unwrap(), codec);
        }
    }
}
