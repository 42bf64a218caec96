// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Compression codecs for record payloads.
//!
//! The record format never calls a codec library directly: builders and decoders
//! receive a [`CompressionCodec`] and hand it the algorithm identifier stored in
//! the batch attributes. [`DefaultCompressionCodec`] is the stock implementation.

use std::fmt::{Debug, Display, Formatter};
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::message::constants::{COMPRESSION_CODEC_MASK, MAGIC_VALUE_V2};
use crate::service::CompressionConfig;
use crate::{AppError, AppResult};

/// Algorithm identifiers stored in the lower three attribute bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn id(&self) -> i16 {
        match self {
            CompressionType::None => 0,
            CompressionType::Gzip => 1,
            CompressionType::Snappy => 2,
            CompressionType::Lz4 => 3,
            CompressionType::Zstd => 4,
        }
    }

    pub fn from_id(id: i16) -> AppResult<CompressionType> {
        match id {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Gzip),
            2 => Ok(CompressionType::Snappy),
            3 => Ok(CompressionType::Lz4),
            4 => Ok(CompressionType::Zstd),
            _ => Err(AppError::InvalidRecord(format!(
                "unknown compression type id: {}",
                id
            ))),
        }
    }

    pub fn from_attributes(attributes: i16) -> AppResult<CompressionType> {
        Self::from_id(attributes & COMPRESSION_CODEC_MASK)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Snappy => "snappy",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }

    /// Zstd was introduced together with magic 2.
    pub fn ensure_supported_by(&self, magic: i8) -> AppResult<()> {
        if *self == CompressionType::Zstd && magic < MAGIC_VALUE_V2 {
            return Err(AppError::IllegalArgument(format!(
                "ZStandard compression is not supported for magic {}",
                magic
            )));
        }
        Ok(())
    }
}

impl Display for CompressionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CompressionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "gzip" => Ok(CompressionType::Gzip),
            "snappy" => Ok(CompressionType::Snappy),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            _ => Err(AppError::InvalidValue(format!("compression type: {}", s))),
        }
    }
}

/// Pluggable compressor used by the batch builder and the decode path.
pub trait CompressionCodec: Debug + Send + Sync {
    fn compress(&self, compression: CompressionType, data: &[u8]) -> AppResult<Bytes>;

    fn decompress(&self, compression: CompressionType, data: &[u8]) -> AppResult<Bytes>;
}

static DEFAULT_CODEC: Lazy<Arc<dyn CompressionCodec>> =
    Lazy::new(|| Arc::new(DefaultCompressionCodec::default()));

/// Shared codec with the default compression levels.
pub fn default_codec() -> Arc<dyn CompressionCodec> {
    DEFAULT_CODEC.clone()
}

/// gzip via `flate2`, raw snappy via `snap`, LZ4 frames via `lz4_flex` and zstd
/// via `zstd`.
#[derive(Debug, Clone)]
pub struct DefaultCompressionCodec {
    gzip_level: u32,
    zstd_level: i32,
}

impl Default for DefaultCompressionCodec {
    fn default() -> Self {
        Self::from_config(&CompressionConfig::default())
    }
}

/// Magic header of snappy streams written by the JVM clients (xerial framing).
const XERIAL_SNAPPY_MAGIC: &[u8] = &[0x82, b'S', b'N', b'A', b'P', b'P', b'Y', 0];
const XERIAL_SNAPPY_HEADER_LEN: usize = 16;

impl DefaultCompressionCodec {
    pub fn from_config(config: &CompressionConfig) -> Self {
        DefaultCompressionCodec {
            gzip_level: config.gzip_level,
            zstd_level: config.zstd_level,
        }
    }

    fn codec_error(compression: CompressionType, action: &str, err: impl Display) -> AppError {
        AppError::Compression(format!("{} {} failed: {}", compression, action, err))
    }

    fn decompress_snappy(data: &[u8]) -> AppResult<Vec<u8>> {
        if data.len() >= XERIAL_SNAPPY_HEADER_LEN && data.starts_with(XERIAL_SNAPPY_MAGIC) {
            // header is followed by chunks of (u32 big endian length, raw snappy block)
            let mut out = Vec::new();
            let mut chunks = &data[XERIAL_SNAPPY_HEADER_LEN..];
            while !chunks.is_empty() {
                if chunks.len() < 4 {
                    return Err(Self::codec_error(
                        CompressionType::Snappy,
                        "decompress",
                        "truncated xerial chunk length",
                    ));
                }
                let len = u32::from_be_bytes([chunks[0], chunks[1], chunks[2], chunks[3]]) as usize;
                chunks = &chunks[4..];
                if chunks.len() < len {
                    return Err(Self::codec_error(
                        CompressionType::Snappy,
                        "decompress",
                        "truncated xerial chunk",
                    ));
                }
                let block = snap::raw::Decoder::new()
                    .decompress_vec(&chunks[..len])
                    .map_err(|e| Self::codec_error(CompressionType::Snappy, "decompress", e))?;
                out.extend_from_slice(&block);
                chunks = &chunks[len..];
            }
            return Ok(out);
        }
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Self::codec_error(CompressionType::Snappy, "decompress", e))
    }
}

impl CompressionCodec for DefaultCompressionCodec {
    fn compress(&self, compression: CompressionType, data: &[u8]) -> AppResult<Bytes> {
        let compressed = match compression {
            CompressionType::None => return Ok(Bytes::copy_from_slice(data)),
            CompressionType::Gzip => {
                let mut encoder =
                    GzEncoder::new(Vec::new(), flate2::Compression::new(self.gzip_level));
                encoder
                    .write_all(data)
                    .map_err(|e| Self::codec_error(compression, "compress", e))?;
                encoder
                    .finish()
                    .map_err(|e| Self::codec_error(compression, "compress", e))?
            }
            CompressionType::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| Self::codec_error(compression, "compress", e))?,
            CompressionType::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder
                    .write_all(data)
                    .map_err(|e| Self::codec_error(compression, "compress", e))?;
                encoder
                    .finish()
                    .map_err(|e| Self::codec_error(compression, "compress", e))?
            }
            CompressionType::Zstd => zstd::stream::encode_all(data, self.zstd_level)
                .map_err(|e| Self::codec_error(compression, "compress", e))?,
        };
        trace!(
            "{} compressed {} bytes into {} bytes",
            compression,
            data.len(),
            compressed.len()
        );
        Ok(Bytes::from(compressed))
    }

    fn decompress(&self, compression: CompressionType, data: &[u8]) -> AppResult<Bytes> {
        let decompressed = match compression {
            CompressionType::None => return Ok(Bytes::copy_from_slice(data)),
            CompressionType::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| Self::codec_error(compression, "decompress", e))?;
                out
            }
            CompressionType::Snappy => Self::decompress_snappy(data)?,
            CompressionType::Lz4 => {
                let mut out = Vec::new();
                lz4_flex::frame::FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| Self::codec_error(compression, "decompress", e))?;
                out
            }
            CompressionType::Zstd => zstd::stream::decode_all(data)
                .map_err(|e| Self::codec_error(compression, "decompress", e))?,
        };
        Ok(Bytes::from(decompressed))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CompressionType::None)]
    #[case(CompressionType::Gzip)]
    #[case(CompressionType::Snappy)]
    #[case(CompressionType::Lz4)]
    #[case(CompressionType::Zstd)]
    fn test_codec_restores_payload(#[case] compression: CompressionType) {
        let codec = DefaultCompressionCodec::default();
        let payload = "the quick brown fox jumps over the lazy dog ".repeat(64);

        let compressed = codec.compress(compression, payload.as_bytes()).unwrap();
        if compression != CompressionType::None {
            assert!(compressed.len() < payload.len());
        }
        let restored = codec.decompress(compression, &compressed).unwrap();
        assert_eq!(restored.as_ref(), payload.as_bytes());
    }

    #[test]
    fn test_xerial_snappy_framing() {
        let payload = b"framed by the java client".repeat(10);
        let block = snap::raw::Encoder::new().compress_vec(&payload).unwrap();

        let mut framed = XERIAL_SNAPPY_MAGIC.to_vec();
        framed.extend_from_slice(&1i32.to_be_bytes()); // version
        framed.extend_from_slice(&1i32.to_be_bytes()); // compatible version
        framed.extend_from_slice(&(block.len() as u32).to_be_bytes());
        framed.extend_from_slice(&block);

        let codec = DefaultCompressionCodec::default();
        let restored = codec.decompress(CompressionType::Snappy, &framed).unwrap();
        assert_eq!(restored.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_garbage_input_is_reported() {
        let codec = DefaultCompressionCodec::default();
        let result = codec.decompress(CompressionType::Gzip, b"not gzip at all");
        assert!(matches!(result, Err(AppError::Compression(_))));
    }

    #[test]
    fn test_compression_type_ids() {
        for id in 0..=4 {
            assert_eq!(CompressionType::from_id(id).unwrap().id(), id);
        }
        assert!(CompressionType::from_id(5).is_err());
        assert_eq!(
            CompressionType::from_attributes(0x10 | 0x03).unwrap(),
            CompressionType::Lz4
        );
        assert_eq!("ZSTD".parse::<CompressionType>().unwrap(), CompressionType::Zstd);
    }

    #[test]
    fn test_zstd_requires_magic_v2() {
        assert!(CompressionType::Zstd.ensure_supported_by(2).is_ok());
        assert!(matches!(
            CompressionType::Zstd.ensure_supported_by(1),
            Err(AppError::IllegalArgument(_))
        ));
        assert!(CompressionType::Gzip.ensure_supported_by(0).is_ok());
    }
}
