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

//! Magic 0 and magic 1 records.
//!
//! Every legacy record is its own log entry. A compressed legacy "batch" is a
//! wrapper record whose value holds the compressed inner entries.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::compression::CompressionType;
use crate::message::constants::{
    COMPRESSION_CODEC_MASK, LEGACY_ATTRIBUTES_OFFSET, LEGACY_CRC_OFFSET, LEGACY_MAGIC_OFFSET,
    LEGACY_RECORD_OVERHEAD_V0, LEGACY_RECORD_OVERHEAD_V1, LEGACY_TIMESTAMP_OFFSET, LOG_OVERHEAD,
    MAGIC_VALUE_V0, MAGIC_VALUE_V1, NO_SEQUENCE, NO_TIMESTAMP, SIZE_OFFSET, TIMESTAMP_TYPE_MASK,
};
use crate::message::record::{Record, TimestampType};
use crate::{AppError, AppResult};

pub struct LegacyRecord;

impl LegacyRecord {
    pub fn record_overhead(magic: i8) -> usize {
        if magic == MAGIC_VALUE_V0 {
            LEGACY_RECORD_OVERHEAD_V0
        } else {
            LEGACY_RECORD_OVERHEAD_V1
        }
    }

    /// Size of the record without the offset and size fields.
    pub fn record_size(magic: i8, key: Option<&[u8]>, value: Option<&[u8]>) -> usize {
        Self::record_overhead(magic) + key.map_or(0, |k| k.len()) + value.map_or(0, |v| v.len())
    }

    pub fn attributes(magic: i8, compression: CompressionType, timestamp_type: TimestampType) -> i8 {
        let mut attributes = compression.id() & COMPRESSION_CODEC_MASK;
        if magic > MAGIC_VALUE_V0 && timestamp_type == TimestampType::LogAppendTime {
            attributes |= TIMESTAMP_TYPE_MASK;
        }
        attributes as i8
    }

    /// Writes a full log entry (offset, size, record) and returns its length.
    #[allow(clippy::too_many_arguments)]
    pub fn write_entry(
        buf: &mut BytesMut,
        offset: i64,
        magic: i8,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        compression: CompressionType,
        timestamp_type: TimestampType,
    ) -> usize {
        let start = buf.len();
        let size = Self::record_size(magic, key, value);
        buf.put_i64(offset);
        buf.put_i32(size as i32);

        let record_start = buf.len();
        buf.put_u32(0);
        buf.put_i8(magic);
        buf.put_i8(Self::attributes(magic, compression, timestamp_type));
        if magic > MAGIC_VALUE_V0 {
            buf.put_i64(timestamp);
        }
        for field in [key, value] {
            match field {
                Some(data) => {
                    buf.put_i32(data.len() as i32);
                    buf.put_slice(data);
                }
                None => buf.put_i32(-1),
            }
        }

        let crc = Self::compute_checksum(&buf[record_start..]);
        buf[record_start..record_start + 4].copy_from_slice(&crc.to_be_bytes());
        buf.len() - start
    }

    /// CRC-32 of a record, covering the bytes from the magic byte to the end.
    pub fn compute_checksum(record: &[u8]) -> u32 {
        crc32fast::hash(&record[LEGACY_MAGIC_OFFSET..])
    }
}

/// One parsed legacy log entry.
#[derive(Debug, Clone)]
pub(crate) struct LegacyEntry {
    pub offset: i64,
    pub magic: i8,
    pub attributes: i8,
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl LegacyEntry {
    pub fn compression(&self) -> AppResult<CompressionType> {
        CompressionType::from_attributes(self.attributes as i16)
    }

    pub fn timestamp_type(&self) -> TimestampType {
        if self.magic == MAGIC_VALUE_V0 {
            TimestampType::NoTimestampType
        } else {
            TimestampType::from_attributes(self.attributes as i16)
        }
    }

    pub fn into_record(self, offset: i64, timestamp: i64) -> Record {
        Record {
            offset,
            timestamp,
            sequence: NO_SEQUENCE,
            key: self.key,
            value: self.value,
            headers: vec![],
        }
    }

    /// Parses the entry at the front of `buf`.
    pub fn read_from(buf: &mut Bytes) -> AppResult<LegacyEntry> {
        if buf.len() < LOG_OVERHEAD + LEGACY_RECORD_OVERHEAD_V0 {
            return Err(AppError::InvalidRecord(format!(
                "legacy entry needs at least {} bytes, found {}",
                LOG_OVERHEAD + LEGACY_RECORD_OVERHEAD_V0,
                buf.len()
            )));
        }
        let size = (&buf[SIZE_OFFSET..]).get_i32();
        if size < 0 || LOG_OVERHEAD + size as usize > buf.len() {
            return Err(AppError::InvalidRecord(format!(
                "legacy record size {} exceeds the {} available bytes",
                size,
                buf.len() - LOG_OVERHEAD
            )));
        }
        let offset = buf.get_i64();
        let _ = buf.get_i32();
        let mut record = buf.split_to(size as usize);

        let magic = record[LEGACY_MAGIC_OFFSET] as i8;
        if magic != MAGIC_VALUE_V0 && magic != MAGIC_VALUE_V1 {
            return Err(AppError::InvalidRecord(format!(
                "unexpected magic {} in legacy record",
                magic
            )));
        }
        if record.len() < LegacyRecord::record_overhead(magic) {
            return Err(AppError::CorruptMessage(format!(
                "legacy record of {} bytes is smaller than the overhead for magic {}",
                record.len(),
                magic
            )));
        }
        let attributes = record[LEGACY_ATTRIBUTES_OFFSET] as i8;
        let timestamp = if magic > MAGIC_VALUE_V0 {
            (&record[LEGACY_TIMESTAMP_OFFSET..]).get_i64()
        } else {
            NO_TIMESTAMP
        };

        let header_len = LegacyRecord::record_overhead(magic) - 8;
        record.advance(LEGACY_CRC_OFFSET + header_len);
        let key = read_sized(&mut record, "key")?;
        let value = read_sized(&mut record, "value")?;
        if record.has_remaining() {
            return Err(AppError::InvalidRecord(format!(
                "{} unexpected trailing bytes in legacy record",
                record.remaining()
            )));
        }

        Ok(LegacyEntry {
            offset,
            magic,
            attributes,
            timestamp,
            key,
            value,
        })
    }
}

fn read_sized(buf: &mut Bytes, field: &str) -> AppResult<Option<Bytes>> {
    if buf.remaining() < 4 {
        return Err(AppError::InvalidRecord(format!(
            "missing {} size in legacy record",
            field
        )));
    }
    let len = buf.get_i32();
    if len < 0 {
        return Ok(None);
    }
    if buf.remaining() < len as usize {
        return Err(AppError::InvalidRecord(format!(
            "legacy record {} of {} bytes exceeds remaining {} bytes",
            field,
            len,
            buf.remaining()
        )));
    }
    Ok(Some(buf.split_to(len as usize)))
}
