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

//! Read side of the record format.
//!
//! A [`RecordBatch`] is a view over the bytes of one log entry. Which layout the
//! bytes follow is decided by the magic byte, which sits at the same position
//! for every generation. Records are only decoded (and decompressed) the first
//! time they are asked for.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::message::batch_header::BatchHeader;
use crate::message::compression::CompressionCodec;
use crate::message::compression::CompressionType;
use crate::message::constants::*;
use crate::message::legacy_record::{LegacyEntry, LegacyRecord};
use crate::message::record::{DefaultRecord, Record, TimestampType};
use crate::{AppError, AppResult};

pub(crate) fn read_i64_at(buf: &[u8], offset: usize) -> i64 {
    (&buf[offset..]).get_i64()
}

pub(crate) fn read_i32_at(buf: &[u8], offset: usize) -> i32 {
    (&buf[offset..]).get_i32()
}

pub(crate) fn read_i16_at(buf: &[u8], offset: usize) -> i16 {
    (&buf[offset..]).get_i16()
}

pub(crate) fn read_u32_at(buf: &[u8], offset: usize) -> u32 {
    (&buf[offset..]).get_u32()
}

/// Adds to a producer sequence number, wrapping from `i32::MAX` to 0.
pub fn increment_sequence(sequence: i32, increment: i32) -> i32 {
    if sequence > i32::MAX - increment {
        increment - (i32::MAX - sequence) - 1
    } else {
        sequence + increment
    }
}

/// Inverse of [`increment_sequence`].
pub fn decrement_sequence(sequence: i32, decrement: i32) -> i32 {
    if sequence < decrement {
        i32::MAX - (decrement - sequence) + 1
    } else {
        sequence - decrement
    }
}

fn v2_only(field: &str, magic: i8) -> AppError {
    AppError::IllegalState(format!(
        "{} is not available for record batches with magic {}",
        field, magic
    ))
}

#[derive(Debug, Clone)]
pub enum RecordBatch {
    V0(LegacyRecordBatch),
    V1(LegacyRecordBatch),
    V2(DefaultRecordBatch),
}

impl RecordBatch {
    /// Splits one batch off the front of `buf`. Bytes after the batch stay in
    /// `buf`.
    pub fn decode(buf: &mut Bytes, codec: Arc<dyn CompressionCodec>) -> AppResult<RecordBatch> {
        if buf.len() < HEADER_SIZE_UP_TO_MAGIC {
            return Err(AppError::InvalidRecord(format!(
                "record batch needs at least {} bytes, found {}",
                HEADER_SIZE_UP_TO_MAGIC,
                buf.len()
            )));
        }
        let magic = buf[MAGIC_OFFSET] as i8;
        if !(MAGIC_VALUE_V0..=MAGIC_VALUE_V2).contains(&magic) {
            return Err(AppError::InvalidRecord(format!(
                "unrecognized record batch magic {}",
                magic
            )));
        }
        let size = read_i32_at(buf, SIZE_OFFSET);
        if size < 0 || LOG_OVERHEAD + size as usize > buf.len() {
            return Err(AppError::InvalidRecord(format!(
                "record batch length {} exceeds the {} available bytes",
                size,
                buf.len() - LOG_OVERHEAD
            )));
        }
        let entry = buf.split_to(LOG_OVERHEAD + size as usize);
        trace!("decoded magic {} batch of {} bytes", magic, entry.len());
        match magic {
            MAGIC_VALUE_V2 => Ok(RecordBatch::V2(DefaultRecordBatch::new(entry, codec)?)),
            MAGIC_VALUE_V1 => Ok(RecordBatch::V1(LegacyRecordBatch::new(entry, codec)?)),
            _ => Ok(RecordBatch::V0(LegacyRecordBatch::new(entry, codec)?)),
        }
    }

    pub fn magic(&self) -> i8 {
        match self {
            RecordBatch::V0(_) => MAGIC_VALUE_V0,
            RecordBatch::V1(_) => MAGIC_VALUE_V1,
            RecordBatch::V2(_) => MAGIC_VALUE_V2,
        }
    }

    /// For compressed legacy batches this decompresses the inner records.
    pub fn base_offset(&self) -> AppResult<i64> {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.base_offset(),
            RecordBatch::V2(batch) => Ok(batch.base_offset()),
        }
    }

    pub fn last_offset(&self) -> i64 {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.last_offset(),
            RecordBatch::V2(batch) => batch.last_offset(),
        }
    }

    pub fn next_offset(&self) -> i64 {
        self.last_offset().saturating_add(1)
    }

    pub fn count(&self) -> AppResult<usize> {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.count(),
            RecordBatch::V2(batch) => batch.count(),
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.buffer().len()
    }

    pub fn buffer(&self) -> &Bytes {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => &batch.buffer,
            RecordBatch::V2(batch) => &batch.buffer,
        }
    }

    /// `NO_TIMESTAMP` for magic 0.
    pub fn max_timestamp(&self) -> i64 {
        match self {
            RecordBatch::V0(_) => NO_TIMESTAMP,
            RecordBatch::V1(batch) => batch.timestamp(),
            RecordBatch::V2(batch) => batch.max_timestamp(),
        }
    }

    pub fn timestamp_type(&self) -> TimestampType {
        match self {
            RecordBatch::V0(_) => TimestampType::NoTimestampType,
            RecordBatch::V1(batch) => batch.timestamp_type,
            RecordBatch::V2(batch) => batch.timestamp_type(),
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.compression,
            RecordBatch::V2(batch) => batch.compression,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_type() != CompressionType::None
    }

    pub fn is_transactional(&self) -> bool {
        match self {
            RecordBatch::V2(batch) => batch.attributes() & TRANSACTIONAL_FLAG_MASK != 0,
            _ => false,
        }
    }

    pub fn is_control_batch(&self) -> bool {
        match self {
            RecordBatch::V2(batch) => batch.attributes() & CONTROL_FLAG_MASK != 0,
            _ => false,
        }
    }

    pub fn has_delete_horizon(&self) -> bool {
        match self {
            RecordBatch::V2(batch) => batch.attributes() & DELETE_HORIZON_FLAG_MASK != 0,
            _ => false,
        }
    }

    pub fn producer_id(&self) -> AppResult<i64> {
        match self {
            RecordBatch::V2(batch) => Ok(read_i64_at(&batch.buffer, PRODUCER_ID_OFFSET)),
            _ => Err(v2_only("producer id", self.magic())),
        }
    }

    pub fn producer_epoch(&self) -> AppResult<i16> {
        match self {
            RecordBatch::V2(batch) => Ok(read_i16_at(&batch.buffer, PRODUCER_EPOCH_OFFSET)),
            _ => Err(v2_only("producer epoch", self.magic())),
        }
    }

    pub fn base_sequence(&self) -> AppResult<i32> {
        match self {
            RecordBatch::V2(batch) => Ok(batch.base_sequence()),
            _ => Err(v2_only("base sequence", self.magic())),
        }
    }

    pub fn last_sequence(&self) -> AppResult<i32> {
        match self {
            RecordBatch::V2(batch) => Ok(batch.last_sequence()),
            _ => Err(v2_only("last sequence", self.magic())),
        }
    }

    pub fn partition_leader_epoch(&self) -> AppResult<i32> {
        match self {
            RecordBatch::V2(batch) => Ok(batch.partition_leader_epoch()),
            _ => Err(v2_only("partition leader epoch", self.magic())),
        }
    }

    /// Leader epoch when the batch carries a valid one.
    pub fn leader_epoch(&self) -> Option<i32> {
        match self {
            RecordBatch::V2(batch) if batch.partition_leader_epoch() != NO_PARTITION_LEADER_EPOCH => {
                Some(batch.partition_leader_epoch())
            }
            _ => None,
        }
    }

    /// `None` unless the delete horizon flag is set.
    pub fn delete_horizon_ms(&self) -> AppResult<Option<i64>> {
        match self {
            RecordBatch::V2(batch) => Ok(batch.delete_horizon_ms()),
            _ => Err(v2_only("delete horizon", self.magic())),
        }
    }

    pub fn header(&self) -> Option<BatchHeader> {
        match self {
            RecordBatch::V2(batch) => Some(batch.header()),
            _ => None,
        }
    }

    pub fn checksum(&self) -> u32 {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.checksum(),
            RecordBatch::V2(batch) => batch.checksum(),
        }
    }

    pub fn compute_checksum(&self) -> u32 {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.compute_checksum(),
            RecordBatch::V2(batch) => batch.compute_checksum(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.checksum() == self.compute_checksum()
    }

    pub fn ensure_valid(&self) -> AppResult<()> {
        let stored = self.checksum();
        let computed = self.compute_checksum();
        if stored != computed {
            return Err(AppError::CorruptMessage(format!(
                "record batch is corrupt (stored crc = {}, computed crc = {})",
                stored, computed
            )));
        }
        Ok(())
    }

    /// Decoded records, with absolute offsets and timestamps.
    pub fn records(&self) -> AppResult<&[Record]> {
        match self {
            RecordBatch::V0(batch) | RecordBatch::V1(batch) => batch.records(),
            RecordBatch::V2(batch) => batch.records(),
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(self.buffer());
    }
}

/// Magic 2 batch.
#[derive(Debug, Clone)]
pub struct DefaultRecordBatch {
    buffer: Bytes,
    compression: CompressionType,
    codec: Arc<dyn CompressionCodec>,
    records: OnceCell<Vec<Record>>,
}

impl DefaultRecordBatch {
    fn new(buffer: Bytes, codec: Arc<dyn CompressionCodec>) -> AppResult<Self> {
        if buffer.len() < RECORD_BATCH_OVERHEAD {
            return Err(AppError::CorruptMessage(format!(
                "record batch size {} is smaller than the minimum allowed overhead {}",
                buffer.len(),
                RECORD_BATCH_OVERHEAD
            )));
        }
        let base_offset = read_i64_at(&buffer, BASE_OFFSET_OFFSET);
        let last_offset_delta = read_i32_at(&buffer, LAST_OFFSET_DELTA_OFFSET);
        if base_offset.checked_add(last_offset_delta as i64).is_none() {
            return Err(AppError::InvalidRecord(format!(
                "last offset delta {} overflows base offset {}",
                last_offset_delta, base_offset
            )));
        }
        let compression = CompressionType::from_attributes(read_i16_at(&buffer, ATTRIBUTES_OFFSET))?;
        Ok(DefaultRecordBatch {
            buffer,
            compression,
            codec,
            records: OnceCell::new(),
        })
    }

    fn attributes(&self) -> i16 {
        read_i16_at(&self.buffer, ATTRIBUTES_OFFSET)
    }

    pub fn base_offset(&self) -> i64 {
        read_i64_at(&self.buffer, BASE_OFFSET_OFFSET)
    }

    fn last_offset_delta(&self) -> i32 {
        read_i32_at(&self.buffer, LAST_OFFSET_DELTA_OFFSET)
    }

    pub fn last_offset(&self) -> i64 {
        self.base_offset()
            .saturating_add(self.last_offset_delta() as i64)
    }

    pub fn count(&self) -> AppResult<usize> {
        let count = read_i32_at(&self.buffer, RECORDS_COUNT_OFFSET);
        if count < 0 {
            return Err(AppError::InvalidRecord(format!(
                "found invalid record count {} in magic v2 batch",
                count
            )));
        }
        Ok(count as usize)
    }

    pub fn first_timestamp(&self) -> i64 {
        read_i64_at(&self.buffer, FIRST_TIMESTAMP_OFFSET)
    }

    pub fn max_timestamp(&self) -> i64 {
        read_i64_at(&self.buffer, MAX_TIMESTAMP_OFFSET)
    }

    pub fn timestamp_type(&self) -> TimestampType {
        TimestampType::from_attributes(self.attributes())
    }

    pub fn base_sequence(&self) -> i32 {
        read_i32_at(&self.buffer, BASE_SEQUENCE_OFFSET)
    }

    pub fn last_sequence(&self) -> i32 {
        let base_sequence = self.base_sequence();
        if base_sequence == NO_SEQUENCE {
            return NO_SEQUENCE;
        }
        increment_sequence(base_sequence, self.last_offset_delta())
    }

    pub fn partition_leader_epoch(&self) -> i32 {
        read_i32_at(&self.buffer, PARTITION_LEADER_EPOCH_OFFSET)
    }

    /// The horizon is stored in the first timestamp field.
    pub fn delete_horizon_ms(&self) -> Option<i64> {
        if self.attributes() & DELETE_HORIZON_FLAG_MASK != 0 {
            Some(self.first_timestamp())
        } else {
            None
        }
    }

    pub fn checksum(&self) -> u32 {
        read_u32_at(&self.buffer, CRC_OFFSET)
    }

    /// CRC-32C over everything from the attributes to the end of the batch.
    pub fn compute_checksum(&self) -> u32 {
        crc32c::crc32c(&self.buffer[ATTRIBUTES_OFFSET..])
    }

    pub fn header(&self) -> BatchHeader {
        let buf = &self.buffer;
        BatchHeader {
            base_offset: self.base_offset(),
            length: read_i32_at(buf, LENGTH_OFFSET),
            partition_leader_epoch: self.partition_leader_epoch(),
            magic: buf[RB_MAGIC_OFFSET] as i8,
            crc: self.checksum(),
            attributes: self.attributes(),
            last_offset_delta: self.last_offset_delta(),
            first_timestamp: self.first_timestamp(),
            max_timestamp: self.max_timestamp(),
            producer_id: read_i64_at(buf, PRODUCER_ID_OFFSET),
            producer_epoch: read_i16_at(buf, PRODUCER_EPOCH_OFFSET),
            base_sequence: self.base_sequence(),
            records_count: read_i32_at(buf, RECORDS_COUNT_OFFSET),
        }
    }

    pub fn records(&self) -> AppResult<&[Record]> {
        self.records
            .get_or_try_init(|| self.load_records())
            .map(|records| records.as_slice())
    }

    fn load_records(&self) -> AppResult<Vec<Record>> {
        let count = self.count()?;
        let payload = self.buffer.slice(RECORDS_OFFSET..);
        let mut data = match self.compression {
            CompressionType::None => payload,
            compression => self.codec.decompress(compression, &payload)?,
        };

        let log_append_time = match self.timestamp_type() {
            TimestampType::LogAppendTime => Some(self.max_timestamp()),
            _ => None,
        };
        let base_offset = self.base_offset();
        let first_timestamp = self.first_timestamp();
        let base_sequence = self.base_sequence();

        let mut records = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            if !data.has_remaining() {
                return Err(AppError::InvalidRecord(format!(
                    "incorrect declared batch size, premature end after {} of {} records",
                    records.len(),
                    count
                )));
            }
            records.push(DefaultRecord::read_from(
                &mut data,
                base_offset,
                first_timestamp,
                base_sequence,
                log_append_time,
            )?);
        }
        if data.has_remaining() {
            return Err(AppError::InvalidRecord(format!(
                "incorrect declared batch size, {} bytes remain after {} records",
                data.remaining(),
                count
            )));
        }
        Ok(records)
    }
}

/// Magic 0 or 1 log entry: a single record, or a compressed wrapper around
/// several inner records.
#[derive(Debug, Clone)]
pub struct LegacyRecordBatch {
    buffer: Bytes,
    magic: i8,
    compression: CompressionType,
    timestamp_type: TimestampType,
    codec: Arc<dyn CompressionCodec>,
    records: OnceCell<Vec<Record>>,
}

impl LegacyRecordBatch {
    fn new(buffer: Bytes, codec: Arc<dyn CompressionCodec>) -> AppResult<Self> {
        let magic = buffer[MAGIC_OFFSET] as i8;
        let min_size = LOG_OVERHEAD + LegacyRecord::record_overhead(magic);
        if buffer.len() < min_size {
            return Err(AppError::CorruptMessage(format!(
                "legacy record size {} is smaller than the minimum record overhead {}",
                buffer.len(),
                min_size
            )));
        }
        let attributes = buffer[LOG_OVERHEAD + LEGACY_ATTRIBUTES_OFFSET] as i8 as i16;
        let compression = CompressionType::from_attributes(attributes)?;
        let timestamp_type = if magic == MAGIC_VALUE_V0 {
            TimestampType::NoTimestampType
        } else {
            TimestampType::from_attributes(attributes)
        };
        Ok(LegacyRecordBatch {
            buffer,
            magic,
            compression,
            timestamp_type,
            codec,
            records: OnceCell::new(),
        })
    }

    /// Offset of the entry itself; the last inner offset for wrappers.
    pub fn last_offset(&self) -> i64 {
        read_i64_at(&self.buffer, OFFSET_OFFSET)
    }

    pub fn base_offset(&self) -> AppResult<i64> {
        if self.compression == CompressionType::None {
            return Ok(self.last_offset());
        }
        let records = self.records()?;
        Ok(records.first().map_or(self.last_offset(), |r| r.offset))
    }

    pub fn count(&self) -> AppResult<usize> {
        if self.compression == CompressionType::None {
            return Ok(1);
        }
        Ok(self.records()?.len())
    }

    pub fn timestamp(&self) -> i64 {
        if self.magic == MAGIC_VALUE_V0 {
            NO_TIMESTAMP
        } else {
            read_i64_at(&self.buffer, LOG_OVERHEAD + LEGACY_TIMESTAMP_OFFSET)
        }
    }

    pub fn checksum(&self) -> u32 {
        read_u32_at(&self.buffer, LOG_OVERHEAD + LEGACY_CRC_OFFSET)
    }

    pub fn compute_checksum(&self) -> u32 {
        LegacyRecord::compute_checksum(&self.buffer[LOG_OVERHEAD..])
    }

    pub fn records(&self) -> AppResult<&[Record]> {
        self.records
            .get_or_try_init(|| self.load_records())
            .map(|records| records.as_slice())
    }

    fn load_records(&self) -> AppResult<Vec<Record>> {
        let mut buffer = self.buffer.clone();
        let wrapper = LegacyEntry::read_from(&mut buffer)?;
        if self.compression == CompressionType::None {
            let (offset, timestamp) = (wrapper.offset, wrapper.timestamp);
            return Ok(vec![wrapper.into_record(offset, timestamp)]);
        }

        let value = wrapper.value.clone().ok_or_else(|| {
            AppError::InvalidRecord("compressed legacy wrapper has a null value".to_string())
        })?;
        let mut inner = self.codec.decompress(self.compression, &value)?;
        let mut entries = Vec::new();
        while inner.has_remaining() {
            let entry = LegacyEntry::read_from(&mut inner)?;
            if entry.magic != self.magic {
                return Err(AppError::InvalidRecord(format!(
                    "inner record magic {} does not match wrapper magic {}",
                    entry.magic, self.magic
                )));
            }
            if entry.compression()? != CompressionType::None {
                return Err(AppError::InvalidRecord(
                    "compressed legacy record has nested compression".to_string(),
                ));
            }
            entries.push(entry);
        }
        let last_inner_offset = match entries.last() {
            Some(entry) => entry.offset,
            None => {
                return Err(AppError::InvalidRecord(
                    "found compressed legacy record with no inner records".to_string(),
                ))
            }
        };

        // magic 1 inner offsets are relative, the wrapper carries the last absolute one
        let absolute_base = if self.magic == MAGIC_VALUE_V1 {
            wrapper.offset.checked_sub(last_inner_offset).ok_or_else(|| {
                AppError::InvalidRecord(format!(
                    "inner offset {} does not fit under wrapper offset {}",
                    last_inner_offset, wrapper.offset
                ))
            })?
        } else {
            0
        };
        let log_append_time = self.timestamp_type == TimestampType::LogAppendTime;

        entries
            .into_iter()
            .map(|entry| -> AppResult<Record> {
                let offset = absolute_base.checked_add(entry.offset).ok_or_else(|| {
                    AppError::InvalidRecord(format!(
                        "inner offset {} overflows wrapper base {}",
                        entry.offset, absolute_base
                    ))
                })?;
                let timestamp = if log_append_time {
                    wrapper.timestamp
                } else {
                    entry.timestamp
                };
                Ok(entry.into_record(offset, timestamp))
            })
            .collect()
    }
}

/// Header setters for an encoded magic 2 batch, rewriting the CRC whenever a
/// covered field changes.
#[derive(Debug)]
pub struct MutableRecordBatch<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MutableRecordBatch<'a> {
    pub fn new(bytes: &'a mut [u8]) -> AppResult<Self> {
        if bytes.len() < RECORD_BATCH_OVERHEAD {
            return Err(AppError::IllegalArgument(format!(
                "{} bytes cannot hold a record batch header",
                bytes.len()
            )));
        }
        let magic = bytes[RB_MAGIC_OFFSET] as i8;
        if magic != MAGIC_VALUE_V2 {
            return Err(AppError::IllegalArgument(format!(
                "header updates require magic 2, found {}",
                magic
            )));
        }
        Ok(MutableRecordBatch { bytes })
    }

    /// Rewrites the base offset so that the last offset becomes `offset`.
    pub fn set_last_offset(&mut self, offset: i64) {
        let delta = read_i32_at(self.bytes, LAST_OFFSET_DELTA_OFFSET) as i64;
        self.put_i64(BASE_OFFSET_OFFSET, offset.saturating_sub(delta));
    }

    pub fn set_partition_leader_epoch(&mut self, epoch: i32) {
        self.bytes[PARTITION_LEADER_EPOCH_OFFSET..PARTITION_LEADER_EPOCH_OFFSET + 4]
            .copy_from_slice(&epoch.to_be_bytes());
    }

    pub fn set_max_timestamp(&mut self, timestamp_type: TimestampType, max_timestamp: i64) {
        let attributes = read_i16_at(self.bytes, ATTRIBUTES_OFFSET);
        let current_max = read_i64_at(self.bytes, MAX_TIMESTAMP_OFFSET);
        if TimestampType::from_attributes(attributes) == timestamp_type
            && current_max == max_timestamp
        {
            return;
        }
        let attributes = (attributes & !TIMESTAMP_TYPE_MASK) | timestamp_type.attribute_bits();
        self.bytes[ATTRIBUTES_OFFSET..ATTRIBUTES_OFFSET + 2].copy_from_slice(&attributes.to_be_bytes());
        self.put_i64(MAX_TIMESTAMP_OFFSET, max_timestamp);
        let crc = crc32c::crc32c(&self.bytes[ATTRIBUTES_OFFSET..]);
        self.bytes[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());
    }

    fn put_i64(&mut self, offset: usize, value: i64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }
}
