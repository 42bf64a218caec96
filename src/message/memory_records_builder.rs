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

//! Write side of the record format.
//!
//! [`RecordBatchBuilder`] appends records into a buffer and finally encodes
//! them as one batch of the configured magic. For magic 2 and for compressed
//! legacy wrappers the header is reserved up front and filled in on close;
//! uncompressed legacy records are written as complete entries right away.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use crate::message::compression::{default_codec, CompressionCodec, CompressionType};
use crate::message::constants::*;
use crate::message::control_record::{
    ControlRecordType, EndTransactionMarker, LeaderChangeMessage,
};
use crate::message::legacy_record::LegacyRecord;
use crate::message::memory_records::MemoryRecords;
use crate::message::record::{DefaultRecord, Record, RecordHeader, SimpleRecord, TimestampType};
use crate::service::BuilderConfig;
use crate::utils::{Clock, SystemClock};
use crate::{AppError, AppResult};

/// Everything a builder needs to know about the batch it produces.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub magic: i8,
    pub compression: CompressionType,
    pub timestamp_type: TimestampType,
    pub base_offset: i64,
    /// Taken from the clock when unset and the timestamp type is log append time.
    pub log_append_time: Option<i64>,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub is_transactional: bool,
    pub is_control_batch: bool,
    pub partition_leader_epoch: i32,
    pub delete_horizon_ms: Option<i64>,
    pub write_limit: usize,
    pub estimated_compression_ratio: f32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BuilderConfig::default())
    }
}

impl BatchOptions {
    /// Magic 2, uncompressed, create time, with the size limits of `builder_config`.
    pub fn from_config(builder_config: &BuilderConfig) -> Self {
        BatchOptions {
            magic: CURRENT_MAGIC_VALUE,
            compression: CompressionType::None,
            timestamp_type: TimestampType::CreateTime,
            base_offset: 0,
            log_append_time: None,
            producer_id: NO_PRODUCER_ID,
            producer_epoch: NO_PRODUCER_EPOCH,
            base_sequence: NO_SEQUENCE,
            is_transactional: false,
            is_control_batch: false,
            partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
            delete_horizon_ms: None,
            write_limit: builder_config.write_limit,
            estimated_compression_ratio: builder_config.estimated_compression_ratio,
        }
    }
}

/// Max timestamp of a built batch and the offset reported alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordsInfo {
    pub max_timestamp: i64,
    pub shallow_offset_of_max_timestamp: i64,
}

#[derive(Debug)]
enum BuilderState {
    Open,
    ClosedForAppends,
    Built(MemoryRecords),
    Aborted,
}

pub struct RecordBatchBuilder {
    buffer: BytesMut,
    initial_position: usize,
    batch_header_size: usize,
    /// uncompressed records of compressed batches, compressed on close
    records_buffer: BytesMut,
    codec: Arc<dyn CompressionCodec>,

    magic: i8,
    compression: CompressionType,
    timestamp_type: TimestampType,
    base_offset: i64,
    log_append_time: i64,
    producer_id: i64,
    producer_epoch: i16,
    base_sequence: i32,
    is_transactional: bool,
    is_control_batch: bool,
    partition_leader_epoch: i32,
    delete_horizon_ms: Option<i64>,
    write_limit: usize,

    estimated_compression_ratio: f32,
    actual_compression_ratio: f32,
    uncompressed_records_size: usize,
    num_records: usize,
    last_offset: Option<i64>,
    base_timestamp: Option<i64>,
    max_timestamp: i64,
    offset_of_max_timestamp: i64,
    state: BuilderState,
}

impl std::fmt::Debug for RecordBatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBatchBuilder")
            .field("magic", &self.magic)
            .field("compression", &self.compression)
            .field("base_offset", &self.base_offset)
            .field("num_records", &self.num_records)
            .field("state", &self.state)
            .finish()
    }
}

impl RecordBatchBuilder {
    pub fn new(options: BatchOptions) -> AppResult<Self> {
        Self::with_buffer(BytesMut::new(), options)
    }

    pub fn with_buffer(buffer: BytesMut, options: BatchOptions) -> AppResult<Self> {
        Self::with_collaborators(buffer, options, default_codec(), &SystemClock)
    }

    /// Appends the batch after whatever `buffer` already holds.
    pub fn with_collaborators(
        mut buffer: BytesMut,
        options: BatchOptions,
        codec: Arc<dyn CompressionCodec>,
        clock: &dyn Clock,
    ) -> AppResult<Self> {
        Self::validate_options(&options)?;

        let initial_position = buffer.len();
        let batch_header_size = Self::header_size(options.magic, options.compression);
        buffer.put_bytes(0, batch_header_size);

        let log_append_time = match options.timestamp_type {
            TimestampType::LogAppendTime => options
                .log_append_time
                .unwrap_or_else(|| clock.milliseconds()),
            _ => NO_TIMESTAMP,
        };

        Ok(RecordBatchBuilder {
            buffer,
            initial_position,
            batch_header_size,
            records_buffer: BytesMut::new(),
            codec,
            magic: options.magic,
            compression: options.compression,
            timestamp_type: options.timestamp_type,
            base_offset: options.base_offset,
            log_append_time,
            producer_id: options.producer_id,
            producer_epoch: options.producer_epoch,
            base_sequence: options.base_sequence,
            is_transactional: options.is_transactional,
            is_control_batch: options.is_control_batch,
            partition_leader_epoch: options.partition_leader_epoch,
            delete_horizon_ms: options.delete_horizon_ms,
            write_limit: options.write_limit,
            estimated_compression_ratio: options.estimated_compression_ratio,
            actual_compression_ratio: 1.0,
            uncompressed_records_size: 0,
            num_records: 0,
            last_offset: None,
            // record timestamps of a batch with a delete horizon are relative to it
            base_timestamp: options.delete_horizon_ms,
            max_timestamp: NO_TIMESTAMP,
            offset_of_max_timestamp: -1,
            state: BuilderState::Open,
        })
    }

    fn header_size(magic: i8, compression: CompressionType) -> usize {
        if magic >= MAGIC_VALUE_V2 {
            RECORD_BATCH_OVERHEAD
        } else if compression != CompressionType::None {
            LOG_OVERHEAD + LegacyRecord::record_overhead(magic)
        } else {
            0
        }
    }

    fn validate_options(options: &BatchOptions) -> AppResult<()> {
        let magic = options.magic;
        if !(MAGIC_VALUE_V0..=MAGIC_VALUE_V2).contains(&magic) {
            return Err(AppError::IllegalArgument(format!(
                "unsupported magic value {}",
                magic
            )));
        }
        if magic > MAGIC_VALUE_V0 && options.timestamp_type == TimestampType::NoTimestampType {
            return Err(AppError::IllegalArgument(format!(
                "timestamp type must be set for magic {}",
                magic
            )));
        }
        if magic < MAGIC_VALUE_V2 {
            if options.is_transactional {
                return Err(AppError::IllegalArgument(format!(
                    "transactional records are not supported for magic {}",
                    magic
                )));
            }
            if options.is_control_batch {
                return Err(AppError::IllegalArgument(format!(
                    "control records are not supported for magic {}",
                    magic
                )));
            }
            if options.delete_horizon_ms.is_some() {
                return Err(AppError::IllegalArgument(format!(
                    "delete horizon timestamp is not supported for magic {}",
                    magic
                )));
            }
        }
        options.compression.ensure_supported_by(magic)?;
        Self::validate_producer_identity(
            magic,
            options.producer_id,
            options.producer_epoch,
            options.base_sequence,
            options.is_control_batch,
        )
    }

    fn validate_producer_identity(
        magic: i8,
        producer_id: i64,
        producer_epoch: i16,
        base_sequence: i32,
        is_control_batch: bool,
    ) -> AppResult<()> {
        if producer_id == NO_PRODUCER_ID {
            return Ok(());
        }
        if producer_epoch == NO_PRODUCER_EPOCH {
            return Err(AppError::IllegalArgument(
                "invalid negative producer epoch".to_string(),
            ));
        }
        if base_sequence < 0 && !is_control_batch {
            return Err(AppError::IllegalArgument(
                "invalid negative sequence number used".to_string(),
            ));
        }
        if magic < MAGIC_VALUE_V2 {
            return Err(AppError::IllegalArgument(format!(
                "idempotent messages are not supported for magic {}",
                magic
            )));
        }
        Ok(())
    }

    /// Replaces the producer identity of a batch that has not been closed yet.
    pub fn set_producer_state(
        &mut self,
        producer_id: i64,
        producer_epoch: i16,
        base_sequence: i32,
        is_transactional: bool,
    ) -> AppResult<()> {
        if !matches!(self.state, BuilderState::Open) {
            return Err(AppError::IllegalState(
                "trying to set producer state of an already closed batch".to_string(),
            ));
        }
        Self::validate_producer_identity(
            self.magic,
            producer_id,
            producer_epoch,
            base_sequence,
            self.is_control_batch,
        )?;
        self.producer_id = producer_id;
        self.producer_epoch = producer_epoch;
        self.base_sequence = base_sequence;
        self.is_transactional = is_transactional;
        Ok(())
    }

    /// Sets the offset written as the last offset of the batch.
    pub fn override_last_offset(&mut self, last_offset: i64) -> AppResult<()> {
        if matches!(self.state, BuilderState::Built(_)) {
            return Err(AppError::IllegalState(
                "cannot override the last offset after the records have been built".to_string(),
            ));
        }
        self.last_offset = Some(last_offset);
        Ok(())
    }

    pub fn magic(&self) -> i8 {
        self.magic
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression
    }

    pub fn base_offset(&self) -> i64 {
        self.base_offset
    }

    pub fn producer_id(&self) -> i64 {
        self.producer_id
    }

    pub fn producer_epoch(&self) -> i16 {
        self.producer_epoch
    }

    pub fn base_sequence(&self) -> i32 {
        self.base_sequence
    }

    pub fn is_transactional(&self) -> bool {
        self.is_transactional
    }

    pub fn is_control_batch(&self) -> bool {
        self.is_control_batch
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn initial_position(&self) -> usize {
        self.initial_position
    }

    /// The underlying buffer, including any bytes that preceded this batch.
    pub fn buffer(&self) -> &BytesMut {
        &self.buffer
    }

    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self.state, BuilderState::Open)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.state, BuilderState::Aborted)
    }

    pub fn next_sequential_offset(&self) -> i64 {
        self.last_offset.map_or(self.base_offset, |offset| offset + 1)
    }

    pub fn compression_ratio(&self) -> f32 {
        self.actual_compression_ratio
    }

    pub fn uncompressed_bytes_written(&self) -> usize {
        self.batch_header_size + self.uncompressed_records_size
    }

    /// Exact once built; before that the compressed size is an estimate.
    pub fn estimated_size_in_bytes(&self) -> usize {
        if let BuilderState::Built(ref records) = self.state {
            return records.size_in_bytes();
        }
        if self.compression == CompressionType::None {
            self.batch_header_size + self.uncompressed_records_size
        } else {
            let estimated = self.uncompressed_records_size as f32
                * self.estimated_compression_ratio
                * COMPRESSION_RATE_ESTIMATION_FACTOR;
            self.batch_header_size + estimated as usize
        }
    }

    pub fn set_estimated_compression_ratio(&mut self, ratio: f32) {
        self.estimated_compression_ratio = ratio;
    }

    fn ensure_open_for_append(&self) -> AppResult<()> {
        match self.state {
            BuilderState::Open => Ok(()),
            BuilderState::Aborted => Err(AppError::IllegalState(
                "tried to append a record, but the builder has already been aborted".to_string(),
            )),
            _ => Err(AppError::IllegalState(
                "tried to append a record, but the builder is closed for record appends"
                    .to_string(),
            )),
        }
    }

    /// Appends with the next sequential offset and returns that offset.
    pub fn append(&mut self, record: &SimpleRecord) -> AppResult<i64> {
        let offset = self.next_sequential_offset();
        self.append_with_offset(
            offset,
            record.timestamp,
            record.key.as_deref(),
            record.value.as_deref(),
            &record.headers,
        )?;
        Ok(offset)
    }

    /// Copies a decoded record, keeping its offset.
    pub fn append_record(&mut self, record: &Record) -> AppResult<i64> {
        self.append_with_offset(
            record.offset,
            record.timestamp,
            record.key.as_deref(),
            record.value.as_deref(),
            &record.headers,
        )?;
        Ok(record.offset)
    }

    pub fn append_with_offset(
        &mut self,
        offset: i64,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> AppResult<()> {
        self.append_internal(offset, false, timestamp, key, value, headers)
    }

    fn append_internal(
        &mut self,
        offset: i64,
        is_control_record: bool,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> AppResult<()> {
        self.ensure_open_for_append()?;
        if is_control_record != self.is_control_batch {
            return Err(AppError::IllegalArgument(if is_control_record {
                "control records can only be appended to control batches".to_string()
            } else {
                "cannot append a non-control record to a control batch".to_string()
            }));
        }
        if let Some(last_offset) = self.last_offset {
            if offset <= last_offset {
                return Err(AppError::IllegalArgument(format!(
                    "illegal offset {} following previous offset {} (offsets must increase monotonically)",
                    offset, last_offset
                )));
            }
        }
        let delta = offset.checked_sub(self.base_offset);
        if offset < self.base_offset || delta.map_or(true, |delta| delta > i32::MAX as i64) {
            return Err(AppError::IllegalArgument(format!(
                "offset {} cannot be expressed as a delta from base offset {}",
                offset, self.base_offset
            )));
        }
        // magic 0 has no timestamp field
        if self.magic > MAGIC_VALUE_V0 && timestamp < 0 && timestamp != NO_TIMESTAMP {
            return Err(AppError::IllegalArgument(format!(
                "invalid negative timestamp {}",
                timestamp
            )));
        }
        if self.magic < MAGIC_VALUE_V2 && !headers.is_empty() {
            return Err(AppError::IllegalArgument(format!(
                "magic v{} does not support record headers",
                self.magic
            )));
        }

        if self.magic >= MAGIC_VALUE_V2 {
            self.append_default_record(offset, timestamp, key, value, headers)
        } else {
            self.append_legacy_record(offset, timestamp, key, value)
        }
    }

    fn ensure_fits(&self, record_size: usize) -> AppResult<()> {
        let total = self.batch_header_size + self.uncompressed_records_size + record_size;
        if total > MAX_SIZE_IN_BYTES {
            return Err(AppError::IllegalArgument(format!(
                "appending {} bytes would grow the batch to {} bytes, above the maximum {}",
                record_size, total, MAX_SIZE_IN_BYTES
            )));
        }
        Ok(())
    }

    fn append_default_record(
        &mut self,
        offset: i64,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> AppResult<()> {
        let base_timestamp = *self.base_timestamp.get_or_insert(timestamp);
        let offset_delta = (offset - self.base_offset) as i32;
        let timestamp_delta = timestamp - base_timestamp;
        let record_size =
            DefaultRecord::size_in_bytes(offset_delta, timestamp_delta, key, value, headers);
        self.ensure_fits(record_size)?;

        let target = if self.compression == CompressionType::None {
            &mut self.buffer
        } else {
            &mut self.records_buffer
        };
        let written =
            DefaultRecord::write_to(target, offset_delta, timestamp_delta, key, value, headers);
        self.record_written(offset, timestamp, written);
        Ok(())
    }

    fn append_legacy_record(
        &mut self,
        offset: i64,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> AppResult<()> {
        let timestamp = match self.timestamp_type {
            TimestampType::LogAppendTime => self.log_append_time,
            _ => timestamp,
        };
        let record_size = LOG_OVERHEAD + LegacyRecord::record_size(self.magic, key, value);
        self.ensure_fits(record_size)?;

        let written = if self.compression == CompressionType::None {
            LegacyRecord::write_entry(
                &mut self.buffer,
                offset,
                self.magic,
                timestamp,
                key,
                value,
                CompressionType::None,
                self.timestamp_type,
            )
        } else {
            // magic 1 inner offsets are relative to the wrapper
            let inner_offset = if self.magic > MAGIC_VALUE_V0 {
                offset - self.base_offset
            } else {
                offset
            };
            LegacyRecord::write_entry(
                &mut self.records_buffer,
                inner_offset,
                self.magic,
                timestamp,
                key,
                value,
                CompressionType::None,
                self.timestamp_type,
            )
        };
        let timestamp = if self.magic == MAGIC_VALUE_V0 {
            NO_TIMESTAMP
        } else {
            timestamp
        };
        self.record_written(offset, timestamp, written);
        Ok(())
    }

    fn record_written(&mut self, offset: i64, timestamp: i64, size: usize) {
        self.num_records += 1;
        self.uncompressed_records_size += size;
        self.last_offset = Some(offset);
        if self.magic > MAGIC_VALUE_V0 && timestamp > self.max_timestamp {
            self.max_timestamp = timestamp;
            self.offset_of_max_timestamp = offset;
        }
        trace!(
            "appended record at offset {} ({} bytes), batch now {} records",
            offset,
            size,
            self.num_records
        );
    }

    pub fn append_control_record(
        &mut self,
        timestamp: i64,
        control_type: ControlRecordType,
        value: &[u8],
    ) -> AppResult<i64> {
        let offset = self.next_sequential_offset();
        let key = control_type.record_key();
        self.append_internal(offset, true, timestamp, Some(&key), Some(value), &[])?;
        Ok(offset)
    }

    pub fn append_end_txn_marker(
        &mut self,
        timestamp: i64,
        marker: &EndTransactionMarker,
    ) -> AppResult<i64> {
        if self.magic < MAGIC_VALUE_V2 {
            return Err(AppError::IllegalArgument(format!(
                "end transaction markers are not supported for magic {}",
                self.magic
            )));
        }
        if self.producer_id == NO_PRODUCER_ID {
            return Err(AppError::IllegalArgument(
                "end transaction marker requires a valid producer id".to_string(),
            ));
        }
        if !self.is_transactional {
            return Err(AppError::IllegalArgument(
                "end transaction marker depends on the batch transactional flag being enabled"
                    .to_string(),
            ));
        }
        let value = marker.serialize_value();
        self.append_control_record(timestamp, marker.control_type(), &value)
    }

    pub fn append_leader_change_message(
        &mut self,
        timestamp: i64,
        message: &LeaderChangeMessage,
    ) -> AppResult<i64> {
        if self.magic < MAGIC_VALUE_V2 {
            return Err(AppError::IllegalArgument(format!(
                "leader change messages are not supported for magic {}",
                self.magic
            )));
        }
        if self.partition_leader_epoch == NO_PARTITION_LEADER_EPOCH {
            return Err(AppError::IllegalArgument(
                "partition leader epoch must be valid, but got -1".to_string(),
            ));
        }
        let value = message.serialize();
        self.append_control_record(timestamp, ControlRecordType::LeaderChange, &value)
    }

    /// Whether a record of this shape still fits under the write limit. An empty
    /// batch always has room, so a single oversized record is never stuck.
    pub fn has_room_for(
        &self,
        timestamp: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> bool {
        if self.is_full() {
            return false;
        }
        if self.num_records == 0 {
            return true;
        }
        let record_size = if self.magic < MAGIC_VALUE_V2 {
            LOG_OVERHEAD + LegacyRecord::record_size(self.magic, key, value)
        } else {
            let next_offset_delta = (self.next_sequential_offset() - self.base_offset) as i32;
            let timestamp_delta = self.base_timestamp.map_or(0, |base| timestamp - base);
            DefaultRecord::size_in_bytes(next_offset_delta, timestamp_delta, key, value, headers)
        };
        self.write_limit >= self.estimated_size_in_bytes() + record_size
    }

    pub fn is_full(&self) -> bool {
        self.is_closed()
            || (self.num_records > 0 && self.write_limit <= self.estimated_size_in_bytes())
    }

    /// Stops accepting appends without encoding the header yet.
    pub fn close_for_record_appends(&mut self) {
        if let BuilderState::Open = self.state {
            self.state = BuilderState::ClosedForAppends;
        }
    }

    /// Drops everything appended and moves the buffer back to where the batch
    /// started.
    pub fn abort(&mut self) {
        self.buffer.truncate(self.initial_position);
        self.records_buffer.clear();
        self.state = BuilderState::Aborted;
        debug!(
            "aborted batch at base offset {} with {} records",
            self.base_offset, self.num_records
        );
    }

    pub fn close(&mut self) -> AppResult<()> {
        match self.state {
            BuilderState::Aborted => {
                return Err(AppError::IllegalState(
                    "cannot close the builder as it has already been aborted".to_string(),
                ))
            }
            BuilderState::Built(_) => return Ok(()),
            _ => {}
        }
        if self.is_transactional && self.producer_id == NO_PRODUCER_ID {
            return Err(AppError::IllegalArgument(
                "cannot write transactional messages without a valid producer id".to_string(),
            ));
        }
        self.close_for_record_appends();

        if self.num_records == 0 {
            self.buffer.truncate(self.initial_position);
            self.state = BuilderState::Built(MemoryRecords::with_codec(
                bytes::Bytes::new(),
                self.codec.clone(),
            ));
            return Ok(());
        }

        if self.magic >= MAGIC_VALUE_V2 {
            self.write_default_batch()?;
        } else if self.compression != CompressionType::None {
            self.write_legacy_compressed_wrapper()?;
        }

        let batch = self.buffer.split_off(self.initial_position).freeze();
        debug!(
            "built magic {} batch with {} records at base offset {}, {} bytes, compression ratio {}",
            self.magic,
            self.num_records,
            self.base_offset,
            batch.len(),
            self.actual_compression_ratio
        );
        self.state = BuilderState::Built(MemoryRecords::with_codec(batch, self.codec.clone()));
        Ok(())
    }

    /// Closes the builder and returns the encoded batch.
    pub fn build(&mut self) -> AppResult<MemoryRecords> {
        if self.is_aborted() {
            return Err(AppError::IllegalState(
                "attempting to build an aborted record batch".to_string(),
            ));
        }
        self.close()?;
        match self.state {
            BuilderState::Built(ref records) => Ok(records.clone()),
            _ => Err(AppError::IllegalState(
                "record batch was not built after close".to_string(),
            )),
        }
    }

    /// Max timestamp and the offset to report with it, following the rules of
    /// each magic.
    pub fn info(&self) -> RecordsInfo {
        if self.magic == MAGIC_VALUE_V0 {
            return RecordsInfo {
                max_timestamp: NO_TIMESTAMP,
                shallow_offset_of_max_timestamp: -1,
            };
        }
        let last_offset = self.last_offset.unwrap_or(self.base_offset);
        // batches and wrappers are addressed by their last offset
        let shallow = self.magic >= MAGIC_VALUE_V2 || self.compression != CompressionType::None;
        if self.timestamp_type == TimestampType::LogAppendTime {
            return RecordsInfo {
                max_timestamp: self.log_append_time,
                shallow_offset_of_max_timestamp: if shallow {
                    last_offset
                } else {
                    self.base_offset
                },
            };
        }
        if self.max_timestamp == NO_TIMESTAMP {
            return RecordsInfo {
                max_timestamp: NO_TIMESTAMP,
                shallow_offset_of_max_timestamp: last_offset,
            };
        }
        RecordsInfo {
            max_timestamp: self.max_timestamp,
            shallow_offset_of_max_timestamp: if shallow {
                last_offset
            } else {
                self.offset_of_max_timestamp
            },
        }
    }

    fn compress_records(&mut self) -> AppResult<bytes::Bytes> {
        let compressed = self.codec.compress(self.compression, &self.records_buffer)?;
        if self.uncompressed_records_size > 0 {
            self.actual_compression_ratio =
                compressed.len() as f32 / self.uncompressed_records_size as f32;
        }
        self.records_buffer.clear();
        Ok(compressed)
    }

    fn write_default_batch(&mut self) -> AppResult<()> {
        if self.compression != CompressionType::None {
            let compressed = self.compress_records()?;
            self.buffer.put_slice(&compressed);
        }
        let start = self.initial_position;
        let size = self.buffer.len() - start;
        let last_offset = self.last_offset.unwrap_or(self.base_offset);
        let max_timestamp = if self.timestamp_type == TimestampType::LogAppendTime {
            self.log_append_time
        } else {
            self.max_timestamp
        };
        let first_timestamp = self.base_timestamp.unwrap_or(NO_TIMESTAMP);

        let mut attributes = self.compression.id() & COMPRESSION_CODEC_MASK;
        attributes |= self.timestamp_type.attribute_bits();
        if self.is_transactional {
            attributes |= TRANSACTIONAL_FLAG_MASK;
        }
        if self.is_control_batch {
            attributes |= CONTROL_FLAG_MASK;
        }
        if self.delete_horizon_ms.is_some() {
            attributes |= DELETE_HORIZON_FLAG_MASK;
        }

        let mut header = BytesMut::with_capacity(RECORD_BATCH_OVERHEAD);
        header.put_i64(self.base_offset);
        header.put_i32((size - LOG_OVERHEAD) as i32);
        header.put_i32(self.partition_leader_epoch);
        header.put_i8(MAGIC_VALUE_V2);
        header.put_u32(0);
        header.put_i16(attributes);
        header.put_i32((last_offset - self.base_offset) as i32);
        header.put_i64(first_timestamp);
        header.put_i64(max_timestamp);
        header.put_i64(self.producer_id);
        header.put_i16(self.producer_epoch);
        header.put_i32(self.base_sequence);
        header.put_i32(self.num_records as i32);
        self.buffer[start..start + RECORD_BATCH_OVERHEAD].copy_from_slice(&header);

        let crc = crc32c::crc32c(&self.buffer[start + ATTRIBUTES_OFFSET..]);
        self.buffer[start + CRC_OFFSET..start + CRC_OFFSET + CRC_LENGTH]
            .copy_from_slice(&crc.to_be_bytes());
        Ok(())
    }

    fn write_legacy_compressed_wrapper(&mut self) -> AppResult<()> {
        let compressed = self.compress_records()?;
        let last_offset = self.last_offset.unwrap_or(self.base_offset);
        let timestamp = match self.timestamp_type {
            TimestampType::LogAppendTime => self.log_append_time,
            _ => self.max_timestamp,
        };
        let mut wrapper = BytesMut::with_capacity(self.batch_header_size + compressed.len());
        LegacyRecord::write_entry(
            &mut wrapper,
            last_offset,
            self.magic,
            timestamp,
            None,
            Some(&compressed),
            self.compression,
            self.timestamp_type,
        );
        self.buffer.truncate(self.initial_position);
        self.buffer.put_slice(&wrapper);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rstest::rstest;

    use super::*;

    fn options() -> BatchOptions {
        BatchOptions::default()
    }

    fn value_record(value: &[u8]) -> SimpleRecord {
        SimpleRecord::new(1_000, None, Some(value))
    }

    #[test]
    fn test_offsets_must_increase() {
        let mut builder = RecordBatchBuilder::new(options()).unwrap();
        builder.append_with_offset(0, 1_000, None, Some(b"a"), &[]).unwrap();
        builder.append_with_offset(5, 1_000, None, Some(b"b"), &[]).unwrap();
        assert_eq!(builder.next_sequential_offset(), 6);
        let result = builder.append_with_offset(5, 1_000, None, Some(b"c"), &[]);
        assert!(matches!(result, Err(AppError::IllegalArgument(_))));
        let result = builder.append_with_offset(3, 1_000, None, Some(b"c"), &[]);
        assert!(matches!(result, Err(AppError::IllegalArgument(_))));

        let records = builder.build().unwrap();
        let offsets: Vec<i64> = records.records().unwrap().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 5]);
    }

    #[test]
    fn test_append_after_build_or_abort() {
        let mut builder = RecordBatchBuilder::new(options()).unwrap();
        builder.append(&value_record(b"a")).unwrap();
        builder.build().unwrap();
        assert!(builder.is_closed());
        assert!(builder.is_full());
        assert!(matches!(
            builder.append(&value_record(b"b")),
            Err(AppError::IllegalState(_))
        ));

        let mut builder = RecordBatchBuilder::new(options()).unwrap();
        builder.append(&value_record(b"a")).unwrap();
        builder.abort();
        assert!(matches!(
            builder.append(&value_record(b"b")),
            Err(AppError::IllegalState(_))
        ));
        assert!(matches!(builder.build(), Err(AppError::IllegalState(_))));
        assert!(matches!(builder.close(), Err(AppError::IllegalState(_))));
    }

    #[rstest]
    #[case(MAGIC_VALUE_V1, CompressionType::None)]
    #[case(MAGIC_VALUE_V1, CompressionType::Gzip)]
    #[case(MAGIC_VALUE_V2, CompressionType::None)]
    #[case(MAGIC_VALUE_V2, CompressionType::Lz4)]
    fn test_abort_restores_buffer_position(#[case] magic: i8, #[case] compression: CompressionType) {
        let mut buffer = BytesMut::new();
        buffer.put_slice(b"earlier bytes");
        let initial = buffer.len();

        let options = BatchOptions {
            magic,
            compression,
            ..options()
        };
        let mut builder = RecordBatchBuilder::with_buffer(buffer, options).unwrap();
        builder.append(&value_record(b"value")).unwrap();
        builder.abort();
        assert!(builder.is_aborted());
        assert_eq!(builder.buffer().len(), initial);
        assert_eq!(builder.into_buffer().as_ref(), b"earlier bytes");
    }

    #[rstest]
    #[case(MAGIC_VALUE_V0)]
    #[case(MAGIC_VALUE_V1)]
    #[case(MAGIC_VALUE_V2)]
    fn test_estimated_size_is_monotonic_and_exact(#[case] magic: i8) {
        let options = BatchOptions {
            magic,
            ..options()
        };
        let mut builder = RecordBatchBuilder::new(options).unwrap();
        let mut rng = rand::thread_rng();
        let mut previous = builder.estimated_size_in_bytes();
        for i in 0..50 {
            let len = rng.gen_range(0..64);
            let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            builder
                .append(&SimpleRecord::new(1_000 + i, None, Some(&value)))
                .unwrap();
            let estimated = builder.estimated_size_in_bytes();
            assert!(estimated > previous);
            previous = estimated;
        }
        let records = builder.build().unwrap();
        assert_eq!(records.size_in_bytes(), previous);
        assert_eq!(builder.estimated_size_in_bytes(), previous);
        assert_eq!(builder.compression_ratio(), 1.0);
    }

    #[test]
    fn test_compressed_estimate_and_ratio() {
        let options = BatchOptions {
            compression: CompressionType::Gzip,
            ..options()
        };
        let mut builder = RecordBatchBuilder::new(options).unwrap();
        let value = vec![b'x'; 1_000];
        builder.append(&value_record(&value)).unwrap();
        let uncompressed = builder.uncompressed_bytes_written();
        assert!(builder.estimated_size_in_bytes() > uncompressed);

        let records = builder.build().unwrap();
        assert!(records.size_in_bytes() < uncompressed);
        assert!(builder.compression_ratio() < 1.0);
        assert_eq!(builder.estimated_size_in_bytes(), records.size_in_bytes());
    }

    #[test]
    fn test_write_limit_zero_admits_one_record() {
        let options = BatchOptions {
            write_limit: 0,
            ..options()
        };
        let mut builder = RecordBatchBuilder::new(options).unwrap();
        assert!(!builder.is_full());
        assert!(builder.has_room_for(1_000, None, Some(b"value"), &[]));
        builder.append(&value_record(b"value")).unwrap();
        assert!(builder.is_full());
        assert!(!builder.has_room_for(1_000, None, Some(b"value"), &[]));
        assert_eq!(builder.build().unwrap().records().unwrap().len(), 1);
    }

    #[test]
    fn test_has_room_for_respects_limit() {
        let options = BatchOptions {
            write_limit: 200,
            ..options()
        };
        let mut builder = RecordBatchBuilder::new(options).unwrap();
        builder.append(&value_record(&[1u8; 50])).unwrap();
        assert!(builder.has_room_for(1_000, None, Some(&[1u8; 50]), &[]));
        assert!(!builder.has_room_for(1_000, None, Some(&[1u8; 200]), &[]));
    }

    #[rstest]
    #[case(BatchOptions { magic: 1, is_transactional: true, ..options() })]
    #[case(BatchOptions { magic: 1, is_control_batch: true, ..options() })]
    #[case(BatchOptions { magic: 1, compression: CompressionType::Zstd, ..options() })]
    #[case(BatchOptions { magic: 0, delete_horizon_ms: Some(10), ..options() })]
    #[case(BatchOptions { magic: 1, timestamp_type: TimestampType::NoTimestampType, ..options() })]
    #[case(BatchOptions { magic: 1, producer_id: 1, producer_epoch: 0, base_sequence: 0, ..options() })]
    #[case(BatchOptions { producer_id: 1, producer_epoch: NO_PRODUCER_EPOCH, base_sequence: 0, ..options() })]
    #[case(BatchOptions { producer_id: 1, producer_epoch: 0, base_sequence: -1, ..options() })]
    #[case(BatchOptions { magic: 3, ..options() })]
    fn test_illegal_construction(#[case] options: BatchOptions) {
        assert!(matches!(
            RecordBatchBuilder::new(options),
            Err(AppError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_transactional_without_producer_id_fails_at_close() {
        let options = BatchOptions {
            is_transactional: true,
            ..options()
        };
        let mut builder = RecordBatchBuilder::new(options).unwrap();
        builder.append(&value_record(b"value")).unwrap();
        assert!(matches!(builder.build(), Err(AppError::IllegalArgument(_))));
    }

    #[test]
    fn test_end_marker_requirements() {
        let marker = EndTransactionMarker::new(ControlRecordType::Abort, 1).unwrap();

        // transactional but not a control batch
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            producer_id: 1,
            producer_epoch: 0,
            base_sequence: 0,
            is_transactional: true,
            ..options()
        })
        .unwrap();
        assert!(matches!(
            builder.append_end_txn_marker(1_000, &marker),
            Err(AppError::IllegalArgument(_))
        ));

        // control batch without the transactional flag
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            producer_id: 1,
            producer_epoch: 0,
            is_control_batch: true,
            ..options()
        })
        .unwrap();
        assert!(matches!(
            builder.append_end_txn_marker(1_000, &marker),
            Err(AppError::IllegalArgument(_))
        ));

        // no producer id
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            is_transactional: true,
            is_control_batch: true,
            ..options()
        })
        .unwrap();
        assert!(matches!(
            builder.append_end_txn_marker(1_000, &marker),
            Err(AppError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_control_and_data_records_do_not_mix() {
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            is_control_batch: true,
            ..options()
        })
        .unwrap();
        assert!(matches!(
            builder.append(&value_record(b"data")),
            Err(AppError::IllegalArgument(_))
        ));

        let mut builder = RecordBatchBuilder::new(options()).unwrap();
        assert!(matches!(
            builder.append_control_record(1_000, ControlRecordType::Commit, b"value"),
            Err(AppError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_leader_change_message() {
        let message = LeaderChangeMessage {
            leader_id: 1,
            voters: vec![1, 2, 3],
            granting_voters: vec![1, 2],
        };

        let mut builder = RecordBatchBuilder::new(BatchOptions {
            is_control_batch: true,
            ..options()
        })
        .unwrap();
        assert!(matches!(
            builder.append_leader_change_message(1_000, &message),
            Err(AppError::IllegalArgument(_))
        ));

        let mut builder = RecordBatchBuilder::new(BatchOptions {
            is_control_batch: true,
            partition_leader_epoch: 4,
            ..options()
        })
        .unwrap();
        builder.append_leader_change_message(1_000, &message).unwrap();
        let records = builder.build().unwrap();
        let record = &records.records().unwrap()[0];
        assert_eq!(
            LeaderChangeMessage::deserialize_record(record).unwrap(),
            message
        );
    }

    #[test]
    fn test_legacy_rejects_headers_and_negative_timestamps() {
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            magic: MAGIC_VALUE_V1,
            ..options()
        })
        .unwrap();
        let headers = vec![RecordHeader::new("h", Some("v"))];
        assert!(matches!(
            builder.append(&value_record(b"v").with_headers(headers)),
            Err(AppError::IllegalArgument(_))
        ));
        assert!(matches!(
            builder.append(&SimpleRecord::new(-5, None, Some(b"v"))),
            Err(AppError::IllegalArgument(_))
        ));
        builder
            .append(&SimpleRecord::new(NO_TIMESTAMP, None, Some(b"v")))
            .unwrap();
    }

    #[test]
    fn test_magic_v0_ignores_negative_timestamps() {
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            magic: MAGIC_VALUE_V0,
            timestamp_type: TimestampType::NoTimestampType,
            ..options()
        })
        .unwrap();
        builder
            .append(&SimpleRecord::new(-5, None, Some(b"v")))
            .unwrap();
        let records = builder.build().unwrap();
        let record = &records.records().unwrap()[0];
        assert_eq!(record.timestamp, NO_TIMESTAMP);
        assert_eq!(record.value.as_deref(), Some(&b"v"[..]));
    }

    #[rstest]
    #[case(MAGIC_VALUE_V0, CompressionType::None, NO_TIMESTAMP, -1)]
    #[case(MAGIC_VALUE_V1, CompressionType::None, 1_300, 11)]
    #[case(MAGIC_VALUE_V1, CompressionType::Gzip, 1_300, 12)]
    #[case(MAGIC_VALUE_V2, CompressionType::None, 1_300, 12)]
    fn test_info(
        #[case] magic: i8,
        #[case] compression: CompressionType,
        #[case] max_timestamp: i64,
        #[case] offset: i64,
    ) {
        let mut builder = RecordBatchBuilder::new(BatchOptions {
            magic,
            compression,
            base_offset: 10,
            ..options()
        })
        .unwrap();
        for timestamp in [1_000, 1_300, 1_100] {
            builder
                .append(&SimpleRecord::new(timestamp, None, Some(b"v")))
                .unwrap();
        }
        builder.build().unwrap();
        let info = builder.info();
        assert_eq!(info.max_timestamp, max_timestamp);
        assert_eq!(info.shallow_offset_of_max_timestamp, offset);
    }

    #[test]
    fn test_producer_state_and_last_offset_override() {
        let mut builder = RecordBatchBuilder::new(options()).unwrap();
        builder.set_producer_state(9, 2, 100, false).unwrap();
        builder.append(&value_record(b"a")).unwrap();
        builder.override_last_offset(20).unwrap();
        assert_eq!(builder.num_records(), 1);
        let records = builder.build().unwrap();
        let batch = records.batches().next().unwrap().unwrap();
        assert_eq!(batch.producer_id().unwrap(), 9);
        assert_eq!(batch.base_sequence().unwrap(), 100);
        assert_eq!(batch.last_offset(), 20);

        assert!(matches!(
            builder.set_producer_state(1, 1, 1, false),
            Err(AppError::IllegalState(_))
        ));
        assert!(matches!(
            builder.override_last_offset(30),
            Err(AppError::IllegalState(_))
        ));
    }

    #[test]
    fn test_append_record_copies_decoded_record() {
        let source = MemoryRecords::with_records(
            MAGIC_VALUE_V2,
            7,
            CompressionType::None,
            TimestampType::CreateTime,
            &[SimpleRecord::new(1_000, Some(b"k"), Some(b"v"))],
        )
        .unwrap();
        let record = source.records().unwrap().remove(0);

        let mut builder = RecordBatchBuilder::new(BatchOptions {
            base_offset: 7,
            ..options()
        })
        .unwrap();
        assert_eq!(builder.append_record(&record).unwrap(), 7);
        let copied = builder.build().unwrap().records().unwrap().remove(0);
        assert_eq!(copied, record);
    }

    #[test]
    fn test_empty_build() {
        let mut buffer = BytesMut::new();
        buffer.put_slice(b"prefix");
        let mut builder = RecordBatchBuilder::with_buffer(buffer, options()).unwrap();
        let records = builder.build().unwrap();
        assert!(records.is_empty());
        assert_eq!(builder.buffer().as_ref(), b"prefix");
    }
}
