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

//! Message Format Constants
//!
//! This module defines the constants used in the message format implementation.
//! It includes offsets and lengths for the log entry envelope, the v2 record
//! batch header, the legacy (v0/v1) record layout, and the sentinel values used
//! throughout the record log.
//!
//! # Log Entry Format
//!
//! Every entry in a log file, whatever its generation, starts with:
//! - 8-byte offset (base offset for v2, record offset for v0/v1)
//! - 4-byte size (bytes following the size field)
//! - 4 bytes that are either the partition leader epoch (v2) or the record CRC (v0/v1)
//! - 1-byte magic
//!
//! # Batch Format (magic 2)
//!
//! - Base offset (8 bytes)
//! - Length (4 bytes)
//! - Partition leader epoch (4 bytes)
//! - Magic byte (1 byte)
//! - CRC (4 bytes, CRC-32C from attributes to the end of the batch)
//! - Attributes (2 bytes)
//! - Last offset delta (4 bytes)
//! - First timestamp (8 bytes)
//! - Max timestamp (8 bytes)
//! - Producer ID (8 bytes)
//! - Producer epoch (2 bytes)
//! - Base sequence (4 bytes)
//! - Record count (4 bytes)
//! - Records (variable length)
//!
//! # Legacy Record Format (magic 0 and 1)
//!
//! - Offset (8 bytes)
//! - Size (4 bytes)
//! - CRC (4 bytes, CRC-32 from magic to the end of the record)
//! - Magic byte (1 byte)
//! - Attributes (1 byte)
//! - Timestamp (8 bytes, magic 1 only)
//! - Key (4-byte length, -1 for null)
//! - Value (4-byte length, -1 for null)

// Log entry offsets and lengths
pub const OFFSET_OFFSET: usize = 0;
pub const OFFSET_LENGTH: usize = 8;
pub const SIZE_OFFSET: usize = OFFSET_OFFSET + OFFSET_LENGTH;
pub const SIZE_LENGTH: usize = 4;
pub const LOG_OVERHEAD: usize = SIZE_OFFSET + SIZE_LENGTH;
/// Magic sits at the same position for every generation.
pub const MAGIC_OFFSET: usize = 16;
pub const MAGIC_LENGTH: usize = 1;
pub const HEADER_SIZE_UP_TO_MAGIC: usize = MAGIC_OFFSET + MAGIC_LENGTH;

// Record batch (magic 2) field offsets and lengths
pub const BASE_OFFSET_OFFSET: usize = 0;
pub const BASE_OFFSET_LENGTH: usize = 8;
pub const LENGTH_OFFSET: usize = BASE_OFFSET_OFFSET + BASE_OFFSET_LENGTH;
pub const LENGTH_LENGTH: usize = 4;
pub const PARTITION_LEADER_EPOCH_OFFSET: usize = LENGTH_OFFSET + LENGTH_LENGTH;
pub const PARTITION_LEADER_EPOCH_LENGTH: usize = 4;
pub const RB_MAGIC_OFFSET: usize = PARTITION_LEADER_EPOCH_OFFSET + PARTITION_LEADER_EPOCH_LENGTH;
pub const RB_MAGIC_LENGTH: usize = 1;
pub const CRC_OFFSET: usize = RB_MAGIC_OFFSET + RB_MAGIC_LENGTH;
pub const CRC_LENGTH: usize = 4;
pub const ATTRIBUTES_OFFSET: usize = CRC_OFFSET + CRC_LENGTH;
pub const ATTRIBUTE_LENGTH: usize = 2;
pub const LAST_OFFSET_DELTA_OFFSET: usize = ATTRIBUTES_OFFSET + ATTRIBUTE_LENGTH;
pub const LAST_OFFSET_DELTA_LENGTH: usize = 4;
pub const FIRST_TIMESTAMP_OFFSET: usize = LAST_OFFSET_DELTA_OFFSET + LAST_OFFSET_DELTA_LENGTH;
pub const FIRST_TIMESTAMP_LENGTH: usize = 8;
pub const MAX_TIMESTAMP_OFFSET: usize = FIRST_TIMESTAMP_OFFSET + FIRST_TIMESTAMP_LENGTH;
pub const MAX_TIMESTAMP_LENGTH: usize = 8;
pub const PRODUCER_ID_OFFSET: usize = MAX_TIMESTAMP_OFFSET + MAX_TIMESTAMP_LENGTH;
pub const PRODUCER_ID_LENGTH: usize = 8;
pub const PRODUCER_EPOCH_OFFSET: usize = PRODUCER_ID_OFFSET + PRODUCER_ID_LENGTH;
pub const PRODUCER_EPOCH_LENGTH: usize = 2;
pub const BASE_SEQUENCE_OFFSET: usize = PRODUCER_EPOCH_OFFSET + PRODUCER_EPOCH_LENGTH;
pub const BASE_SEQUENCE_LENGTH: usize = 4;
pub const RECORDS_COUNT_OFFSET: usize = BASE_SEQUENCE_OFFSET + BASE_SEQUENCE_LENGTH;
pub const RECORDS_COUNT_LENGTH: usize = 4;
pub const RECORDS_OFFSET: usize = RECORDS_COUNT_OFFSET + RECORDS_COUNT_LENGTH;
pub const RECORD_BATCH_OVERHEAD: usize = RECORDS_OFFSET;

// Legacy record field offsets, relative to the start of the record (after the log overhead)
pub const LEGACY_CRC_OFFSET: usize = 0;
pub const LEGACY_CRC_LENGTH: usize = 4;
pub const LEGACY_MAGIC_OFFSET: usize = LEGACY_CRC_OFFSET + LEGACY_CRC_LENGTH;
pub const LEGACY_ATTRIBUTES_OFFSET: usize = LEGACY_MAGIC_OFFSET + MAGIC_LENGTH;
pub const LEGACY_ATTRIBUTES_LENGTH: usize = 1;
pub const LEGACY_TIMESTAMP_OFFSET: usize = LEGACY_ATTRIBUTES_OFFSET + LEGACY_ATTRIBUTES_LENGTH;
pub const LEGACY_TIMESTAMP_LENGTH: usize = 8;
pub const LEGACY_KEY_SIZE_OFFSET_V0: usize = LEGACY_TIMESTAMP_OFFSET;
pub const LEGACY_KEY_SIZE_OFFSET_V1: usize = LEGACY_TIMESTAMP_OFFSET + LEGACY_TIMESTAMP_LENGTH;
pub const LEGACY_KEY_SIZE_LENGTH: usize = 4;
pub const LEGACY_VALUE_SIZE_LENGTH: usize = 4;
pub const LEGACY_HEADER_SIZE_V0: usize = LEGACY_KEY_SIZE_OFFSET_V0;
pub const LEGACY_HEADER_SIZE_V1: usize = LEGACY_KEY_SIZE_OFFSET_V1;
/// Smallest possible v0 record: header plus two null length fields.
pub const LEGACY_RECORD_OVERHEAD_V0: usize =
    LEGACY_HEADER_SIZE_V0 + LEGACY_KEY_SIZE_LENGTH + LEGACY_VALUE_SIZE_LENGTH;
pub const LEGACY_RECORD_OVERHEAD_V1: usize =
    LEGACY_HEADER_SIZE_V1 + LEGACY_KEY_SIZE_LENGTH + LEGACY_VALUE_SIZE_LENGTH;

// The current attributes are given below:
// ---------------------------------------------------------------------------------------------------------------------------
// | Unused (7-15) | Delete Horizon Flag (6) | Control (5) | Transactional (4) | Timestamp Type (3) | Compression Type (0-2) |
// ---------------------------------------------------------------------------------------------------------------------------
// Legacy records only use the lower 4 bits of a single attributes byte.
pub const COMPRESSION_CODEC_MASK: i16 = 0x07;
pub const TIMESTAMP_TYPE_MASK: i16 = 0x08;
pub const TRANSACTIONAL_FLAG_MASK: i16 = 0x10;
pub const CONTROL_FLAG_MASK: i16 = 0x20;
pub const DELETE_HORIZON_FLAG_MASK: i16 = 0x40;

// Special values and defaults

pub const MAGIC_VALUE_V0: i8 = 0;
pub const MAGIC_VALUE_V1: i8 = 1;
pub const MAGIC_VALUE_V2: i8 = 2;
/// Magic value for the current message format version
pub const CURRENT_MAGIC_VALUE: i8 = MAGIC_VALUE_V2;
/// Special value indicating no producer ID
pub const NO_PRODUCER_ID: i64 = -1;
/// Special value indicating no producer epoch
pub const NO_PRODUCER_EPOCH: i16 = -1;
/// Special value indicating no sequence number
pub const NO_SEQUENCE: i32 = -1;
/// Special value indicating no partition leader epoch
pub const NO_PARTITION_LEADER_EPOCH: i32 = -1;
/// Special value indicating a missing timestamp
pub const NO_TIMESTAMP: i64 = -1;

/// Largest size a log file or a single batch may reach.
pub const MAX_SIZE_IN_BYTES: usize = i32::MAX as usize;

/// Headroom applied to the estimated size of compressed batches.
pub const COMPRESSION_RATE_ESTIMATION_FACTOR: f32 = 1.05;
