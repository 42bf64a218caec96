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

use chrono::{Local, TimeZone};
use std::fmt::{Debug, Display, Formatter};

use crate::message::compression::CompressionType;
use crate::message::constants::{
    CONTROL_FLAG_MASK, DELETE_HORIZON_FLAG_MASK, NO_TIMESTAMP, TRANSACTIONAL_FLAG_MASK,
};
use crate::message::record::TimestampType;

/// Decoded fixed header of a magic 2 batch.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BatchHeader {
    pub base_offset: i64,
    pub length: i32,
    pub partition_leader_epoch: i32,
    pub magic: i8,
    pub crc: u32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub first_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub records_count: i32,
}

impl BatchHeader {
    pub fn last_offset(&self) -> i64 {
        self.base_offset.saturating_add(self.last_offset_delta as i64)
    }

    pub fn compression_type(&self) -> Option<CompressionType> {
        CompressionType::from_attributes(self.attributes).ok()
    }

    pub fn timestamp_type(&self) -> TimestampType {
        TimestampType::from_attributes(self.attributes)
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes & TRANSACTIONAL_FLAG_MASK != 0
    }

    pub fn is_control_batch(&self) -> bool {
        self.attributes & CONTROL_FLAG_MASK != 0
    }

    pub fn has_delete_horizon(&self) -> bool {
        self.attributes & DELETE_HORIZON_FLAG_MASK != 0
    }
}

/// Renders a millisecond timestamp in local time, or the raw value when it is
/// the missing sentinel or out of range.
pub fn format_timestamp(timestamp: i64) -> String {
    if timestamp == NO_TIMESTAMP {
        return "none".to_string();
    }
    match Local.timestamp_millis_opt(timestamp).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => timestamp.to_string(),
    }
}

impl Display for BatchHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHeader")
            .field("base_offset", &self.base_offset)
            .field("length", &self.length)
            .field("partition_leader_epoch", &self.partition_leader_epoch)
            .field("magic", &self.magic)
            .field("crc", &self.crc)
            .field("attributes", &self.attributes)
            .field("last_offset_delta", &self.last_offset_delta)
            .field("first_timestamp", &format_timestamp(self.first_timestamp))
            .field("max_timestamp", &format_timestamp(self.max_timestamp))
            .field("producer_id", &self.producer_id)
            .field("producer_epoch", &self.producer_epoch)
            .field("base_sequence", &self.base_sequence)
            .field("records_count", &self.records_count)
            .finish()
    }
}

#[cfg(test)]
#[test]
fn test_batch_header_display() {
    let header = BatchHeader {
        base_offset: 0,
        length: 100,
        partition_leader_epoch: -1,
        magic: 2,
        crc: 123456,
        attributes: 0x18 | 0x02,
        last_offset_delta: 4,
        first_timestamp: 1000,
        max_timestamp: NO_TIMESTAMP,
        producer_id: -1,
        producer_epoch: -1,
        base_sequence: -1,
        records_count: 5,
    };

    let display_str = format!("{}", header);
    assert!(display_str.contains("base_offset: 0"));
    assert!(display_str.contains("length: 100"));
    assert!(display_str.contains("max_timestamp: \"none\""));
    assert_eq!(header.last_offset(), 4);
    assert_eq!(header.compression_type(), Some(CompressionType::Snappy));
    assert_eq!(header.timestamp_type(), TimestampType::LogAppendTime);
    assert!(header.is_transactional());
    assert!(!header.is_control_batch());
}
