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

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;

use crate::message::compression::{default_codec, CompressionCodec, CompressionType};
use crate::message::constants::{LOG_OVERHEAD, SIZE_OFFSET};
use crate::message::memory_records_builder::{BatchOptions, RecordBatchBuilder};
use crate::message::record::{Record, SimpleRecord, TimestampType};
use crate::message::record_batch::{read_i32_at, read_i64_at, RecordBatch};
use crate::AppResult;

/// A sequence of encoded batches held in memory.
#[derive(Clone)]
pub struct MemoryRecords {
    buffer: Bytes,
    codec: Arc<dyn CompressionCodec>,
}

impl std::fmt::Debug for MemoryRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecords")
            .field("buffer length", &self.buffer.len())
            .finish()
    }
}

impl PartialEq for MemoryRecords {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl MemoryRecords {
    pub fn new(buffer: Bytes) -> MemoryRecords {
        Self::with_codec(buffer, default_codec())
    }

    pub fn with_codec(buffer: Bytes, codec: Arc<dyn CompressionCodec>) -> MemoryRecords {
        MemoryRecords { buffer, codec }
    }

    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    /// Builds a single batch holding `records`, with offsets starting at
    /// `base_offset`.
    pub fn with_records(
        magic: i8,
        base_offset: i64,
        compression: CompressionType,
        timestamp_type: TimestampType,
        records: &[SimpleRecord],
    ) -> AppResult<MemoryRecords> {
        let options = BatchOptions {
            magic,
            compression,
            timestamp_type,
            base_offset,
            ..BatchOptions::default()
        };
        let mut builder = RecordBatchBuilder::new(options)?;
        for record in records {
            builder.append(record)?;
        }
        builder.build()
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn codec(&self) -> &Arc<dyn CompressionCodec> {
        &self.codec
    }

    pub fn size_in_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn first_batch_base_offset(&self) -> Option<i64> {
        if self.buffer.len() < LOG_OVERHEAD {
            return None;
        }
        Some(read_i64_at(&self.buffer, 0))
    }

    /// Size of the first batch, when a complete one is present.
    pub fn first_batch_size(&self) -> Option<usize> {
        if self.buffer.len() < LOG_OVERHEAD {
            return None;
        }
        let size = read_i32_at(&self.buffer, SIZE_OFFSET);
        if size < 0 || LOG_OVERHEAD + size as usize > self.buffer.len() {
            return None;
        }
        Some(LOG_OVERHEAD + size as usize)
    }

    pub fn batches(&self) -> Batches {
        Batches {
            remaining: self.buffer.clone(),
            codec: self.codec.clone(),
        }
    }

    /// All records of all batches, in log order.
    pub fn records(&self) -> AppResult<Vec<Record>> {
        let mut records = Vec::new();
        for batch in self.batches() {
            records.extend_from_slice(batch?.records()?);
        }
        Ok(records)
    }

    /// Writes the whole buffer to `writer` and returns the number of bytes written.
    pub fn write_fully_to<W: Write>(&self, writer: &mut W) -> AppResult<usize> {
        writer.write_all(&self.buffer)?;
        Ok(self.buffer.len())
    }
}

/// Iterator over the batches of a [`MemoryRecords`]. Stops at the first
/// malformed batch after yielding its error.
pub struct Batches {
    remaining: Bytes,
    codec: Arc<dyn CompressionCodec>,
}

impl Iterator for Batches {
    type Item = AppResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        match RecordBatch::decode(&mut self.remaining, self.codec.clone()) {
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.remaining.clear();
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::constants::{MAGIC_VALUE_V1, MAGIC_VALUE_V2};
    use crate::AppError;

    #[test]
    fn test_memory_records_iteration() {
        let first = MemoryRecords::with_records(
            MAGIC_VALUE_V2,
            0,
            CompressionType::None,
            TimestampType::CreateTime,
            &[
                SimpleRecord::new(1000, Some(b"key1"), Some(b"value1")),
                SimpleRecord::new(1001, Some(b"key2"), Some(b"value2")),
            ],
        )
        .unwrap();
        let second = MemoryRecords::with_records(
            MAGIC_VALUE_V1,
            2,
            CompressionType::None,
            TimestampType::CreateTime,
            &[SimpleRecord::new(1002, None, Some(b"value3"))],
        )
        .unwrap();

        let mut joined = first.buffer().to_vec();
        joined.extend_from_slice(second.buffer());
        let records = MemoryRecords::new(Bytes::from(joined));

        assert_eq!(records.first_batch_base_offset(), Some(0));
        assert_eq!(records.first_batch_size(), Some(first.size_in_bytes()));

        let batches: Vec<_> = records.batches().collect::<AppResult<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].magic(), MAGIC_VALUE_V2);
        assert_eq!(batches[1].magic(), MAGIC_VALUE_V1);

        let offsets: Vec<i64> = records.records().unwrap().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[test]
    fn test_truncated_buffer_yields_error_once() {
        let records = MemoryRecords::with_records(
            MAGIC_VALUE_V2,
            0,
            CompressionType::None,
            TimestampType::CreateTime,
            &[SimpleRecord::with_value(b"value")],
        )
        .unwrap();
        let truncated = records.buffer().slice(..records.size_in_bytes() - 1);
        let mut batches = MemoryRecords::new(truncated).batches();
        assert!(matches!(batches.next(), Some(Err(AppError::InvalidRecord(_)))));
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_write_fully_to() {
        let records = MemoryRecords::with_records(
            MAGIC_VALUE_V2,
            0,
            CompressionType::Gzip,
            TimestampType::CreateTime,
            &[SimpleRecord::with_value(b"value")],
        )
        .unwrap();
        let mut out = Vec::new();
        let written = records.write_fully_to(&mut out).unwrap();
        assert_eq!(written, records.size_in_bytes());
        assert_eq!(out.as_slice(), records.buffer().as_ref());
        assert!(MemoryRecords::empty().batches().next().is_none());
    }
}
