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

//! Offset and timestamp lookups over a sequence of batches.

use crate::log::file_batch::FileChannelRecordBatch;
use crate::message::constants::{MAGIC_VALUE_V0, NO_TIMESTAMP};
use crate::AppResult;

/// Where the batch holding a requested offset starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOffsetPosition {
    /// base offset of the batch for magic 2, last offset for older magics
    pub offset: i64,
    pub position: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampAndOffset {
    pub timestamp: i64,
    pub offset: i64,
    pub leader_epoch: Option<i32>,
}

/// What the offset search needs from a batch.
pub trait OffsetSearchable {
    fn base_offset(&self) -> AppResult<i64>;

    fn last_offset(&self) -> AppResult<i64>;

    /// Offset reported in a [`LogOffsetPosition`].
    fn reported_offset(&self) -> i64;

    fn position(&self) -> usize;

    fn size_in_bytes(&self) -> usize;
}

impl OffsetSearchable for FileChannelRecordBatch {
    fn base_offset(&self) -> AppResult<i64> {
        FileChannelRecordBatch::base_offset(self)
    }

    fn last_offset(&self) -> AppResult<i64> {
        FileChannelRecordBatch::last_offset(self)
    }

    fn reported_offset(&self) -> i64 {
        self.offset()
    }

    fn position(&self) -> usize {
        FileChannelRecordBatch::position(self)
    }

    fn size_in_bytes(&self) -> usize {
        FileChannelRecordBatch::size_in_bytes(self)
    }
}

/// Finds the first batch that may hold `target_offset`: the first one whose
/// base offset is at least the target, or whose last offset reaches it.
///
/// The last offset, which can cost a read, is only asked for when the base
/// offset is below the target.
pub fn search_for_offset<B, I>(batches: I, target_offset: i64) -> AppResult<Option<LogOffsetPosition>>
where
    B: OffsetSearchable,
    I: IntoIterator<Item = AppResult<B>>,
{
    for batch in batches {
        let batch = batch?;
        if batch.base_offset()? >= target_offset || batch.last_offset()? >= target_offset {
            return Ok(Some(LogOffsetPosition {
                offset: batch.reported_offset(),
                position: batch.position(),
                size: batch.size_in_bytes(),
            }));
        }
    }
    Ok(None)
}

/// First record with a timestamp at or after `target_timestamp` and an offset
/// at or after `starting_offset`. Magic 0 batches carry no timestamps and are
/// skipped.
pub fn search_for_timestamp<I>(
    batches: I,
    target_timestamp: i64,
    starting_offset: i64,
) -> AppResult<Option<TimestampAndOffset>>
where
    I: IntoIterator<Item = AppResult<FileChannelRecordBatch>>,
{
    for batch in batches {
        let batch = batch?;
        if batch.magic() == MAGIC_VALUE_V0 {
            continue;
        }
        let loaded = batch.load()?;
        if loaded.max_timestamp() < target_timestamp {
            continue;
        }
        for record in loaded.records()? {
            if record.timestamp >= target_timestamp && record.offset >= starting_offset {
                return Ok(Some(TimestampAndOffset {
                    timestamp: record.timestamp,
                    offset: record.offset,
                    leader_epoch: loaded.leader_epoch(),
                }));
            }
        }
    }
    Ok(None)
}

/// Largest timestamp among the batches and the offset of the record carrying it.
pub fn largest_timestamp<I>(batches: I) -> AppResult<TimestampAndOffset>
where
    I: IntoIterator<Item = AppResult<FileChannelRecordBatch>>,
{
    let mut max_timestamp = NO_TIMESTAMP;
    let mut offset_of_max_timestamp = -1;
    let mut leader_epoch_of_max_timestamp = None;

    for batch in batches {
        let batch = batch?;
        let loaded = batch.load()?;
        let timestamp = loaded.max_timestamp();
        if timestamp > max_timestamp {
            max_timestamp = timestamp;
            offset_of_max_timestamp = loaded
                .records()?
                .iter()
                .find(|record| record.timestamp == timestamp)
                .map_or_else(|| loaded.last_offset(), |record| record.offset);
            leader_epoch_of_max_timestamp = loaded.leader_epoch();
        }
    }
    Ok(TimestampAndOffset {
        timestamp: max_timestamp,
        offset: offset_of_max_timestamp,
        leader_epoch: leader_epoch_of_max_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::AppError;

    struct MockBatch<'a> {
        base_offset: i64,
        last_offset: Option<i64>,
        position: usize,
        last_offset_calls: &'a Cell<usize>,
    }

    impl OffsetSearchable for MockBatch<'_> {
        fn base_offset(&self) -> AppResult<i64> {
            Ok(self.base_offset)
        }

        fn last_offset(&self) -> AppResult<i64> {
            self.last_offset_calls.set(self.last_offset_calls.get() + 1);
            self.last_offset
                .ok_or_else(|| AppError::IllegalState("last offset not set".to_string()))
        }

        fn reported_offset(&self) -> i64 {
            self.base_offset
        }

        fn position(&self) -> usize {
            self.position
        }

        fn size_in_bytes(&self) -> usize {
            100
        }
    }

    #[test]
    fn test_base_offset_match_skips_last_offset() {
        let calls = Cell::new(0);
        let batches = vec![Ok(MockBatch {
            base_offset: 5,
            last_offset: None,
            position: 0,
            last_offset_calls: &calls,
        })];
        let found = search_for_offset(batches, 5).unwrap().unwrap();
        assert_eq!(found.offset, 5);
        assert_eq!(found.position, 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_last_offset_read_once_per_skipped_batch() {
        let first_calls = Cell::new(0);
        let second_calls = Cell::new(0);
        let batches = vec![
            Ok(MockBatch {
                base_offset: 3,
                last_offset: Some(12),
                position: 0,
                last_offset_calls: &first_calls,
            }),
            Ok(MockBatch {
                base_offset: 15,
                last_offset: Some(20),
                position: 100,
                last_offset_calls: &second_calls,
            }),
        ];
        let found = search_for_offset(batches, 13).unwrap().unwrap();
        assert_eq!(
            found,
            LogOffsetPosition {
                offset: 15,
                position: 100,
                size: 100
            }
        );
        assert_eq!(first_calls.get(), 1);
        assert_eq!(second_calls.get(), 0);
    }

    #[test]
    fn test_target_inside_batch() {
        let calls = Cell::new(0);
        let batches = vec![Ok(MockBatch {
            base_offset: 3,
            last_offset: Some(12),
            position: 40,
            last_offset_calls: &calls,
        })];
        let found = search_for_offset(batches, 7).unwrap().unwrap();
        assert_eq!(found.position, 40);
    }

    #[test]
    fn test_target_beyond_log() {
        let calls = Cell::new(0);
        let batches = vec![Ok(MockBatch {
            base_offset: 3,
            last_offset: Some(12),
            position: 0,
            last_offset_calls: &calls,
        })];
        assert_eq!(search_for_offset(batches, 13).unwrap(), None);
    }

    #[test]
    fn test_errors_are_propagated() {
        let batches: Vec<AppResult<MockBatch>> =
            vec![Err(AppError::CorruptMessage("bad size".to_string()))];
        assert!(matches!(
            search_for_offset(batches, 0),
            Err(AppError::CorruptMessage(_))
        ));
    }
}
