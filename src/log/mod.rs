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

//! File-backed storage of record batches.
//!
//! This module provides:
//! - positional file access shared by one writer and many readers
//! - lazy, header-only scanning of the batches in a file
//! - offset and timestamp lookups over those batches

mod file_batch;
mod file_channel;
mod file_records;
mod offset_search;

// Re-exports
pub use file_batch::{FileBatches, FileChannelRecordBatch};
pub use file_channel::{DiskFileChannel, FileChannel, TransferableChannel};
pub use file_records::FileRecords;
pub use offset_search::{
    largest_timestamp, search_for_offset, search_for_timestamp, LogOffsetPosition,
    OffsetSearchable, TimestampAndOffset,
};
