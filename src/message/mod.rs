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

pub use batch_header::{format_timestamp, BatchHeader};
pub use compression::{default_codec, CompressionCodec, CompressionType, DefaultCompressionCodec};
pub use control_record::{ControlRecordType, EndTransactionMarker, LeaderChangeMessage};
pub use legacy_record::LegacyRecord;
pub use memory_records::{Batches, MemoryRecords};
pub use memory_records_builder::{BatchOptions, RecordBatchBuilder, RecordsInfo};
pub use record::{DefaultRecord, Record, RecordHeader, SimpleRecord, TimestampType};
pub use record_batch::{
    decrement_sequence, increment_sequence, DefaultRecordBatch, LegacyRecordBatch,
    MutableRecordBatch, RecordBatch,
};

mod batch_header;
mod compression;
pub mod constants;
mod control_record;
mod legacy_record;
mod memory_records;
mod memory_records_builder;
mod record;
mod record_batch;
