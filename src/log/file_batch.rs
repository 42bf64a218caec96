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

//! Batches found by scanning a log file.
//!
//! Scanning only reads the first 17 bytes of every entry (offset, size, magic).
//! Anything else is read from the file on demand.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::log::file_channel::FileChannel;
use crate::message::constants::{
    HEADER_SIZE_UP_TO_MAGIC, LAST_OFFSET_DELTA_OFFSET, LEGACY_RECORD_OVERHEAD_V0, LOG_OVERHEAD,
    MAGIC_OFFSET, MAGIC_VALUE_V2, OFFSET_OFFSET, RECORD_BATCH_OVERHEAD, SIZE_OFFSET,
};
use crate::message::{CompressionCodec, Record, RecordBatch};
use crate::{AppError, AppResult};

/// A batch located in a file. Header fields are read lazily and the batch is
/// decoded at most once.
#[derive(Debug, Clone)]
pub struct FileChannelRecordBatch {
    offset: i64,
    magic: i8,
    /// relative to the start of the container that produced it
    position: usize,
    channel_position: usize,
    batch_size: usize,
    channel: Arc<dyn FileChannel>,
    codec: Arc<dyn CompressionCodec>,
    batch: OnceCell<RecordBatch>,
}

impl FileChannelRecordBatch {
    /// Base offset for magic 2; the (last) offset of the entry for older magics.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn magic(&self) -> i8 {
        self.magic
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn size_in_bytes(&self) -> usize {
        self.batch_size
    }

    /// Free for magic 2; compressed legacy wrappers need their records loaded.
    pub fn base_offset(&self) -> AppResult<i64> {
        if self.magic >= MAGIC_VALUE_V2 {
            return Ok(self.offset);
        }
        self.load()?.base_offset()
    }

    /// Free for legacy magics; magic 2 reads the last offset delta from the file.
    pub fn last_offset(&self) -> AppResult<i64> {
        if self.magic < MAGIC_VALUE_V2 {
            return Ok(self.offset);
        }
        if let Some(batch) = self.batch.get() {
            return Ok(batch.last_offset());
        }
        let mut delta = [0u8; 4];
        self.channel
            .read_exact_at(&mut delta, (self.channel_position + LAST_OFFSET_DELTA_OFFSET) as u64)
            .map_err(|e| self.read_error(e))?;
        let delta = i32::from_be_bytes(delta);
        self.offset.checked_add(delta as i64).ok_or_else(|| {
            AppError::CorruptMessage(format!(
                "last offset delta {} overflows base offset {} at position {}",
                delta, self.offset, self.position
            ))
        })
    }

    pub fn next_offset(&self) -> AppResult<i64> {
        Ok(self.last_offset()?.saturating_add(1))
    }

    pub fn max_timestamp(&self) -> AppResult<i64> {
        Ok(self.load()?.max_timestamp())
    }

    pub fn records(&self) -> AppResult<&[Record]> {
        self.load()?.records()
    }

    /// Reads and decodes the whole batch.
    pub fn load(&self) -> AppResult<&RecordBatch> {
        self.batch.get_or_try_init(|| {
            let mut buf = BytesMut::zeroed(self.batch_size);
            self.channel
                .read_exact_at(&mut buf, self.channel_position as u64)
                .map_err(|e| self.read_error(e))?;
            let mut bytes: Bytes = buf.freeze();
            trace!(
                "loaded {} byte batch at position {}",
                self.batch_size,
                self.position
            );
            RecordBatch::decode(&mut bytes, self.codec.clone())
        })
    }

    fn read_error(&self, err: std::io::Error) -> AppError {
        AppError::DetailedIoError(format!(
            "failed to read batch of {} bytes at position {}: {}",
            self.batch_size, self.channel_position, err
        ))
    }
}

/// Iterator over the batches of a file between two positions.
///
/// Stops quietly at a partial trailing batch; yields an error (once) for a size
/// field that cannot belong to a valid batch.
#[derive(Debug)]
pub struct FileBatches {
    channel: Arc<dyn FileChannel>,
    codec: Arc<dyn CompressionCodec>,
    file: PathBuf,
    /// channel position of the container start
    base: usize,
    position: usize,
    end: usize,
    max_batch_size: usize,
    done: bool,
}

impl FileBatches {
    pub(crate) fn new(
        channel: Arc<dyn FileChannel>,
        codec: Arc<dyn CompressionCodec>,
        file: PathBuf,
        base: usize,
        position: usize,
        end: usize,
        max_batch_size: usize,
    ) -> Self {
        FileBatches {
            channel,
            codec,
            file,
            base,
            position,
            end,
            max_batch_size,
            done: false,
        }
    }

    fn next_batch(&mut self) -> AppResult<Option<FileChannelRecordBatch>> {
        match self.position.checked_add(HEADER_SIZE_UP_TO_MAGIC) {
            Some(header_end) if header_end <= self.end => {}
            _ => return Ok(None),
        }
        let mut header = [0u8; HEADER_SIZE_UP_TO_MAGIC];
        let channel_position = self.base.checked_add(self.position).ok_or_else(|| {
            AppError::IllegalArgument(format!(
                "position {} overflows the start {} of {}",
                self.position,
                self.base,
                self.file.display()
            ))
        })?;
        self.channel
            .read_exact_at(&mut header, channel_position as u64)
            .map_err(|e| {
                AppError::DetailedIoError(format!(
                    "failed to read batch header at position {} of {}: {}",
                    self.position,
                    self.file.display(),
                    e
                ))
            })?;

        let offset = (&header[OFFSET_OFFSET..]).get_i64();
        let size = (&header[SIZE_OFFSET..]).get_i32();
        let magic = header[MAGIC_OFFSET] as i8;
        if size < LEGACY_RECORD_OVERHEAD_V0 as i32 {
            return Err(AppError::CorruptMessage(format!(
                "found record size {} smaller than minimum record overhead ({}) in file {}",
                size,
                LEGACY_RECORD_OVERHEAD_V0,
                self.file.display()
            )));
        }
        if magic >= MAGIC_VALUE_V2 && (size as usize) < RECORD_BATCH_OVERHEAD - LOG_OVERHEAD {
            return Err(AppError::CorruptMessage(format!(
                "found magic {} batch size {} smaller than the batch header ({}) in file {}",
                magic,
                size,
                RECORD_BATCH_OVERHEAD - LOG_OVERHEAD,
                self.file.display()
            )));
        }
        if size as usize > self.max_batch_size {
            return Err(AppError::CorruptMessage(format!(
                "found record size {} larger than the maximum allowed batch size ({}) in file {}",
                size,
                self.max_batch_size,
                self.file.display()
            )));
        }

        let batch_size = LOG_OVERHEAD + size as usize;
        match self.position.checked_add(batch_size) {
            Some(batch_end) if batch_end <= self.end => {}
            _ => return Ok(None),
        }

        let batch = FileChannelRecordBatch {
            offset,
            magic,
            position: self.position,
            channel_position,
            batch_size,
            channel: self.channel.clone(),
            codec: self.codec.clone(),
            batch: OnceCell::new(),
        };
        self.position += batch_size;
        Ok(Some(batch))
    }
}

impl Iterator for FileBatches {
    type Item = AppResult<FileChannelRecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
