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

//! A log file, or a slice of one, holding a sequence of encoded batches.
//!
//! One thread appends while any number of threads slice and read. Appends only
//! ever extend the file and a slice never looks past the end it captured, so
//! readers need no lock. Truncation must not race with reads or appends; the
//! owner of the file serializes it.

use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use tracing::{debug, trace};

use crate::log::file_batch::{FileBatches, FileChannelRecordBatch};
use crate::log::file_channel::{DiskFileChannel, FileChannel, TransferableChannel};
use crate::log::offset_search::{self, LogOffsetPosition, TimestampAndOffset};
use crate::message::constants::MAX_SIZE_IN_BYTES;
use crate::message::{default_codec, CompressionCodec, MemoryRecords, Record};
use crate::service::SegmentConfig;
use crate::{AppError, AppResult};

pub struct FileRecords {
    file: PathBuf,
    channel: Arc<dyn FileChannel>,
    start: usize,
    /// exclusive end of a slice; unbounded for the owning container
    end: usize,
    is_slice: bool,
    size: Arc<AtomicCell<usize>>,
    codec: Arc<dyn CompressionCodec>,
    /// appends may not grow the file past this
    max_size: usize,
    max_batch_size: usize,
}

impl Debug for FileRecords {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRecords")
            .field("file", &self.file)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("size", &self.size.load())
            .field("is_slice", &self.is_slice)
            .finish()
    }
}

impl FileRecords {
    /// Opens (or creates) a mutable, non-preallocated log file.
    pub fn open<P: AsRef<Path>>(file: P) -> AppResult<Self> {
        Self::open_with(file, true, true, 0, false)
    }

    /// With `preallocate`, a new file is extended to `init_file_size` right away
    /// and the append position still starts at 0. A reopened preallocated file
    /// reports its physical length; the caller truncates it back to the last
    /// valid position.
    pub fn open_with<P: AsRef<Path>>(
        file: P,
        mutable: bool,
        file_already_exists: bool,
        init_file_size: u64,
        preallocate: bool,
    ) -> AppResult<Self> {
        let path = file.as_ref().to_path_buf();
        let channel = DiskFileChannel::open(&path, mutable).map_err(|e| {
            AppError::DetailedIoError(format!(
                "open file: {} error: {} while open file records",
                path.display(),
                e
            ))
        })?;

        let preallocated = mutable && !file_already_exists && preallocate;
        if preallocated {
            channel.truncate(init_file_size)?;
        }
        let end = if preallocated { 0 } else { MAX_SIZE_IN_BYTES };
        debug!(
            "opened log file {} (mutable: {}, preallocated: {})",
            path.display(),
            mutable,
            preallocated
        );
        Self::new(path, Arc::new(channel), 0, end, false, default_codec())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        file: P,
        file_already_exists: bool,
        config: &SegmentConfig,
    ) -> AppResult<Self> {
        let mut records = Self::open_with(
            file,
            true,
            file_already_exists,
            config.init_file_size,
            config.preallocate,
        )?;
        records.max_size = config.max_segment_bytes.min(MAX_SIZE_IN_BYTES);
        records.max_batch_size = config.max_batch_size;
        Ok(records)
    }

    /// Wraps an existing channel. For the owning container the size is the
    /// channel length capped at `end`; for a slice it is `end - start`.
    pub fn new(
        file: PathBuf,
        channel: Arc<dyn FileChannel>,
        start: usize,
        end: usize,
        is_slice: bool,
        codec: Arc<dyn CompressionCodec>,
    ) -> AppResult<Self> {
        let size = if is_slice {
            end.saturating_sub(start)
        } else {
            let channel_len = channel.len()?;
            if channel_len > MAX_SIZE_IN_BYTES as u64 {
                return Err(AppError::Storage(format!(
                    "the size of segment {} ({}) is larger than the maximum allowed segment size of {}",
                    file.display(),
                    channel_len,
                    MAX_SIZE_IN_BYTES
                )));
            }
            (channel_len as usize).min(end).saturating_sub(start)
        };

        Ok(FileRecords {
            file,
            channel,
            start,
            end: if is_slice { end } else { usize::MAX },
            is_slice,
            size: Arc::new(AtomicCell::new(size)),
            codec,
            max_size: MAX_SIZE_IN_BYTES,
            max_batch_size: MAX_SIZE_IN_BYTES,
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn CompressionCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Largest batch the scanner accepts before reporting corruption.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size.load()
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn channel(&self) -> &Arc<dyn FileChannel> {
        &self.channel
    }

    pub fn is_slice(&self) -> bool {
        self.is_slice
    }

    /// Appends the encoded batches and returns the number of bytes written.
    pub fn append(&self, records: &MemoryRecords) -> AppResult<usize> {
        if self.is_slice {
            return Err(AppError::IllegalState(format!(
                "cannot append to a slice of {}",
                self.file.display()
            )));
        }
        let current = self.size.load();
        let written = records.size_in_bytes();
        if written > self.max_size.saturating_sub(current) {
            return Err(AppError::IllegalArgument(format!(
                "append of size {} bytes is too large for segment with current file position at {}",
                written, current
            )));
        }
        self.channel
            .write_all_at(records.buffer(), (self.start + current) as u64)?;
        self.size.fetch_add(written);
        trace!(
            "{} appended {} bytes, size now {}",
            self.file.display(),
            written,
            current + written
        );
        Ok(written)
    }

    /// Fills `buf` with bytes starting at `position` of this container.
    pub fn read_into(&self, buf: &mut [u8], position: usize) -> AppResult<()> {
        if position.saturating_add(buf.len()) > self.size_in_bytes() {
            return Err(AppError::IllegalArgument(format!(
                "reading {} bytes at position {} exceeds size {} of {}",
                buf.len(),
                position,
                self.size_in_bytes(),
                self.file.display()
            )));
        }
        self.channel
            .read_exact_at(buf, (self.start + position) as u64)?;
        Ok(())
    }

    /// A view of `size` bytes from `position`, clamped to the bytes currently
    /// present. The view keeps its end even if more is appended later.
    pub fn slice(&self, position: usize, size: usize) -> AppResult<FileRecords> {
        let current = self.size_in_bytes();
        if position > current {
            return Err(AppError::IllegalArgument(format!(
                "slice from position {} exceeds end position {} of {}",
                position,
                current,
                self.file.display()
            )));
        }
        let available = current - position;
        let end = self.start + position + size.min(available);
        Ok(FileRecords {
            file: self.file.clone(),
            channel: self.channel.clone(),
            start: self.start + position,
            end,
            is_slice: true,
            size: Arc::new(AtomicCell::new(end - (self.start + position))),
            codec: self.codec.clone(),
            max_size: self.max_size,
            max_batch_size: self.max_batch_size,
        })
    }

    /// Shrinks the file to `target_size` and returns how many bytes were cut.
    pub fn truncate_to(&self, target_size: usize) -> AppResult<usize> {
        if self.is_slice {
            return Err(AppError::IllegalState(format!(
                "cannot truncate a slice of {}",
                self.file.display()
            )));
        }
        let original_size = self.size_in_bytes();
        if target_size > original_size {
            return Err(AppError::Storage(format!(
                "attempt to truncate log segment {} to {} bytes failed, size of this log segment is {} bytes",
                self.file.display(),
                target_size,
                original_size
            )));
        }
        if target_size < original_size {
            self.channel.truncate((self.start + target_size) as u64)?;
            self.size.store(target_size);
            debug!(
                "truncated {} from {} to {} bytes",
                self.file.display(),
                original_size,
                target_size
            );
        }
        Ok(original_size - target_size)
    }

    /// Copies up to `length` bytes starting at `offset` into `sink`.
    pub fn write_to<T: TransferableChannel + ?Sized>(
        &self,
        sink: &mut T,
        offset: usize,
        length: usize,
    ) -> AppResult<usize> {
        let channel_len = self.channel.len()? as usize;
        let new_size = channel_len.min(self.end).saturating_sub(self.start);
        let old_size = self.size_in_bytes();
        if new_size < old_size {
            return Err(AppError::Storage(format!(
                "size of FileRecords {} has been truncated during write: old size {}, new size {}",
                self.file.display(),
                old_size,
                new_size
            )));
        }
        if offset > old_size {
            return Err(AppError::IllegalArgument(format!(
                "write offset {} exceeds size {} of {}",
                offset,
                old_size,
                self.file.display()
            )));
        }
        let count = length.min(old_size - offset);
        let position = (self.start + offset) as u64;
        Ok(sink.transfer_from(self.channel.as_ref(), position, count)?)
    }

    pub fn flush(&self) -> AppResult<()> {
        self.channel.sync()?;
        Ok(())
    }

    /// Flushes, then drops any bytes past the logical size (such as the
    /// preallocated tail).
    /// Flushes and trims the file, then drops this handle. Slices taken
    /// earlier keep the channel open until they are dropped.
    pub fn close(self) -> AppResult<()> {
        self.flush()?;
        self.trim()?;
        debug!("closed log file {}", self.file.display());
        Ok(())
    }

    pub fn trim(&self) -> AppResult<()> {
        if self.is_slice {
            return Ok(());
        }
        let logical_end = (self.start + self.size_in_bytes()) as u64;
        if self.channel.len()? > logical_end {
            self.channel.truncate(logical_end)?;
        }
        Ok(())
    }

    /// Removes the file; returns whether it existed.
    pub fn delete_if_exists(&self) -> AppResult<bool> {
        match fs::remove_file(&self.file) {
            Ok(()) => {
                debug!("deleted log file {}", self.file.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::DetailedIoError(format!(
                "delete file: {} error: {}",
                self.file.display(),
                e
            ))),
        }
    }

    pub fn rename_to<P: AsRef<Path>>(&mut self, new_file: P) -> AppResult<()> {
        let new_file = new_file.as_ref().to_path_buf();
        fs::rename(&self.file, &new_file).map_err(|e| {
            AppError::DetailedIoError(format!(
                "rename file: {} to {} error: {}",
                self.file.display(),
                new_file.display(),
                e
            ))
        })?;
        self.file = new_file;
        Ok(())
    }

    pub fn batches(&self) -> FileBatches {
        self.batches_from(0)
    }

    pub fn batches_from(&self, position: usize) -> FileBatches {
        // a slice stops at its captured end, the owner at the current size
        let end = if self.is_slice {
            self.end - self.start
        } else {
            self.size_in_bytes()
        };
        FileBatches::new(
            self.channel.clone(),
            self.codec.clone(),
            self.file.clone(),
            self.start,
            position,
            end,
            self.max_batch_size,
        )
    }

    /// All records of all batches, in log order.
    pub fn records(&self) -> AppResult<Vec<Record>> {
        let mut records = Vec::new();
        for batch in self.batches() {
            records.extend_from_slice(batch?.records()?);
        }
        Ok(records)
    }

    /// Position of the first batch at or after `starting_position` that may
    /// hold `target_offset`.
    pub fn search_for_offset_with_size(
        &self,
        target_offset: i64,
        starting_position: usize,
    ) -> AppResult<Option<LogOffsetPosition>> {
        offset_search::search_for_offset(self.batches_from(starting_position), target_offset)
    }

    pub fn search_for_timestamp(
        &self,
        target_timestamp: i64,
        starting_position: usize,
        starting_offset: i64,
    ) -> AppResult<Option<TimestampAndOffset>> {
        offset_search::search_for_timestamp(
            self.batches_from(starting_position),
            target_timestamp,
            starting_offset,
        )
    }

    pub fn largest_timestamp_after(&self, starting_position: usize) -> AppResult<TimestampAndOffset> {
        offset_search::largest_timestamp(self.batches_from(starting_position))
    }

    /// The batch starting exactly at `position`, if a complete one is there.
    pub fn batch_at(&self, position: usize) -> AppResult<Option<FileChannelRecordBatch>> {
        self.batches_from(position).next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::message::constants::MAGIC_VALUE_V2;
    use crate::message::{CompressionType, SimpleRecord, TimestampType};

    /// In-memory channel that counts truncations.
    #[derive(Debug, Default)]
    struct MemoryChannel {
        bytes: Mutex<Vec<u8>>,
        truncations: AtomicUsize,
    }

    impl FileChannel for MemoryChannel {
        fn read_at(&self, buf: &mut [u8], position: u64) -> io::Result<usize> {
            let bytes = self.bytes.lock().unwrap();
            let position = position as usize;
            if position >= bytes.len() {
                return Ok(0);
            }
            let n = buf.len().min(bytes.len() - position);
            buf[..n].copy_from_slice(&bytes[position..position + n]);
            Ok(n)
        }

        fn write_at(&self, buf: &[u8], position: u64) -> io::Result<usize> {
            let mut bytes = self.bytes.lock().unwrap();
            let position = position as usize;
            if bytes.len() < position + buf.len() {
                bytes.resize(position + buf.len(), 0);
            }
            bytes[position..position + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }

        fn len(&self) -> io::Result<u64> {
            Ok(self.bytes.lock().unwrap().len() as u64)
        }

        fn truncate(&self, size: u64) -> io::Result<()> {
            self.truncations.fetch_add(1, Ordering::SeqCst);
            self.bytes.lock().unwrap().resize(size as usize, 0);
            Ok(())
        }

        fn sync(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn records_of(base_offset: i64, values: &[&str]) -> MemoryRecords {
        let records: Vec<SimpleRecord> = values
            .iter()
            .map(|v| SimpleRecord::with_value(v.as_bytes()))
            .collect();
        MemoryRecords::with_records(
            MAGIC_VALUE_V2,
            base_offset,
            CompressionType::None,
            TimestampType::CreateTime,
            &records,
        )
        .unwrap()
    }

    fn in_memory() -> (Arc<MemoryChannel>, FileRecords) {
        let channel = Arc::new(MemoryChannel::default());
        let records = FileRecords::new(
            PathBuf::from("memory.log"),
            channel.clone(),
            0,
            MAX_SIZE_IN_BYTES,
            false,
            default_codec(),
        )
        .unwrap();
        (channel, records)
    }

    #[test]
    fn test_truncate_to_same_size_is_a_no_op() {
        let (channel, records) = in_memory();
        records.append(&records_of(0, &["a", "b"])).unwrap();
        let size = records.size_in_bytes();

        assert_eq!(records.truncate_to(size).unwrap(), 0);
        assert_eq!(channel.truncations.load(Ordering::SeqCst), 0);
        assert_eq!(records.size_in_bytes(), size);
    }

    #[test]
    fn test_truncate_to_smaller_size() {
        let (channel, records) = in_memory();
        let first = records_of(0, &["a"]);
        records.append(&first).unwrap();
        let second = records_of(1, &["b"]);
        records.append(&second).unwrap();

        let cut = records.truncate_to(first.size_in_bytes()).unwrap();
        assert_eq!(cut, second.size_in_bytes());
        assert_eq!(channel.truncations.load(Ordering::SeqCst), 1);
        assert_eq!(records.size_in_bytes(), first.size_in_bytes());
        assert_eq!(records.batches().count(), 1);
    }

    #[test]
    fn test_truncate_past_end_fails() {
        let (channel, records) = in_memory();
        records.append(&records_of(0, &["a"])).unwrap();
        let size = records.size_in_bytes();

        assert!(matches!(
            records.truncate_to(size + 1),
            Err(AppError::Storage(_))
        ));
        assert_eq!(channel.truncations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_size_is_capped_by_end() {
        let channel = Arc::new(MemoryChannel::default());
        channel.write_at(&[0u8; 100], 0).unwrap();
        let records = FileRecords::new(
            PathBuf::from("memory.log"),
            channel,
            0,
            40,
            false,
            default_codec(),
        )
        .unwrap();
        assert_eq!(records.size_in_bytes(), 40);
    }

    #[test]
    fn test_append_to_slice_fails() {
        let (_, records) = in_memory();
        records.append(&records_of(0, &["a"])).unwrap();
        let slice = records.slice(0, records.size_in_bytes()).unwrap();
        assert!(matches!(
            slice.append(&records_of(1, &["b"])),
            Err(AppError::IllegalState(_))
        ));
    }

    #[test]
    fn test_slice_keeps_its_end_after_append() {
        let (_, records) = in_memory();
        records.append(&records_of(0, &["a"])).unwrap();
        let slice = records.slice(0, usize::MAX).unwrap();
        records.append(&records_of(1, &["b"])).unwrap();

        assert_eq!(slice.batches().count(), 1);
        assert_eq!(records.batches().count(), 2);
    }

    #[test]
    fn test_read_into() {
        let (_, records) = in_memory();
        let appended = records_of(7, &["abc"]);
        records.append(&appended).unwrap();

        let mut buf = vec![0u8; appended.size_in_bytes()];
        records.read_into(&mut buf, 0).unwrap();
        assert_eq!(&buf[..], &appended.buffer()[..]);

        let mut too_long = vec![0u8; appended.size_in_bytes() + 1];
        assert!(records.read_into(&mut too_long, 0).is_err());

        assert!(matches!(
            records.read_into(&mut [0u8; 4], usize::MAX - 1),
            Err(AppError::IllegalArgument(_))
        ));
        assert!(records.batches_from(usize::MAX - 1).next().is_none());
    }

    #[test]
    fn test_trim_drops_tail() {
        let (channel, records) = in_memory();
        records.append(&records_of(0, &["a"])).unwrap();
        let size = records.size_in_bytes();
        channel.write_at(&[0u8; 32], size as u64).unwrap();
        // size was captured before the stray write
        records.trim().unwrap();
        assert_eq!(channel.len().unwrap(), size as u64);
    }
}
