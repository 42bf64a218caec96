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

//! Positional access to the bytes of a log file.
//!
//! All reads and writes carry their own position, so one channel can be shared
//! by a writer and any number of readers without a shared cursor.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

pub trait FileChannel: Debug + Send + Sync {
    fn read_at(&self, buf: &mut [u8], position: u64) -> io::Result<usize>;

    fn write_at(&self, buf: &[u8], position: u64) -> io::Result<usize>;

    fn len(&self) -> io::Result<u64>;

    fn truncate(&self, size: u64) -> io::Result<()>;

    fn sync(&self) -> io::Result<()>;

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read_exact_at(&self, mut buf: &mut [u8], mut position: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, position) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    position += n as u64;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn write_all_at(&self, mut buf: &[u8], mut position: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, position) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    position += n as u64;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// [`FileChannel`] over a regular file.
#[derive(Debug)]
pub struct DiskFileChannel {
    file: File,
}

impl DiskFileChannel {
    pub fn open<P: AsRef<Path>>(path: P, mutable: bool) -> io::Result<Self> {
        let file = if mutable {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?
        } else {
            OpenOptions::new().read(true).open(path)?
        };
        Ok(DiskFileChannel { file })
    }

    pub fn from_file(file: File) -> Self {
        DiskFileChannel { file }
    }
}

impl FileChannel for DiskFileChannel {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], position: u64) -> io::Result<usize> {
        FileExt::read_at(&self.file, buf, position)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], position: u64) -> io::Result<usize> {
        self.file.seek_read(buf, position)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], position: u64) -> io::Result<usize> {
        FileExt::write_at(&self.file, buf, position)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], position: u64) -> io::Result<usize> {
        self.file.seek_write(buf, position)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn sync(&self) -> io::Result<()> {
        (&self.file).flush()?;
        self.file.sync_all()
    }
}

/// Destination of [`FileRecords::write_to`](crate::log::FileRecords::write_to).
pub trait TransferableChannel {
    /// Moves up to `count` bytes starting at `position` of `channel` into this
    /// sink and returns how many were moved.
    fn transfer_from(
        &mut self,
        channel: &dyn FileChannel,
        position: u64,
        count: usize,
    ) -> io::Result<usize>;
}

const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

impl<W: Write> TransferableChannel for W {
    fn transfer_from(
        &mut self,
        channel: &dyn FileChannel,
        position: u64,
        count: usize,
    ) -> io::Result<usize> {
        let mut chunk = vec![0u8; count.min(TRANSFER_CHUNK_SIZE)];
        let mut transferred = 0;
        while transferred < count {
            let len = (count - transferred).min(chunk.len());
            let read = channel.read_at(&mut chunk[..len], position + transferred as u64)?;
            if read == 0 {
                break;
            }
            self.write_all(&chunk[..read])?;
            transferred += read;
        }
        Ok(transferred)
    }
}
