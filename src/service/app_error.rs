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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// record format errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("corrupt message: {0}")]
    CorruptMessage(String),

    #[error("compression error: {0}")]
    Compression(String),

    /// storage errors
    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    /// Whether the error was caused by malformed or corrupted bytes rather than
    /// by the caller or the underlying storage.
    pub fn is_corruption(&self) -> bool {
        matches!(self, AppError::InvalidRecord(_) | AppError::CorruptMessage(_))
    }
}
