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

extern crate config as _;

use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub static GLOBAL_CONFIG: OnceCell<LogConfig> = OnceCell::new();

/// Configuration installed by the binary at startup. Library code takes its
/// settings as arguments and never reads this.
pub fn global_config() -> AppResult<&'static LogConfig> {
    GLOBAL_CONFIG
        .get()
        .ok_or_else(|| AppError::IllegalState("log configuration is not installed".to_string()))
}

/// Settings of a single log file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Upper bound for the size of one log file.
    pub max_segment_bytes: usize,
    /// Extend new files to `init_file_size` on creation.
    pub preallocate: bool,
    pub init_file_size: u64,
    /// Largest batch accepted while scanning a file.
    pub max_batch_size: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            max_segment_bytes: i32::MAX as usize,
            preallocate: false,
            init_file_size: 0,
            max_batch_size: i32::MAX as usize,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// 0-9
    pub gzip_level: u32,
    /// 1-22
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            gzip_level: 6,
            zstd_level: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub write_limit: usize,
    pub estimated_compression_ratio: f32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            write_limit: 1024 * 1024,
            estimated_compression_ratio: 1.0,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub segment: SegmentConfig,
    pub compression: CompressionConfig,
    pub builder: BuilderConfig,
}

impl LogConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<LogConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let log_config: LogConfig = config.try_deserialize()?;
        log_config.validate()?;

        Ok(log_config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.segment.max_segment_bytes > i32::MAX as usize {
            return Err(AppError::InvalidValue(format!(
                "max_segment_bytes {} exceeds {}",
                self.segment.max_segment_bytes,
                i32::MAX
            )));
        }
        if self.compression.gzip_level > 9 {
            return Err(AppError::InvalidValue(format!(
                "gzip_level {} is not in 0..=9",
                self.compression.gzip_level
            )));
        }
        if !(1..=22).contains(&self.compression.zstd_level) {
            return Err(AppError::InvalidValue(format!(
                "zstd_level {} is not in 1..=22",
                self.compression.zstd_level
            )));
        }
        if self.builder.estimated_compression_ratio <= 0.0 {
            return Err(AppError::InvalidValue(format!(
                "estimated_compression_ratio {} must be positive",
                self.builder.estimated_compression_ratio
            )));
        }
        Ok(())
    }
}
