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

use recordlog::log::FileRecords;
use recordlog::message::constants::MAGIC_VALUE_V2;
use recordlog::message::{BatchOptions, CompressionType, MemoryRecords, SimpleRecord, TimestampType};
use recordlog::service::{global_config, BuilderConfig, LogConfig, GLOBAL_CONFIG};
use recordlog::AppError;

// Runs in its own process, so the global starts out empty.
#[test]
fn test_library_leaves_global_config_to_the_binary() {
    let dir = tempfile::tempdir().unwrap();
    let defaults = BuilderConfig::default();
    assert_eq!(BatchOptions::default().write_limit, defaults.write_limit);

    let records = MemoryRecords::with_records(
        MAGIC_VALUE_V2,
        0,
        CompressionType::Gzip,
        TimestampType::CreateTime,
        &[SimpleRecord::with_value(b"abcd")],
    )
    .unwrap();
    let log = FileRecords::open(dir.path().join("00000000000000000000.log")).unwrap();
    log.append(&records).unwrap();
    assert_eq!(log.records().unwrap().len(), 1);
    assert!(matches!(global_config(), Err(AppError::IllegalState(_))));

    let mut config = LogConfig::default();
    config.builder.write_limit = 4096;
    assert!(GLOBAL_CONFIG.set(config).is_ok());

    let installed = global_config().unwrap();
    assert_eq!(installed.builder.write_limit, 4096);
    assert_eq!(BatchOptions::from_config(&installed.builder).write_limit, 4096);
    assert_eq!(BatchOptions::default().write_limit, defaults.write_limit);
}
