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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use recordlog::log::{FileChannelRecordBatch, FileRecords};
use recordlog::message::{format_timestamp, ControlRecordType, DefaultCompressionCodec, Record};
use recordlog::service::{global_config, setup_tracing_with_verbosity, LogConfig, GLOBAL_CONFIG};
use recordlog::{AppError, AppResult};
use tracing::debug;

#[derive(Parser)]
#[command(version, about = "Inspect the batches of a record log file")]
struct Cli {
    /// configuration file applied before opening the log
    #[arg(short, long, global = true)]
    conf: Option<PathBuf>,

    /// more output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every batch header
    Batches {
        #[arg(short, long)]
        file: PathBuf,
        /// also print the records of each batch
        #[arg(short, long)]
        deep: bool,
        /// check batch checksums
        #[arg(long)]
        verify: bool,
    },
    /// Locate the batch holding an offset
    Offset {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        target: i64,
        #[arg(short, long, default_value_t = 0)]
        position: usize,
    },
    /// Find the first record at or after a timestamp (ms)
    Timestamp {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        target: i64,
    },
}

fn main() -> AppResult<()> {
    let cli = Cli::parse();
    setup_tracing_with_verbosity(cli.verbose)?;

    let config = match &cli.conf {
        Some(conf) => LogConfig::set_up_config(conf)?,
        None => LogConfig::default(),
    };
    debug!("using configuration {:?}", config);
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| AppError::IllegalState("configuration already set".to_string()))?;

    match &cli.command {
        Commands::Batches { file, deep, verify } => dump_batches(file, *deep, *verify),
        Commands::Offset {
            file,
            target,
            position,
        } => find_offset(file, *target, *position),
        Commands::Timestamp { file, target } => find_timestamp(file, *target),
    }
}

fn open(file: &Path) -> AppResult<FileRecords> {
    let config = global_config()?;
    let codec = Arc::new(DefaultCompressionCodec::from_config(&config.compression));
    let records = FileRecords::open_with(file, false, true, 0, false)?;
    Ok(records
        .with_codec(codec)
        .with_max_batch_size(config.segment.max_batch_size))
}

fn dump_batches(file: &Path, deep: bool, verify: bool) -> AppResult<()> {
    let records = open(file)?;
    println!(
        "Dumping {} ({} bytes)",
        file.display(),
        records.size_in_bytes()
    );

    let mut count = 0;
    for batch in records.batches() {
        let batch = batch?;
        print_batch(&batch, verify)?;
        if deep {
            for record in batch.records()? {
                print_record(record, batch.load()?.is_control_batch());
            }
        }
        count += 1;
    }
    println!("{} batches", count);
    Ok(())
}

fn print_batch(batch: &FileChannelRecordBatch, verify: bool) -> AppResult<()> {
    let loaded = batch.load()?;
    let mut line = format!(
        "baseOffset: {} lastOffset: {} count: {} position: {} size: {} magic: {} compression: {:?} \
         timestampType: {:?} maxTimestamp: {}",
        loaded.base_offset()?,
        loaded.last_offset(),
        loaded.count()?,
        batch.position(),
        batch.size_in_bytes(),
        loaded.magic(),
        loaded.compression_type(),
        loaded.timestamp_type(),
        format_timestamp(loaded.max_timestamp()),
    );
    if let Some(header) = loaded.header() {
        line.push_str(&format!(
            " producerId: {} producerEpoch: {} baseSequence: {} partitionLeaderEpoch: {} \
             isTransactional: {} isControl: {}",
            header.producer_id,
            header.producer_epoch,
            header.base_sequence,
            header.partition_leader_epoch,
            header.is_transactional(),
            header.is_control_batch(),
        ));
        if let Some(horizon) = loaded.delete_horizon_ms()? {
            line.push_str(&format!(" deleteHorizon: {}", format_timestamp(horizon)));
        }
    }
    if verify {
        line.push_str(&format!(
            " crc: {} isValid: {}",
            loaded.checksum(),
            loaded.is_valid()
        ));
    }
    println!("{}", line);
    Ok(())
}

fn print_record(record: &Record, control: bool) {
    let mut line = format!(
        "| offset: {} timestamp: {} keySize: {} valueSize: {}",
        record.offset,
        format_timestamp(record.timestamp),
        record.key_size(),
        record.value_size(),
    );
    if record.sequence >= 0 {
        line.push_str(&format!(" sequence: {}", record.sequence));
    }
    if !record.headers.is_empty() {
        let keys: Vec<&str> = record
            .headers
            .iter()
            .map(|h| h.header_key.as_str())
            .collect();
        line.push_str(&format!(" headerKeys: [{}]", keys.join(",")));
    }
    if control {
        match ControlRecordType::parse_record(record) {
            Ok(control_type) => line.push_str(&format!(" controlType: {:?}", control_type)),
            Err(e) => line.push_str(&format!(" controlType: <{}>", e)),
        }
    } else if let Some(value) = &record.value {
        line.push_str(&format!(" payload: {}", String::from_utf8_lossy(value)));
    }
    println!("{}", line);
}

fn find_offset(file: &Path, target: i64, position: usize) -> AppResult<()> {
    let records = open(file)?;
    match records.search_for_offset_with_size(target, position)? {
        Some(found) => println!(
            "offset {} is in the batch at position {} (offset: {}, size: {})",
            target, found.position, found.offset, found.size
        ),
        None => println!("offset {} is past the end of {}", target, file.display()),
    }
    Ok(())
}

fn find_timestamp(file: &Path, target: i64) -> AppResult<()> {
    let records = open(file)?;
    match records.search_for_timestamp(target, 0, 0)? {
        Some(found) => println!(
            "first record at or after {}: offset {} timestamp {} leaderEpoch {:?}",
            format_timestamp(target),
            found.offset,
            format_timestamp(found.timestamp),
            found.leader_epoch
        ),
        None => println!("no record at or after {}", format_timestamp(target)),
    }
    let largest = records.largest_timestamp_after(0)?;
    println!(
        "largest timestamp: {} at offset {}",
        format_timestamp(largest.timestamp),
        largest.offset
    );
    Ok(())
}
