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

//! Keys and values of records appended to control batches.
//!
//! Control record key (always 4 bytes):
//!
//! ```text
//! version: int16 (current version is 0)
//! type: int16 (0 indicates an abort marker, 1 indicates a commit)
//! ```
//!
//! End transaction marker value: `version: int16, coordinatorEpoch: int32`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;
use tracing::debug;

use crate::message::record::Record;
use crate::{AppError, AppResult};

pub const CURRENT_CONTROL_RECORD_KEY_VERSION: i16 = 0;
pub const CONTROL_RECORD_KEY_SIZE: usize = 4;
pub const CURRENT_END_TXN_MARKER_VERSION: i16 = 0;
pub const END_TXN_MARKER_VALUE_SIZE: usize = 6;
pub const CURRENT_LEADER_CHANGE_VERSION: i16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlRecordType {
    Abort,
    Commit,
    LeaderChange,
    SnapshotHeader,
    SnapshotFooter,
    /// Types written by newer versions that this code does not know about.
    Unknown,
}

impl ControlRecordType {
    pub fn type_id(&self) -> i16 {
        match self {
            ControlRecordType::Abort => 0,
            ControlRecordType::Commit => 1,
            ControlRecordType::LeaderChange => 2,
            ControlRecordType::SnapshotHeader => 3,
            ControlRecordType::SnapshotFooter => 4,
            ControlRecordType::Unknown => -1,
        }
    }

    pub fn from_type_id(type_id: i16) -> ControlRecordType {
        match type_id {
            0 => ControlRecordType::Abort,
            1 => ControlRecordType::Commit,
            2 => ControlRecordType::LeaderChange,
            3 => ControlRecordType::SnapshotHeader,
            4 => ControlRecordType::SnapshotFooter,
            _ => ControlRecordType::Unknown,
        }
    }

    pub fn record_key(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CONTROL_RECORD_KEY_SIZE);
        buf.put_i16(CURRENT_CONTROL_RECORD_KEY_VERSION);
        buf.put_i16(self.type_id());
        buf.freeze()
    }

    pub fn parse(key: &[u8]) -> AppResult<ControlRecordType> {
        if key.len() < CONTROL_RECORD_KEY_SIZE {
            return Err(AppError::InvalidRecord(format!(
                "invalid value size found for control record key, must have at least {} bytes, but found only {}",
                CONTROL_RECORD_KEY_SIZE,
                key.len()
            )));
        }
        let mut key = key;
        let version = key.get_i16();
        if version < 0 {
            return Err(AppError::InvalidRecord(format!(
                "invalid version found for control record: {}, may indicate data corruption",
                version
            )));
        }
        if version != CURRENT_CONTROL_RECORD_KEY_VERSION {
            debug!(
                "received unknown control record key version {}, parsing as version {}",
                version, CURRENT_CONTROL_RECORD_KEY_VERSION
            );
        }
        Ok(ControlRecordType::from_type_id(key.get_i16()))
    }

    pub fn parse_record(record: &Record) -> AppResult<ControlRecordType> {
        match record.key {
            Some(ref key) => Self::parse(key),
            None => Err(AppError::InvalidRecord(
                "control record has no key".to_string(),
            )),
        }
    }
}

/// Value of a commit or abort marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndTransactionMarker {
    control_type: ControlRecordType,
    coordinator_epoch: i32,
}

impl EndTransactionMarker {
    pub fn new(control_type: ControlRecordType, coordinator_epoch: i32) -> AppResult<Self> {
        ensure_transaction_marker_type(control_type)?;
        Ok(EndTransactionMarker {
            control_type,
            coordinator_epoch,
        })
    }

    pub fn control_type(&self) -> ControlRecordType {
        self.control_type
    }

    pub fn coordinator_epoch(&self) -> i32 {
        self.coordinator_epoch
    }

    pub fn serialize_value(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(END_TXN_MARKER_VALUE_SIZE);
        buf.put_i16(CURRENT_END_TXN_MARKER_VERSION);
        buf.put_i32(self.coordinator_epoch);
        buf.freeze()
    }

    pub fn deserialize(record: &Record) -> AppResult<Self> {
        let control_type = ControlRecordType::parse_record(record)?;
        let value = record.value.as_deref().ok_or_else(|| {
            AppError::InvalidRecord("end transaction marker has no value".to_string())
        })?;
        Self::deserialize_value(control_type, value)
    }

    pub fn deserialize_value(control_type: ControlRecordType, value: &[u8]) -> AppResult<Self> {
        ensure_transaction_marker_type(control_type)?;
        if value.len() < END_TXN_MARKER_VALUE_SIZE {
            return Err(AppError::InvalidRecord(format!(
                "invalid value size found for end transaction marker, must have at least {} bytes, but found only {}",
                END_TXN_MARKER_VALUE_SIZE,
                value.len()
            )));
        }
        let mut value = value;
        let version = value.get_i16();
        if version < 0 {
            return Err(AppError::InvalidRecord(format!(
                "invalid version found for end transaction marker: {}, may indicate data corruption",
                version
            )));
        }
        if version > CURRENT_END_TXN_MARKER_VERSION {
            debug!(
                "received end transaction marker value version {}, parsing as version {}",
                version, CURRENT_END_TXN_MARKER_VERSION
            );
        }
        Ok(EndTransactionMarker {
            control_type,
            coordinator_epoch: value.get_i32(),
        })
    }
}

fn ensure_transaction_marker_type(control_type: ControlRecordType) -> AppResult<()> {
    match control_type {
        ControlRecordType::Abort | ControlRecordType::Commit => Ok(()),
        other => Err(AppError::IllegalArgument(format!(
            "invalid control record type for end transaction marker: {:?}",
            other
        ))),
    }
}

/// Value of a leader change record, version prefixed and encoded with compact
/// arrays and empty tagged field sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaderChangeMessage {
    pub leader_id: i32,
    pub voters: Vec<i32>,
    pub granting_voters: Vec<i32>,
}

impl LeaderChangeMessage {
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i16(CURRENT_LEADER_CHANGE_VERSION);
        // message body: version field, leader, voters, granting voters, tags
        buf.put_i16(CURRENT_LEADER_CHANGE_VERSION);
        buf.put_i32(self.leader_id);
        for voters in [&self.voters, &self.granting_voters] {
            put_unsigned_varint(&mut buf, voters.len() as u32 + 1);
            for voter in voters.iter() {
                buf.put_i32(*voter);
                put_unsigned_varint(&mut buf, 0);
            }
        }
        put_unsigned_varint(&mut buf, 0);
        buf.freeze()
    }

    pub fn deserialize(value: &[u8]) -> AppResult<Self> {
        let mut buf = value;
        ensure_remaining(buf, 4, "version")?;
        let version = buf.get_i16();
        if version < 0 {
            return Err(AppError::InvalidRecord(format!(
                "invalid leader change message version {}",
                version
            )));
        }
        let _ = buf.get_i16();
        ensure_remaining(buf, 4, "leader id")?;
        let leader_id = buf.get_i32();
        let voters = read_voters(&mut buf)?;
        let granting_voters = read_voters(&mut buf)?;
        skip_tagged_fields(&mut buf)?;
        Ok(LeaderChangeMessage {
            leader_id,
            voters,
            granting_voters,
        })
    }

    pub fn deserialize_record(record: &Record) -> AppResult<Self> {
        let control_type = ControlRecordType::parse_record(record)?;
        if control_type != ControlRecordType::LeaderChange {
            return Err(AppError::IllegalArgument(format!(
                "expected leader change control record, found {:?}",
                control_type
            )));
        }
        match record.value.as_deref() {
            Some(value) => Self::deserialize(value),
            None => Err(AppError::InvalidRecord(
                "leader change record has no value".to_string(),
            )),
        }
    }
}

fn ensure_remaining(buf: &[u8], needed: usize, field: &str) -> AppResult<()> {
    if buf.len() < needed {
        return Err(AppError::InvalidRecord(format!(
            "leader change message truncated while reading {}",
            field
        )));
    }
    Ok(())
}

fn put_unsigned_varint(buf: &mut BytesMut, value: u32) {
    let mut scratch = [0u8; 5];
    let len = value.encode_var(&mut scratch);
    buf.put_slice(&scratch[..len]);
}

fn read_unsigned_varint(buf: &mut &[u8], field: &str) -> AppResult<u32> {
    let (value, read) = u32::decode_var(*buf).ok_or_else(|| {
        AppError::InvalidRecord(format!("failed to read {} of leader change message", field))
    })?;
    buf.advance(read);
    Ok(value)
}

fn read_voters(buf: &mut &[u8]) -> AppResult<Vec<i32>> {
    let len = read_unsigned_varint(buf, "voters length")?;
    if len == 0 {
        return Err(AppError::InvalidRecord(
            "leader change message has a null voter array".to_string(),
        ));
    }
    let mut voters = Vec::with_capacity((len - 1).min(1024) as usize);
    for _ in 0..len - 1 {
        ensure_remaining(*buf, 4, "voter id")?;
        voters.push(buf.get_i32());
        skip_tagged_fields(buf)?;
    }
    Ok(voters)
}

fn skip_tagged_fields(buf: &mut &[u8]) -> AppResult<()> {
    let count = read_unsigned_varint(buf, "tagged field count")?;
    for _ in 0..count {
        let _tag = read_unsigned_varint(buf, "tag")?;
        let size = read_unsigned_varint(buf, "tag size")? as usize;
        ensure_remaining(*buf, size, "tagged field")?;
        buf.advance(size);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_key() {
        let key = ControlRecordType::Commit.record_key();
        assert_eq!(key.as_ref(), &[0, 0, 0, 1]);
        assert_eq!(
            ControlRecordType::parse(&key).unwrap(),
            ControlRecordType::Commit
        );
    }

    #[test]
    fn test_unknown_type_and_newer_key_version() {
        assert_eq!(
            ControlRecordType::parse(&[0, 3, 0, 42]).unwrap(),
            ControlRecordType::Unknown
        );
        assert_eq!(
            ControlRecordType::parse(&[0, 1, 0, 0, 0xff]).unwrap(),
            ControlRecordType::Abort
        );
        assert!(matches!(
            ControlRecordType::parse(&[0, 0, 1]),
            Err(AppError::InvalidRecord(_))
        ));
        assert!(matches!(
            ControlRecordType::parse(&[0xff, 0xff, 0, 0]),
            Err(AppError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_end_transaction_marker_value() {
        let marker = EndTransactionMarker::new(ControlRecordType::Abort, 17).unwrap();
        let value = marker.serialize_value();
        assert_eq!(value.len(), END_TXN_MARKER_VALUE_SIZE);
        assert_eq!(
            EndTransactionMarker::deserialize_value(ControlRecordType::Abort, &value).unwrap(),
            marker
        );

        // newer versions may append fields
        let newer = [0u8, 5, 0, 0, 0, 9, 0xaa, 0xbb];
        let parsed =
            EndTransactionMarker::deserialize_value(ControlRecordType::Commit, &newer).unwrap();
        assert_eq!(parsed.coordinator_epoch(), 9);

        assert!(matches!(
            EndTransactionMarker::deserialize_value(ControlRecordType::Commit, &[0, 0, 0]),
            Err(AppError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_marker_rejects_other_types() {
        for control_type in [
            ControlRecordType::LeaderChange,
            ControlRecordType::Unknown,
            ControlRecordType::SnapshotHeader,
        ] {
            assert!(matches!(
                EndTransactionMarker::new(control_type, 0),
                Err(AppError::IllegalArgument(_))
            ));
        }
    }

    #[test]
    fn test_leader_change_message() {
        let message = LeaderChangeMessage {
            leader_id: 3,
            voters: vec![1, 2, 3],
            granting_voters: vec![2, 3],
        };
        let value = message.serialize();
        // prefix, version, leader, 1 + 3 * 5, 1 + 2 * 5, tags
        assert_eq!(value.len(), 2 + 2 + 4 + 16 + 11 + 1);
        assert_eq!(LeaderChangeMessage::deserialize(&value).unwrap(), message);

        assert!(matches!(
            LeaderChangeMessage::deserialize(&value[..value.len() - 3]),
            Err(AppError::InvalidRecord(_))
        ));
    }
}
