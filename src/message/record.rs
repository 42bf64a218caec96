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

//! Logical records and the magic v2 per-record encoding.
//!
//! Record format (magic 2), all integers zig-zag varints unless noted:
//!
//! ```text
//! length, attributes (int8), timestampDelta (varlong), offsetDelta,
//! keyLength, key, valueLength, value, headersCount,
//! [headerKeyLength, headerKey, headerValueLength, headerValue]*
//! ```
//!
//! A length of -1 encodes a null key, value or header value.

use std::fmt::Debug;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;

use crate::message::constants::{NO_SEQUENCE, TIMESTAMP_TYPE_MASK};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampType {
    /// Magic 0 records carry no timestamp at all.
    NoTimestampType,
    CreateTime,
    LogAppendTime,
}

impl TimestampType {
    pub fn from_attributes(attributes: i16) -> TimestampType {
        if attributes & TIMESTAMP_TYPE_MASK != 0 {
            TimestampType::LogAppendTime
        } else {
            TimestampType::CreateTime
        }
    }

    pub(crate) fn attribute_bits(&self) -> i16 {
        match self {
            TimestampType::LogAppendTime => TIMESTAMP_TYPE_MASK,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub header_key: String,
    pub header_value: Option<Vec<u8>>,
}

impl RecordHeader {
    pub fn new<T: AsRef<[u8]>>(key: impl Into<String>, value: Option<T>) -> RecordHeader {
        RecordHeader {
            header_key: key.into(),
            header_value: value.map(|v| v.as_ref().to_vec()),
        }
    }

    pub fn size(&self) -> usize {
        let key_len = self.header_key.len();
        let mut size = (key_len as i32).required_space() + key_len;
        match self.header_value {
            Some(ref header_value) => {
                size += (header_value.len() as i32).required_space() + header_value.len()
            }
            None => size += (-1i32).required_space(),
        }
        size
    }
}

/// The parts of a record a producer supplies; offsets are assigned by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleRecord {
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl SimpleRecord {
    pub fn new(timestamp: i64, key: Option<&[u8]>, value: Option<&[u8]>) -> SimpleRecord {
        SimpleRecord {
            timestamp,
            key: key.map(Bytes::copy_from_slice),
            value: value.map(Bytes::copy_from_slice),
            headers: vec![],
        }
    }

    pub fn with_value(value: &[u8]) -> SimpleRecord {
        Self::new(crate::message::constants::NO_TIMESTAMP, None, Some(value))
    }

    pub fn with_headers(mut self, headers: Vec<RecordHeader>) -> SimpleRecord {
        self.headers = headers;
        self
    }
}

/// A record decoded from a batch, with absolute offset and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: i64,
    pub timestamp: i64,
    pub sequence: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl Record {
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn key_size(&self) -> i32 {
        self.key.as_ref().map_or(-1, |k| k.len() as i32)
    }

    pub fn value_size(&self) -> i32 {
        self.value.as_ref().map_or(-1, |v| v.len() as i32)
    }

    pub fn to_simple(&self) -> SimpleRecord {
        SimpleRecord {
            timestamp: self.timestamp,
            key: self.key.clone(),
            value: self.value.clone(),
            headers: self.headers.clone(),
        }
    }
}

pub(crate) fn read_varint(buf: &mut Bytes, field: &str) -> AppResult<i32> {
    let (value, read) = i32::decode_var(buf.chunk()).ok_or_else(|| {
        AppError::InvalidRecord(format!("failed to read varint {} of record", field))
    })?;
    buf.advance(read);
    Ok(value)
}

pub(crate) fn read_varlong(buf: &mut Bytes, field: &str) -> AppResult<i64> {
    let (value, read) = i64::decode_var(buf.chunk()).ok_or_else(|| {
        AppError::InvalidRecord(format!("failed to read varlong {} of record", field))
    })?;
    buf.advance(read);
    Ok(value)
}

pub(crate) fn put_varint(buf: &mut BytesMut, value: i32) {
    let mut scratch = [0u8; 10];
    let len = value.encode_var(&mut scratch);
    buf.put_slice(&scratch[..len]);
}

pub(crate) fn put_varlong(buf: &mut BytesMut, value: i64) {
    let mut scratch = [0u8; 10];
    let len = value.encode_var(&mut scratch);
    buf.put_slice(&scratch[..len]);
}

fn read_nullable_bytes(buf: &mut Bytes, field: &str) -> AppResult<Option<Bytes>> {
    let len = read_varint(buf, field)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(AppError::InvalidRecord(format!(
            "record {} of {} bytes exceeds remaining {} bytes",
            field,
            len,
            buf.remaining()
        )));
    }
    Ok(Some(buf.split_to(len)))
}

fn put_nullable_bytes(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            put_varint(buf, data.len() as i32);
            buf.put_slice(data);
        }
        None => put_varint(buf, -1),
    }
}

fn nullable_size(data: Option<&[u8]>) -> usize {
    match data {
        Some(data) => (data.len() as i32).required_space() + data.len(),
        None => (-1i32).required_space(),
    }
}

/// Encoding of one record inside a magic 2 batch.
pub struct DefaultRecord;

impl DefaultRecord {
    /// Size of the record body, excluding the leading length varint.
    pub fn size_of_body(
        offset_delta: i32,
        timestamp_delta: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> usize {
        1 // attributes
            + timestamp_delta.required_space()
            + offset_delta.required_space()
            + nullable_size(key)
            + nullable_size(value)
            + (headers.len() as i32).required_space()
            + headers.iter().map(|h| h.size()).sum::<usize>()
    }

    /// Full encoded size including the leading length varint.
    pub fn size_in_bytes(
        offset_delta: i32,
        timestamp_delta: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> usize {
        let body = Self::size_of_body(offset_delta, timestamp_delta, key, value, headers);
        (body as i32).required_space() + body
    }

    /// Writes the record and returns the number of bytes written.
    pub fn write_to(
        buf: &mut BytesMut,
        offset_delta: i32,
        timestamp_delta: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: &[RecordHeader],
    ) -> usize {
        let start = buf.len();
        let body = Self::size_of_body(offset_delta, timestamp_delta, key, value, headers);
        put_varint(buf, body as i32);
        buf.put_i8(0); // attributes
        put_varlong(buf, timestamp_delta);
        put_varint(buf, offset_delta);
        put_nullable_bytes(buf, key);
        put_nullable_bytes(buf, value);

        put_varint(buf, headers.len() as i32);
        for header in headers {
            put_varint(buf, header.header_key.len() as i32);
            buf.put_slice(header.header_key.as_bytes());
            put_nullable_bytes(buf, header.header_value.as_deref());
        }
        buf.len() - start
    }

    /// Reads one record. `base_timestamp` is replaced by `log_append_time` when
    /// the batch stamps records with the append time.
    pub fn read_from(
        buf: &mut Bytes,
        base_offset: i64,
        base_timestamp: i64,
        base_sequence: i32,
        log_append_time: Option<i64>,
    ) -> AppResult<Record> {
        let size_of_body = read_varint(buf, "length")?;
        if size_of_body < 0 || buf.remaining() < size_of_body as usize {
            return Err(AppError::InvalidRecord(format!(
                "invalid record size {}, {} bytes remaining",
                size_of_body,
                buf.remaining()
            )));
        }
        let mut body = buf.split_to(size_of_body as usize);

        if !body.has_remaining() {
            return Err(AppError::InvalidRecord("record body is empty".to_string()));
        }
        let _attributes = body.get_i8();
        let timestamp_delta = read_varlong(&mut body, "timestamp delta")?;
        let offset_delta = read_varint(&mut body, "offset delta")?;
        let key = read_nullable_bytes(&mut body, "key")?;
        let value = read_nullable_bytes(&mut body, "value")?;

        let headers_count = read_varint(&mut body, "headers count")?;
        if headers_count < 0 {
            return Err(AppError::InvalidRecord(format!(
                "found invalid number of record headers {}",
                headers_count
            )));
        }
        let mut headers = Vec::with_capacity(headers_count.min(64) as usize);
        for _ in 0..headers_count {
            let key_len = read_varint(&mut body, "header key length")?;
            if key_len < 0 || body.remaining() < key_len as usize {
                return Err(AppError::InvalidRecord(format!(
                    "invalid header key size {}",
                    key_len
                )));
            }
            let header_key = String::from_utf8(body.split_to(key_len as usize).to_vec())
                .map_err(|e| AppError::InvalidRecord(format!("header key is not utf-8: {}", e)))?;
            let header_value = read_nullable_bytes(&mut body, "header value")?.map(|v| v.to_vec());
            headers.push(RecordHeader {
                header_key,
                header_value,
            });
        }

        if body.has_remaining() {
            return Err(AppError::InvalidRecord(format!(
                "invalid record size: expected to read {} bytes in record payload, but {} bytes left",
                size_of_body,
                body.remaining()
            )));
        }

        let offset = base_offset.checked_add(offset_delta as i64).ok_or_else(|| {
            AppError::InvalidRecord(format!(
                "offset delta {} overflows base offset {}",
                offset_delta, base_offset
            ))
        })?;
        let timestamp = match log_append_time {
            Some(timestamp) => timestamp,
            None => base_timestamp.checked_add(timestamp_delta).ok_or_else(|| {
                AppError::InvalidRecord(format!(
                    "timestamp delta {} overflows base timestamp {}",
                    timestamp_delta, base_timestamp
                ))
            })?,
        };
        let sequence = if base_sequence == NO_SEQUENCE {
            NO_SEQUENCE
        } else {
            crate::message::increment_sequence(base_sequence, offset_delta)
        };

        Ok(Record {
            offset,
            timestamp,
            sequence,
            key,
            value,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_with_headers() {
        let headers = vec![
            RecordHeader::new("header1", Some("value1")),
            RecordHeader::new("null-header", None::<&[u8]>),
        ];
        let mut buf = BytesMut::new();
        let written = DefaultRecord::write_to(&mut buf, 3, 250, Some(b"key"), None, &headers);
        assert_eq!(written, buf.len());
        assert_eq!(
            written,
            DefaultRecord::size_in_bytes(3, 250, Some(b"key"), None, &headers)
        );

        let mut bytes = buf.freeze();
        let record = DefaultRecord::read_from(&mut bytes, 100, 1000, 7, None).unwrap();
        assert!(!bytes.has_remaining());
        assert_eq!(record.offset, 103);
        assert_eq!(record.timestamp, 1250);
        assert_eq!(record.sequence, 10);
        assert_eq!(record.key.as_deref(), Some(&b"key"[..]));
        assert_eq!(record.value, None);
        assert_eq!(record.headers, headers);
    }

    #[test]
    fn test_log_append_time_overrides_delta() {
        let mut buf = BytesMut::new();
        DefaultRecord::write_to(&mut buf, 0, 5, None, Some(b"v"), &[]);
        let mut bytes = buf.freeze();
        let record = DefaultRecord::read_from(&mut bytes, 0, 10, NO_SEQUENCE, Some(999)).unwrap();
        assert_eq!(record.timestamp, 999);
        assert_eq!(record.sequence, NO_SEQUENCE);
    }

    #[test]
    fn test_overflowing_deltas_are_rejected() {
        let mut buf = BytesMut::new();
        DefaultRecord::write_to(&mut buf, 1, 5, None, Some(b"v"), &[]);
        let bytes = buf.freeze();

        let result = DefaultRecord::read_from(&mut bytes.clone(), i64::MAX, 0, NO_SEQUENCE, None);
        assert!(matches!(result, Err(AppError::InvalidRecord(_))));
        let result = DefaultRecord::read_from(&mut bytes.clone(), 0, i64::MAX, NO_SEQUENCE, None);
        assert!(matches!(result, Err(AppError::InvalidRecord(_))));
        // the append time replaces the delta, nothing to overflow
        let record =
            DefaultRecord::read_from(&mut bytes.clone(), 0, i64::MAX, NO_SEQUENCE, Some(7)).unwrap();
        assert_eq!(record.timestamp, 7);
    }

    #[test]
    fn test_trailing_bytes_in_body_are_rejected() {
        let mut buf = BytesMut::new();
        let body = DefaultRecord::size_of_body(0, 0, None, Some(b"v"), &[]);
        put_varint(&mut buf, body as i32 + 1);
        buf.put_i8(0);
        put_varlong(&mut buf, 0);
        put_varint(&mut buf, 0);
        put_varint(&mut buf, -1);
        put_varint(&mut buf, 1);
        buf.put_u8(b'v');
        put_varint(&mut buf, 0);
        buf.put_u8(0xff);

        let mut bytes = buf.freeze();
        let result = DefaultRecord::read_from(&mut bytes, 0, 0, NO_SEQUENCE, None);
        assert!(matches!(result, Err(AppError::InvalidRecord(_))));
    }

    #[test]
    fn test_negative_header_count_is_rejected() {
        let mut buf = BytesMut::new();
        let mut body = BytesMut::new();
        body.put_i8(0);
        put_varlong(&mut body, 0);
        put_varint(&mut body, 0);
        put_varint(&mut body, -1);
        put_varint(&mut body, -1);
        put_varint(&mut body, -2);
        put_varint(&mut buf, body.len() as i32);
        buf.put_slice(&body);

        let mut bytes = buf.freeze();
        let result = DefaultRecord::read_from(&mut bytes, 0, 0, NO_SEQUENCE, None);
        assert!(matches!(result, Err(AppError::InvalidRecord(_))));
    }

    #[test]
    fn test_timestamp_type_from_attributes() {
        assert_eq!(
            TimestampType::from_attributes(0x08),
            TimestampType::LogAppendTime
        );
        assert_eq!(TimestampType::from_attributes(0x02), TimestampType::CreateTime);
    }
}
