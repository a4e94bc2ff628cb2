//! Record Codec Module
//!
//! Encodes entries into the self-describing on-disk record and validates records
//! on the way back in.
//!
//! A record is a one-line JSON header followed by the value payload:
//!
//! ```text
//! {"version":1,"key":"user:1","created_at":..,"expires_at":..,"size":7,"checksum":"1c291ca3"}\n
//! {"a":1}
//! ```
//!
//! The checksum is CRC32 over the payload bytes, so a truncated or bit-flipped
//! payload is caught even when the header is intact.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

/// Record layout version written by this codec.
pub const FORMAT_VERSION: u64 = 1;

const REQUIRED_FIELDS: [&str; 6] = [
    "version",
    "key",
    "created_at",
    "expires_at",
    "size",
    "checksum",
];

// == Record Header ==
/// Metadata line of a stored record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordHeader {
    pub version: u64,
    pub key: String,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub size: usize,
    pub checksum: String,
}

impl RecordHeader {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

// == Value Payload ==
/// Encodes a value payload.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Size of a value once encoded, used for memory accounting.
pub fn encoded_len(key: &str, value: &Value) -> Result<usize> {
    encode_value(value)
        .map(|bytes| bytes.len())
        .map_err(|err| CacheError::InvalidDataStructure {
            key: key.to_string(),
            reason: err.to_string(),
        })
}

pub fn checksum(payload: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(payload))
}

// == Encode ==
/// Serializes an entry into a complete record.
pub fn encode_record(entry: &CacheEntry) -> Result<Vec<u8>> {
    let payload = encode_value(&entry.value)?;
    let header = RecordHeader {
        version: FORMAT_VERSION,
        key: entry.key.clone(),
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        size: payload.len(),
        checksum: checksum(&payload),
    };

    let mut record = serde_json::to_vec(&header)?;
    record.push(b'\n');
    record.extend_from_slice(&payload);
    Ok(record)
}

// == Decode ==
/// Parses and validates a record stored for `expected_key`.
pub fn decode_record(expected_key: &str, bytes: &[u8]) -> Result<CacheEntry> {
    let (header, payload) = split_record(expected_key, bytes)?;

    if header.key != expected_key {
        return Err(corrupted(
            expected_key,
            format!("record belongs to key {:?}", header.key),
        ));
    }
    if payload.len() != header.size {
        return Err(corrupted(
            expected_key,
            format!(
                "payload is {} bytes, header declares {}",
                payload.len(),
                header.size
            ),
        ));
    }
    if checksum(payload) != header.checksum {
        return Err(corrupted(expected_key, "checksum mismatch".to_string()));
    }

    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| corrupted(expected_key, format!("payload does not decode: {err}")))?;

    Ok(CacheEntry {
        key: header.key,
        value,
        created_at: header.created_at,
        expires_at: header.expires_at,
        size_bytes: payload.len(),
    })
}

/// Parses only the header line; `label` names the record in errors.
pub fn decode_header(label: &str, bytes: &[u8]) -> Result<RecordHeader> {
    split_record(label, bytes).map(|(header, _)| header)
}

/// Splits a record into its parsed header and payload.
///
/// A record cut short anywhere, the header line included, is corruption.
/// `InvalidDataStructure` is kept for bytes that are not a record at all.
fn split_record<'a>(label: &str, bytes: &'a [u8]) -> Result<(RecordHeader, &'a [u8])> {
    if bytes.is_empty() {
        return Err(corrupted(label, "record is empty".to_string()));
    }
    let newline = match bytes.iter().position(|b| *b == b'\n') {
        Some(newline) => newline,
        None if bytes[0] == b'{' => {
            return Err(corrupted(label, "record truncated inside header".to_string()))
        }
        None => return Err(invalid(label, "no header terminator")),
    };
    let (head, rest) = bytes.split_at(newline);

    let fields = match serde_json::from_slice::<Value>(head) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => return Err(invalid(label, "header is not an object")),
        Err(err) if err.is_eof() => {
            return Err(corrupted(label, format!("header cut short: {err}")))
        }
        Err(err) => return Err(invalid(label, &format!("header does not parse: {err}"))),
    };

    Ok((parse_header(label, &fields)?, &rest[1..]))
}

fn parse_header(label: &str, fields: &Map<String, Value>) -> Result<RecordHeader> {
    for field in REQUIRED_FIELDS {
        if !fields.contains_key(field) {
            return Err(CacheError::MissingRequiredKey {
                key: label.to_string(),
                field,
            });
        }
    }

    let version = fields["version"]
        .as_u64()
        .ok_or_else(|| invalid(label, "version is not an integer"))?;
    if version != FORMAT_VERSION {
        return Err(invalid(label, &format!("unsupported version {version}")));
    }

    let expires_at = match &fields["expires_at"] {
        Value::Null => None,
        other => Some(
            other
                .as_u64()
                .ok_or_else(|| invalid(label, "expires_at is not a timestamp"))?,
        ),
    };

    Ok(RecordHeader {
        version,
        key: fields["key"]
            .as_str()
            .ok_or_else(|| invalid(label, "key is not a string"))?
            .to_string(),
        created_at: fields["created_at"]
            .as_u64()
            .ok_or_else(|| invalid(label, "created_at is not a timestamp"))?,
        expires_at,
        size: fields["size"]
            .as_u64()
            .ok_or_else(|| invalid(label, "size is not an integer"))? as usize,
        checksum: fields["checksum"]
            .as_str()
            .ok_or_else(|| invalid(label, "checksum is not a string"))?
            .to_string(),
    })
}

fn invalid(key: &str, reason: &str) -> CacheError {
    CacheError::InvalidDataStructure {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn corrupted(key: &str, reason: String) -> CacheError {
    CacheError::DataCorrupted {
        key: key.to_string(),
        reason,
    }
}
