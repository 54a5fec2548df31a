//! Decoder for records of the internal offset-commit log
//!
//! Keys and values of the `__consumer_offsets` topic are big-endian binary
//! structures prefixed by a 16-bit schema version:
//!
//! ```text
//! key   (v0, v1): version:u16  group_id:str16  topic:str16  partition:i32
//! value (v0, v1): version:u16  offset:u64  ...
//! ```
//!
//! Keys with a version above 1 describe group metadata rather than offset
//! commits and are ignored. A missing or empty value is a tombstone.

use crate::error::DecodeError;
use byteorder::{BigEndian, ReadBytesExt};

/// Name of the internal offset-commit topic
pub const OFFSETS_TOPIC: &str = "__consumer_offsets";

/// Highest key/value schema version describing an offset commit
pub const MAX_OFFSET_COMMIT_VERSION: u16 = 1;

/// Key portion of an offset-commit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetKey {
    /// Consumer group that committed
    pub group_id: String,
    /// Topic the commit refers to
    pub topic: String,
    /// Partition the commit refers to
    pub partition: i32,
}

/// A decoded offset commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOffsetRecord {
    /// Consumer group that committed
    pub group_id: String,
    /// Topic the commit refers to
    pub topic: String,
    /// Partition the commit refers to
    pub partition: i32,
    /// Committed offset
    pub offset: u64,
}

/// Outcome of decoding one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetRecord {
    /// An offset commit
    Commit(ConsumerOffsetRecord),
    /// An offset-commit deletion; carries no offset
    Tombstone(OffsetKey),
    /// A record that is not an offset commit (e.g. group metadata)
    Ignored {
        /// Key schema version found
        version: u16,
    },
}

/// Decode a raw key/value pair from the offset-commit log.
pub fn decode(key: Option<&[u8]>, value: Option<&[u8]>) -> Result<OffsetRecord, DecodeError> {
    let mut key = key.ok_or(DecodeError::MissingKey)?;

    let version = read_u16(&mut key, "key version")?;
    if version > MAX_OFFSET_COMMIT_VERSION {
        return Ok(OffsetRecord::Ignored { version });
    }
    let group_id = read_string(&mut key, "group_id")?;
    let topic = read_string(&mut key, "topic")?;
    let partition = key
        .read_i32::<BigEndian>()
        .map_err(|_| DecodeError::Truncated { field: "partition" })?;

    let mut value = match value {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Ok(OffsetRecord::Tombstone(OffsetKey {
                group_id,
                topic,
                partition,
            }))
        }
    };

    let version = read_u16(&mut value, "value version")?;
    if version > MAX_OFFSET_COMMIT_VERSION {
        return Err(DecodeError::UnsupportedValueVersion(version));
    }
    let offset = value
        .read_u64::<BigEndian>()
        .map_err(|_| DecodeError::Truncated { field: "offset" })?;

    Ok(OffsetRecord::Commit(ConsumerOffsetRecord {
        group_id,
        topic,
        partition,
        offset,
    }))
}

fn read_u16(input: &mut &[u8], field: &'static str) -> Result<u16, DecodeError> {
    input
        .read_u16::<BigEndian>()
        .map_err(|_| DecodeError::Truncated { field })
}

fn read_string(input: &mut &[u8], field: &'static str) -> Result<String, DecodeError> {
    let length = read_u16(input, field)? as usize;
    if input.len() < length {
        return Err(DecodeError::Truncated { field });
    }
    let (raw, rest) = input.split_at(length);
    *input = rest;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { field })
}
