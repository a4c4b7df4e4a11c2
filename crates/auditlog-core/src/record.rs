//! Audit record codec.
//!
//! A record is a fixed 28-byte header followed by a string table of exactly
//! [`RECORD_FIELD_COUNT`] entries. Ten entries carry data (user id, user
//! name, database, client info, object, detail, node, thread id, local
//! port, remote port); the trailing three are reserved and always absent.
//!
//! Each string entry is a `u32` length followed by that many bytes. A
//! non-empty entry includes an explicit NUL terminator in its length; a
//! length of zero means the field is absent. This lets query output
//! distinguish "absent" from "empty".
//!
//! The `time` and `size` header words are producer-supplied placeholders:
//! the collector overwrites both at append time via [`stamp`], so the
//! stored timestamp is always the collector's clock, never the producer's.

use crate::error::{Error, Result};
use crate::kind::{AuditKind, AuditResult};

/// First two bytes of every record.
pub const RECORD_SIGNATURE: [u8; 2] = *b"AU";

/// Current format version.
pub const RECORD_VERSION: u16 = 0;

/// Number of string-table entries. Load-bearing: a record declaring any
/// other count is rejected, and changing it is a format version bump.
pub const RECORD_FIELD_COUNT: u16 = 13;

/// Named (non-reserved) string fields.
pub const NAMED_FIELD_COUNT: usize = 10;

/// Size of the common header shared by scan and delete paths:
/// signature(2) + version(2) + fields(2) + flags(2) + time(8) + size(4).
pub const RECORD_HEADER_SIZE: usize = 20;

/// Size of the full fixed prefix: common header + kind(4) + result(4).
pub const AUDIT_HEADER_SIZE: usize = RECORD_HEADER_SIZE + 8;

/// Record is live.
pub const FLAG_LIVE: u16 = 1;

/// Record has been tombstoned in place by a range delete.
pub const FLAG_TOMBSTONED: u16 = 2;

/// The fixed 20-byte prefix, enough to skip or tombstone a record without
/// decoding its string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u16,
    pub time: i64,
    pub size: u32,
}

impl RecordHeader {
    pub const SIZE: usize = RECORD_HEADER_SIZE;

    /// Decode and validate the fixed prefix. Signature, version and field
    /// count must all match; anything else means the rest of the file
    /// cannot be trusted.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::TruncatedRecord {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        if buf[0..2] != RECORD_SIGNATURE {
            return Err(Error::InvalidSignature);
        }
        let version = u16::from_ne_bytes([buf[2], buf[3]]);
        if version != RECORD_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let fields = u16::from_ne_bytes([buf[4], buf[5]]);
        if fields != RECORD_FIELD_COUNT {
            return Err(Error::InvalidFieldCount(fields));
        }
        let flags = u16::from_ne_bytes([buf[6], buf[7]]);
        let time = i64::from_ne_bytes(buf[8..16].try_into().unwrap());
        let size = u32::from_ne_bytes(buf[16..20].try_into().unwrap());
        Ok(Self { flags, time, size })
    }

    /// Re-encode the prefix, preserving signature, version and field count.
    /// Used by the delete engine to rewrite `flags` in place.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&RECORD_SIGNATURE);
        buf[2..4].copy_from_slice(&RECORD_VERSION.to_ne_bytes());
        buf[4..6].copy_from_slice(&RECORD_FIELD_COUNT.to_ne_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.time.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.size.to_ne_bytes());
        buf
    }

    pub fn is_live(&self) -> bool {
        self.flags == FLAG_LIVE
    }
}

/// The ten named string fields of a record, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTable {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub database: Option<String>,
    pub client_info: Option<String>,
    pub object_name: Option<String>,
    pub detail: Option<String>,
    pub node_name: Option<String>,
    pub thread_id: Option<String>,
    pub local_port: Option<String>,
    pub remote_port: Option<String>,
}

impl FieldTable {
    fn as_array(&self) -> [&Option<String>; NAMED_FIELD_COUNT] {
        [
            &self.user_id,
            &self.user_name,
            &self.database,
            &self.client_info,
            &self.object_name,
            &self.detail,
            &self.node_name,
            &self.thread_id,
            &self.local_port,
            &self.remote_port,
        ]
    }

    fn slot_mut(&mut self, index: usize) -> &mut Option<String> {
        match index {
            0 => &mut self.user_id,
            1 => &mut self.user_name,
            2 => &mut self.database,
            3 => &mut self.client_info,
            4 => &mut self.object_name,
            5 => &mut self.detail,
            6 => &mut self.node_name,
            7 => &mut self.thread_id,
            8 => &mut self.local_port,
            9 => &mut self.remote_port,
            _ => unreachable!("field index out of range"),
        }
    }

    /// Field by table position, `None` when absent.
    pub fn get(&self, index: usize) -> Option<&str> {
        if index >= NAMED_FIELD_COUNT {
            return None;
        }
        self.as_array()[index].as_deref()
    }
}

/// One decoded audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub result: AuditResult,
    pub flags: u16,
    /// Seconds since the UNIX epoch, stamped by the collector.
    pub time: i64,
    pub fields: FieldTable,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, result: AuditResult) -> Self {
        Self {
            kind,
            result,
            flags: FLAG_LIVE,
            time: 0,
            fields: FieldTable::default(),
        }
    }

    /// Serialize to the on-disk layout. The `size` word is filled with the
    /// final length; `time` carries whatever the record holds (the
    /// collector restamps both on append).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AUDIT_HEADER_SIZE + 64);
        buf.extend_from_slice(&RECORD_SIGNATURE);
        buf.extend_from_slice(&RECORD_VERSION.to_ne_bytes());
        buf.extend_from_slice(&RECORD_FIELD_COUNT.to_ne_bytes());
        buf.extend_from_slice(&self.flags.to_ne_bytes());
        buf.extend_from_slice(&self.time.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // size, patched below
        buf.extend_from_slice(&(self.kind as u32).to_ne_bytes());
        buf.extend_from_slice(&(self.result as u32).to_ne_bytes());

        for field in self.fields.as_array() {
            append_field(&mut buf, field.as_deref());
        }
        for _ in NAMED_FIELD_COUNT..RECORD_FIELD_COUNT as usize {
            append_field(&mut buf, None);
        }

        let size = buf.len() as u32;
        buf[16..20].copy_from_slice(&size.to_ne_bytes());
        buf
    }

    /// Decode a complete record from `buf`. The buffer must hold exactly
    /// one record; the declared `size` must match.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = RecordHeader::decode(buf)?;
        if header.size as usize != buf.len() {
            return Err(Error::TruncatedRecord {
                expected: header.size as usize,
                actual: buf.len(),
            });
        }
        if buf.len() < AUDIT_HEADER_SIZE {
            return Err(Error::TruncatedRecord {
                expected: AUDIT_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let raw_kind = u32::from_ne_bytes(buf[20..24].try_into().unwrap());
        let raw_result = u32::from_ne_bytes(buf[24..28].try_into().unwrap());
        // Tolerate kinds written by a newer version; the scan must not die
        // on a single forward-compatible record.
        let kind = AuditKind::try_from(raw_kind).unwrap_or(AuditKind::Unknown);
        let result = AuditResult::try_from(raw_result).unwrap_or(AuditResult::Unknown);

        let mut record = Self {
            kind,
            result,
            flags: header.flags,
            time: header.time,
            fields: FieldTable::default(),
        };

        let mut rest = &buf[AUDIT_HEADER_SIZE..];
        for index in 0..RECORD_FIELD_COUNT as usize {
            let value = take_field(&mut rest, index)?;
            if index < NAMED_FIELD_COUNT {
                *record.fields.slot_mut(index) = value;
            }
        }
        Ok(record)
    }
}

/// Whether `buf` starts with a plausible record header. Used to decide
/// between restamping a reassembled record and passing stray bytes through
/// untouched.
pub fn looks_like_record(buf: &[u8]) -> bool {
    buf.len() >= RECORD_HEADER_SIZE
        && buf[0..2] == RECORD_SIGNATURE
        && u16::from_ne_bytes([buf[2], buf[3]]) == RECORD_VERSION
        && u16::from_ne_bytes([buf[4], buf[5]]) == RECORD_FIELD_COUNT
}

/// Overwrite the `time` and `size` header words in an encoded record.
pub fn stamp(buf: &mut [u8], time: i64) {
    debug_assert!(buf.len() >= RECORD_HEADER_SIZE);
    let size = buf.len() as u32;
    buf[8..16].copy_from_slice(&time.to_ne_bytes());
    buf[16..20].copy_from_slice(&size.to_ne_bytes());
}

fn append_field(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        None => buf.extend_from_slice(&0u32.to_ne_bytes()),
        Some(s) => {
            let len = (s.len() + 1) as u32; // include the NUL terminator
            buf.extend_from_slice(&len.to_ne_bytes());
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
    }
}

fn take_field(rest: &mut &[u8], index: usize) -> Result<Option<String>> {
    if rest.len() < 4 {
        return Err(Error::InvalidField(index));
    }
    let len = u32::from_ne_bytes(rest[0..4].try_into().unwrap()) as usize;
    *rest = &rest[4..];
    if len == 0 {
        return Ok(None);
    }
    if len > rest.len() {
        return Err(Error::InvalidField(index));
    }
    let (bytes, tail) = rest.split_at(len);
    *rest = tail;
    if bytes[len - 1] != 0 {
        return Err(Error::InvalidField(index));
    }
    let text = std::str::from_utf8(&bytes[..len - 1]).map_err(|_| Error::InvalidField(index))?;
    Ok(Some(text.to_string()))
}
