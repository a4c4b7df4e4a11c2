//! Time-range queries over the audit directory.
//!
//! Queries load the index from disk rather than sharing the collector's
//! in-memory copy, so they work against a live directory and against a
//! foreign snapshot alike. File selection uses the creation-time bracket
//! of adjacent index slots; a slot whose `ctime` is negative spans a
//! wall-clock rewind and can never be pruned by bracket.
//!
//! A corrupted header or string table stops the scan of that file — the
//! remainder cannot be framed — but rows gathered up to that point are
//! kept, and other files still scan.

use crate::error::Result;
use crate::index::AuditIndexTable;
use crate::store::audit_file_path;
use auditlog_core::record::NAMED_FIELD_COUNT;
use auditlog_core::{AuditRecord, RecordHeader};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::warn;

/// Records larger than this are treated as index corruption rather than
/// honored with an allocation.
const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// One query result row: stamp, category, outcome, then the ten string
/// fields with the literal `"null"` standing in for absent values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub time: i64,
    pub kind: &'static str,
    pub result: &'static str,
    pub fields: [String; NAMED_FIELD_COUNT],
}

/// All live records with `time` in the half-open range `[begin, end)`.
pub async fn query(dir: &Path, begin: i64, end: i64) -> Result<Vec<AuditRow>> {
    let mut rows = Vec::new();
    if begin >= end {
        return Ok(rows);
    }
    let index = match AuditIndexTable::load(dir).await? {
        Some(index) if index.count > 0 => index,
        _ => return Ok(rows),
    };
    for pos in index.positions() {
        if !file_may_intersect(&index, pos, begin, end) {
            continue;
        }
        let path = audit_file_path(dir, index.slot(pos).filenum);
        scan_file(&path, begin, end, &mut rows).await?;
    }
    Ok(rows)
}

/// Whether the file at ring position `pos` can hold records in
/// `[begin, end)`, judged from the index alone.
pub(crate) fn file_may_intersect(
    index: &AuditIndexTable,
    pos: u32,
    begin: i64,
    end: i64,
) -> bool {
    let item = index.slot(pos);
    // Rewind-marked (negative) or unknown (zero) creation time: the file
    // cannot be pruned by time.
    if item.ctime <= 0 {
        return true;
    }
    if pos == index.curidx {
        return item.ctime <= end;
    }
    let next = index.slot(index.next_index(pos));
    if next.ctime > 0 {
        // Bracket [ctime, next.ctime] against [begin, end).
        let lo = item.ctime.max(begin);
        let hi = next.ctime.min(end);
        lo <= hi
    } else {
        item.ctime <= end
    }
}

async fn scan_file(path: &Path, begin: i64, end: i64, rows: &mut Vec<AuditRow>) -> Result<()> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not open audit file");
            return Ok(());
        }
    };
    let mut reader = BufReader::new(file);

    loop {
        let mut header_buf = [0u8; RecordHeader::SIZE];
        match reader.read_exact(&mut header_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let header = match RecordHeader::decode(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid data in audit file");
                break;
            }
        };
        if header.size < RecordHeader::SIZE as u32 || header.size > MAX_RECORD_SIZE {
            warn!(path = %path.display(), size = header.size, "invalid record size in audit file");
            break;
        }

        let mut record_buf = vec![0u8; header.size as usize];
        record_buf[..RecordHeader::SIZE].copy_from_slice(&header_buf);
        match reader.read_exact(&mut record_buf[RecordHeader::SIZE..]).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), "audit file ends mid-record");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        if header.time >= begin && header.time < end && header.is_live() {
            match AuditRecord::decode(&record_buf) {
                Ok(record) => rows.push(row_from(record)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid data in audit file");
                    break;
                }
            }
        }
    }
    Ok(())
}

fn row_from(record: AuditRecord) -> AuditRow {
    let fields = std::array::from_fn(|i| {
        record
            .fields
            .get(i)
            .map(str::to_string)
            .unwrap_or_else(|| "null".to_string())
    });
    AuditRow {
        time: record.time,
        kind: record.kind.description(),
        result: record.result.description(),
        fields,
    }
}
