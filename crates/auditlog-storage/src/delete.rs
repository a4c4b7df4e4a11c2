//! In-place range deletes.
//!
//! Deletion never moves bytes: matching records get their header `flags`
//! rewritten to the tombstone value, the file length never changes, and
//! applying the same delete twice is byte-identical to applying it once.
//! Space comes back only when retention unlinks the whole file.

use crate::error::Result;
use crate::index::AuditIndexTable;
use crate::query::file_may_intersect;
use crate::store::audit_file_path;
use auditlog_core::record::FLAG_TOMBSTONED;
use auditlog_core::RecordHeader;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

/// Tombstone every live record with `time` in `[begin, end)`. Returns the
/// number of records newly tombstoned.
pub async fn delete(dir: &Path, begin: i64, end: i64) -> Result<u64> {
    if begin >= end {
        return Ok(0);
    }
    let index = match AuditIndexTable::load(dir).await? {
        Some(index) if index.count > 0 => index,
        _ => return Ok(0),
    };
    let mut tombstoned = 0;
    for pos in index.positions() {
        if !file_may_intersect(&index, pos, begin, end) {
            continue;
        }
        let path = audit_file_path(dir, index.slot(pos).filenum);
        tombstoned += tombstone_file(&path, begin, end).await?;
    }
    Ok(tombstoned)
}

async fn tombstone_file(path: &Path, begin: i64, end: i64) -> Result<u64> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not open audit file");
            return Ok(0);
        }
    };

    let mut tombstoned = 0;
    loop {
        let mut header_buf = [0u8; RecordHeader::SIZE];
        match file.read_exact(&mut header_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut header = match RecordHeader::decode(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid data in audit file");
                break;
            }
        };
        if header.size < RecordHeader::SIZE as u32 {
            warn!(path = %path.display(), size = header.size, "invalid record size in audit file");
            break;
        }

        if header.time >= begin && header.time < end && header.is_live() {
            header.flags = FLAG_TOMBSTONED;
            file.seek(SeekFrom::Current(-(RecordHeader::SIZE as i64)))
                .await?;
            file.write_all(&header.encode()).await?;
            tombstoned += 1;
        }
        // Skip the body; the cursor sits just past the header either way.
        file.seek(SeekFrom::Current(
            header.size as i64 - RecordHeader::SIZE as i64,
        ))
        .await?;
    }
    file.flush().await?;
    Ok(tombstoned)
}
