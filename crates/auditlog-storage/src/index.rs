//! The audit index table.
//!
//! A fixed-capacity ring of file descriptors persisted as a flat binary
//! file next to the audit files themselves. Capacity is always
//! `remain_threshold + 1`: the threshold-many retained files plus the one
//! still being written.
//!
//! ```text
//! header: maxnum:u32 begidx:u32 curidx:u32 count:u32 last_audit_time:i64
//! slots:  maxnum × { ctime:i64 filenum:u32 filesize:u32 }
//! ```
//!
//! Integers are host byte order; the file never leaves the host. On every
//! mutation the table is rewritten in full — it is small (16 bytes per
//! slot) and partial updates are not worth the failure modes.
//!
//! A slot's `ctime` is the file's creation time, except that a negative
//! value means the system clock was observed going backwards while the
//! file was being written; the absolute value is still the creation time,
//! and the sign tells the query engine it cannot prune the file by time
//! bracket alone.

use crate::error::Result;
use std::path::Path;
use tracing::warn;

/// Name of the index file inside the audit directory.
pub const INDEX_FILE_NAME: &str = "index_table";

const HEADER_SIZE: usize = 4 * 4 + 8;
const SLOT_SIZE: usize = 8 + 4 + 4;

/// Sanity cap on ring capacity when loading; anything larger is treated as
/// a corrupted index.
const MAX_CAPACITY: u32 = 16 * 1024 * 1024;

/// One file's entry in the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSlot {
    /// Creation time; negative marks a wall-clock rewind (see module doc).
    pub ctime: i64,
    /// Monotonically increasing file number; names the file `<n>_adt`.
    pub filenum: u32,
    /// Final size once rotated out; last persisted size for the open file.
    pub filesize: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditIndexTable {
    pub maxnum: u32,
    pub begidx: u32,
    pub curidx: u32,
    pub count: u32,
    /// Wall clock of the most recent append; drives rewind detection and
    /// retention age checks.
    pub last_audit_time: i64,
    pub data: Vec<IndexSlot>,
}

impl AuditIndexTable {
    /// Empty ring of the given capacity.
    pub fn new(maxnum: u32) -> Self {
        Self {
            maxnum,
            begidx: 0,
            curidx: 0,
            count: 0,
            last_audit_time: 0,
            data: vec![IndexSlot::default(); maxnum as usize],
        }
    }

    pub fn slot(&self, index: u32) -> &IndexSlot {
        &self.data[index as usize]
    }

    pub fn slot_mut(&mut self, index: u32) -> &mut IndexSlot {
        &mut self.data[index as usize]
    }

    pub fn current(&self) -> &IndexSlot {
        self.slot(self.curidx)
    }

    pub fn current_mut(&mut self) -> &mut IndexSlot {
        let curidx = self.curidx;
        self.slot_mut(curidx)
    }

    /// Ring successor of `index`.
    pub fn next_index(&self, index: u32) -> u32 {
        (index + 1) % self.maxnum
    }

    /// Re-derive `count` from the cursor positions.
    pub fn recount(&mut self) {
        self.count = if self.curidx >= self.begidx {
            self.curidx - self.begidx + 1
        } else {
            self.curidx + self.maxnum + 1 - self.begidx
        };
    }

    /// Ring positions from `begidx` through `curidx`, in order. Empty when
    /// the table holds no files yet.
    pub fn positions(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.count as usize);
        if self.count == 0 {
            return out;
        }
        let mut index = self.begidx;
        loop {
            out.push(index);
            if index == self.curidx {
                break;
            }
            index = self.next_index(index);
        }
        out
    }

    /// Copy the live slots into a ring of a different capacity, preserving
    /// order. The first live slot lands at position 0.
    pub fn resized(&self, new_maxnum: u32) -> Self {
        let mut table = Self::new(new_maxnum);
        table.last_audit_time = self.last_audit_time;
        for (pos, index) in self.positions().into_iter().enumerate() {
            if pos as u32 >= new_maxnum {
                break;
            }
            table.data[pos] = *self.slot(index);
            table.curidx = pos as u32;
            table.count = pos as u32 + 1;
        }
        table
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.data.len() * SLOT_SIZE);
        buf.extend_from_slice(&self.maxnum.to_ne_bytes());
        buf.extend_from_slice(&self.begidx.to_ne_bytes());
        buf.extend_from_slice(&self.curidx.to_ne_bytes());
        buf.extend_from_slice(&self.count.to_ne_bytes());
        buf.extend_from_slice(&self.last_audit_time.to_ne_bytes());
        for slot in &self.data {
            buf.extend_from_slice(&slot.ctime.to_ne_bytes());
            buf.extend_from_slice(&slot.filenum.to_ne_bytes());
            buf.extend_from_slice(&slot.filesize.to_ne_bytes());
        }
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let maxnum = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let begidx = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
        let curidx = u32::from_ne_bytes(buf[8..12].try_into().unwrap());
        let count = u32::from_ne_bytes(buf[12..16].try_into().unwrap());
        let last_audit_time = i64::from_ne_bytes(buf[16..24].try_into().unwrap());
        if maxnum == 0 || maxnum > MAX_CAPACITY {
            return None;
        }
        if begidx >= maxnum || curidx >= maxnum || count > maxnum {
            return None;
        }
        if buf.len() != HEADER_SIZE + maxnum as usize * SLOT_SIZE {
            return None;
        }
        let mut data = Vec::with_capacity(maxnum as usize);
        let mut rest = &buf[HEADER_SIZE..];
        for _ in 0..maxnum {
            data.push(IndexSlot {
                ctime: i64::from_ne_bytes(rest[0..8].try_into().unwrap()),
                filenum: u32::from_ne_bytes(rest[8..12].try_into().unwrap()),
                filesize: u32::from_ne_bytes(rest[12..16].try_into().unwrap()),
            });
            rest = &rest[SLOT_SIZE..];
        }
        Some(Self {
            maxnum,
            begidx,
            curidx,
            count,
            last_audit_time,
            data,
        })
    }

    /// Load the table from `dir`. A missing or malformed file is not an
    /// error: the caller starts fresh, losing only retention bookkeeping.
    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(INDEX_FILE_NAME);
        let buf = match tokio::fs::read(&path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read audit index table");
                return Ok(None);
            }
        };
        match Self::decode(&buf) {
            Some(table) => Ok(Some(table)),
            None => {
                warn!(path = %path.display(), "malformed audit index table, starting fresh");
                Ok(None)
            }
        }
    }

    /// Rewrite the table in full.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(INDEX_FILE_NAME);
        tokio::fs::write(&path, self.encode()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_with_files(maxnum: u32, filenums: &[u32]) -> AuditIndexTable {
        let mut table = AuditIndexTable::new(maxnum);
        for (i, &fnum) in filenums.iter().enumerate() {
            table.data[i] = IndexSlot {
                ctime: 1000 + i as i64,
                filenum: fnum,
                filesize: 100 * (i as u32 + 1),
            };
        }
        table.curidx = filenums.len() as u32 - 1;
        table.recount();
        table
    }

    #[test]
    fn test_recount_simple_and_wrapped() {
        let mut table = AuditIndexTable::new(4);
        table.begidx = 0;
        table.curidx = 2;
        table.recount();
        assert_eq!(table.count, 3);

        table.begidx = 3;
        table.curidx = 1;
        table.recount();
        assert_eq!(table.count, 3);
    }

    #[test]
    fn test_positions_walk_ring_order() {
        let mut table = AuditIndexTable::new(4);
        table.begidx = 2;
        table.curidx = 0;
        table.recount();
        assert_eq!(table.positions(), vec![2, 3, 0]);
    }

    #[test]
    fn test_positions_empty_table() {
        let table = AuditIndexTable::new(4);
        assert!(table.positions().is_empty());
    }

    #[test]
    fn test_filenums_increase_in_ring_order() {
        let table = table_with_files(5, &[7, 8, 9, 10]);
        let nums: Vec<u32> = table
            .positions()
            .into_iter()
            .map(|i| table.slot(i).filenum)
            .collect();
        let mut sorted = nums.clone();
        sorted.sort_unstable();
        assert_eq!(nums, sorted);
    }

    #[test]
    fn test_resized_preserves_order_and_rebases() {
        let mut table = table_with_files(4, &[5, 6, 7]);
        // Rotate the ring so begidx is nonzero.
        table.data.rotate_right(1);
        table.begidx = 1;
        table.curidx = 3;
        table.recount();

        let resized = table.resized(6);
        assert_eq!(resized.maxnum, 6);
        assert_eq!(resized.begidx, 0);
        assert_eq!(resized.curidx, 2);
        assert_eq!(resized.count, 3);
        assert_eq!(resized.slot(0).filenum, 5);
        assert_eq!(resized.slot(2).filenum, 7);
        assert_eq!(resized.last_audit_time, table.last_audit_time);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut table = table_with_files(3, &[0, 1]);
        table.last_audit_time = 1_700_000_123;
        table.data[1].ctime = -1_700_000_000; // rewind marker survives
        table.save(dir.path()).await.unwrap();

        let loaded = AuditIndexTable::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded, table);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        assert!(AuditIndexTable::load(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_garbage_returns_none() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(INDEX_FILE_NAME), b"not an index")
            .await
            .unwrap();
        assert!(AuditIndexTable::load(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_truncated_returns_none() {
        let dir = TempDir::new().unwrap();
        let table = table_with_files(3, &[0, 1]);
        let mut bytes = Vec::new();
        table.save(dir.path()).await.unwrap();
        let full = tokio::fs::read(dir.path().join(INDEX_FILE_NAME)).await.unwrap();
        bytes.extend_from_slice(&full[..full.len() - 5]);
        tokio::fs::write(dir.path().join(INDEX_FILE_NAME), bytes)
            .await
            .unwrap();
        assert!(AuditIndexTable::load(dir.path()).await.unwrap().is_none());
    }
}
