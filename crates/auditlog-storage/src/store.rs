//! The collector-side store: current file, index and space accounting.
//!
//! `AuditStore` is single-owner state. The collector task is the only
//! writer; queries and deletes run elsewhere against the on-disk index.
//!
//! ## Append path
//!
//! Every record append (a) restamps the header with the store clock and
//! the final length, (b) checks for a wall-clock rewind against the last
//! appended time, (c) writes, retrying forever on a full disk — audit data
//! must not be silently dropped — and (d) flushes. Non-protocol bytes go
//! through [`AuditStore::append_raw`], which skips the stamping.
//!
//! ## Rotation
//!
//! Rotation opens the next file number first and only then freezes the
//! old slot, so a failed open leaves the current file untouched. Fd
//! exhaustion (`ENFILE`/`EMFILE`) is transient and retried next cycle;
//! any other open failure reports [`RotationOutcome::Disabled`] and the
//! caller stops rotating until the next reload.

use crate::error::{Error, Result};
use crate::index::{AuditIndexTable, IndexSlot, INDEX_FILE_NAME};
use auditlog_core::config::CleanupPolicy;
use auditlog_core::record;
use auditlog_core::{AuditConfig, AuditKind, AuditRecord, AuditResult, Clock};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// One space-overshoot warning per this many bytes.
const SPACE_WARNING_INTERVAL: u64 = 10 * 1024 * 1024;

/// Absolute ceiling on retained bytes; past this, the time-priority keep
/// rule no longer applies.
const SPACE_CEILING: u64 = 1 << 40; // 1 TiB

/// Audit files are named `<filenum>_adt` under the audit directory.
pub fn audit_file_path(dir: &Path, filenum: u32) -> PathBuf {
    dir.join(format!("{filenum}_adt"))
}

/// What happened when a rotation was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    Rotated,
    /// Transient fd exhaustion; the current file stays open and the next
    /// cycle retries.
    RetryNextCycle,
    /// The new file could not be created; rotation stays off until the
    /// next reload.
    Disabled,
}

pub struct AuditStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    index: AuditIndexTable,
    file: File,
    file_size: u64,
    /// Bytes in rotated-out (closed) files.
    total_space: u64,
    /// Next overshoot level that warrants a warning.
    space_beyond: u64,
}

impl AuditStore {
    /// Open the store: load or create the index, open the current file and
    /// reconcile a `remain_threshold` change across restarts.
    ///
    /// A failure to open the current file here is fatal; the directory is
    /// not usable.
    pub async fn open(cfg: &AuditConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.directory).await?;

        let loaded = AuditIndexTable::load(&cfg.directory).await?;
        let fresh = loaded.is_none();
        let mut index = loaded.unwrap_or_else(|| AuditIndexTable::new(cfg.ring_capacity()));

        let now = clock.now();
        let filenum = index.current().filenum;
        let (file, file_size, created) = open_audit_file(&cfg.directory, filenum).await?;
        if created {
            index.current_mut().ctime = now;
        }
        index.recount();
        index.save(&cfg.directory).await?;

        let mut store = Self {
            dir: cfg.directory.clone(),
            clock,
            index,
            file,
            file_size,
            total_space: 0,
            space_beyond: 0,
        };
        if store.file_size == 0 {
            store.internal_event("file", "create a new audit file").await?;
        }

        // Closed-file space; the open file is accounted live.
        store.total_space = store
            .index
            .positions()
            .into_iter()
            .filter(|&i| i != store.index.curidx)
            .map(|i| store.index.slot(i).filesize as u64)
            .sum();

        if !fresh {
            store.apply_capacity(cfg).await?;
        }

        info!(
            dir = %store.dir.display(),
            filenum,
            files = store.index.count,
            total_space = store.total_space,
            "audit store opened"
        );
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Size of the open file, including unrotated appends.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn index(&self) -> &AuditIndexTable {
        &self.index
    }

    /// Reconcile the ring capacity with a changed `remain_threshold`.
    ///
    /// Shrinking first drops the on-disk table and runs retention so the
    /// survivors fit, then the ring is copied into its new capacity.
    pub async fn apply_capacity(&mut self, cfg: &AuditConfig) -> Result<()> {
        let capacity = cfg.ring_capacity();
        if self.index.maxnum == capacity {
            return Ok(());
        }
        if self.index.maxnum > capacity {
            let path = self.dir.join(INDEX_FILE_NAME);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "could not remove audit index table file");
                }
            }
            self.retain(cfg).await?;
        }
        self.index = self.index.resized(capacity);
        self.index.save(&self.dir).await?;
        Ok(())
    }

    /// Append one encoded record: restamp, detect rewinds, write, flush.
    pub async fn append(&mut self, buf: Vec<u8>) -> Result<()> {
        let now = self.clock.now();

        if self.index.count > 0 && self.index.last_audit_time > now {
            // The wall clock went backwards under the open file. Flip the
            // slot's ctime sign so time-bracket pruning skips this file,
            // and leave a marker record in the stream.
            warn!(
                last_audit_time = self.index.last_audit_time,
                now, "system time moved backwards"
            );
            if self.index.current().ctime > 0 {
                self.index.current_mut().ctime *= -1;
            }
            self.index.last_audit_time = now;
            self.index.save(&self.dir).await?;

            let mut marker =
                AuditRecord::new(AuditKind::InternalEvent, AuditResult::Ok);
            marker.fields.object_name = Some("time".to_string());
            marker.fields.detail = Some("system time changed.".to_string());
            self.write_stamped(marker.encode(), now).await?;
        }

        self.index.last_audit_time = now;
        self.write_stamped(buf, now).await
    }

    /// Append non-protocol bytes verbatim (stray output from third-party
    /// code sharing the pipe).
    pub async fn append_raw(&mut self, buf: &[u8]) -> Result<()> {
        self.write_out(buf).await
    }

    /// Append an internal-event record describing collector activity.
    pub async fn internal_event(&mut self, object: &str, detail: &str) -> Result<()> {
        let mut rec = AuditRecord::new(AuditKind::InternalEvent, AuditResult::Ok);
        rec.fields.object_name = Some(object.to_string());
        rec.fields.detail = Some(detail.to_string());
        self.append(rec.encode()).await
    }

    async fn write_stamped(&mut self, mut buf: Vec<u8>, now: i64) -> Result<()> {
        debug_assert!(record::looks_like_record(&buf));
        record::stamp(&mut buf, now);
        self.write_out(&buf).await
    }

    async fn write_out(&mut self, buf: &[u8]) -> Result<()> {
        loop {
            match self.file.write_all(buf).await {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => {
                    // No space to log the failure either; back off and
                    // retry until the operator makes room.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(error = %e, "could not write to audit file");
                    return Err(e.into());
                }
            }
        }
        self.file.flush().await?;
        self.file_size += buf.len() as u64;
        Ok(())
    }

    /// Close the current file and open the next file number.
    ///
    /// `ctime` is the logical creation time for the new slot: the planned
    /// rotation time for time-based rotations (so a late timer does not
    /// slip the name bracket), the current time otherwise.
    pub async fn rotate(&mut self, ctime: i64) -> Result<RotationOutcome> {
        let next_filenum = self.index.current().filenum.wrapping_add(1);
        let (file, size, created) = match open_audit_file(&self.dir, next_filenum).await {
            Ok(opened) => opened,
            Err(Error::Io(e))
                if matches!(e.raw_os_error(), Some(libc::ENFILE) | Some(libc::EMFILE)) =>
            {
                warn!("out of file descriptors, keeping current audit file");
                return Ok(RotationOutcome::RetryNextCycle);
            }
            Err(e) => {
                warn!(error = %e, "could not open new audit file, disabling rotation until reload");
                return Ok(RotationOutcome::Disabled);
            }
        };

        let frozen = self.file_size;
        self.index.current_mut().filesize = frozen as u32;
        self.total_space += frozen;

        let next_pos = self.index.next_index(self.index.curidx);
        self.index.curidx = next_pos;
        *self.index.current_mut() = IndexSlot {
            ctime: if created { ctime } else { 0 },
            filenum: next_filenum,
            filesize: 0,
        };
        self.index.recount();
        self.index.save(&self.dir).await?;

        self.file = file;
        self.file_size = size;
        debug!(filenum = next_filenum, "rotated audit file");
        if size == 0 {
            self.internal_event("file", "create a new audit file").await?;
        }
        Ok(RotationOutcome::Rotated)
    }

    /// Evict the oldest files until the space budget and the file-count
    /// cap both hold (or nothing more can go).
    pub async fn retain(&mut self, cfg: &AuditConfig) -> Result<()> {
        if self.index.count == 0 {
            return Ok(());
        }
        let space_limit = cfg.space_limit_kb.saturating_mul(1024);
        let remain_secs = cfg.remain_age_days.saturating_mul(86400);

        loop {
            let used = self.total_space + self.file_size;
            let over_space = used >= space_limit;
            let over_count = self.index.count > cfg.remain_threshold;
            if !over_space && !over_count {
                break;
            }
            // Never evict the file still being written.
            if self.index.begidx == self.index.curidx {
                break;
            }

            let victim_pos = self.index.begidx;
            let victim = *self.index.slot(victim_pos);

            if !over_count
                && cfg.cleanup_policy == CleanupPolicy::TimePriority
                && remain_secs > 0
                && used <= SPACE_CEILING
            {
                let next = *self.index.slot(self.index.next_index(victim_pos));
                let victim_age = self.index.last_audit_time - victim.ctime;
                let next_age = self.index.last_audit_time - next.ctime;
                if victim_age < remain_secs && next_age < remain_secs {
                    let overshoot = used.saturating_sub(space_limit);
                    if overshoot >= self.space_beyond {
                        warn!(
                            total_bytes = used,
                            space_limit_kb = cfg.space_limit_kb,
                            remain_age_days = cfg.remain_age_days,
                            "audit space exceeds the budget, files kept under time-priority retention"
                        );
                        self.space_beyond =
                            (overshoot / SPACE_WARNING_INTERVAL + 1) * SPACE_WARNING_INTERVAL;
                    }
                    break;
                }
            }

            let path = audit_file_path(&self.dir, victim.filenum);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not remove audit file");
                    break;
                }
            }

            if over_space {
                warn!(
                    total_bytes = used,
                    space_limit_kb = cfg.space_limit_kb,
                    "audit file total space exceeds the configured limit"
                );
            }
            if over_count {
                warn!(
                    count = self.index.count,
                    remain_threshold = cfg.remain_threshold,
                    "audit file count exceeds the configured threshold"
                );
            }
            warn!(filenum = victim.filenum, "removed audit file");

            self.total_space = self.total_space.saturating_sub(victim.filesize as u64);
            self.index.count = self.index.count.saturating_sub(1);
            self.index.begidx = self.index.next_index(victim_pos);
            *self.index.slot_mut(victim_pos) = IndexSlot::default();
            self.index.save(&self.dir).await?;

            self.internal_event(
                "file",
                &format!("remove an audit file(number: {})", victim.filenum),
            )
            .await?;
        }
        Ok(())
    }

    /// Persist the final size of the open file and flush it.
    pub async fn close(mut self) -> Result<()> {
        let size = self.file_size;
        self.index.current_mut().filesize = size as u32;
        self.index.save(&self.dir).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Open `<dir>/<filenum>_adt` append-only with owner-only permissions,
/// forcing the mode past the process umask. Returns the handle, its
/// current size and whether the file was freshly created.
async fn open_audit_file(dir: &Path, filenum: u32) -> Result<(File, u64, bool)> {
    let path = audit_file_path(dir, filenum);
    let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o600)
        .open(&path)
        .await?;
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    let size = file.metadata().await?.len();
    Ok((file, size, !existed))
}
