//! The collector event loop and its control surface.
//!
//! One task owns the pipe read end, the chunk decoder and the audit
//! store. Each pass over the loop services coalesced control requests,
//! checks the rotation triggers, runs retention, then parks on
//! `{control latch, pipe readable, next rotation}`.
//!
//! Shutdown paths:
//! - **pipe EOF**: every producer dropped its write end; in-flight
//!   reassembly is flushed and the loop exits — this is the normal
//!   "server is gone" shutdown.
//! - **terminate request**: data already in the pipe is drained without
//!   blocking, then the loop exits the same way.

use crate::error::Result;
use crate::pipe::{Message, PipeDecoder};
use auditlog_core::{record, AuditConfig, Clock};
use auditlog_storage::{next_rotation_time, AuditStore, RotationOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::unix::pipe;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ControlState {
    reload: AtomicBool,
    rotate: AtomicBool,
    terminate: AtomicBool,
    notify: Notify,
}

/// Cloneable handle for the three semantic control events. Requests are
/// flags, so repeated requests between loop passes coalesce into one.
#[derive(Clone)]
pub struct CollectorHandle {
    shared: Arc<ControlState>,
    config_tx: Arc<watch::Sender<AuditConfig>>,
}

impl CollectorHandle {
    /// Hand the collector a new configuration snapshot.
    pub fn reload(&self, config: AuditConfig) {
        let _ = self.config_tx.send(config);
        self.shared.reload.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Force one rotation.
    pub fn rotate(&self) {
        self.shared.rotate.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Request orderly shutdown.
    pub fn terminate(&self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }
}

enum Wake {
    Control,
    Readable(std::io::Result<()>),
    Timeout,
}

pub struct Collector {
    cfg: AuditConfig,
    store: AuditStore,
    decoder: PipeDecoder,
    receiver: pipe::Receiver,
    shared: Arc<ControlState>,
    config_rx: watch::Receiver<AuditConfig>,
    clock: Arc<dyn Clock>,
    next_rotation: Option<i64>,
    rotation_disabled: bool,
}

impl Collector {
    /// Open the store under `cfg` and bind to the pipe read end. Failing
    /// to open the initial audit file is fatal.
    pub async fn new(
        cfg: AuditConfig,
        receiver: pipe::Receiver,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, CollectorHandle)> {
        let store = AuditStore::open(&cfg, clock.clone()).await?;
        let (config_tx, config_rx) = watch::channel(cfg.clone());
        let shared = Arc::new(ControlState::default());
        let handle = CollectorHandle {
            shared: shared.clone(),
            config_tx: Arc::new(config_tx),
        };
        let next_rotation = next_rotation_time(clock.now(), cfg.rotation_age_minutes);
        Ok((
            Self {
                cfg,
                store,
                decoder: PipeDecoder::new(),
                receiver,
                shared,
                config_rx,
                clock,
                next_rotation,
                rotation_disabled: false,
            },
            handle,
        ))
    }

    /// Run until pipe EOF or a terminate request.
    pub async fn run(mut self) -> Result<()> {
        info!("audit collector started");
        let mut pipe_eof = false;

        loop {
            if self.shared.terminate.swap(false, Ordering::SeqCst) {
                self.drain_remaining().await?;
                break;
            }
            if self.shared.reload.swap(false, Ordering::SeqCst) {
                self.apply_reload().await?;
            }

            let mut now = self.clock.now();
            let mut time_based = false;
            if !self.rotation_disabled && self.cfg.rotation_age_minutes > 0 {
                if let Some(next) = self.next_rotation {
                    if now >= next {
                        time_based = true;
                    }
                }
            }
            let mut requested = self.shared.rotate.swap(false, Ordering::SeqCst) || time_based;
            if !requested && !self.rotation_disabled && self.cfg.rotation_size_kb > 0 {
                let size = self.store.file_size();
                if size >= self.cfg.rotation_size_kb * 1024
                    || size >= self.cfg.space_limit_kb * 1024
                {
                    requested = true;
                }
            }
            // An explicit rotate request is honored even while rotation
            // is disabled; it is the operator poking the collector.
            if requested {
                // Name a late time-based rotation after the planned
                // boundary, not after "now".
                let ctime = if time_based {
                    self.next_rotation.unwrap_or(now)
                } else {
                    now
                };
                if self.store.rotate(ctime).await? == RotationOutcome::Disabled {
                    self.rotation_disabled = true;
                }
                now = self.clock.now();
                self.next_rotation = next_rotation_time(now, self.cfg.rotation_age_minutes);
            }

            self.store.retain(&self.cfg).await?;

            let timeout = if self.rotation_disabled {
                None
            } else {
                self.next_rotation
                    .map(|next| Duration::from_secs((next - now).max(0) as u64))
            };

            let shared = self.shared.clone();
            let wake = tokio::select! {
                _ = shared.notify.notified() => Wake::Control,
                ready = self.receiver.readable() => Wake::Readable(ready),
                _ = tokio::time::sleep(timeout.unwrap_or_default()), if timeout.is_some() => {
                    Wake::Timeout
                }
            };

            match wake {
                Wake::Control | Wake::Timeout => {}
                Wake::Readable(Ok(())) => {
                    if self.read_pipe().await? {
                        pipe_eof = true;
                    }
                }
                Wake::Readable(Err(e)) => {
                    warn!(error = %e, "could not wait on audit pipe");
                }
            }

            if pipe_eof {
                break;
            }
        }

        debug!("audit collector shutting down");
        let mut messages = Vec::new();
        self.decoder.flush(&mut messages);
        self.dispatch_all(messages).await?;
        self.store.retain(&self.cfg).await?;
        self.store.close().await?;
        Ok(())
    }

    /// One non-blocking read off the pipe. Returns true on EOF.
    async fn read_pipe(&mut self) -> Result<bool> {
        let mut messages = Vec::new();
        let mut eof = false;
        match self.receiver.try_read(self.decoder.spare_capacity()) {
            Ok(0) => {
                // Zero bytes while readable means no writer holds the
                // pipe open any more: the server is gone.
                info!("audit pipe closed, shutting down");
                eof = true;
                self.decoder.flush(&mut messages);
            }
            Ok(n) => self.decoder.commit(n, &mut messages),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
            Err(e) => warn!(error = %e, "could not read from audit pipe"),
        }
        self.dispatch_all(messages).await?;
        Ok(eof)
    }

    /// Drain data already buffered in the pipe without waiting for more.
    async fn drain_remaining(&mut self) -> Result<()> {
        loop {
            let mut messages = Vec::new();
            match self.receiver.try_read(self.decoder.spare_capacity()) {
                Ok(0) => break,
                Ok(n) => {
                    self.decoder.commit(n, &mut messages);
                    self.dispatch_all(messages).await?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => {
                    warn!(error = %e, "could not read from audit pipe");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn dispatch_all(&mut self, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            match message {
                Message::Record(bytes) => {
                    if record::looks_like_record(&bytes) {
                        self.store.append(bytes.to_vec()).await?;
                    } else {
                        // A producer framed something that is not a
                        // record; keep the bytes rather than guess.
                        warn!(len = bytes.len(), "protocol message is not an audit record");
                        self.store.append_raw(&bytes).await?;
                    }
                }
                Message::Passthrough(bytes) => self.store.append_raw(&bytes).await?,
            }
        }
        Ok(())
    }

    async fn apply_reload(&mut self) -> Result<()> {
        let new_cfg = self.config_rx.borrow_and_update().clone();

        if new_cfg.rotation_age_minutes != self.cfg.rotation_age_minutes {
            self.next_rotation =
                next_rotation_time(self.clock.now(), new_cfg.rotation_age_minutes);
        }
        let threshold_changed = new_cfg.remain_threshold != self.cfg.remain_threshold;
        self.cfg = new_cfg;

        if threshold_changed {
            self.store.apply_capacity(&self.cfg).await?;
            self.store.retain(&self.cfg).await?;
        }
        if self.rotation_disabled {
            // A reload is the operator's "try again" for a failed open.
            self.rotation_disabled = false;
            self.shared.rotate.store(true, Ordering::SeqCst);
        }
        info!("audit configuration reloaded");
        Ok(())
    }
}
