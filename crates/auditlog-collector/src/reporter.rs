//! Producer-side reporting.
//!
//! An `AuditReporter` is what a backend holds: its stable producer id, a
//! clone of the pipe's write end, the configuration snapshot and whatever
//! session identity it can describe. `report` is fire-and-forget — a
//! producer must never block on, or fail because of, the audit path.

use crate::pipe::{encode_chunks, write_chunk};
use auditlog_core::{AuditConfig, AuditKind, AuditRecord, AuditResult};
use std::sync::Arc;
use tokio::net::unix::pipe;
use tracing::warn;

/// What a producer knows about its session; every piece is optional and
/// absent pieces encode as absent record fields.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub user_id: Option<u32>,
    pub user_name: Option<String>,
    pub database: Option<String>,
    /// Application name, rendered into the client field as `app@host`.
    pub application: Option<String>,
    pub remote_host: Option<String>,
    pub node_name: Option<String>,
    /// Producer thread id; 0 means unknown.
    pub thread_id: u64,
    /// Login time, rendered into the thread field as `tid@login_time`.
    pub login_time: i64,
    pub local_port: Option<u16>,
    pub remote_port: Option<String>,
}

pub struct AuditReporter {
    sender: Arc<pipe::Sender>,
    pid: u32,
    config: Arc<AuditConfig>,
    identity: SessionIdentity,
}

impl AuditReporter {
    /// `pid` must be nonzero and stable for the life of the producer; it
    /// keys chunk reassembly on the collector side.
    pub fn new(sender: Arc<pipe::Sender>, pid: u32, config: Arc<AuditConfig>) -> Self {
        debug_assert!(pid != 0);
        Self {
            sender,
            pid,
            config,
            identity: SessionIdentity::default(),
        }
    }

    pub fn with_identity(mut self, identity: SessionIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Swap in a new configuration snapshot (observed on reload).
    pub fn set_config(&mut self, config: Arc<AuditConfig>) {
        self.config = config;
    }

    /// Emit one audit event if its category is enabled.
    ///
    /// Chunk writes that the pipe refuses are dropped with a warning;
    /// retrying could interleave with other producers.
    pub async fn report(
        &self,
        kind: AuditKind,
        result: AuditResult,
        object_name: Option<&str>,
        detail: Option<&str>,
    ) -> crate::Result<()> {
        if kind == AuditKind::Unknown {
            warn!("unknown audit kind, discarding record");
            return Ok(());
        }
        if !self.config.emits(kind) {
            return Ok(());
        }

        let payload = self.build_record(kind, result, object_name, detail).encode();
        for chunk in encode_chunks(self.pid, &payload) {
            match write_chunk(&self.sender, &chunk).await {
                Ok(true) => {}
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "could not write to audit pipe, chunk lost");
                }
            }
        }
        Ok(())
    }

    fn build_record(
        &self,
        kind: AuditKind,
        result: AuditResult,
        object_name: Option<&str>,
        detail: Option<&str>,
    ) -> AuditRecord {
        let id = &self.identity;
        let mut rec = AuditRecord::new(kind, result);
        rec.fields.user_id = id.user_id.map(|u| u.to_string());
        rec.fields.user_name = id.user_name.clone();
        rec.fields.database = id.database.clone();
        rec.fields.client_info = match (&id.application, &id.remote_host) {
            (None, None) => None,
            (app, host) => Some(format!(
                "{}@{}",
                app.as_deref().unwrap_or("[unknown]"),
                host.as_deref().unwrap_or("[unknown]"),
            )),
        };
        rec.fields.object_name = object_name.map(str::to_string);
        rec.fields.detail = detail.map(str::to_string);
        rec.fields.node_name = id.node_name.clone();
        rec.fields.thread_id =
            (id.thread_id != 0).then(|| format!("{}@{}", id.thread_id, id.login_time));
        rec.fields.local_port = id.local_port.map(|p| p.to_string());
        rec.fields.remote_port = id.remote_port.clone();
        rec
    }
}
