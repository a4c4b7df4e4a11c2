//! Core types for the auditlog collector.
//!
//! This crate defines the pieces shared by every other auditlog crate:
//!
//! 1. **Record format**: the on-disk audit record (fixed header + string
//!    table) and its codec.
//! 2. **Categories**: the audit event kinds and result codes, with their
//!    stable numeric values and display names.
//! 3. **Configuration**: the snapshot of collector settings observed at
//!    startup and on reload.
//! 4. **Clock**: a small abstraction over wall-clock time so rewind
//!    handling can be exercised deterministically.
//!
//! ## Record format
//!
//! Every audit record is a self-describing byte string:
//!
//! ```text
//! ┌────────┬─────────┬────────┬───────┬────────┬────────┬────────┬────────┐
//! │ "AU"   │ version │ fields │ flags │ time   │ size   │ kind   │ result │
//! │ 2 B    │ u16     │ u16    │ u16   │ i64    │ u32    │ u32    │ u32    │
//! └────────┴─────────┴────────┴───────┴────────┴────────┴────────┴────────┘
//! followed by `fields` length-prefixed strings (len:u32, bytes, NUL).
//! ```
//!
//! Integers are host byte order; the audit directory is single-host state
//! and is never shipped across machines of different endianness.

pub mod clock;
pub mod config;
pub mod error;
pub mod kind;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuditConfig, CleanupPolicy};
pub use error::{Error, Result};
pub use kind::{AuditKind, AuditResult};
pub use record::{AuditRecord, FieldTable, RecordHeader};
