//! The audit collector: many writers, one reader, one pipe.
//!
//! Database backends cannot write the audit log directly — concurrent
//! appends would interleave and rotation would tear records. Instead every
//! producer frames its records into chunks no larger than the pipe's
//! atomic-write limit and sends them down a shared pipe; a single
//! collector task reassembles per-producer streams and owns the on-disk
//! log exclusively.
//!
//! ```text
//! AuditReporter ──┐
//! AuditReporter ──┼──▶ OS pipe ──▶ Collector ──▶ AuditStore ──▶ <dir>/<n>_adt
//! AuditReporter ──┘   (atomic                (reassembly,
//!                      chunks)                rotation,
//!                                             retention)
//! ```
//!
//! ## Main components
//!
//! ### AuditReporter
//! The producer handle. Gates each event against the category masks of
//! the configuration snapshot, encodes it as a record, splits it into
//! chunks and writes each chunk with a single `write` call. A refused
//! write means the chunk is lost; retrying a partially-accepted chunk
//! could interleave with other producers, which is worse than the loss.
//!
//! ### Collector
//! The reader task. Multiplexes over `{control latch, pipe readable,
//! rotation timeout}`, feeds raw reads through the chunk decoder and the
//! per-producer reassembly buffers, appends complete records to the
//! store, and drives rotation and retention. Pipe EOF — every producer
//! has closed its write end — is the orderly shutdown signal.
//!
//! ### CollectorHandle
//! Cloneable control surface: `reload`, `rotate`, `terminate`. Requests
//! are coalesced flags; the handle only wakes the loop.

pub mod collector;
pub mod error;
pub mod pipe;
pub mod reassembly;
pub mod reporter;

pub use collector::{Collector, CollectorHandle};
pub use error::{Error, Result};
pub use pipe::{audit_channel, Message, PipeDecoder, PIPE_CHUNK_SIZE, PIPE_MAX_PAYLOAD};
pub use reporter::{AuditReporter, SessionIdentity};
