//! On-disk audit log storage.
//!
//! This crate owns everything under the audit directory: the circular
//! sequence of append-only record files, the binary index that describes
//! them, and the controllers that rotate and evict files.
//!
//! ## Layout
//!
//! ```text
//! <audit_dir>/
//!   index_table      ring header + one slot per file {ctime, filenum, filesize}
//!   0_adt            audit records, append-only
//!   1_adt
//!   ...
//! ```
//!
//! ## Main components
//!
//! ### AuditStore
//! The collector-side handle: owns the index, the open file and the space
//! accounting. Appends stamp each record with the collector clock, detect
//! wall-clock rewinds, and never drop data on a full disk (retry loop).
//! Rotation freezes the current slot and opens the next file number;
//! retention walks the ring from the oldest slot until both the space
//! budget and the file-count cap hold.
//!
//! ### Query / delete engines
//! Read-side entry points that load the index from disk (the on-disk state
//! is the source of truth between processes), prune files by creation-time
//! bracket, and scan record headers. Deletes tombstone matching records in
//! place; bytes are only reclaimed when retention unlinks the whole file.

pub mod delete;
pub mod error;
pub mod index;
pub mod query;
pub mod rotation;
pub mod store;

pub use delete::delete;
pub use error::{Error, Result};
pub use index::{AuditIndexTable, IndexSlot, INDEX_FILE_NAME};
pub use query::{query, AuditRow};
pub use rotation::next_rotation_time;
pub use store::{audit_file_path, AuditStore, RotationOutcome};
