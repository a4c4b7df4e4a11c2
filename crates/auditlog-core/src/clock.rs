//! Wall-clock abstraction.
//!
//! The collector stamps records, plans rotations and detects clock rewinds
//! against a [`Clock`] rather than reading `SystemTime` directly, so the
//! rewind path can be driven deterministically in tests. Production code
//! uses [`SystemClock`]; tests use [`ManualClock`] and move time by hand,
//! including backwards.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in whole seconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// The real wall clock. May legitimately go backwards after an operator or
/// NTP step; callers are expected to cope.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A clock set by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    pub fn new(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}
