//! Collector configuration snapshot.
//!
//! The collector never parses configuration itself; it observes a fully
//! formed [`AuditConfig`] at startup and again on every reload request.
//! Producers observe the same snapshot to decide, per category, whether an
//! event is emitted at all.
//!
//! ## Knobs
//!
//! - **rotation_age_minutes**: close the current file once the wall clock
//!   crosses the next multiple of this interval (0 disables).
//! - **rotation_size_kb**: close the current file once it reaches this
//!   size.
//! - **space_limit_kb**: soft budget for the whole directory; retention
//!   evicts the oldest files to get back under it.
//! - **remain_threshold**: hard cap on the number of retained files; also
//!   sizes the index ring (`remain_threshold + 1` slots).
//! - **remain_age_days**: under the time-priority policy, files younger
//!   than this survive the space budget (up to an absolute 1 TiB ceiling).
//! - **category masks**: per-kind emission filters, checked on the
//!   producer side before anything touches the pipe.

use crate::kind::AuditKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session mask bit: successful logins.
pub const SESSION_LOGIN_SUCCESS: u32 = 1 << 0;
/// Session mask bit: failed logins.
pub const SESSION_LOGIN_FAILED: u32 = 1 << 1;
/// Session mask bit: logouts.
pub const SESSION_LOGOUT: u32 = 1 << 2;

/// Which limit wins when space runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Keep files younger than `remain_age_days` even past the space
    /// budget, up to an absolute ceiling.
    TimePriority,
    /// The space budget always wins.
    SpacePriority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Master switch; when false, producers skip emission entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Root directory for audit files and the index.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Time-based rotation interval in minutes; 0 disables.
    #[serde(default = "default_rotation_age_minutes")]
    pub rotation_age_minutes: i64,

    /// Size-based rotation threshold in KiB.
    #[serde(default = "default_rotation_size_kb")]
    pub rotation_size_kb: u64,

    /// Soft total-space budget in KiB.
    #[serde(default = "default_space_limit_kb")]
    pub space_limit_kb: u64,

    /// Hard upper bound on retained file count.
    #[serde(default = "default_remain_threshold")]
    pub remain_threshold: u32,

    /// Minimum retention time in days under time-priority; 0 disables.
    #[serde(default = "default_remain_age_days")]
    pub remain_age_days: i64,

    #[serde(default = "default_cleanup_policy")]
    pub cleanup_policy: CleanupPolicy,

    /// Session events: bitmask of login success / login failed / logout.
    #[serde(default = "default_session_mask")]
    pub session: u32,

    /// System lifecycle events (start, stop, recover, switchover).
    #[serde(default = "default_on")]
    pub server_action: bool,

    /// Lock and unlock of user accounts.
    #[serde(default = "default_on")]
    pub lock_user: bool,

    /// Grant and revoke of roles.
    #[serde(default = "default_off")]
    pub privilege_admin: bool,

    /// Access-violation events.
    #[serde(default = "default_off")]
    pub user_violation: bool,

    /// DDL events: one bit per object kind, `AuditKind::ddl_bit` order.
    #[serde(default = "default_ddl_mask")]
    pub ddl: u32,

    /// Mutating DML.
    #[serde(default = "default_off")]
    pub dml: bool,

    /// SELECT statements.
    #[serde(default = "default_off")]
    pub dml_select: bool,

    /// Function and procedure execution.
    #[serde(default = "default_off")]
    pub exec: bool,

    /// COPY in either direction.
    #[serde(default = "default_off")]
    pub copy: bool,

    /// SET of server parameters.
    #[serde(default = "default_on")]
    pub set_parameter: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            directory: default_directory(),
            rotation_age_minutes: default_rotation_age_minutes(),
            rotation_size_kb: default_rotation_size_kb(),
            space_limit_kb: default_space_limit_kb(),
            remain_threshold: default_remain_threshold(),
            remain_age_days: default_remain_age_days(),
            cleanup_policy: default_cleanup_policy(),
            session: default_session_mask(),
            server_action: default_on(),
            lock_user: default_on(),
            privilege_admin: default_off(),
            user_violation: default_off(),
            ddl: default_ddl_mask(),
            dml: default_off(),
            dml_select: default_off(),
            exec: default_off(),
            copy: default_off(),
            set_parameter: default_on(),
        }
    }
}

impl AuditConfig {
    /// Whether events of `kind` are emitted under this snapshot.
    ///
    /// This is the single gate for every category; internal events are
    /// always emitted, unknown kinds never are.
    pub fn emits(&self, kind: AuditKind) -> bool {
        if !self.enabled {
            return false;
        }
        match kind {
            AuditKind::Unknown => false,
            AuditKind::InternalEvent => true,
            AuditKind::LoginSuccess => self.session & SESSION_LOGIN_SUCCESS != 0,
            AuditKind::LoginFailed => self.session & SESSION_LOGIN_FAILED != 0,
            AuditKind::UserLogout => self.session & SESSION_LOGOUT != 0,
            AuditKind::SystemStart
            | AuditKind::SystemStop
            | AuditKind::SystemRecover
            | AuditKind::SystemSwitch => self.server_action,
            AuditKind::LockUser | AuditKind::UnlockUser => self.lock_user,
            AuditKind::GrantRole | AuditKind::RevokeRole => self.privilege_admin,
            AuditKind::UserViolation => self.user_violation,
            AuditKind::DmlAction => self.dml,
            AuditKind::DmlActionSelect => self.dml_select,
            AuditKind::FunctionExec => self.exec,
            AuditKind::CopyTo | AuditKind::CopyFrom => self.copy,
            AuditKind::SetParameter => self.set_parameter,
            ddl => match ddl.ddl_bit() {
                Some(bit) => self.ddl & bit != 0,
                None => false,
            },
        }
    }

    /// Ring capacity implied by this snapshot.
    pub fn ring_capacity(&self) -> u32 {
        self.remain_threshold + 1
    }
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> PathBuf {
    PathBuf::from("audit")
}

fn default_rotation_age_minutes() -> i64 {
    24 * 60 // daily
}

fn default_rotation_size_kb() -> u64 {
    10 * 1024 // 10 MiB
}

fn default_space_limit_kb() -> u64 {
    1024 * 1024 // 1 GiB
}

fn default_remain_threshold() -> u32 {
    1024
}

fn default_remain_age_days() -> i64 {
    90
}

fn default_cleanup_policy() -> CleanupPolicy {
    CleanupPolicy::TimePriority
}

fn default_session_mask() -> u32 {
    SESSION_LOGIN_SUCCESS | SESSION_LOGIN_FAILED | SESSION_LOGOUT
}

fn default_ddl_mask() -> u32 {
    u32::MAX
}

fn default_on() -> bool {
    true
}

fn default_off() -> bool {
    false
}
