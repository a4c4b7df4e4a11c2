//! Audit event categories and result codes.
//!
//! The numeric values are part of the on-disk format and must never be
//! reordered. New kinds are appended; removing one is a format version
//! bump.

use crate::error::Error;

/// What happened. Stored as a `u32` in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AuditKind {
    Unknown = 0,
    LoginSuccess = 1,
    LoginFailed = 2,
    UserLogout = 3,
    SystemStart = 4,
    SystemStop = 5,
    SystemRecover = 6,
    SystemSwitch = 7,
    LockUser = 8,
    UnlockUser = 9,
    GrantRole = 10,
    RevokeRole = 11,
    UserViolation = 12,
    DdlDatabase = 13,
    DdlDirectory = 14,
    DdlTablespace = 15,
    DdlSchema = 16,
    DdlUser = 17,
    DdlTable = 18,
    DdlIndex = 19,
    DdlView = 20,
    DdlTrigger = 21,
    DdlFunction = 22,
    DdlResourcePool = 23,
    DdlWorkload = 24,
    DdlServerForHadoop = 25,
    DdlDataSource = 26,
    DdlNodeGroup = 27,
    DdlRowLevelSecurity = 28,
    DdlSynonym = 29,
    DdlType = 30,
    DdlTextSearch = 31,
    DmlAction = 32,
    DmlActionSelect = 33,
    InternalEvent = 34,
    FunctionExec = 35,
    CopyTo = 36,
    CopyFrom = 37,
    SetParameter = 38,
}

impl AuditKind {
    /// Display name used in query output.
    pub fn description(&self) -> &'static str {
        match self {
            AuditKind::Unknown => "unknown",
            AuditKind::LoginSuccess => "login_success",
            AuditKind::LoginFailed => "login_failed",
            AuditKind::UserLogout => "user_logout",
            AuditKind::SystemStart => "system_start",
            AuditKind::SystemStop => "system_stop",
            AuditKind::SystemRecover => "system_recover",
            AuditKind::SystemSwitch => "system_switch",
            AuditKind::LockUser => "lock_user",
            AuditKind::UnlockUser => "unlock_user",
            AuditKind::GrantRole => "grant_role",
            AuditKind::RevokeRole => "revoke_role",
            AuditKind::UserViolation => "user_violation",
            AuditKind::DdlDatabase => "ddl_database",
            AuditKind::DdlDirectory => "ddl_directory",
            AuditKind::DdlTablespace => "ddl_tablespace",
            AuditKind::DdlSchema => "ddl_schema",
            AuditKind::DdlUser => "ddl_user",
            AuditKind::DdlTable => "ddl_table",
            AuditKind::DdlIndex => "ddl_index",
            AuditKind::DdlView => "ddl_view",
            AuditKind::DdlTrigger => "ddl_trigger",
            AuditKind::DdlFunction => "ddl_function",
            AuditKind::DdlResourcePool => "ddl_resourcepool",
            AuditKind::DdlWorkload => "ddl_workload",
            AuditKind::DdlServerForHadoop => "ddl_serverforhadoop",
            AuditKind::DdlDataSource => "ddl_datasource",
            AuditKind::DdlNodeGroup => "ddl_nodegroup",
            AuditKind::DdlRowLevelSecurity => "ddl_rowlevelsecurity",
            AuditKind::DdlSynonym => "ddl_synonym",
            AuditKind::DdlType => "ddl_type",
            AuditKind::DdlTextSearch => "ddl_textsearch",
            AuditKind::DmlAction => "dml_action",
            AuditKind::DmlActionSelect => "dml_action_select",
            AuditKind::InternalEvent => "internal_event",
            AuditKind::FunctionExec => "function_exec",
            AuditKind::CopyTo => "copy_to",
            AuditKind::CopyFrom => "copy_from",
            AuditKind::SetParameter => "set_parameter",
        }
    }

    /// The DDL mask bit for this kind, if it is a DDL kind.
    pub fn ddl_bit(&self) -> Option<u32> {
        let raw = *self as u32;
        let base = AuditKind::DdlDatabase as u32;
        let last = AuditKind::DdlTextSearch as u32;
        if (base..=last).contains(&raw) {
            Some(1 << (raw - base))
        } else {
            None
        }
    }

    /// Display name for a raw on-disk value, tolerating kinds written by a
    /// newer version.
    pub fn describe_raw(raw: u32) -> &'static str {
        AuditKind::try_from(raw)
            .map(|k| k.description())
            .unwrap_or("unknown")
    }
}

impl TryFrom<u32> for AuditKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => AuditKind::Unknown,
            1 => AuditKind::LoginSuccess,
            2 => AuditKind::LoginFailed,
            3 => AuditKind::UserLogout,
            4 => AuditKind::SystemStart,
            5 => AuditKind::SystemStop,
            6 => AuditKind::SystemRecover,
            7 => AuditKind::SystemSwitch,
            8 => AuditKind::LockUser,
            9 => AuditKind::UnlockUser,
            10 => AuditKind::GrantRole,
            11 => AuditKind::RevokeRole,
            12 => AuditKind::UserViolation,
            13 => AuditKind::DdlDatabase,
            14 => AuditKind::DdlDirectory,
            15 => AuditKind::DdlTablespace,
            16 => AuditKind::DdlSchema,
            17 => AuditKind::DdlUser,
            18 => AuditKind::DdlTable,
            19 => AuditKind::DdlIndex,
            20 => AuditKind::DdlView,
            21 => AuditKind::DdlTrigger,
            22 => AuditKind::DdlFunction,
            23 => AuditKind::DdlResourcePool,
            24 => AuditKind::DdlWorkload,
            25 => AuditKind::DdlServerForHadoop,
            26 => AuditKind::DdlDataSource,
            27 => AuditKind::DdlNodeGroup,
            28 => AuditKind::DdlRowLevelSecurity,
            29 => AuditKind::DdlSynonym,
            30 => AuditKind::DdlType,
            31 => AuditKind::DdlTextSearch,
            32 => AuditKind::DmlAction,
            33 => AuditKind::DmlActionSelect,
            34 => AuditKind::InternalEvent,
            35 => AuditKind::FunctionExec,
            36 => AuditKind::CopyTo,
            37 => AuditKind::CopyFrom,
            38 => AuditKind::SetParameter,
            _ => return Err(Error::InvalidKind(value)),
        })
    }
}

/// How it went. Stored as a `u32` in the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AuditResult {
    Unknown = 0,
    Ok = 1,
    Failed = 2,
}

impl AuditResult {
    pub fn description(&self) -> &'static str {
        match self {
            AuditResult::Unknown => "unknown",
            AuditResult::Ok => "ok",
            AuditResult::Failed => "failed",
        }
    }

    pub fn describe_raw(raw: u32) -> &'static str {
        AuditResult::try_from(raw)
            .map(|r| r.description())
            .unwrap_or("unknown")
    }
}

impl TryFrom<u32> for AuditResult {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AuditResult::Unknown),
            1 => Ok(AuditResult::Ok),
            2 => Ok(AuditResult::Failed),
            _ => Err(Error::InvalidResult(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_all_values() {
        for raw in 0u32..=38 {
            let kind = AuditKind::try_from(raw).unwrap();
            assert_eq!(kind as u32, raw);
        }
    }

    #[test]
    fn test_kind_rejects_out_of_range() {
        assert!(AuditKind::try_from(39).is_err());
        assert!(AuditKind::try_from(u32::MAX).is_err());
    }

    #[test]
    fn test_describe_raw_falls_back_to_unknown() {
        assert_eq!(AuditKind::describe_raw(2), "login_failed");
        assert_eq!(AuditKind::describe_raw(1000), "unknown");
        assert_eq!(AuditResult::describe_raw(1), "ok");
        assert_eq!(AuditResult::describe_raw(7), "unknown");
    }

    #[test]
    fn test_ddl_bits_are_distinct() {
        let mut seen = 0u32;
        for raw in 0u32..=38 {
            let kind = AuditKind::try_from(raw).unwrap();
            if let Some(bit) = kind.ddl_bit() {
                assert_eq!(seen & bit, 0, "duplicate ddl bit for {:?}", kind);
                seen |= bit;
            }
        }
        // 19 DDL object kinds, contiguous low bits.
        assert_eq!(seen, (1 << 19) - 1);
    }

    #[test]
    fn test_non_ddl_kinds_have_no_bit() {
        assert_eq!(AuditKind::LoginSuccess.ddl_bit(), None);
        assert_eq!(AuditKind::DmlAction.ddl_bit(), None);
        assert_eq!(AuditKind::InternalEvent.ddl_bit(), None);
    }

    #[test]
    fn test_result_roundtrip() {
        for raw in 0u32..=2 {
            let r = AuditResult::try_from(raw).unwrap();
            assert_eq!(r as u32, raw);
        }
        assert!(AuditResult::try_from(3).is_err());
    }
}
