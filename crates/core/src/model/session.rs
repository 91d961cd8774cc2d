use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::id::{DeviceId, HistoryId, OrganizationId, SessionId, SystemId, UserId};
use crate::scope::SystemScope;

/// Why a session was terminated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The user signed out.
    User,
    /// An administrator revoked the session remotely.
    Admin,
    /// The expiry sweep collected it.
    Expired,
    /// The bound device was deactivated.
    DeviceDeactivated,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Expired => "expired",
            Self::DeviceDeactivated => "device_deactivated",
        }
    }
}

impl FromStr for LogoutReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user" => Self::User,
            "admin" => Self::Admin,
            "expired" => Self::Expired,
            "device_deactivated" => Self::DeviceDeactivated,
            other => return Err(DomainError::unknown("logout reason", other)),
        })
    }
}

impl core::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable anchor of one device-bound login.
///
/// Tokens only prove who signed in; whether they are still honoured is decided
/// by this row. Rows are never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Opaque random handle; not a credential by itself.
    pub session_token: String,
    pub user_id: UserId,
    pub device_id: DeviceId,
    /// `None` until the first successful switch; overwritten on every switch.
    pub current_system_id: Option<SystemId>,
    pub organization_id: Option<OrganizationId>,
    pub ip_address: String,
    pub user_agent: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_system_switch: Option<DateTime<Utc>>,
    pub logout_at: Option<DateTime<Utc>>,
    pub logout_reason: Option<LogoutReason>,
}

impl Session {
    /// A session is honoured iff it is active and not past its expiry.
    ///
    /// The expiry sweep is a convenience; an expired row that is still flagged
    /// active is rejected here regardless.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }

    pub fn scope(&self) -> SystemScope {
        SystemScope::from_option(self.current_system_id)
    }

    pub fn is_terminated(&self) -> bool {
        !self.is_active && self.logout_at.is_some()
    }
}

impl Entity for Session {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Append-only record of one system switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSystemHistory {
    pub id: HistoryId,
    pub session_id: SessionId,
    pub system_id: SystemId,
    pub switched_at: DateTime<Utc>,
    pub ip_address: String,
}
