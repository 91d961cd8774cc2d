//! System scope: the platform-wide context versus one sub-system.
//!
//! Role assignments, roles, permissions and modules all carry an optional system
//! pointer where "absent" means *platform-wide*. `SystemScope` makes that rule an
//! explicit tag instead of a nullable integer, so every query branches on it.

use serde::{Deserialize, Serialize};

use crate::id::SystemId;

/// Scope of a query, a record or a credential.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "system_id", rename_all = "snake_case")]
pub enum SystemScope {
    /// No system selected; only platform-wide grants apply.
    Platform,
    /// Inside one system; platform-wide grants apply as well.
    System(SystemId),
}

impl SystemScope {
    /// Build a scope from a nullable system pointer.
    pub fn from_option(system_id: Option<SystemId>) -> Self {
        match system_id {
            Some(id) => Self::System(id),
            None => Self::Platform,
        }
    }

    pub fn system_id(&self) -> Option<SystemId> {
        match self {
            Self::Platform => None,
            Self::System(id) => Some(*id),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, Self::Platform)
    }

    /// Whether a grant recorded with `grant_scope` applies to a request made in `self`.
    ///
    /// Platform-wide grants apply everywhere. System grants apply only inside the
    /// same system, never in the platform context.
    pub fn admits(&self, grant_scope: SystemScope) -> bool {
        match (grant_scope, self) {
            (SystemScope::Platform, _) => true,
            (SystemScope::System(granted), SystemScope::System(requested)) => granted == *requested,
            (SystemScope::System(_), SystemScope::Platform) => false,
        }
    }
}

impl From<Option<SystemId>> for SystemScope {
    fn from(value: Option<SystemId>) -> Self {
        Self::from_option(value)
    }
}

impl core::fmt::Display for SystemScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Platform => f.write_str("platform"),
            Self::System(id) => write!(f, "system:{id}"),
        }
    }
}
