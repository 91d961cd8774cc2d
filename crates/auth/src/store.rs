//! Persistence boundary consumed by the session/authorization core.
//!
//! The core never talks to a database directly. Everything it needs is a keyed
//! lookup or a single-purpose mutation on this trait; adapters live in
//! `portico-infra` (in-memory for tests/dev, Postgres for production).
//!
//! ## Scope matching
//!
//! Methods taking a `SystemScope` follow one of two rules, stated per method:
//!
//! - **exact**: the record's own scope must equal the argument
//!   (`Platform` matches only unscoped records).
//! - **admitted**: `SystemScope::admits` decides, so platform-wide records apply
//!   inside every system while system records never leak into the platform scope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use portico_core::{
    Action, ActionId, Device, DeviceId, DevicePlatform, LogoutReason, Menu, MenuId, Module, ModuleId,
    OrganizationId, Permission, PermissionId, Role, RoleAssignment, RoleId, Session, SessionId,
    SessionSystemHistory, System, SystemId, SystemScope, User, UserId,
};

/// Store operation error.
///
/// These are **infrastructure errors**. A missing row on a lookup is `Ok(None)`,
/// not `NotFound`; `NotFound` is reserved for mutations that target a row that
/// does not exist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The row exists but no longer satisfies the write's precondition.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call '{0}' exceeded its deadline")]
    Timeout(&'static str),
}

// ─────────────────────────────────────────────────────────────────────────────
// Write models
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub organization_id: Option<OrganizationId>,
    pub default_system_id: Option<SystemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewDevice {
    pub device_uid: String,
    pub name: String,
    pub platform: DevicePlatform,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub session_token: String,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub organization_id: Option<OrganizationId>,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPermission {
    pub code: String,
    pub name: String,
    pub description: String,
    pub system_id: Option<SystemId>,
    pub module_id: ModuleId,
    pub action_id: Option<ActionId>,
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, 500),
            offset: offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: Page,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Relational store for identities, grants and sessions.
///
/// Implementations must:
/// - apply `record_switch` (session update + history append) atomically
/// - apply every `replace_*` call all-or-nothing
/// - never physically delete sessions or history rows
#[async_trait]
pub trait AuthStore: Send + Sync {
    // users

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
    /// `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError>;

    // devices

    async fn find_device_by_uid(&self, device_uid: &str) -> Result<Option<Device>, StoreError>;
    async fn find_device_by_id(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;
    /// Insert a new (active) device, or refresh metadata and heartbeat of an
    /// existing one without touching its active flag.
    async fn register_device(&self, device: NewDevice, at: DateTime<Utc>) -> Result<Device, StoreError>;
    async fn record_heartbeat(&self, device_uid: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn set_device_active(&self, id: DeviceId, active: bool) -> Result<(), StoreError>;

    // catalogue (systems, modules, actions)

    async fn find_system_by_code(&self, code: &str) -> Result<Option<System>, StoreError>;
    async fn find_system_by_id(&self, id: SystemId) -> Result<Option<System>, StoreError>;
    /// Insert with the given id; no-op when the id already exists.
    async fn insert_system(&self, system: &System) -> Result<(), StoreError>;
    async fn insert_action(&self, action: &Action) -> Result<(), StoreError>;
    async fn insert_module(&self, module: &Module) -> Result<(), StoreError>;
    async fn link_module_action(&self, module: ModuleId, action: ActionId) -> Result<(), StoreError>;
    /// Active modules with **exact** scope.
    async fn modules_in_scope(&self, scope: SystemScope) -> Result<Vec<Module>, StoreError>;
    /// Active actions linked to a module, by action id.
    async fn actions_for_module(&self, module: ModuleId) -> Result<Vec<Action>, StoreError>;

    // roles and assignments

    async fn find_role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError>;
    async fn insert_role(&self, role: &Role) -> Result<(), StoreError>;
    /// Removes the role together with its grants and assignments.
    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError>;
    /// Active assignments of a user with **exact** scope.
    async fn role_assignments(&self, user: UserId, scope: SystemScope) -> Result<Vec<RoleAssignment>, StoreError>;
    /// Every active assignment of a user, any scope.
    async fn active_assignments(&self, user: UserId) -> Result<Vec<RoleAssignment>, StoreError>;
    /// Replace the user's assignments with **exact** scope by `roles`.
    async fn replace_user_roles(
        &self,
        user: UserId,
        scope: SystemScope,
        roles: &[RoleId],
        organization: Option<OrganizationId>,
    ) -> Result<Vec<RoleAssignment>, StoreError>;
    async fn replace_role_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<(), StoreError>;
    async fn replace_role_menus(&self, role: RoleId, menus: &[MenuId]) -> Result<(), StoreError>;

    // permissions

    /// Active permissions granted through active roles of active assignments
    /// **admitted** by `scope`, deduplicated.
    async fn permissions_for_user(&self, user: UserId, scope: SystemScope) -> Result<Vec<Permission>, StoreError>;
    /// Existence form of `permissions_for_user` for a single code.
    async fn has_permission(&self, user: UserId, scope: SystemScope, code: &str) -> Result<bool, StoreError>;
    async fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError>;
    /// `Conflict` when the code already exists.
    async fn create_permission(&self, permission: NewPermission) -> Result<Permission, StoreError>;

    // menus

    async fn insert_menu(&self, menu: &Menu) -> Result<(), StoreError>;
    /// Menus of `system` reachable through active roles of active assignments
    /// **admitted** by `SystemScope::System(system)`, deduplicated.
    async fn menus_for_user(&self, user: UserId, system: SystemId) -> Result<Vec<Menu>, StoreError>;
    /// Every active menu of a system.
    async fn menus_for_system(&self, system: SystemId) -> Result<Vec<Menu>, StoreError>;

    // sessions

    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError>;
    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;
    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Point the session at `system` and append one history row, in one transaction.
    ///
    /// Fails with `Precondition` (and writes nothing) unless the session is
    /// active and unexpired at `at`.
    async fn record_switch(
        &self,
        id: SessionId,
        system: SystemId,
        at: DateTime<Utc>,
        ip_address: &str,
    ) -> Result<Session, StoreError>;
    async fn clear_current_system(&self, id: SessionId) -> Result<Session, StoreError>;
    /// Returns `false` when the session was already terminated.
    async fn terminate_session(
        &self,
        id: SessionId,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn terminate_user_sessions(
        &self,
        user: UserId,
        device: Option<DeviceId>,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    async fn terminate_device_sessions(
        &self,
        device: DeviceId,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    /// Deactivate every active session whose expiry is at or before `now`.
    async fn terminate_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
    /// Newest first.
    async fn sessions_for_user(&self, user: UserId) -> Result<Vec<Session>, StoreError>;
    /// Valid sessions at `now`, newest first.
    async fn active_sessions(&self, page: Page, now: DateTime<Utc>) -> Result<PageResult<Session>, StoreError>;
    /// Newest first.
    async fn switch_history(&self, session: SessionId) -> Result<Vec<SessionSystemHistory>, StoreError>;
}

/// Shared handle to a store with a per-call deadline.
///
/// Every call made through [`SharedStore::within`] is abandoned once the
/// deadline passes; dropping the returned future abandons it as well.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<dyn AuthStore>,
    call_timeout: Duration,
}

impl SharedStore {
    pub fn new(inner: Arc<dyn AuthStore>, call_timeout: Duration) -> Self {
        Self { inner, call_timeout }
    }

    pub fn get(&self) -> &dyn AuthStore {
        &*self.inner
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run a store call under the configured deadline.
    pub async fn within<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.call_timeout.as_millis() as u64, "store call timed out");
                Err(StoreError::Timeout(operation))
            }
        }
    }
}

impl core::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedStore")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}
