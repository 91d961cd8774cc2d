use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use portico_auth::{AuthStore, NewDevice, NewPermission, NewSession, NewUser, Page, PageResult, StoreError};
use portico_core::{
    Action, ActionId, AssignmentId, Device, DeviceId, Entity, HistoryId, LogoutReason, Menu, MenuId, Module,
    ModuleId, OrganizationId, Permission, PermissionId, Role, RoleAssignment, RoleId, Session, SessionId,
    SessionSystemHistory, System, SystemId, SystemScope, User, UserId,
};

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    devices: BTreeMap<DeviceId, Device>,
    systems: BTreeMap<SystemId, System>,
    actions: BTreeMap<ActionId, Action>,
    modules: BTreeMap<ModuleId, Module>,
    module_actions: BTreeSet<(ModuleId, ActionId)>,
    roles: BTreeMap<RoleId, Role>,
    assignments: BTreeMap<AssignmentId, RoleAssignment>,
    permissions: BTreeMap<PermissionId, Permission>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
    menus: BTreeMap<MenuId, Menu>,
    role_menus: BTreeSet<(RoleId, MenuId)>,
    sessions: BTreeMap<SessionId, Session>,
    history: Vec<SessionSystemHistory>,
    sequence: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    /// Ids of active roles behind active assignments of `user` admitted by `scope`.
    fn admitted_roles(&self, user: UserId, scope: SystemScope) -> BTreeSet<RoleId> {
        self.assignments
            .values()
            .filter(|a| a.user_id == user && a.is_active && scope.admits(a.scope()))
            .map(|a| a.role_id)
            .filter(|id| self.roles.get(id).is_some_and(|r| r.is_active))
            .collect()
    }

    fn granted_permissions(&self, user: UserId, scope: SystemScope) -> impl Iterator<Item = &Permission> {
        let roles = self.admitted_roles(user, scope);
        let ids: BTreeSet<PermissionId> = self
            .role_permissions
            .iter()
            .filter(|(role, _)| roles.contains(role))
            .map(|(_, permission)| *permission)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.permissions.get(&id))
            .filter(|p| p.is_active)
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, StoreError> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    fn require_role(&self, id: RoleId) -> Result<&Role, StoreError> {
        self.roles
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))
    }
}

fn terminate(session: &mut Session, reason: LogoutReason, at: DateTime<Utc>) {
    session.is_active = false;
    session.logout_at = Some(at);
    session.logout_reason = Some(reason);
}

/// Keep an existing row; seeded records are written once.
fn keep_first<E>(table: &mut BTreeMap<E::Id, E>, record: &E)
where
    E: Entity + Clone,
    E::Id: Ord,
{
    table.entry(*record.id()).or_insert_with(|| record.clone());
}

fn put<E>(table: &mut BTreeMap<E::Id, E>, record: E) -> E
where
    E: Entity + Clone,
    E::Id: Ord,
{
    table.insert(*record.id(), record.clone());
    record
}

fn newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// In-memory store.
///
/// Intended for tests/dev. One lock guards every table, so multi-row
/// operations (`record_switch`, the `replace_*` family) are atomic.
#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    state: RwLock<State>,
    latency: RwLock<Option<Duration>>,
    failure: RwLock<Option<StoreError>>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (fault injection for tests).
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.write() {
            *slot = latency;
        }
    }

    /// Fail every call with `failure` until cleared (fault injection for tests).
    pub fn set_failure(&self, failure: Option<StoreError>) {
        if let Ok(mut slot) = self.failure.write() {
            *slot = failure;
        }
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency.read().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.failure.read().ok().and_then(|f| f.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuthStore for InMemoryAuthStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.gate().await?;
        let state = self.read()?;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if state.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(StoreError::Conflict(format!("email {} is taken", user.email)));
        }
        let id = UserId::new(state.next_id());
        let created = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            is_active: user.is_active,
            organization_id: user.organization_id,
            default_system_id: user.default_system_id,
            last_login_at: None,
            created_at: Utc::now(),
        };
        Ok(put(&mut state.users, created))
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.last_login_at = Some(at);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_device_by_uid(&self, device_uid: &str) -> Result<Option<Device>, StoreError> {
        self.gate().await?;
        Ok(self
            .read()?
            .devices
            .values()
            .find(|d| d.device_uid == device_uid)
            .cloned())
    }

    async fn find_device_by_id(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.devices.get(&id).cloned())
    }

    async fn register_device(&self, device: NewDevice, at: DateTime<Utc>) -> Result<Device, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;

        if let Some(existing) = state.devices.values_mut().find(|d| d.device_uid == device.device_uid) {
            existing.name = device.name;
            existing.platform = device.platform;
            existing.os_version = device.os_version;
            existing.app_version = device.app_version;
            existing.push_token = device.push_token;
            if device.organization_id.is_some() {
                existing.organization_id = device.organization_id;
            }
            existing.last_heartbeat = Some(at);
            return Ok(existing.clone());
        }

        let id = DeviceId::new(state.next_id());
        let created = Device {
            id,
            device_uid: device.device_uid,
            name: device.name,
            platform: device.platform,
            os_version: device.os_version,
            app_version: device.app_version,
            push_token: device.push_token,
            organization_id: device.organization_id,
            is_active: true,
            registered_at: at,
            last_heartbeat: Some(at),
        };
        Ok(put(&mut state.devices, created))
    }

    async fn record_heartbeat(&self, device_uid: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let device = state
            .devices
            .values_mut()
            .find(|d| d.device_uid == device_uid)
            .ok_or_else(|| StoreError::NotFound(format!("device {device_uid}")))?;
        device.last_heartbeat = Some(at);
        Ok(())
    }

    async fn set_device_active(&self, id: DeviceId, active: bool) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let device = state
            .devices
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("device {id}")))?;
        device.is_active = active;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalogue
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_system_by_code(&self, code: &str) -> Result<Option<System>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.systems.values().find(|s| s.code == code).cloned())
    }

    async fn find_system_by_id(&self, id: SystemId) -> Result<Option<System>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.systems.get(&id).cloned())
    }

    async fn insert_system(&self, system: &System) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if state.systems.values().any(|s| s.code == system.code && s.id != system.id) {
            return Err(StoreError::Conflict(format!("system code {} is taken", system.code)));
        }
        keep_first(&mut state.systems, system);
        state.sequence = state.sequence.max(system.id.get());
        Ok(())
    }

    async fn insert_action(&self, action: &Action) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        state.actions.entry(action.id).or_insert_with(|| action.clone());
        state.sequence = state.sequence.max(action.id.get());
        Ok(())
    }

    async fn insert_module(&self, module: &Module) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        state.modules.entry(module.id).or_insert_with(|| module.clone());
        state.sequence = state.sequence.max(module.id.get());
        Ok(())
    }

    async fn link_module_action(&self, module: ModuleId, action: ActionId) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if !state.modules.contains_key(&module) {
            return Err(StoreError::NotFound(format!("module {module}")));
        }
        if !state.actions.contains_key(&action) {
            return Err(StoreError::NotFound(format!("action {action}")));
        }
        state.module_actions.insert((module, action));
        Ok(())
    }

    async fn modules_in_scope(&self, scope: SystemScope) -> Result<Vec<Module>, StoreError> {
        self.gate().await?;
        Ok(self
            .read()?
            .modules
            .values()
            .filter(|m| m.is_active && m.scope() == scope)
            .cloned()
            .collect())
    }

    async fn actions_for_module(&self, module: ModuleId) -> Result<Vec<Action>, StoreError> {
        self.gate().await?;
        let state = self.read()?;
        Ok(state
            .module_actions
            .iter()
            .filter(|(m, _)| *m == module)
            .filter_map(|(_, a)| state.actions.get(a))
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles and assignments
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        keep_first(&mut state.roles, role);
        state.sequence = state.sequence.max(role.id.get());
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if state.roles.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("role {id}")));
        }
        state.role_permissions.retain(|(role, _)| *role != id);
        state.role_menus.retain(|(role, _)| *role != id);
        state.assignments.retain(|_, a| a.role_id != id);
        Ok(())
    }

    async fn role_assignments(&self, user: UserId, scope: SystemScope) -> Result<Vec<RoleAssignment>, StoreError> {
        self.gate().await?;
        Ok(self
            .read()?
            .assignments
            .values()
            .filter(|a| a.user_id == user && a.is_active && a.scope() == scope)
            .cloned()
            .collect())
    }

    async fn active_assignments(&self, user: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        self.gate().await?;
        Ok(self
            .read()?
            .assignments
            .values()
            .filter(|a| a.user_id == user && a.is_active)
            .cloned()
            .collect())
    }

    async fn replace_user_roles(
        &self,
        user: UserId,
        scope: SystemScope,
        roles: &[RoleId],
        organization: Option<OrganizationId>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if !state.users.contains_key(&user) {
            return Err(StoreError::NotFound(format!("user {user}")));
        }
        for &role in roles {
            state.require_role(role)?;
        }

        state.assignments.retain(|_, a| !(a.user_id == user && a.scope() == scope));

        let mut created = Vec::with_capacity(roles.len());
        let mut seen = BTreeSet::new();
        for &role in roles {
            if !seen.insert(role) {
                continue;
            }
            let id = AssignmentId::new(state.next_id());
            let assignment = RoleAssignment {
                id,
                user_id: user,
                system_id: scope.system_id(),
                role_id: role,
                organization_id: organization,
                is_active: true,
                is_default: false,
            };
            state.assignments.insert(id, assignment.clone());
            created.push(assignment);
        }
        Ok(created)
    }

    async fn replace_role_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        state.require_role(role)?;
        if let Some(missing) = permissions.iter().find(|p| !state.permissions.contains_key(*p)) {
            return Err(StoreError::NotFound(format!("permission {missing}")));
        }
        state.role_permissions.retain(|(r, _)| *r != role);
        state.role_permissions.extend(permissions.iter().map(|p| (role, *p)));
        Ok(())
    }

    async fn replace_role_menus(&self, role: RoleId, menus: &[MenuId]) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        state.require_role(role)?;
        if let Some(missing) = menus.iter().find(|m| !state.menus.contains_key(*m)) {
            return Err(StoreError::NotFound(format!("menu {missing}")));
        }
        state.role_menus.retain(|(r, _)| *r != role);
        state.role_menus.extend(menus.iter().map(|m| (role, *m)));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    async fn permissions_for_user(&self, user: UserId, scope: SystemScope) -> Result<Vec<Permission>, StoreError> {
        self.gate().await?;
        let state = self.read()?;
        let mut permissions: Vec<Permission> = state.granted_permissions(user, scope).cloned().collect();
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    async fn has_permission(&self, user: UserId, scope: SystemScope, code: &str) -> Result<bool, StoreError> {
        self.gate().await?;
        let state = self.read()?;
        let found = state.granted_permissions(user, scope).any(|p| p.code == code);
        Ok(found)
    }

    async fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.permissions.values().find(|p| p.code == code).cloned())
    }

    async fn create_permission(&self, permission: NewPermission) -> Result<Permission, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if state.permissions.values().any(|p| p.code == permission.code) {
            return Err(StoreError::Conflict(format!("permission {} exists", permission.code)));
        }
        let id = PermissionId::new(state.next_id());
        let created = Permission {
            id,
            code: permission.code,
            name: permission.name,
            description: permission.description,
            system_id: permission.system_id,
            module_id: permission.module_id,
            action_id: permission.action_id,
            is_active: true,
        };
        Ok(put(&mut state.permissions, created))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Menus
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_menu(&self, menu: &Menu) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        keep_first(&mut state.menus, menu);
        state.sequence = state.sequence.max(menu.id.get());
        Ok(())
    }

    async fn menus_for_user(&self, user: UserId, system: SystemId) -> Result<Vec<Menu>, StoreError> {
        self.gate().await?;
        let state = self.read()?;
        let roles = state.admitted_roles(user, SystemScope::System(system));
        let ids: BTreeSet<MenuId> = state
            .role_menus
            .iter()
            .filter(|(role, _)| roles.contains(role))
            .map(|(_, menu)| *menu)
            .collect();
        let mut menus: Vec<Menu> = ids
            .into_iter()
            .filter_map(|id| state.menus.get(&id))
            .filter(|m| m.is_active && m.system_id == Some(system))
            .cloned()
            .collect();
        menus.sort_by_key(|m| (m.sequence, m.id));
        Ok(menus)
    }

    async fn menus_for_system(&self, system: SystemId) -> Result<Vec<Menu>, StoreError> {
        self.gate().await?;
        let mut menus: Vec<Menu> = self
            .read()?
            .menus
            .values()
            .filter(|m| m.is_active && m.system_id == Some(system))
            .cloned()
            .collect();
        menus.sort_by_key(|m| (m.sequence, m.id));
        Ok(menus)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if state.sessions.values().any(|s| s.session_token == session.session_token) {
            return Err(StoreError::Conflict("session token collision".to_string()));
        }
        let id = SessionId::new(state.next_id());
        let created = Session {
            id,
            session_token: session.session_token,
            user_id: session.user_id,
            device_id: session.device_id,
            current_system_id: None,
            organization_id: session.organization_id,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            is_active: true,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_activity: Some(session.created_at),
            last_system_switch: None,
            logout_at: None,
            logout_reason: None,
        };
        Ok(put(&mut state.sessions, created))
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.gate().await?;
        Ok(self.read()?.sessions.get(&id).cloned())
    }

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        state.session_mut(id)?.last_activity = Some(at);
        Ok(())
    }

    async fn record_switch(
        &self,
        id: SessionId,
        system: SystemId,
        at: DateTime<Utc>,
        ip_address: &str,
    ) -> Result<Session, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        if !state.session_mut(id)?.is_valid(at) {
            return Err(StoreError::Precondition(format!("session {id} is no longer valid")));
        }
        let history_id = HistoryId::new(state.next_id());

        let session = state.session_mut(id)?;
        session.current_system_id = Some(system);
        session.last_system_switch = Some(at);
        session.last_activity = Some(at);
        let updated = session.clone();

        state.history.push(SessionSystemHistory {
            id: history_id,
            session_id: id,
            system_id: system,
            switched_at: at,
            ip_address: ip_address.to_string(),
        });
        Ok(updated)
    }

    async fn clear_current_system(&self, id: SessionId) -> Result<Session, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let session = state.session_mut(id)?;
        session.current_system_id = None;
        Ok(session.clone())
    }

    async fn terminate_session(
        &self,
        id: SessionId,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let session = state.session_mut(id)?;
        if !session.is_active {
            return Ok(false);
        }
        terminate(session, reason, at);
        Ok(true)
    }

    async fn terminate_user_sessions(
        &self,
        user: UserId,
        device: Option<DeviceId>,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.is_active && session.user_id == user && device.is_none_or(|d| d == session.device_id) {
                terminate(session, reason, at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn terminate_device_sessions(
        &self,
        device: DeviceId,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.is_active && session.device_id == device {
                terminate(session, reason, at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn terminate_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.gate().await?;
        let mut state = self.write()?;
        let mut count = 0;
        for session in state.sessions.values_mut() {
            if session.is_active && session.expires_at <= now {
                terminate(session, LogoutReason::Expired, now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn sessions_for_user(&self, user: UserId) -> Result<Vec<Session>, StoreError> {
        self.gate().await?;
        let mut sessions: Vec<Session> = self
            .read()?
            .sessions
            .values()
            .filter(|s| s.user_id == user)
            .cloned()
            .collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn active_sessions(&self, page: Page, now: DateTime<Utc>) -> Result<PageResult<Session>, StoreError> {
        self.gate().await?;
        let mut sessions: Vec<Session> = self
            .read()?
            .sessions
            .values()
            .filter(|s| s.is_valid(now))
            .cloned()
            .collect();
        newest_first(&mut sessions);
        let total = sessions.len() as u64;
        let items = sessions
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(PageResult { items, total, page })
    }

    async fn switch_history(&self, session: SessionId) -> Result<Vec<SessionSystemHistory>, StoreError> {
        self.gate().await?;
        let mut rows: Vec<SessionSystemHistory> = self
            .read()?
            .history
            .iter()
            .filter(|h| h.session_id == session)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.switched_at.cmp(&a.switched_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}
