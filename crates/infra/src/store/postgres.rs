//! Postgres-backed auth store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `Conflict` |
//! | Database (other) | any other | `Unavailable` |
//! | PoolClosed / Io / other | N/A | `Unavailable` |
//!
//! ## Scope predicates
//!
//! The nullable `system_id` column carries the scope. Exact matching uses
//! `system_id IS NOT DISTINCT FROM $n`; admitted matching uses
//! `(system_id IS NULL OR system_id = $n)`, which with a NULL argument reduces
//! to platform-wide rows only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use portico_auth::{AuthStore, NewDevice, NewPermission, NewSession, NewUser, Page, PageResult, StoreError};
use portico_core::{
    Action, ActionId, AssignmentId, Device, DeviceId, HistoryId, LogoutReason, Menu, MenuId, Module, ModuleId,
    OrganizationId, Permission, PermissionId, Role, RoleAssignment, RoleId, Session, SessionId,
    SessionSystemHistory, System, SystemId, SystemScope, User, UserId,
};

const SESSION_COLUMNS: &str = "id, session_token, user_id, device_id, current_system_id, organization_id, \
     ip_address, user_agent, is_active, created_at, expires_at, last_activity, last_system_switch, \
     logout_at, logout_reason";

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, is_active, organization_id, \
     default_system_id, last_login_at, created_at";

const DEVICE_COLUMNS: &str = "id, device_uid, name, platform, os_version, app_version, push_token, \
     organization_id, is_active, registered_at, last_heartbeat";

const SYSTEM_COLUMNS: &str = "id, code, name, description, icon_name, base_url, color, is_active, sequence";

const PERMISSION_COLUMNS: &str = "id, code, name, description, system_id, module_id, action_id, is_active";

const ASSIGNMENT_COLUMNS: &str = "id, user_id, system_id, role_id, organization_id, is_active, is_default";

/// Postgres-backed store.
///
/// Uses the SQLx connection pool (thread-safe). Multi-row mutations run in a
/// transaction whose commit is the last awaited step, so a cancelled call
/// never leaves a partial write behind.
#[derive(Debug, Clone)]
pub struct PostgresAuthStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// Keep a serial sequence ahead of rows inserted with explicit ids.
    async fn bump_sequence(&self, table: &'static str) -> Result<(), StoreError> {
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{table}', 'id'), GREATEST((SELECT MAX(id) FROM {table}), 1))"
        );
        sqlx::query(&sql)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("bump_sequence", e))?;
        Ok(())
    }

    async fn terminate_where(
        &self,
        operation: &'static str,
        predicate: &str,
        bind: i64,
        device: Option<i64>,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE sessions SET is_active = FALSE, logout_at = $3, logout_reason = $4 \
             WHERE is_active AND {predicate}"
        );
        let result = sqlx::query(&sql)
            .bind(bind)
            .bind(device)
            .bind(at)
            .bind(reason.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Span::current().record("terminated", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthStore for PostgresAuthStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        row.as_ref().map(user_from_row).transpose().map_err(|e| map_sqlx_error("decode_user", e))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_id", e))?;
        row.as_ref().map(user_from_row).transpose().map_err(|e| map_sqlx_error("decode_user", e))
    }

    #[instrument(skip(self, user), fields(email = %user.email), err)]
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, first_name, last_name, is_active, organization_id, \
             default_system_id, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.is_active)
            .bind(user.organization_id.map(OrganizationId::get))
            .bind(user.default_system_id.map(SystemId::get))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_user", e))?;
        user_from_row(&row).map_err(|e| map_sqlx_error("decode_user", e))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id.get())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_login", e))?;
        require_row(result.rows_affected(), || format!("user {id}"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self), err)]
    async fn find_device_by_uid(&self, device_uid: &str) -> Result<Option<Device>, StoreError> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_uid = $1");
        let row = sqlx::query(&sql)
            .bind(device_uid)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_device_by_uid", e))?;
        row.as_ref().map(device_from_row).transpose().map_err(|e| map_sqlx_error("decode_device", e))
    }

    #[instrument(skip(self), fields(device_id = %id), err)]
    async fn find_device_by_id(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_device_by_id", e))?;
        row.as_ref().map(device_from_row).transpose().map_err(|e| map_sqlx_error("decode_device", e))
    }

    #[instrument(skip(self, device), fields(device_uid = %device.device_uid), err)]
    async fn register_device(&self, device: NewDevice, at: DateTime<Utc>) -> Result<Device, StoreError> {
        // Upsert keeps `is_active` as is: re-registration never reactivates.
        let sql = format!(
            "INSERT INTO devices (device_uid, name, platform, os_version, app_version, push_token, \
             organization_id, is_active, registered_at, last_heartbeat) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $8) \
             ON CONFLICT (device_uid) DO UPDATE SET \
                name = EXCLUDED.name, platform = EXCLUDED.platform, os_version = EXCLUDED.os_version, \
                app_version = EXCLUDED.app_version, push_token = EXCLUDED.push_token, \
                organization_id = COALESCE(EXCLUDED.organization_id, devices.organization_id), \
                last_heartbeat = EXCLUDED.last_heartbeat \
             RETURNING {DEVICE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&device.device_uid)
            .bind(&device.name)
            .bind(device.platform.as_str())
            .bind(&device.os_version)
            .bind(&device.app_version)
            .bind(&device.push_token)
            .bind(device.organization_id.map(OrganizationId::get))
            .bind(at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_device", e))?;
        device_from_row(&row).map_err(|e| map_sqlx_error("decode_device", e))
    }

    #[instrument(skip(self), err)]
    async fn record_heartbeat(&self, device_uid: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE devices SET last_heartbeat = $2 WHERE device_uid = $1")
            .bind(device_uid)
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_heartbeat", e))?;
        require_row(result.rows_affected(), || format!("device {device_uid}"))
    }

    #[instrument(skip(self), fields(device_id = %id), err)]
    async fn set_device_active(&self, id: DeviceId, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE devices SET is_active = $2 WHERE id = $1")
            .bind(id.get())
            .bind(active)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_device_active", e))?;
        require_row(result.rows_affected(), || format!("device {id}"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalogue
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self), err)]
    async fn find_system_by_code(&self, code: &str) -> Result<Option<System>, StoreError> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_system_by_code", e))?;
        row.as_ref().map(system_from_row).transpose().map_err(|e| map_sqlx_error("decode_system", e))
    }

    #[instrument(skip(self), fields(system_id = %id), err)]
    async fn find_system_by_id(&self, id: SystemId) -> Result<Option<System>, StoreError> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_system_by_id", e))?;
        row.as_ref().map(system_from_row).transpose().map_err(|e| map_sqlx_error("decode_system", e))
    }

    #[instrument(skip(self, system), fields(system_id = %system.id), err)]
    async fn insert_system(&self, system: &System) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO systems (id, code, name, description, icon_name, base_url, color, is_active, sequence) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (id) DO NOTHING",
        )
        .bind(system.id.get())
        .bind(&system.code)
        .bind(&system.name)
        .bind(&system.description)
        .bind(&system.icon_name)
        .bind(&system.base_url)
        .bind(&system.color)
        .bind(system.is_active)
        .bind(system.sequence)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_system", e))?;
        self.bump_sequence("systems").await
    }

    #[instrument(skip(self, action), fields(action_id = %action.id), err)]
    async fn insert_action(&self, action: &Action) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO actions (id, code, name, is_active) VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING",
        )
        .bind(action.id.get())
        .bind(&action.code)
        .bind(&action.name)
        .bind(action.is_active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_action", e))?;
        self.bump_sequence("actions").await
    }

    #[instrument(skip(self, module), fields(module_id = %module.id), err)]
    async fn insert_module(&self, module: &Module) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO modules (id, code, name, system_id, is_active) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(module.id.get())
        .bind(&module.code)
        .bind(&module.name)
        .bind(module.system_id.map(SystemId::get))
        .bind(module.is_active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_module", e))?;
        self.bump_sequence("modules").await
    }

    #[instrument(skip(self), err)]
    async fn link_module_action(&self, module: ModuleId, action: ActionId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO module_actions (module_id, action_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(module.get())
            .bind(action.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("link_module_action", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn modules_in_scope(&self, scope: SystemScope) -> Result<Vec<Module>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, code, name, system_id, is_active FROM modules \
             WHERE is_active AND system_id IS NOT DISTINCT FROM $1 ORDER BY id",
        )
        .bind(scope.system_id().map(SystemId::get))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("modules_in_scope", e))?;
        decode_all(&rows, module_from_row, "decode_module")
    }

    #[instrument(skip(self), fields(module_id = %module), err)]
    async fn actions_for_module(&self, module: ModuleId) -> Result<Vec<Action>, StoreError> {
        let rows = sqlx::query(
            "SELECT a.id, a.code, a.name, a.is_active FROM actions a \
             JOIN module_actions ma ON ma.action_id = a.id \
             WHERE ma.module_id = $1 AND a.is_active ORDER BY a.id",
        )
        .bind(module.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("actions_for_module", e))?;
        decode_all(&rows, action_from_row, "decode_action")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles and assignments
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn find_role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query(
            "SELECT id, code, name, description, system_id, is_system, is_active FROM roles WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role_by_id", e))?;
        row.as_ref().map(role_from_row).transpose().map_err(|e| map_sqlx_error("decode_role", e))
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO roles (id, code, name, description, system_id, is_system, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(role.id.get())
        .bind(&role.code)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.system_id.map(SystemId::get))
        .bind(role.is_system)
        .bind(role.is_active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        self.bump_sequence("roles").await
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        // Grants and assignments go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        require_row(result.rows_affected(), || format!("role {id}"))
    }

    #[instrument(skip(self), fields(user_id = %user, scope = %scope), err)]
    async fn role_assignments(&self, user: UserId, scope: SystemScope) -> Result<Vec<RoleAssignment>, StoreError> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_system_roles \
             WHERE user_id = $1 AND is_active AND system_id IS NOT DISTINCT FROM $2 ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(user.get())
            .bind(scope.system_id().map(SystemId::get))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_assignments", e))?;
        decode_all(&rows, assignment_from_row, "decode_assignment")
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn active_assignments(&self, user: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_system_roles WHERE user_id = $1 AND is_active ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(user.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_assignments", e))?;
        decode_all(&rows, assignment_from_row, "decode_assignment")
    }

    #[instrument(skip(self, roles), fields(user_id = %user, scope = %scope, count = roles.len()), err)]
    async fn replace_user_roles(
        &self,
        user: UserId,
        scope: SystemScope,
        roles: &[RoleId],
        organization: Option<OrganizationId>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let mut unique: Vec<i64> = Vec::with_capacity(roles.len());
        for role in roles {
            if !unique.contains(&role.get()) {
                unique.push(role.get());
            }
        }
        let system = scope.system_id().map(SystemId::get);

        let mut tx = self.begin().await?;

        let user_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_user_roles", e))?;
        if !user_exists {
            return Err(StoreError::NotFound(format!("user {user}")));
        }

        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE id = ANY($1)")
            .bind(&unique)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_user_roles", e))?;
        if known as usize != unique.len() {
            return Err(StoreError::NotFound("one or more roles".to_string()));
        }

        sqlx::query("DELETE FROM user_system_roles WHERE user_id = $1 AND system_id IS NOT DISTINCT FROM $2")
            .bind(user.get())
            .bind(system)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_user_roles", e))?;

        let sql = format!(
            "INSERT INTO user_system_roles (user_id, system_id, role_id, organization_id, is_active, is_default) \
             VALUES ($1, $2, $3, $4, TRUE, FALSE) RETURNING {ASSIGNMENT_COLUMNS}"
        );
        let mut created = Vec::with_capacity(unique.len());
        for role in &unique {
            let row = sqlx::query(&sql)
                .bind(user.get())
                .bind(system)
                .bind(role)
                .bind(organization.map(OrganizationId::get))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_user_roles", e))?;
            created.push(assignment_from_row(&row).map_err(|e| map_sqlx_error("decode_assignment", e))?);
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(created)
    }

    #[instrument(skip(self, permissions), fields(role_id = %role, count = permissions.len()), err)]
    async fn replace_role_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<(), StoreError> {
        let ids: Vec<i64> = permissions.iter().map(|p| p.get()).collect();
        let mut tx = self.begin().await?;

        lock_role(&mut tx, role).await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_role_permissions", e))?;

        // A missing permission id fails the foreign key and rolls everything back.
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(role.get())
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_role_permissions", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self, menus), fields(role_id = %role, count = menus.len()), err)]
    async fn replace_role_menus(&self, role: RoleId, menus: &[MenuId]) -> Result<(), StoreError> {
        let ids: Vec<i64> = menus.iter().map(|m| m.get()).collect();
        let mut tx = self.begin().await?;

        lock_role(&mut tx, role).await?;

        sqlx::query("DELETE FROM role_menus WHERE role_id = $1")
            .bind(role.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_role_menus", e))?;

        sqlx::query(
            "INSERT INTO role_menus (role_id, menu_id) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(role.get())
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_role_menus", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(user_id = %user, scope = %scope), err)]
    async fn permissions_for_user(&self, user: UserId, scope: SystemScope) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT p.id, p.code, p.name, p.description, p.system_id, p.module_id, p.action_id, p.is_active \
             FROM permissions p \
             JOIN role_permissions rp ON rp.permission_id = p.id \
             JOIN roles r ON r.id = rp.role_id AND r.is_active \
             JOIN user_system_roles usr ON usr.role_id = r.id AND usr.is_active \
             WHERE usr.user_id = $1 AND p.is_active \
               AND (usr.system_id IS NULL OR usr.system_id = $2) \
             ORDER BY p.code",
        )
        .bind(user.get())
        .bind(scope.system_id().map(SystemId::get))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions_for_user", e))?;
        decode_all(&rows, permission_from_row, "decode_permission")
    }

    #[instrument(skip(self), fields(user_id = %user, scope = %scope), err)]
    async fn has_permission(&self, user: UserId, scope: SystemScope, code: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            "SELECT EXISTS ( \
                SELECT 1 FROM permissions p \
                JOIN role_permissions rp ON rp.permission_id = p.id \
                JOIN roles r ON r.id = rp.role_id AND r.is_active \
                JOIN user_system_roles usr ON usr.role_id = r.id AND usr.is_active \
                WHERE usr.user_id = $1 AND p.is_active AND p.code = $3 \
                  AND (usr.system_id IS NULL OR usr.system_id = $2))",
        )
        .bind(user.get())
        .bind(scope.system_id().map(SystemId::get))
        .bind(code)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_permission", e))
    }

    #[instrument(skip(self), err)]
    async fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_permission_by_code", e))?;
        row.as_ref()
            .map(permission_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_permission", e))
    }

    #[instrument(skip(self, permission), fields(code = %permission.code), err)]
    async fn create_permission(&self, permission: NewPermission) -> Result<Permission, StoreError> {
        let sql = format!(
            "INSERT INTO permissions (code, name, description, system_id, module_id, action_id, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE) RETURNING {PERMISSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&permission.code)
            .bind(&permission.name)
            .bind(&permission.description)
            .bind(permission.system_id.map(SystemId::get))
            .bind(permission.module_id.get())
            .bind(permission.action_id.map(ActionId::get))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_permission", e))?;
        permission_from_row(&row).map_err(|e| map_sqlx_error("decode_permission", e))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Menus
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, menu), fields(menu_id = %menu.id), err)]
    async fn insert_menu(&self, menu: &Menu) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO menus (id, code, name, system_id, parent_id, path, icon, sequence, is_visible, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ON CONFLICT (id) DO NOTHING",
        )
        .bind(menu.id.get())
        .bind(&menu.code)
        .bind(&menu.name)
        .bind(menu.system_id.map(SystemId::get))
        .bind(menu.parent_id.map(MenuId::get))
        .bind(&menu.path)
        .bind(&menu.icon)
        .bind(menu.sequence)
        .bind(menu.is_visible)
        .bind(menu.is_active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_menu", e))?;
        self.bump_sequence("menus").await
    }

    #[instrument(skip(self), fields(user_id = %user, system_id = %system), err)]
    async fn menus_for_user(&self, user: UserId, system: SystemId) -> Result<Vec<Menu>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT m.id, m.code, m.name, m.system_id, m.parent_id, m.path, m.icon, m.sequence, \
                    m.is_visible, m.is_active \
             FROM menus m \
             JOIN role_menus rm ON rm.menu_id = m.id \
             JOIN roles r ON r.id = rm.role_id AND r.is_active \
             JOIN user_system_roles usr ON usr.role_id = r.id AND usr.is_active \
             WHERE usr.user_id = $1 AND m.system_id = $2 AND m.is_active \
               AND (usr.system_id IS NULL OR usr.system_id = $2) \
             ORDER BY m.sequence, m.id",
        )
        .bind(user.get())
        .bind(system.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("menus_for_user", e))?;
        decode_all(&rows, menu_from_row, "decode_menu")
    }

    #[instrument(skip(self), fields(system_id = %system), err)]
    async fn menus_for_system(&self, system: SystemId) -> Result<Vec<Menu>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, code, name, system_id, parent_id, path, icon, sequence, is_visible, is_active \
             FROM menus WHERE system_id = $1 AND is_active ORDER BY sequence, id",
        )
        .bind(system.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("menus_for_system", e))?;
        decode_all(&rows, menu_from_row, "decode_menu")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, session), fields(user_id = %session.user_id, device_id = %session.device_id), err)]
    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let sql = format!(
            "INSERT INTO sessions (session_token, user_id, device_id, organization_id, ip_address, user_agent, \
             is_active, created_at, expires_at, last_activity) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $7) RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&session.session_token)
            .bind(session.user_id.get())
            .bind(session.device_id.get())
            .bind(session.organization_id.map(OrganizationId::get))
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.created_at)
            .bind(session.expires_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_session", e))?;
        session_from_row(&row).map_err(|e| map_sqlx_error("decode_session", e))
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_session", e))?;
        row.as_ref().map(session_from_row).transpose().map_err(|e| map_sqlx_error("decode_session", e))
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET last_activity = $2 WHERE id = $1")
            .bind(id.get())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("touch_session", e))?;
        require_row(result.rows_affected(), || format!("session {id}"))
    }

    #[instrument(skip(self, ip_address), fields(session_id = %id, system_id = %system), err)]
    async fn record_switch(
        &self,
        id: SessionId,
        system: SystemId,
        at: DateTime<Utc>,
        ip_address: &str,
    ) -> Result<Session, StoreError> {
        let mut tx = self.begin().await?;

        let sql = format!(
            "UPDATE sessions SET current_system_id = $2, last_system_switch = $3, last_activity = $3 \
             WHERE id = $1 AND is_active AND expires_at > $3 RETURNING {SESSION_COLUMNS}"
        );
        let updated = sqlx::query(&sql)
            .bind(id.get())
            .bind(system.get())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_switch", e))?;

        let Some(row) = updated else {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM sessions WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("record_switch", e))?;
            return Err(match exists {
                Some(_) => StoreError::Precondition(format!("session {id} is no longer valid")),
                None => StoreError::NotFound(format!("session {id}")),
            });
        };
        let session = session_from_row(&row).map_err(|e| map_sqlx_error("decode_session", e))?;

        sqlx::query(
            "INSERT INTO session_system_history (session_id, system_id, switched_at, ip_address) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id.get())
        .bind(system.get())
        .bind(at)
        .bind(ip_address)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_switch", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(session)
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn clear_current_system(&self, id: SessionId) -> Result<Session, StoreError> {
        let sql = format!("UPDATE sessions SET current_system_id = NULL WHERE id = $1 RETURNING {SESSION_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_current_system", e))?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session_from_row(&row).map_err(|e| map_sqlx_error("decode_session", e))
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn terminate_session(
        &self,
        id: SessionId,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let active: Option<bool> = sqlx::query_scalar(
            "WITH target AS (SELECT id, is_active FROM sessions WHERE id = $1 FOR UPDATE), \
                  updated AS ( \
                    UPDATE sessions s SET is_active = FALSE, logout_at = $2, logout_reason = $3 \
                    FROM target t WHERE s.id = t.id AND t.is_active RETURNING s.id) \
             SELECT t.is_active FROM target t",
        )
        .bind(id.get())
        .bind(at)
        .bind(reason.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("terminate_session", e))?;

        active.ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    #[instrument(skip(self), fields(user_id = %user, terminated), err)]
    async fn terminate_user_sessions(
        &self,
        user: UserId,
        device: Option<DeviceId>,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.terminate_where(
            "terminate_user_sessions",
            "user_id = $1 AND ($2::BIGINT IS NULL OR device_id = $2)",
            user.get(),
            device.map(DeviceId::get),
            reason,
            at,
        )
        .await
    }

    #[instrument(skip(self), fields(device_id = %device, terminated), err)]
    async fn terminate_device_sessions(
        &self,
        device: DeviceId,
        reason: LogoutReason,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.terminate_where(
            "terminate_device_sessions",
            "device_id = $1 AND ($2::BIGINT IS NULL OR user_id = $2)",
            device.get(),
            None,
            reason,
            at,
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn terminate_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE, logout_at = $1, logout_reason = $2 \
             WHERE is_active AND expires_at <= $1",
        )
        .bind(now)
        .bind(LogoutReason::Expired.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("terminate_expired_sessions", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn sessions_for_user(&self, user: UserId) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sessions_for_user", e))?;
        decode_all(&rows, session_from_row, "decode_session")
    }

    #[instrument(skip(self), fields(limit = page.limit, offset = page.offset), err)]
    async fn active_sessions(&self, page: Page, now: DateTime<Utc>) -> Result<PageResult<Session>, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE is_active AND expires_at > $1")
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_sessions", e))?;

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE is_active AND expires_at > $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_sessions", e))?;

        Ok(PageResult {
            items: decode_all(&rows, session_from_row, "decode_session")?,
            total: total.max(0) as u64,
            page,
        })
    }

    #[instrument(skip(self), fields(session_id = %session), err)]
    async fn switch_history(&self, session: SessionId) -> Result<Vec<SessionSystemHistory>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, system_id, switched_at, ip_address FROM session_system_history \
             WHERE session_id = $1 ORDER BY switched_at DESC, id DESC",
        )
        .bind(session.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("switch_history", e))?;
        decode_all(&rows, history_from_row, "decode_history")
    }
}

async fn lock_role(tx: &mut Transaction<'static, Postgres>, role: RoleId) -> Result<(), StoreError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
        .bind(role.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_role", e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(format!("role {role}"))),
    }
}

fn require_row(affected: u64, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if affected == 0 {
        Err(StoreError::NotFound(what()))
    } else {
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {}", operation)),
        sqlx::Error::PoolTimedOut => StoreError::Unavailable(format!("connection pool timed out in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("unexpected row not found in {}", operation)),
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn decode_all<T>(
    rows: &[PgRow],
    decode: fn(&PgRow) -> Result<T, sqlx::Error>,
    operation: &'static str,
) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error(operation, e))
}

fn decode_text<T>(column: &str, value: String) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = portico_core::DomainError>,
{
    value.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        is_active: row.try_get("is_active")?,
        organization_id: row.try_get::<Option<i64>, _>("organization_id")?.map(OrganizationId::new),
        default_system_id: row.try_get::<Option<i64>, _>("default_system_id")?.map(SystemId::new),
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn device_from_row(row: &PgRow) -> Result<Device, sqlx::Error> {
    Ok(Device {
        id: DeviceId::new(row.try_get("id")?),
        device_uid: row.try_get("device_uid")?,
        name: row.try_get("name")?,
        platform: decode_text("platform", row.try_get("platform")?)?,
        os_version: row.try_get("os_version")?,
        app_version: row.try_get("app_version")?,
        push_token: row.try_get("push_token")?,
        organization_id: row.try_get::<Option<i64>, _>("organization_id")?.map(OrganizationId::new),
        is_active: row.try_get("is_active")?,
        registered_at: row.try_get("registered_at")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
    })
}

fn system_from_row(row: &PgRow) -> Result<System, sqlx::Error> {
    Ok(System {
        id: SystemId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon_name: row.try_get("icon_name")?,
        base_url: row.try_get("base_url")?,
        color: row.try_get("color")?,
        is_active: row.try_get("is_active")?,
        sequence: row.try_get("sequence")?,
    })
}

fn module_from_row(row: &PgRow) -> Result<Module, sqlx::Error> {
    Ok(Module {
        id: ModuleId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        system_id: row.try_get::<Option<i64>, _>("system_id")?.map(SystemId::new),
        is_active: row.try_get("is_active")?,
    })
}

fn action_from_row(row: &PgRow) -> Result<Action, sqlx::Error> {
    Ok(Action {
        id: ActionId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: RoleId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        system_id: row.try_get::<Option<i64>, _>("system_id")?.map(SystemId::new),
        is_system: row.try_get("is_system")?,
        is_active: row.try_get("is_active")?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<RoleAssignment, sqlx::Error> {
    Ok(RoleAssignment {
        id: AssignmentId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        system_id: row.try_get::<Option<i64>, _>("system_id")?.map(SystemId::new),
        role_id: RoleId::new(row.try_get("role_id")?),
        organization_id: row.try_get::<Option<i64>, _>("organization_id")?.map(OrganizationId::new),
        is_active: row.try_get("is_active")?,
        is_default: row.try_get("is_default")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: PermissionId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        system_id: row.try_get::<Option<i64>, _>("system_id")?.map(SystemId::new),
        module_id: ModuleId::new(row.try_get("module_id")?),
        action_id: row.try_get::<Option<i64>, _>("action_id")?.map(ActionId::new),
        is_active: row.try_get("is_active")?,
    })
}

fn menu_from_row(row: &PgRow) -> Result<Menu, sqlx::Error> {
    Ok(Menu {
        id: MenuId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        system_id: row.try_get::<Option<i64>, _>("system_id")?.map(SystemId::new),
        parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(MenuId::new),
        path: row.try_get("path")?,
        icon: row.try_get("icon")?,
        sequence: row.try_get("sequence")?,
        is_visible: row.try_get("is_visible")?,
        is_active: row.try_get("is_active")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    let reason: Option<String> = row.try_get("logout_reason")?;
    Ok(Session {
        id: SessionId::new(row.try_get("id")?),
        session_token: row.try_get("session_token")?,
        user_id: UserId::new(row.try_get("user_id")?),
        device_id: DeviceId::new(row.try_get("device_id")?),
        current_system_id: row.try_get::<Option<i64>, _>("current_system_id")?.map(SystemId::new),
        organization_id: row.try_get::<Option<i64>, _>("organization_id")?.map(OrganizationId::new),
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_activity: row.try_get("last_activity")?,
        last_system_switch: row.try_get("last_system_switch")?,
        logout_at: row.try_get("logout_at")?,
        logout_reason: reason.map(|r| decode_text("logout_reason", r)).transpose()?,
    })
}

fn history_from_row(row: &PgRow) -> Result<SessionSystemHistory, sqlx::Error> {
    Ok(SessionSystemHistory {
        id: HistoryId::new(row.try_get("id")?),
        session_id: SessionId::new(row.try_get("session_id")?),
        system_id: SystemId::new(row.try_get("system_id")?),
        switched_at: row.try_get("switched_at")?,
        ip_address: row.try_get("ip_address")?,
    })
}
