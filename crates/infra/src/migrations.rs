//! Schema bootstrap.
//!
//! Every statement is idempotent, so running the list on each startup is safe.

use sqlx::PgPool;
use tracing::{debug, info};

/// Named DDL statements, applied in order.
pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "systems",
        r#"
        CREATE TABLE IF NOT EXISTS systems (
            id          BIGSERIAL PRIMARY KEY,
            code        TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            icon_name   TEXT NOT NULL DEFAULT '',
            base_url    TEXT NOT NULL DEFAULT '',
            color       TEXT NOT NULL DEFAULT '',
            is_active   BOOLEAN NOT NULL DEFAULT TRUE,
            sequence    INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "actions",
        r#"
        CREATE TABLE IF NOT EXISTS actions (
            id        BIGSERIAL PRIMARY KEY,
            code      TEXT NOT NULL UNIQUE,
            name      TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "modules",
        r#"
        CREATE TABLE IF NOT EXISTS modules (
            id        BIGSERIAL PRIMARY KEY,
            code      TEXT NOT NULL,
            name      TEXT NOT NULL,
            system_id BIGINT REFERENCES systems(id),
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "module_actions",
        r#"
        CREATE TABLE IF NOT EXISTS module_actions (
            module_id BIGINT NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
            action_id BIGINT NOT NULL REFERENCES actions(id) ON DELETE CASCADE,
            PRIMARY KEY (module_id, action_id)
        )
        "#,
    ),
    (
        "permissions",
        r#"
        CREATE TABLE IF NOT EXISTS permissions (
            id          BIGSERIAL PRIMARY KEY,
            code        TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            system_id   BIGINT REFERENCES systems(id),
            module_id   BIGINT NOT NULL REFERENCES modules(id),
            action_id   BIGINT REFERENCES actions(id),
            is_active   BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id          BIGSERIAL PRIMARY KEY,
            code        TEXT NOT NULL,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            system_id   BIGINT REFERENCES systems(id),
            is_system   BOOLEAN NOT NULL DEFAULT FALSE,
            is_active   BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "roles_code_unique",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS roles_system_code_key
            ON roles (system_id, code) WHERE system_id IS NOT NULL
        "#,
    ),
    (
        "roles_platform_code_unique",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS roles_platform_code_key
            ON roles (code) WHERE system_id IS NULL
        "#,
    ),
    (
        "role_permissions",
        r#"
        CREATE TABLE IF NOT EXISTS role_permissions (
            role_id       BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            permission_id BIGINT NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
            PRIMARY KEY (role_id, permission_id)
        )
        "#,
    ),
    (
        "menus",
        r#"
        CREATE TABLE IF NOT EXISTS menus (
            id         BIGSERIAL PRIMARY KEY,
            code       TEXT NOT NULL,
            name       TEXT NOT NULL,
            system_id  BIGINT REFERENCES systems(id),
            parent_id  BIGINT,
            path       TEXT NOT NULL DEFAULT '',
            icon       TEXT NOT NULL DEFAULT '',
            sequence   INTEGER NOT NULL DEFAULT 0,
            is_visible BOOLEAN NOT NULL DEFAULT TRUE,
            is_active  BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "role_menus",
        r#"
        CREATE TABLE IF NOT EXISTS role_menus (
            role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            menu_id BIGINT NOT NULL REFERENCES menus(id) ON DELETE CASCADE,
            PRIMARY KEY (role_id, menu_id)
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id                BIGSERIAL PRIMARY KEY,
            email             TEXT NOT NULL,
            password_hash     TEXT NOT NULL,
            first_name        TEXT NOT NULL DEFAULT '',
            last_name         TEXT NOT NULL DEFAULT '',
            is_active         BOOLEAN NOT NULL DEFAULT TRUE,
            organization_id   BIGINT,
            default_system_id BIGINT REFERENCES systems(id),
            last_login_at     TIMESTAMPTZ,
            created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "users_email_unique",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (LOWER(email))
        "#,
    ),
    (
        "user_system_roles",
        r#"
        CREATE TABLE IF NOT EXISTS user_system_roles (
            id              BIGSERIAL PRIMARY KEY,
            user_id         BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            system_id       BIGINT REFERENCES systems(id),
            role_id         BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            organization_id BIGINT,
            is_active       BOOLEAN NOT NULL DEFAULT TRUE,
            is_default      BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    ),
    (
        "user_system_roles_system_unique",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS user_system_roles_system_key
            ON user_system_roles (user_id, system_id, role_id) WHERE system_id IS NOT NULL
        "#,
    ),
    (
        "user_system_roles_platform_unique",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS user_system_roles_platform_key
            ON user_system_roles (user_id, role_id) WHERE system_id IS NULL
        "#,
    ),
    (
        "devices",
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id              BIGSERIAL PRIMARY KEY,
            device_uid      TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL DEFAULT '',
            platform        TEXT NOT NULL,
            os_version      TEXT NOT NULL DEFAULT '',
            app_version     TEXT NOT NULL DEFAULT '',
            push_token      TEXT,
            organization_id BIGINT,
            is_active       BOOLEAN NOT NULL DEFAULT TRUE,
            registered_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_heartbeat  TIMESTAMPTZ
        )
        "#,
    ),
    (
        "sessions",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id                 BIGSERIAL PRIMARY KEY,
            session_token      TEXT NOT NULL UNIQUE,
            user_id            BIGINT NOT NULL REFERENCES users(id),
            device_id          BIGINT NOT NULL REFERENCES devices(id),
            current_system_id  BIGINT REFERENCES systems(id),
            organization_id    BIGINT,
            ip_address         TEXT NOT NULL DEFAULT '',
            user_agent         TEXT NOT NULL DEFAULT '',
            is_active          BOOLEAN NOT NULL DEFAULT TRUE,
            created_at         TIMESTAMPTZ NOT NULL,
            expires_at         TIMESTAMPTZ NOT NULL,
            last_activity      TIMESTAMPTZ,
            last_system_switch TIMESTAMPTZ,
            logout_at          TIMESTAMPTZ,
            logout_reason      TEXT
        )
        "#,
    ),
    (
        "sessions_active_index",
        r#"
        CREATE INDEX IF NOT EXISTS sessions_active_expiry_idx
            ON sessions (expires_at) WHERE is_active
        "#,
    ),
    (
        "session_system_history",
        r#"
        CREATE TABLE IF NOT EXISTS session_system_history (
            id          BIGSERIAL PRIMARY KEY,
            session_id  BIGINT NOT NULL REFERENCES sessions(id),
            system_id   BIGINT NOT NULL REFERENCES systems(id),
            switched_at TIMESTAMPTZ NOT NULL,
            ip_address  TEXT NOT NULL DEFAULT ''
        )
        "#,
    ),
];

/// Apply every migration.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        debug!(migration = name, "applying");
        sqlx::query(sql).execute(pool).await?;
    }
    info!(count = MIGRATIONS.len(), "schema is up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = MIGRATIONS.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), MIGRATIONS.len());
    }

    #[test]
    fn every_statement_is_idempotent() {
        for (name, sql) in MIGRATIONS {
            assert!(sql.contains("IF NOT EXISTS"), "migration {name} is not idempotent");
        }
    }

    #[test]
    fn tables_are_created_before_they_are_referenced() {
        let position = |table: &str| {
            MIGRATIONS
                .iter()
                .position(|(_, sql)| sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")))
                .unwrap()
        };
        assert!(position("systems") < position("modules"));
        assert!(position("roles") < position("user_system_roles"));
        assert!(position("sessions") < position("session_system_history"));
    }
}
