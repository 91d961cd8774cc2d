//! Reference data: actions, systems, modules, permissions, built-in roles,
//! navigation and a bootstrap administrator.
//!
//! Safe to run repeatedly. Catalogue rows are keyed by fixed ids and skipped
//! when present; role grants are reset to the shipped set.

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use portico_auth::{AuthStore, NewDevice, NewPermission, NewUser, PermissionCode, StoreError, hash_password};
use portico_core::{
    Action, ActionId, DevicePlatform, Menu, MenuId, Module, ModuleId, PermissionId, Role, RoleId, System, SystemId,
    SystemScope,
};

pub const ADMIN_SYSTEM: SystemId = SystemId::new(1);
pub const DSL_SYSTEM: SystemId = SystemId::new(2);

pub const SUPER_ADMIN: RoleId = RoleId::new(1);
pub const ADMIN: RoleId = RoleId::new(2);
pub const OPERATOR: RoleId = RoleId::new(3);
pub const DSL_ADMIN: RoleId = RoleId::new(4);
pub const DSL_DEVELOPER: RoleId = RoleId::new(5);
pub const DSL_VIEWER: RoleId = RoleId::new(6);

const ACTIONS: &[(i64, &str, &str)] = &[
    (1, "view", "View"),
    (2, "create", "Create"),
    (3, "update", "Update"),
    (4, "delete", "Delete"),
    (5, "export", "Export"),
    (6, "import", "Import"),
    (7, "approve", "Approve"),
    (8, "reject", "Reject"),
    (9, "execute", "Execute"),
    (10, "publish", "Publish"),
];

const ADMIN_MODULES: &[(i64, &str, &str)] = &[
    (1, "user", "Users"),
    (2, "organization", "Organizations"),
    (3, "system", "Systems"),
    (4, "module", "Modules"),
    (5, "action", "Actions"),
    (6, "role", "Roles"),
    (7, "permission", "Permissions"),
    (8, "menu", "Menus"),
    (9, "device", "Devices"),
    (10, "session", "Sessions"),
    (11, "monitoring", "Monitoring"),
    (12, "language", "Languages"),
    (13, "translation", "Translations"),
];

const DSL_MODULES: &[(i64, &str, &str)] = &[
    (14, "schema", "Schemas"),
    (15, "field", "Fields"),
    (16, "rule", "Rules"),
    (17, "workflow", "Workflows"),
    (18, "template", "Templates"),
    (19, "function", "Functions"),
    (20, "variable", "Variables"),
    (21, "executor", "Executor"),
    (22, "log", "Logs"),
];

/// Action ids granted per module in each system.
const ADMIN_ACTIONS: &[i64] = &[1, 2, 3, 4];
const DSL_ACTIONS: &[i64] = &[1, 2, 3, 4, 9];

type MenuRow = (i64, &'static str, &'static str, Option<i64>, &'static str, &'static str, i32);

const ADMIN_MENUS: &[MenuRow] = &[
    (1, "dashboard", "Dashboard", None, "/dashboard", "LayoutDashboard", 1),
    (2, "user_management", "User management", None, "", "Users", 2),
    (3, "users", "Users", Some(2), "/users", "User", 1),
    (4, "roles", "Roles", Some(2), "/roles", "Shield", 2),
    (5, "permissions", "Permissions", Some(2), "/permissions", "Key", 3),
    (6, "org_management", "Organization management", None, "", "Building", 3),
    (7, "organizations", "Organizations", Some(6), "/organizations", "Building2", 1),
    (8, "org_types", "Organization types", Some(6), "/organization-types", "Tag", 2),
    (9, "system_config", "System configuration", None, "", "Settings", 4),
    (10, "systems", "Systems", Some(9), "/systems", "Server", 1),
    (11, "modules", "Modules", Some(9), "/modules", "Package", 2),
    (12, "actions", "Actions", Some(9), "/actions", "Zap", 3),
    (13, "menus", "Menus", Some(9), "/menus", "Menu", 4),
    (14, "device_management", "Devices & sessions", None, "", "Smartphone", 5),
    (15, "devices", "Devices", Some(14), "/devices", "Monitor", 1),
    (16, "sessions", "Sessions", Some(14), "/sessions", "Activity", 2),
    (17, "monitoring", "Monitoring", None, "/monitoring", "BarChart", 6),
    (18, "localization", "Localization", None, "", "Globe", 7),
    (19, "languages", "Languages", Some(18), "/languages", "Languages", 1),
];

const DSL_MENUS: &[MenuRow] = &[
    (21, "dsl_dashboard", "Dashboard", None, "/dashboard", "LayoutDashboard", 1),
    (22, "data_modeling", "Data modeling", None, "", "Database", 2),
    (23, "schemas", "Schemas", Some(22), "/schemas", "Table", 1),
    (24, "fields", "Fields", Some(22), "/fields", "Columns", 2),
    (25, "business_logic", "Business logic", None, "", "GitBranch", 3),
    (26, "rules", "Rules", Some(25), "/rules", "CheckSquare", 1),
    (27, "workflows", "Workflows", Some(25), "/workflows", "Workflow", 2),
    (28, "functions", "Functions", Some(25), "/functions", "Code", 3),
    (29, "templates", "Templates", None, "/templates", "FileCode", 4),
    (30, "variables", "Variables", None, "/variables", "Variable", 5),
    (31, "execution", "Execution", None, "", "Play", 6),
    (32, "executor", "Executor", Some(31), "/executor", "Terminal", 1),
    (33, "logs", "Logs", Some(31), "/logs", "ScrollText", 2),
];

/// Bootstrap account and device.
#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub admin_email: String,
    pub admin_password: String,
    pub web_device_uid: String,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            admin_email: "admin@gerege.mn".to_string(),
            admin_password: "Admin@123".to_string(),
            web_device_uid: "portico-web".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub admin_created: bool,
}

/// Load the reference data set.
pub async fn run(store: &dyn AuthStore, options: &SeedOptions) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    for &(id, code, name) in ACTIONS {
        store
            .insert_action(&Action {
                id: ActionId::new(id),
                code: code.to_string(),
                name: name.to_string(),
                is_active: true,
            })
            .await
            .with_context(|| format!("seeding action {code}"))?;
    }

    for system in systems() {
        store
            .insert_system(&system)
            .await
            .with_context(|| format!("seeding system {}", system.code))?;
    }

    for (system, modules, actions) in [
        (ADMIN_SYSTEM, ADMIN_MODULES, ADMIN_ACTIONS),
        (DSL_SYSTEM, DSL_MODULES, DSL_ACTIONS),
    ] {
        let system_code = if system == ADMIN_SYSTEM { "admin" } else { "dsl" };
        for &(id, code, name) in modules {
            let module = Module {
                id: ModuleId::new(id),
                code: code.to_string(),
                name: name.to_string(),
                system_id: Some(system),
                is_active: true,
            };
            store
                .insert_module(&module)
                .await
                .with_context(|| format!("seeding module {code}"))?;

            for &action_id in actions {
                let action = ActionId::new(action_id);
                store.link_module_action(module.id, action).await?;
                if ensure_permission(store, system, system_code, &module, action).await? {
                    report.permissions_created += 1;
                }
            }
        }
    }

    for role in roles() {
        store
            .insert_role(&role)
            .await
            .with_context(|| format!("seeding role {}", role.code))?;
    }

    for (system, rows) in [(ADMIN_SYSTEM, ADMIN_MENUS), (DSL_SYSTEM, DSL_MENUS)] {
        for &(id, code, name, parent, path, icon, sequence) in rows {
            store
                .insert_menu(&Menu {
                    id: MenuId::new(id),
                    code: code.to_string(),
                    name: name.to_string(),
                    system_id: Some(system),
                    parent_id: parent.map(MenuId::new),
                    path: path.to_string(),
                    icon: icon.to_string(),
                    sequence,
                    is_visible: true,
                    is_active: true,
                })
                .await
                .with_context(|| format!("seeding menu {code}"))?;
        }
    }

    let admin_menus: Vec<MenuId> = ADMIN_MENUS.iter().map(|m| MenuId::new(m.0)).collect();
    let dsl_menus: Vec<MenuId> = DSL_MENUS.iter().map(|m| MenuId::new(m.0)).collect();
    for role in [SUPER_ADMIN, ADMIN] {
        store.replace_role_menus(role, &admin_menus).await?;
    }
    for role in [DSL_ADMIN, DSL_DEVELOPER, DSL_VIEWER] {
        store.replace_role_menus(role, &dsl_menus).await?;
    }

    let admin_permissions = permission_ids(store, "admin", ADMIN_MODULES, ADMIN_ACTIONS).await?;
    let dsl_permissions = permission_ids(store, "dsl", DSL_MODULES, DSL_ACTIONS).await?;
    let dsl_view = permission_ids(store, "dsl", DSL_MODULES, &[1]).await?;
    store.replace_role_permissions(SUPER_ADMIN, &admin_permissions).await?;
    store.replace_role_permissions(DSL_ADMIN, &dsl_permissions).await?;
    store.replace_role_permissions(DSL_DEVELOPER, &dsl_permissions).await?;
    store.replace_role_permissions(DSL_VIEWER, &dsl_view).await?;

    let admin = match store.find_user_by_email(&options.admin_email).await? {
        Some(user) => user,
        None => {
            let user = store
                .create_user(NewUser {
                    email: options.admin_email.clone(),
                    password_hash: hash_password(&options.admin_password)?,
                    first_name: "Super".to_string(),
                    last_name: "Admin".to_string(),
                    is_active: true,
                    organization_id: None,
                    default_system_id: Some(ADMIN_SYSTEM),
                })
                .await
                .context("seeding administrator")?;
            report.admin_created = true;
            user
        }
    };

    for (system, role) in [(ADMIN_SYSTEM, SUPER_ADMIN), (DSL_SYSTEM, DSL_ADMIN)] {
        let scope = SystemScope::System(system);
        if store.role_assignments(admin.id, scope).await?.is_empty() {
            store.replace_user_roles(admin.id, scope, &[role], None).await?;
        }
    }

    store
        .register_device(
            NewDevice {
                device_uid: options.web_device_uid.clone(),
                name: "Web console".to_string(),
                platform: DevicePlatform::Web,
                os_version: String::new(),
                app_version: String::new(),
                push_token: None,
                organization_id: None,
            },
            Utc::now(),
        )
        .await
        .context("seeding web device")?;

    info!(
        permissions_created = report.permissions_created,
        admin_created = report.admin_created,
        "reference data seeded"
    );
    Ok(report)
}

fn systems() -> [System; 2] {
    [
        System {
            id: ADMIN_SYSTEM,
            code: "admin".to_string(),
            name: "Administration".to_string(),
            description: "Users, organizations, access and configuration".to_string(),
            icon_name: "Settings".to_string(),
            base_url: String::new(),
            color: "#6366f1".to_string(),
            is_active: true,
            sequence: 1,
        },
        System {
            id: DSL_SYSTEM,
            code: "dsl".to_string(),
            name: "DSL".to_string(),
            description: "Dynamic schemas, rules and workflows".to_string(),
            icon_name: "Code".to_string(),
            base_url: String::new(),
            color: "#10b981".to_string(),
            is_active: true,
            sequence: 2,
        },
    ]
}

fn roles() -> Vec<Role> {
    let role = |id: RoleId, code: &str, name: &str, description: &str, system: SystemId| Role {
        id,
        code: code.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        system_id: Some(system),
        is_system: true,
        is_active: true,
    };
    vec![
        role(SUPER_ADMIN, "super_admin", "Super admin", "Full administrative access", ADMIN_SYSTEM),
        role(ADMIN, "admin", "Admin", "Organization administrator", ADMIN_SYSTEM),
        role(OPERATOR, "operator", "Operator", "Day-to-day operator", ADMIN_SYSTEM),
        role(DSL_ADMIN, "dsl_admin", "DSL admin", "Full DSL access", DSL_SYSTEM),
        role(DSL_DEVELOPER, "dsl_developer", "DSL developer", "Builds schemas, rules and workflows", DSL_SYSTEM),
        role(DSL_VIEWER, "dsl_viewer", "DSL viewer", "Read-only DSL access", DSL_SYSTEM),
    ]
}

/// Create `{system}.{module}.{action}` unless it exists. Returns whether it was created.
async fn ensure_permission(
    store: &dyn AuthStore,
    system: SystemId,
    system_code: &str,
    module: &Module,
    action: ActionId,
) -> anyhow::Result<bool> {
    let action_code = action_code(action)?;
    let code = PermissionCode::generate(Some(system_code), &module.code, action_code);
    if store.find_permission_by_code(code.as_str()).await?.is_some() {
        return Ok(false);
    }
    let request = NewPermission {
        code: code.to_string(),
        name: code.to_string(),
        description: String::new(),
        system_id: Some(system),
        module_id: module.id,
        action_id: Some(action),
    };
    match store.create_permission(request).await {
        Ok(_) => Ok(true),
        Err(StoreError::Conflict(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn permission_ids(
    store: &dyn AuthStore,
    system_code: &str,
    modules: &[(i64, &str, &str)],
    actions: &[i64],
) -> anyhow::Result<Vec<PermissionId>> {
    let mut ids = Vec::with_capacity(modules.len() * actions.len());
    for &(_, module, _) in modules {
        for &action in actions {
            let code = PermissionCode::generate(Some(system_code), module, action_code(ActionId::new(action))?);
            let permission = store
                .find_permission_by_code(code.as_str())
                .await?
                .with_context(|| format!("permission {code} missing after seeding"))?;
            ids.push(permission.id);
        }
    }
    Ok(ids)
}

fn action_code(action: ActionId) -> anyhow::Result<&'static str> {
    ACTIONS
        .iter()
        .find(|(id, _, _)| *id == action.get())
        .map(|(_, code, _)| *code)
        .with_context(|| format!("unknown action {action}"))
}
