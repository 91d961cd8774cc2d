use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{ActionId, AssignmentId, MenuId, ModuleId, OrganizationId, PermissionId, RoleId, SystemId, UserId};
use crate::scope::SystemScope;

/// A registered sub-system users can switch into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    pub code: String,
    pub name: String,
    pub description: String,
    pub icon_name: String,
    pub base_url: String,
    pub color: String,
    pub is_active: bool,
    pub sequence: i32,
}

impl Entity for System {
    type Id = SystemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A functional area of a system (or of the platform when unscoped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub code: String,
    pub name: String,
    pub system_id: Option<SystemId>,
    pub is_active: bool,
}

impl Module {
    pub fn scope(&self) -> SystemScope {
        SystemScope::from_option(self.system_id)
    }
}

/// A verb that can be performed on a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

/// Named permission bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub code: String,
    pub name: String,
    pub description: String,
    pub system_id: Option<SystemId>,
    /// Built-in roles cannot be deleted.
    pub is_system: bool,
    pub is_active: bool,
}

impl Role {
    pub fn scope(&self) -> SystemScope {
        SystemScope::from_option(self.system_id)
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// `(user, system?, role, organization?)` grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: AssignmentId,
    pub user_id: UserId,
    pub system_id: Option<SystemId>,
    pub role_id: RoleId,
    pub organization_id: Option<OrganizationId>,
    pub is_active: bool,
    pub is_default: bool,
}

impl RoleAssignment {
    pub fn scope(&self) -> SystemScope {
        SystemScope::from_option(self.system_id)
    }
}

/// Grantable capability identified by a dotted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub code: String,
    pub name: String,
    pub description: String,
    pub system_id: Option<SystemId>,
    pub module_id: ModuleId,
    pub action_id: Option<ActionId>,
    pub is_active: bool,
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Navigation node. `parent_id` makes the set a forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: MenuId,
    pub code: String,
    pub name: String,
    pub system_id: Option<SystemId>,
    pub parent_id: Option<MenuId>,
    pub path: String,
    pub icon: String,
    pub sequence: i32,
    pub is_visible: bool,
    pub is_active: bool,
}

impl Menu {
    /// Whether the node should be rendered for regular users.
    pub fn is_displayable(&self) -> bool {
        self.is_visible && self.is_active
    }
}

impl Entity for Menu {
    type Id = MenuId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
