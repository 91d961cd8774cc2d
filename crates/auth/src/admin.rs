//! Grant administration: role permissions, role menus, user roles.
//!
//! Every replace is all-or-nothing at the store. Changes are visible to the
//! next permission check; issued system tokens keep their embedded role ids
//! until they expire.

use tracing::{info, instrument};

use portico_core::{MenuId, OrganizationId, PermissionId, RoleAssignment, RoleId, SystemScope, UserId};

use crate::AuthError;
use crate::store::{SharedStore, StoreError};

#[derive(Clone, Debug)]
pub struct AccessAdmin {
    store: SharedStore,
}

impl AccessAdmin {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()), err)]
    pub async fn replace_role_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<(), AuthError> {
        self.store
            .within(
                "replace_role_permissions",
                self.store.get().replace_role_permissions(role, permissions),
            )
            .await
            .map_err(|e| not_found(e, "role"))?;
        info!("role permissions replaced");
        Ok(())
    }

    #[instrument(skip(self, menus), fields(count = menus.len()), err)]
    pub async fn replace_role_menus(&self, role: RoleId, menus: &[MenuId]) -> Result<(), AuthError> {
        self.store
            .within("replace_role_menus", self.store.get().replace_role_menus(role, menus))
            .await
            .map_err(|e| not_found(e, "role"))?;
        info!("role menus replaced");
        Ok(())
    }

    /// Replace the user's assignments in `scope`.
    ///
    /// Every role must exist and belong to the same scope; nothing is written otherwise.
    #[instrument(skip(self, roles), fields(scope = %scope, count = roles.len()), err)]
    pub async fn replace_user_roles(
        &self,
        user: UserId,
        scope: SystemScope,
        roles: &[RoleId],
        organization: Option<OrganizationId>,
    ) -> Result<Vec<RoleAssignment>, AuthError> {
        let store = self.store.get();

        if self
            .store
            .within("find_user_by_id", store.find_user_by_id(user))
            .await?
            .is_none()
        {
            return Err(AuthError::NotFound(format!("user {user}")));
        }

        for &id in roles {
            let role = self
                .store
                .within("find_role_by_id", store.find_role_by_id(id))
                .await?
                .ok_or_else(|| AuthError::NotFound(format!("role {id}")))?;
            if role.scope() != scope {
                return Err(AuthError::InvalidInput(format!(
                    "role '{}' belongs to {}, not {}",
                    role.code,
                    role.scope(),
                    scope
                )));
            }
        }

        let assignments = self
            .store
            .within(
                "replace_user_roles",
                store.replace_user_roles(user, scope, roles, organization),
            )
            .await?;
        info!(user_id = %user, "user roles replaced");
        Ok(assignments)
    }

    /// Delete a custom role. Built-in roles are refused.
    #[instrument(skip(self), err)]
    pub async fn delete_role(&self, id: RoleId) -> Result<(), AuthError> {
        let role = self
            .store
            .within("find_role_by_id", self.store.get().find_role_by_id(id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("role {id}")))?;

        if role.is_system {
            return Err(AuthError::ProtectedRole(role.code));
        }

        self.store
            .within("delete_role", self.store.get().delete_role(id))
            .await
            .map_err(|e| not_found(e, "role"))?;
        info!(role = %role.code, "role deleted");
        Ok(())
    }
}

fn not_found(err: StoreError, what: &str) -> AuthError {
    match err {
        StoreError::NotFound(detail) => AuthError::NotFound(format!("{what} {detail}")),
        other => other.into(),
    }
}
