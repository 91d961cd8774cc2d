//! Permission resolution.
//!
//! The effective permission set of a user in a scope is the union over every
//! active role assignment admitted by that scope (its own system, plus every
//! platform-wide assignment) of the permissions of the assigned role. In the
//! platform scope only platform-wide assignments count.
//!
//! There is no cache: each call re-reads the store, so a reassignment is
//! visible to the very next check.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};

use portico_core::{SystemScope, UserId};

use crate::store::{NewPermission, SharedStore, StoreError};
use crate::{AuthError, PermissionCode, Requirement};

#[derive(Clone, Debug)]
pub struct PermissionResolver {
    store: SharedStore,
}

impl PermissionResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Effective permission codes of `user` in `scope`.
    ///
    /// Store failures surface as `PermissionCheckFailed`, never as an empty set.
    #[instrument(skip(self), fields(user_id = %user, scope = %scope), err)]
    pub async fn resolve(&self, user: UserId, scope: SystemScope) -> Result<BTreeSet<String>, AuthError> {
        let permissions = self
            .store
            .within("permissions_for_user", self.store.get().permissions_for_user(user, scope))
            .await
            .map_err(AuthError::permission_check)?;

        let codes: BTreeSet<String> = permissions.into_iter().map(|p| p.code).collect();
        debug!(count = codes.len(), "resolved permissions");
        Ok(codes)
    }

    /// Whether `user` holds `code` in `scope`, without materialising the set.
    #[instrument(skip(self), fields(user_id = %user, scope = %scope), err)]
    pub async fn check(&self, user: UserId, scope: SystemScope, code: &str) -> Result<bool, AuthError> {
        self.store
            .within("has_permission", self.store.get().has_permission(user, scope, code))
            .await
            .map_err(AuthError::permission_check)
    }

    /// Enforce a requirement: `Forbidden` on denial, `PermissionCheckFailed`
    /// when no decision could be made.
    pub async fn authorize(
        &self,
        user: UserId,
        scope: SystemScope,
        requirement: &Requirement,
    ) -> Result<(), AuthError> {
        let outcome = match requirement {
            Requirement::One(code) => {
                if self.check(user, scope, code.as_str()).await? {
                    Ok(())
                } else {
                    Err(code.to_string())
                }
            }
            _ => requirement.evaluate(&self.resolve(user, scope).await?),
        };

        outcome.map_err(|missing| {
            info!(user_id = %user, scope = %scope, permission = %missing, "permission denied");
            AuthError::Forbidden(missing)
        })
    }

    /// Create the missing permission for every (module, action) link of `scope`.
    ///
    /// Additive and idempotent: existing codes are left untouched and nothing is
    /// deleted. Returns the codes created by this call.
    #[instrument(skip(self), fields(scope = %scope), err)]
    pub async fn sync_permissions(&self, scope: SystemScope) -> Result<Vec<String>, AuthError> {
        let store = self.store.get();

        let system_code = match scope {
            SystemScope::Platform => None,
            SystemScope::System(id) => {
                let system = self
                    .store
                    .within("find_system_by_id", store.find_system_by_id(id))
                    .await?
                    .ok_or_else(|| AuthError::SystemNotFound(id.to_string()))?;
                Some(system.code)
            }
        };

        let modules = self
            .store
            .within("modules_in_scope", store.modules_in_scope(scope))
            .await?;

        let mut created = Vec::new();
        for module in modules {
            let actions = match self
                .store
                .within("actions_for_module", store.actions_for_module(module.id))
                .await
            {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(module = %module.code, error = %e, "skipping module during permission sync");
                    continue;
                }
            };

            for action in actions {
                let code = PermissionCode::generate(system_code.as_deref(), &module.code, &action.code);
                let name = match &system_code {
                    Some(sys) => format!("{} - {} - {}", sys, module.name, action.name),
                    None => format!("{} - {}", module.name, action.name),
                };

                if self
                    .store
                    .within("find_permission_by_code", store.find_permission_by_code(code.as_str()))
                    .await?
                    .is_some()
                {
                    continue;
                }

                let request = NewPermission {
                    code: code.to_string(),
                    name,
                    description: String::new(),
                    system_id: scope.system_id(),
                    module_id: module.id,
                    action_id: Some(action.id),
                };
                match self.store.within("create_permission", store.create_permission(request)).await {
                    Ok(p) => created.push(p.code),
                    // Lost a race with a concurrent sync; the code exists now.
                    Err(StoreError::Conflict(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(created = created.len(), "permission sync finished");
        Ok(created)
    }
}
