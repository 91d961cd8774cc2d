//! Session lifecycle: login, validation, system switch, termination.
//!
//! ```text
//!   login ──▶ Active ──switch──▶ SystemBound ──switch──▶ SystemBound
//!               ▲  │                 │  │
//!               │  └──── exit ◀──────┘  │
//!               │                       ▼
//!               └──────────────── Terminated (logout / remote / device / expiry)
//! ```
//!
//! The session row is the source of truth. A token is only honoured while its
//! session is active and unexpired.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Span, info, instrument, warn};
use uuid::Uuid;

use portico_core::{
    DeviceId, LogoutReason, Role, RoleId, Session, SessionId, SessionSystemHistory, System,
    SystemScope, User, UserId,
};

use crate::codec::{CredentialCodec, IssuedToken, SystemGrant, TokenClaims, TokenKind};
use crate::menu::{MenuAssembler, MenuNode};
use crate::resolver::PermissionResolver;
use crate::store::{NewSession, Page, PageResult, SharedStore, StoreError};
use crate::{AuthError, password};

const BEARER: &str = "Bearer";

/// Credentials and client metadata presented at login.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_uid: String,
    pub ip_address: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
    pub available_systems: Vec<System>,
    #[serde(skip)]
    pub session: Session,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub system_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub current_system: System,
    pub current_role: Option<Role>,
    pub permissions: Vec<String>,
    pub menus: Vec<MenuNode>,
    #[serde(skip)]
    pub session: Session,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

impl From<IssuedToken> for AccessGrant {
    fn from(token: IssuedToken) -> Self {
        Self {
            access_token: token.token,
            token_type: BEARER,
            expires_in: token.expires_in,
        }
    }
}

/// A verified credential together with its live session row.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub claims: TokenClaims,
    pub session: Session,
}

impl AuthenticatedSession {
    pub fn user_id(&self) -> UserId {
        self.claims.user_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    /// Scope the request runs in, as carried by the credential.
    pub fn scope(&self) -> SystemScope {
        self.claims.scope()
    }
}

/// Creates, validates, switches and terminates sessions.
#[derive(Clone, Debug)]
pub struct SessionManager {
    store: SharedStore,
    codec: CredentialCodec,
    resolver: PermissionResolver,
    menus: MenuAssembler,
}

impl SessionManager {
    pub fn new(store: SharedStore, codec: CredentialCodec) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            menus: MenuAssembler::new(store.clone()),
            store,
            codec,
        }
    }

    pub fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn menus(&self) -> &MenuAssembler {
        &self.menus
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Login / refresh
    // ─────────────────────────────────────────────────────────────────────────

    /// Authenticate and open a session bound to an active device.
    #[instrument(
        skip(self, request),
        fields(email = %request.email, device_uid = %request.device_uid, session_id),
        err
    )]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let store = self.store.get();

        let user = self
            .store
            .within("find_user_by_email", store.find_user_by_email(&request.email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        let password = request.password.clone();
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password verification task failed: {e}")))?;
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let device = self
            .store
            .within("find_device_by_uid", store.find_device_by_uid(&request.device_uid))
            .await?
            .ok_or(AuthError::DeviceNotFound)?;
        if !device.is_active {
            return Err(AuthError::DeviceNotActive);
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.codec.config().platform_ttl)
            .ok_or_else(|| AuthError::Internal("platform lifetime overflows the clock".to_string()))?;
        let session = self
            .store
            .within(
                "create_session",
                store.create_session(NewSession {
                    session_token: Uuid::new_v4().to_string(),
                    user_id: user.id,
                    device_id: device.id,
                    organization_id: user.organization_id,
                    ip_address: request.ip_address,
                    user_agent: request.user_agent,
                    created_at: now,
                    expires_at,
                }),
            )
            .await?;
        Span::current().record("session_id", session.id.get());

        let access = self.codec.mint(TokenKind::Platform, &user, &session, None, now)?;
        let refresh = self.codec.mint_refresh(&user, &session, now)?;

        if let Err(e) = self.store.within("record_login", store.record_login(user.id, now)).await {
            warn!(user_id = %user.id, error = %e, "failed to record last login");
        }

        let available_systems = self.available_systems(user.id).await?;

        info!(user_id = %user.id, device_id = %device.id, "login succeeded");
        Ok(LoginOutcome {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: BEARER,
            expires_in: access.expires_in,
            user,
            available_systems,
            session,
        })
    }

    /// Exchange a refresh token for a new platform/refresh pair.
    #[instrument(skip(self, refresh_token), err)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.codec.verify(refresh_token)?;
        if claims.token_type != TokenKind::Refresh {
            return Err(AuthError::InvalidToken);
        }

        let session = self.live_session(&claims).await?;
        let user = self.active_user(claims.user_id).await?;

        let now = Utc::now();
        let access = self.codec.mint(TokenKind::Platform, &user, &session, None, now)?;
        let refresh = self.codec.mint_refresh(&user, &session, now)?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: BEARER,
            expires_in: access.expires_in,
        })
    }

    /// Systems reachable through the user's active system-scoped assignments,
    /// ordered by `sequence`.
    pub async fn available_systems(&self, user: UserId) -> Result<Vec<System>, AuthError> {
        let store = self.store.get();
        let assignments = self
            .store
            .within("active_assignments", store.active_assignments(user))
            .await?;

        let ids: BTreeSet<_> = assignments.iter().filter_map(|a| a.system_id).collect();
        let mut systems = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(system) = self
                .store
                .within("find_system_by_id", store.find_system_by_id(id))
                .await?
                .filter(|s| s.is_active)
            {
                systems.push(system);
            }
        }
        systems.sort_by_key(|s| s.sequence);
        Ok(systems)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify an access credential and the session behind it.
    ///
    /// Refresh tokens are rejected here. A system token is only honoured while
    /// the session still points at the token's system.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedSession, AuthError> {
        let claims = self.codec.verify(token)?;
        if claims.token_type == TokenKind::Refresh {
            return Err(AuthError::InvalidToken);
        }

        let session = self.live_session(&claims).await?;

        if claims.is_system_token() && claims.system_id != session.current_system_id {
            return Err(AuthError::InvalidToken);
        }

        Ok(AuthenticatedSession { claims, session })
    }

    /// `active && now < expires_at` for the stored row.
    pub async fn is_session_valid(&self, id: SessionId) -> Result<bool, AuthError> {
        let session = self
            .store
            .within("find_session", self.store.get().find_session(id))
            .await?;
        Ok(session.is_some_and(|s| s.is_valid(Utc::now())))
    }

    /// Stamp `last_activity` without blocking the caller.
    ///
    /// Runs as a detached task: it outlives the triggering request and its
    /// failure is logged, never returned.
    pub fn touch(&self, session: SessionId) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store
                .within("touch_session", store.get().touch_session(session, Utc::now()))
                .await
            {
                warn!(session_id = %session, error = %e, "activity touch failed");
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // System switch
    // ─────────────────────────────────────────────────────────────────────────

    /// Enter the system identified by `system_code`.
    ///
    /// Nothing is written unless the user holds at least one active assignment
    /// in that system. The session pointer and the history row are written in
    /// one store transaction.
    #[instrument(
        skip(self, auth, ip_address),
        fields(user_id = %auth.user_id(), session_id = %auth.session_id(), system_code = %system_code),
        err
    )]
    pub async fn switch_system(
        &self,
        auth: &AuthenticatedSession,
        system_code: &str,
        ip_address: &str,
    ) -> Result<SwitchOutcome, AuthError> {
        let store = self.store.get();
        let user_id = auth.user_id();

        let system = self
            .store
            .within("find_system_by_code", store.find_system_by_code(system_code))
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| AuthError::SystemNotFound(system_code.to_string()))?;

        let assignments = self
            .store
            .within(
                "role_assignments",
                store.role_assignments(user_id, SystemScope::System(system.id)),
            )
            .await?;
        if assignments.is_empty() {
            info!(system_id = %system.id, "switch rejected: no role assignment");
            return Err(AuthError::NoSystemAccess(system.code));
        }

        let mut role_ids: Vec<RoleId> = Vec::with_capacity(assignments.len());
        for a in &assignments {
            if !role_ids.contains(&a.role_id) {
                role_ids.push(a.role_id);
            }
        }

        let user = self.active_user(user_id).await?;
        // Re-read: the session may have been revoked since the request was authenticated.
        self.live_session(&auth.claims).await?;

        let now = Utc::now();
        let session = self
            .store
            .within(
                "record_switch",
                store.record_switch(auth.session_id(), system.id, now, ip_address),
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AuthError::SessionNotFound,
                StoreError::Precondition(_) => AuthError::SessionInvalid,
                other => other.into(),
            })?;

        let token = self.codec.mint(
            TokenKind::System,
            &user,
            &session,
            Some(SystemGrant {
                system: &system,
                role_ids: &role_ids,
            }),
            now,
        )?;

        let current_role = match self
            .store
            .within("find_role_by_id", store.find_role_by_id(role_ids[0]))
            .await
        {
            Ok(role) => role,
            Err(e) => {
                warn!(error = %e, "failed to load current role after switch");
                None
            }
        };

        let permissions = match self.resolver.resolve(user_id, SystemScope::System(system.id)).await {
            Ok(set) => set.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "failed to load permissions after switch");
                Vec::new()
            }
        };

        let menus = match self.menus.user_tree(user_id, system.id).await {
            Ok(tree) => tree,
            Err(e) => {
                warn!(error = %e, "failed to load menus after switch");
                Vec::new()
            }
        };

        info!(system_id = %system.id, roles = role_ids.len(), "system switch succeeded");
        Ok(SwitchOutcome {
            system_token: token.token,
            token_type: BEARER,
            expires_in: token.expires_in,
            current_system: system,
            current_role,
            permissions,
            menus,
            session,
        })
    }

    /// Leave the current system and return to the platform scope.
    #[instrument(skip(self, auth), fields(session_id = %auth.session_id()), err)]
    pub async fn exit_system(&self, auth: &AuthenticatedSession) -> Result<AccessGrant, AuthError> {
        let user = self.active_user(auth.user_id()).await?;
        let session = self
            .store
            .within("clear_current_system", self.store.get().clear_current_system(auth.session_id()))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AuthError::SessionNotFound,
                other => other.into(),
            })?;

        let token = self
            .codec
            .mint(TokenKind::Platform, &user, &session, None, Utc::now())?;
        Ok(token.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Termination
    // ─────────────────────────────────────────────────────────────────────────

    /// Terminate one session. Terminating an already terminated session is a no-op.
    #[instrument(skip(self), err)]
    pub async fn logout(&self, session: SessionId, reason: LogoutReason) -> Result<(), AuthError> {
        let changed = self
            .store
            .within(
                "terminate_session",
                self.store.get().terminate_session(session, reason, Utc::now()),
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AuthError::SessionNotFound,
                other => other.into(),
            })?;

        if changed {
            info!(session_id = %session, reason = %reason, "session terminated");
        }
        Ok(())
    }

    /// Terminate every active session of a user, or only those on one device.
    #[instrument(skip(self), err)]
    pub async fn remote_logout(
        &self,
        user: UserId,
        device: Option<DeviceId>,
        reason: LogoutReason,
    ) -> Result<u64, AuthError> {
        let count = self
            .store
            .within(
                "terminate_user_sessions",
                self.store.get().terminate_user_sessions(user, device, reason, Utc::now()),
            )
            .await?;
        info!(count, "remote logout finished");
        Ok(count)
    }

    /// Deactivate a device and terminate its sessions.
    #[instrument(skip(self), err)]
    pub async fn deactivate_device(&self, device: DeviceId) -> Result<u64, AuthError> {
        let store = self.store.get();
        self.store
            .within("set_device_active", store.set_device_active(device, false))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AuthError::DeviceNotFound,
                other => other.into(),
            })?;

        let count = self
            .store
            .within(
                "terminate_device_sessions",
                store.terminate_device_sessions(device, LogoutReason::DeviceDeactivated, Utc::now()),
            )
            .await?;
        info!(count, "device deactivated");
        Ok(count)
    }

    /// Collect sessions past their expiry that are still flagged active.
    #[instrument(skip(self), err)]
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let count = self
            .store
            .within(
                "terminate_expired_sessions",
                self.store.get().terminate_expired_sessions(Utc::now()),
            )
            .await?;
        if count > 0 {
            info!(count, "expired sessions swept");
        }
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listing
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn sessions_for_user(&self, user: UserId) -> Result<Vec<Session>, AuthError> {
        Ok(self
            .store
            .within("sessions_for_user", self.store.get().sessions_for_user(user))
            .await?)
    }

    pub async fn active_sessions(&self, page: Page) -> Result<PageResult<Session>, AuthError> {
        Ok(self
            .store
            .within("active_sessions", self.store.get().active_sessions(page, Utc::now()))
            .await?)
    }

    pub async fn switch_history(&self, session: SessionId) -> Result<Vec<SessionSystemHistory>, AuthError> {
        Ok(self
            .store
            .within("switch_history", self.store.get().switch_history(session))
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the session named by `claims` and require it to be valid now.
    async fn live_session(&self, claims: &TokenClaims) -> Result<Session, AuthError> {
        let session = self
            .store
            .within("find_session", self.store.get().find_session(claims.session_id))
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.user_id != claims.user_id || session.device_id != claims.device_id {
            return Err(AuthError::InvalidToken);
        }
        if !session.is_active {
            return Err(AuthError::SessionInvalid);
        }
        if !session.is_valid(Utc::now()) {
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    /// The user behind a session, required to still be active.
    pub async fn active_user(&self, id: UserId) -> Result<User, AuthError> {
        let user = self
            .store
            .within("find_user_by_id", self.store.get().find_user_by_id(id))
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }
        Ok(user)
    }
}
