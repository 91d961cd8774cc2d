use portico_auth::{AuthenticatedSession, TokenKind};
use portico_core::{Device, SessionId, SystemId, SystemScope, UserId};

/// Authenticated caller for a request.
///
/// Inserted by the auth middleware and present for every protected route.
#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: AuthenticatedSession,
}

impl SessionContext {
    pub fn new(inner: AuthenticatedSession) -> Self {
        Self { inner }
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user_id()
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    /// Scope the credential was minted for.
    pub fn scope(&self) -> SystemScope {
        self.inner.scope()
    }

    pub fn system_id(&self) -> Option<SystemId> {
        self.inner.claims.system_id
    }

    pub fn token_kind(&self) -> TokenKind {
        self.inner.claims.token_type
    }

    pub fn authenticated(&self) -> &AuthenticatedSession {
        &self.inner
    }
}

/// Verified client device, from the `X-Device-UID` / `X-Platform` headers.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    device: Device,
    platform: String,
}

impl DeviceContext {
    pub fn new(device: Device, platform: String) -> Self {
        Self { device, platform }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Platform name as reported by the client header.
    pub fn platform(&self) -> &str {
        &self.platform
    }
}
