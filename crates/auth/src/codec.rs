//! Credential codec: signed, expiring bearer tokens.
//!
//! A token proves *who signed in* and on which session/device. It never proves
//! the session is still live; callers re-check the session row on every use.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use portico_core::{DeviceId, OrganizationId, RoleId, Session, SessionId, System, SystemId, SystemScope, User, UserId};

/// Token discriminant carried in the `token_type` claim.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Issued at login; no system selected.
    Platform,
    /// Issued on switch; embeds the target system and resolved role ids.
    System,
    /// Long-lived; only accepted by the refresh flow.
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::System => "system",
            Self::Refresh => "refresh",
        }
    }
}

/// Signing secret, issuer and validity windows.
///
/// Built once at startup and injected; never read from ambient state.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub platform_ttl: Duration,
    pub system_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenConfig {
    /// Reference windows: platform 24h, system 8h, refresh 7 days.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "portico".to_string(),
            platform_ttl: Duration::hours(24),
            system_ttl: Duration::hours(8),
            refresh_ttl: Duration::hours(168),
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Platform => self.platform_ttl,
            TokenKind::System => self.system_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }
}

impl core::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("platform_ttl", &self.platform_ttl)
            .field("system_ttl", &self.system_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

/// Claim set on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user's email.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,

    pub user_id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub token_type: TokenKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<SystemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_ids: Option<Vec<RoleId>>,
}

impl TokenClaims {
    pub fn is_platform_token(&self) -> bool {
        self.token_type == TokenKind::Platform
    }

    pub fn is_system_token(&self) -> bool {
        self.token_type == TokenKind::System
    }

    pub fn has_system_context(&self) -> bool {
        self.system_id.is_some()
    }

    /// Scope derived from the payload alone.
    pub fn scope(&self) -> SystemScope {
        SystemScope::from_option(self.system_id)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// System context embedded into a system token.
#[derive(Debug, Clone, Copy)]
pub struct SystemGrant<'a> {
    pub system: &'a System,
    pub role_ids: &'a [RoleId],
}

/// A freshly minted token and its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry at mint time.
    pub expires_in: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Signature valid, expiry passed. Callers may offer a refresh.
    #[error("token has expired")]
    Expired,

    /// Bad signature, wrong algorithm, wrong issuer or malformed payload.
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("system token requires a system grant")]
    MissingSystemGrant,

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// HS256 token codec.
#[derive(Clone)]
pub struct CredentialCodec {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl CredentialCodec {
    pub fn new(config: TokenConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding,
            decoding,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mint a token of `kind` for a user's session.
    ///
    /// `grant` is required for `TokenKind::System` and ignored otherwise.
    pub fn mint(
        &self,
        kind: TokenKind,
        user: &User,
        session: &Session,
        grant: Option<SystemGrant<'_>>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.ttl(kind);
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Encoding(format!("{} lifetime overflows the clock", kind.as_str())))?;

        let (system_id, system_code, role_ids) = match (kind, grant) {
            (TokenKind::System, Some(g)) => (
                Some(g.system.id),
                Some(g.system.code.clone()),
                Some(g.role_ids.to_vec()),
            ),
            (TokenKind::System, None) => return Err(TokenError::MissingSystemGrant),
            _ => (None, None, None),
        };

        let claims = TokenClaims {
            sub: user.email.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
            user_id: user.id,
            email: user.email.clone(),
            organization_id: session.organization_id.or(user.organization_id),
            session_id: session.id,
            device_id: session.device_id,
            token_type: kind,
            system_id,
            system_code,
            role_ids,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(IssuedToken {
            token,
            kind,
            expires_at,
            expires_in: ttl.num_seconds(),
        })
    }

    /// Refresh credential: platform shape, refresh window.
    pub fn mint_refresh(&self, user: &User, session: &Session, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        self.mint(TokenKind::Refresh, user, session, None, now)
    }

    /// Verify signature, algorithm, issuer and expiry.
    ///
    /// The signature is checked first, so a tampered token reports `Invalid`
    /// even when it is also expired.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

        jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

impl core::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
