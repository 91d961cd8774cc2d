//! `portico-auth`: session and authorization core.
//!
//! This crate is decoupled from HTTP and from any concrete database: it talks
//! to persistence through [`AuthStore`] and hands transports typed outcomes.

pub mod admin;
pub mod authorize;
pub mod codec;
pub mod devices;
pub mod error;
pub mod menu;
pub mod password;
pub mod permissions;
pub mod resolver;
pub mod session;
pub mod store;

pub use admin::AccessAdmin;
pub use authorize::Requirement;
pub use codec::{CredentialCodec, IssuedToken, SystemGrant, TokenClaims, TokenConfig, TokenError, TokenKind};
pub use devices::DeviceRegistry;
pub use error::{AuthError, ErrorClass};
pub use menu::{MenuAssembler, MenuNode, build_tree};
pub use password::{hash_password, verify_password};
pub use permissions::{CodeParts, PermissionCode};
pub use resolver::PermissionResolver;
pub use session::{
    AccessGrant, AuthenticatedSession, LoginOutcome, LoginRequest, SessionManager, SwitchOutcome, TokenPair,
};
pub use store::{AuthStore, NewDevice, NewPermission, NewSession, NewUser, Page, PageResult, SharedStore, StoreError};
