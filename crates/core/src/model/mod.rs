//! Persisted records of the identity platform.
//!
//! These are plain data carriers: the rules that act on them (validity, scope
//! matching, tree assembly) live next to the types or in `portico-auth`.

pub mod access;
pub mod identity;
pub mod session;

pub use access::{Action, Menu, Module, Permission, Role, RoleAssignment, System};
pub use identity::{Device, DevicePlatform, User};
pub use session::{LogoutReason, Session, SessionSystemHistory};
