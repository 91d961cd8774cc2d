//! `portico-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the platform/system scope tag and the persisted records.

pub mod entity;
pub mod error;
pub mod id;
pub mod model;
pub mod scope;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ActionId, AssignmentId, DeviceId, HistoryId, MenuId, ModuleId, OrganizationId, PermissionId,
    RoleId, SessionId, SystemId, UserId,
};
pub use model::{
    Action, Device, DevicePlatform, LogoutReason, Menu, Module, Permission, Role, RoleAssignment,
    Session, SessionSystemHistory, System, User,
};
pub use scope::SystemScope;
