use serde::{Deserialize, Serialize};

use portico_core::{DeviceId, MenuId, OrganizationId, PermissionId, RoleId, SessionId, SystemId, User, UserId};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_uid: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchSystemRequest {
    pub system_code: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub device_uid: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoteLogoutRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Every session of one user (active or not) instead of the active page.
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct MenuTreeQuery {
    pub system_id: SystemId,
}

#[derive(Debug, Deserialize)]
pub struct RolePermissionsRequest {
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Deserialize)]
pub struct RoleMenusRequest {
    pub menu_ids: Vec<MenuId>,
}

#[derive(Debug, Deserialize)]
pub struct UserRolesRequest {
    /// Absent for platform-wide roles.
    #[serde(default)]
    pub system_id: Option<SystemId>,
    pub role_ids: Vec<RoleId>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

#[derive(Debug, Deserialize)]
pub struct SyncPermissionsRequest {
    #[serde(default)]
    pub system_id: Option<SystemId>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub session_id: SessionId,
    pub device_id: DeviceId,
    /// Device presenting the request, which may differ from the login device.
    pub device_uid: String,
    pub platform: String,
    pub token_type: &'static str,
    pub system_id: Option<SystemId>,
    pub system_code: Option<String>,
    pub role_ids: Option<Vec<RoleId>>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}
