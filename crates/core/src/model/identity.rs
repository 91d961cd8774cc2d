use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::id::{DeviceId, OrganizationId, SystemId, UserId};

/// A principal that can sign in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// PHC-formatted password hash. Never serialized to clients.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub organization_id: Option<OrganizationId>,
    pub default_system_id: Option<SystemId>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (true, true) => self.email.clone(),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (false, false) => format!("{} {}", self.first_name, self.last_name),
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Client platform reported by a device at registration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePlatform {
    Web,
    Ios,
    Android,
    TabletIos,
    TabletAndroid,
    WindowsDesktop,
    MacDesktop,
    Kiosk,
    PosAndroid,
    PosLinux,
}

impl DevicePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
            Self::TabletIos => "tablet_ios",
            Self::TabletAndroid => "tablet_android",
            Self::WindowsDesktop => "windows_desktop",
            Self::MacDesktop => "mac_desktop",
            Self::Kiosk => "kiosk",
            Self::PosAndroid => "pos_android",
            Self::PosLinux => "pos_linux",
        }
    }
}

impl FromStr for DevicePlatform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "web" => Self::Web,
            "ios" => Self::Ios,
            "android" => Self::Android,
            "tablet_ios" => Self::TabletIos,
            "tablet_android" => Self::TabletAndroid,
            "windows_desktop" => Self::WindowsDesktop,
            "mac_desktop" => Self::MacDesktop,
            "kiosk" => Self::Kiosk,
            "pos_android" => Self::PosAndroid,
            "pos_linux" => Self::PosLinux,
            other => return Err(DomainError::unknown("device platform", other)),
        })
    }
}

impl core::fmt::Display for DevicePlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered client device. Sessions are always bound to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub device_uid: String,
    pub name: String,
    pub platform: DevicePlatform,
    pub os_version: String,
    pub app_version: String,
    pub push_token: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Entity for Device {
    type Id = DeviceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_its_wire_name() {
        for p in [DevicePlatform::Web, DevicePlatform::TabletAndroid, DevicePlatform::PosLinux] {
            assert_eq!(p.as_str().parse::<DevicePlatform>().unwrap(), p);
        }
        assert!("fax".parse::<DevicePlatform>().is_err());
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User {
            id: UserId::new(1),
            email: "a@b.c".into(),
            password_hash: "$argon2id$secret".into(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            organization_id: None,
            default_system_id: None,
            last_login_at: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(user.display_name(), "a@b.c");
    }
}
