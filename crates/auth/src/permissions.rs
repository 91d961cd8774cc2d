use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use portico_core::{DomainError, DomainResult};

/// Permission code.
///
/// Dotted string `{system}.{module}.{action}`, or `{module}.{action}` for
/// platform-level permissions. Because the system segment is part of the code,
/// codes are globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(Cow<'static, str>);

/// Components of a permission code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeParts {
    pub system: Option<String>,
    pub module: String,
    pub action: String,
}

impl PermissionCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    /// Build a code from its components.
    pub fn generate(system_code: Option<&str>, module_code: &str, action_code: &str) -> Self {
        match system_code.filter(|s| !s.is_empty()) {
            Some(system) => Self(Cow::Owned(format!("{system}.{module_code}.{action_code}"))),
            None => Self(Cow::Owned(format!("{module_code}.{action_code}"))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into components. Two segments are platform-level, three are system-level.
    pub fn parse(&self) -> DomainResult<CodeParts> {
        let parts: Vec<&str> = self.0.split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "permission code '{}' has an empty segment",
                self.0
            )));
        }
        match parts.as_slice() {
            [module, action] => Ok(CodeParts {
                system: None,
                module: module.to_string(),
                action: action.to_string(),
            }),
            [system, module, action] => Ok(CodeParts {
                system: Some(system.to_string()),
                module: module.to_string(),
                action: action.to_string(),
            }),
            _ => Err(DomainError::validation(format!(
                "permission code '{}' must have 2 or 3 segments",
                self.0
            ))),
        }
    }
}

impl core::fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionCode {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PermissionCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
