use std::collections::BTreeSet;

use crate::PermissionCode;

/// Permission requirement guarding an operation.
///
/// Permissions form a set: there is no deny rule and no precedence. A
/// requirement is met when the needed codes are present anywhere in the
/// principal's effective set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// A single code.
    One(PermissionCode),
    /// At least one of the codes.
    AnyOf(Vec<PermissionCode>),
    /// Every code.
    AllOf(Vec<PermissionCode>),
}

impl Requirement {
    pub fn one(code: impl Into<PermissionCode>) -> Self {
        Self::One(code.into())
    }

    pub fn any_of<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<PermissionCode>,
    {
        Self::AnyOf(codes.into_iter().map(Into::into).collect())
    }

    pub fn all_of<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<PermissionCode>,
    {
        Self::AllOf(codes.into_iter().map(Into::into).collect())
    }

    /// Check against a materialised permission set.
    ///
    /// On failure returns the code to report as missing: the first absent code
    /// for `AllOf`, the alternatives joined by `|` for `AnyOf`.
    pub fn evaluate(&self, granted: &BTreeSet<String>) -> Result<(), String> {
        match self {
            Self::One(code) => {
                if granted.contains(code.as_str()) {
                    Ok(())
                } else {
                    Err(code.to_string())
                }
            }
            Self::AnyOf(codes) => {
                if codes.iter().any(|c| granted.contains(c.as_str())) {
                    Ok(())
                } else {
                    Err(codes.iter().map(|c| c.as_str()).collect::<Vec<_>>().join("|"))
                }
            }
            Self::AllOf(codes) => match codes.iter().find(|c| !granted.contains(c.as_str())) {
                Some(missing) => Err(missing.to_string()),
                None => Ok(()),
            },
        }
    }
}
