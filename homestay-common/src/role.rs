//! Authorization roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role bound to a principal by its role record.
///
/// Variants are declared from lowest to highest privilege, so the derived
/// ordering can be used for "at least" comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Guests browsing and booking rooms.
    Tourist,
    /// Front desk and housekeeping accounts.
    Staff,
    /// Property managers.
    Manager,
    /// Site administrators.
    Admin,
}

impl Role {
    /// All role variants for iteration.
    pub const ALL: [Role; 4] = [Role::Tourist, Role::Staff, Role::Manager, Role::Admin];

    /// Role given to a principal on first sign-in, and the fallback when the
    /// role cannot be resolved.
    pub const DEFAULT: Role = Role::Tourist;

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tourist => "tourist",
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Whether the role belongs to the business side of the site.
    pub fn is_business(&self) -> bool {
        match self {
            Role::Tourist => false,
            Role::Staff | Role::Manager | Role::Admin => true,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::DEFAULT
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tourist" => Ok(Role::Tourist),
            "staff" => Ok(Role::Staff),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// What a protected route demands of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    /// Any signed-in user.
    Authenticated,
    /// A signed-in user holding one of the listed roles.
    AnyOf(Vec<Role>),
}

impl RoleRequirement {
    pub fn any_of(roles: impl IntoIterator<Item = Role>) -> Self {
        let roles: Vec<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            RoleRequirement::Authenticated
        } else {
            RoleRequirement::AnyOf(roles)
        }
    }

    /// Check whether a user with `role` satisfies this requirement.
    pub fn admits(&self, role: Role) -> bool {
        match self {
            RoleRequirement::Authenticated => true,
            RoleRequirement::AnyOf(roles) => roles.contains(&role),
        }
    }
}

impl From<Role> for RoleRequirement {
    fn from(role: Role) -> Self {
        RoleRequirement::AnyOf(vec![role])
    }
}
