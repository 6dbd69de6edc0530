//! Account roles and the two portals they belong to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account role as recorded in the identity provider's user metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Member,
    Leader,
    Organization,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "MEMBER",
            Role::Leader => "LEADER",
            Role::Organization => "ORGANIZATION",
        }
    }

    /// The portal whose protected pages this role may use.
    pub fn portal(&self) -> Portal {
        match self {
            Role::Member | Role::Leader => Portal::Member,
            Role::Organization => Portal::Organization,
        }
    }

    /// Roles allowed to create teams and hand out invites.
    pub fn can_own_teams(&self) -> bool {
        match self {
            Role::Member => false,
            Role::Leader | Role::Organization => true,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MEMBER" => Ok(Role::Member),
            "LEADER" => Ok(Role::Leader),
            "ORGANIZATION" => Ok(Role::Organization),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// One of the two path partitions served by this application.
///
/// Organization pages live under [`Portal::ORG_PREFIX`]; the host router maps
/// the organization hostname onto that prefix, so the prefix alone decides
/// which portal a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Portal {
    Member,
    Organization,
}

impl Portal {
    pub const ORG_PREFIX: &'static str = "/org";

    pub fn from_path(path: &str) -> Portal {
        match path.strip_prefix(Self::ORG_PREFIX) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Portal::Organization,
            _ => Portal::Member,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Portal::Member => "",
            Portal::Organization => Self::ORG_PREFIX,
        }
    }

    /// Strip the portal prefix, yielding the logical page path (`/org` → `/`).
    pub fn relative<'a>(&self, path: &'a str) -> &'a str {
        match path.strip_prefix(self.prefix()) {
            Some("") => "/",
            Some(rest) => rest,
            None => path,
        }
    }

    pub fn login_path(&self) -> &'static str {
        match self {
            Portal::Member => "/auth",
            Portal::Organization => "/org/auth",
        }
    }

    pub fn sign_up_path(&self) -> &'static str {
        match self {
            Portal::Member => "/auth/sign-up",
            Portal::Organization => "/org/auth/sign-up",
        }
    }

    pub fn confirm_path(&self) -> &'static str {
        match self {
            Portal::Member => "/auth/confirm",
            Portal::Organization => "/org/auth/confirm",
        }
    }

    pub fn callback_path(&self) -> &'static str {
        match self {
            Portal::Member => "/auth/callback",
            Portal::Organization => "/org/auth/callback",
        }
    }

    pub fn sign_out_path(&self) -> &'static str {
        match self {
            Portal::Member => "/auth/sign-out",
            Portal::Organization => "/org/auth/sign-out",
        }
    }

    /// Default landing page for an authenticated, confirmed user.
    pub fn landing_path(&self) -> &'static str {
        match self {
            Portal::Member => "/dashboard",
            Portal::Organization => "/org/dashboard",
        }
    }

    pub fn accepts(&self, role: Role) -> bool {
        role.portal() == *self
    }
}
