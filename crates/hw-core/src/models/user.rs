//! Acting users and their roles.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::InvalidDataError;

/// Capability roles checked before an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
    AutomationBasic,
    AutomationAdvanced,
    ActionrunnerBasic,
    ActionrunnerAdvanced,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::User,
        Role::AutomationBasic,
        Role::AutomationAdvanced,
        Role::ActionrunnerBasic,
        Role::ActionrunnerAdvanced,
    ];

    /// Returns the role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::AutomationBasic => "automation_basic",
            Role::AutomationAdvanced => "automation_advanced",
            Role::ActionrunnerBasic => "actionrunner_basic",
            Role::ActionrunnerAdvanced => "actionrunner_advanced",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| InvalidDataError::new(format!("Invalid role: {}", s)))
    }
}

/// The identity acting on hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub roles: HashSet<Role>,
}

impl User {
    /// Creates a user with the given roles.
    pub fn new(username: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            username: username.into(),
            roles: roles.into_iter().collect(),
        }
    }

    /// Creates the identity used for scheduled, unattended work.
    pub fn system() -> Self {
        Self::new("system", Role::ALL)
    }

    /// Checks for a single role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Whether the user may act on hits assigned to others.
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Returns the required roles this user lacks, sorted.
    pub fn missing_roles(&self, required: &[Role]) -> Vec<Role> {
        let mut missing: Vec<Role> = required
            .iter()
            .filter(|role| !self.has_role(**role))
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_roles() {
        let user = User::new("alice", [Role::User, Role::AutomationBasic]);
        assert!(user
            .missing_roles(&[Role::AutomationBasic])
            .is_empty());
        assert_eq!(
            user.missing_roles(&[Role::AutomationAdvanced, Role::AutomationBasic, Role::Admin]),
            vec![Role::Admin, Role::AutomationAdvanced]
        );
    }

    #[test]
    fn test_system_user_holds_every_role() {
        let system = User::system();
        assert!(system.is_admin());
        assert!(system.missing_roles(&Role::ALL).is_empty());
    }
}
