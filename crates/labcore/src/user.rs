use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserGroup {
    User,
    Owner,
    Admin,
    Sysuser,
}

/// Privilege a process demands from whoever runs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Standard,
    Admin,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Standard => f.write_str("standard"),
            AccessLevel::Admin => f.write_str("admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub group: UserGroup,
}

impl User {
    pub fn new(name: impl Into<String>, group: UserGroup) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            group,
        }
    }

    /// Built-in system user. Always resolvable, never persisted.
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            name: "sysuser".to_string(),
            group: UserGroup::Sysuser,
        }
    }

    pub fn is_system(&self) -> bool {
        self.group == UserGroup::Sysuser
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self.group,
            UserGroup::Admin | UserGroup::Owner | UserGroup::Sysuser
        )
    }

    pub fn can_run(&self, level: AccessLevel) -> bool {
        match level {
            AccessLevel::Standard => true,
            AccessLevel::Admin => self.is_admin(),
        }
    }
}
