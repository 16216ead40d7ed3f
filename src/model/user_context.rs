use crate::model::Id;
use serde::{Deserialize, Serialize};

/// Privilege level that bypasses every ownership check
pub const SUPER_LEVEL: i16 = 0;

/// Lowest privilege level, assigned to users registered without one
pub const DEFAULT_LEVEL: i16 = 4;

/// A registered user, referenced as service owner or iteration creator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub level: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub level: Option<i16>,
}

/// Authenticated identity of whoever invokes a catalog operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Id,
    pub level: i16,
}

impl Caller {
    pub fn new(user_id: Id, level: i16) -> Self {
        Self { user_id, level }
    }

    pub fn is_super(&self) -> bool {
        self.level == SUPER_LEVEL
    }

    /// True when the caller is one of `user_ids` or holds the super level
    pub fn is_any_of(&self, user_ids: &[Id]) -> bool {
        self.is_super() || user_ids.contains(&self.user_id)
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            level: user.level,
        }
    }
}
