use chrono::{DateTime, Utc};

use crate::model::role::Role;

/// A stored account. `password` holds the Argon2 PHC string.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: u64,
    pub username: String,
    pub password: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub username: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.role.is_none() && self.password.is_none()
    }
}

/// Usernames compare case-insensitively everywhere.
#[inline]
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}
