//! Contact model - the canonical user identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Contact entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub contact_id: i64,
    pub alias: String,
    pub name: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub template_id: Option<i64>,
}

/// Contact about to be created by an auto-import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub alias: String,
    pub name: String,
    pub email: Option<String>,
    pub template_id: Option<i64>,
}

/// Stored local password.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordRecord {
    pub contact_id: i64,
    pub password_hash: String,
    pub created_utc: DateTime<Utc>,
}

/// Contact with its current local password, as read by the Local provider.
#[derive(Debug, Clone)]
pub struct LocalAccount {
    pub contact: Contact,
    pub password: Option<PasswordRecord>,
}

impl LocalAccount {
    pub fn password_changed_at(&self) -> Option<DateTime<Utc>> {
        self.password.as_ref().map(|p| p.created_utc)
    }
}
