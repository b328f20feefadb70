//! User records.

use serde::{Deserialize, Serialize};

use stockroom_core::{AuditStamp, Entity, RoleId, StoreId, UserId};

/// Stored user. `password_hash` never leaves the service layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role_id: Option<RoleId>,
    pub store_id: Option<StoreId>,
    pub audit: AuditStamp,
}

impl User {
    /// Display name used in audit rehydration.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.display_name().to_string(),
            email: self.email.clone(),
        }
    }

    /// Login identifiers are matched case-insensitively.
    pub fn matches_login(&self, username_or_email: &str) -> bool {
        let needle = username_or_email.trim();
        self.username.eq_ignore_ascii_case(needle) || self.email.eq_ignore_ascii_case(needle)
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

/// `{id, name, email}`: how `created_by`/`updated_by` appear in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
}
