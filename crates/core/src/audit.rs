//! Audit fields shared by authored records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Who created/last updated a record, and when.
///
/// The user references are weak: deleting a user nulls them out, it never
/// removes the authored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditStamp {
    pub fn created(by: Option<UserId>, at: DateTime<Utc>) -> Self {
        Self {
            created_by: by,
            updated_by: by,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn touch(&mut self, by: Option<UserId>, at: DateTime<Utc>) {
        self.updated_by = by;
        self.updated_at = at;
    }

    /// Drop references to a deleted user.
    pub fn forget_user(&mut self, user_id: UserId) {
        if self.created_by == Some(user_id) {
            self.created_by = None;
        }
        if self.updated_by == Some(user_id) {
            self.updated_by = None;
        }
    }

    /// User ids referenced by this stamp (for rehydration into user summaries).
    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.created_by.iter().chain(self.updated_by.iter()).copied()
    }
}
