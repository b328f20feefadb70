use serde::{Deserialize, Serialize};

use stockroom_core::{StoreId, UserId};

use crate::Level;

/// A fully resolved principal for authorization decisions.
///
/// Built per request from the token subject and the user's *current* role and
/// home store, so role changes take effect without re-login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub level: Level,
    pub store_id: Option<StoreId>,
}

impl Principal {
    pub fn new(user_id: UserId, level: Level, store_id: Option<StoreId>) -> Self {
        Self {
            user_id,
            level,
            store_id,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.level.is_super_admin()
    }
}
