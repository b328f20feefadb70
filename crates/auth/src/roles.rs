use serde::{Deserialize, Serialize};

use stockroom_core::{AuditStamp, Entity, RoleId};

/// Numeric authorization rank. Higher is more privileged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(pub u16);

impl Level {
    /// Anyone authenticated.
    pub const ANY: Level = Level(0);
    /// Store staff: products, inventory, checkout.
    pub const STAFF: Level = Level(40);
    /// Administrators: users, roles, stores, categories.
    pub const ADMIN: Level = Level(51);
    /// The only level allowed to act across stores.
    pub const SUPER_ADMIN: Level = Level(99);

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn is_super_admin(self) -> bool {
        self == Self::SUPER_ADMIN
    }
}

impl core::fmt::Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Role record: a name and the level it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub level: Level,
    pub audit: AuditStamp,
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }
}
