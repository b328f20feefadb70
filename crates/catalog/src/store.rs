use serde::{Deserialize, Serialize};

use stockroom_core::{AuditStamp, DomainError, DomainResult, Entity, StoreId};

use crate::code::normalize_code;

/// Store record (the tenant boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    /// Short uppercase identifier that namespaces SKUs and invoice numbers.
    pub code: Option<String>,
    pub audit: AuditStamp,
}

impl Store {
    /// A store must carry a code before it can own products or sell.
    pub fn require_code(&self) -> DomainResult<&str> {
        self.code
            .as_deref()
            .ok_or(DomainError::StoreHasNoCode(self.id))
    }
}

impl Entity for Store {
    type Id = StoreId;

    fn id(&self) -> StoreId {
        self.id
    }
}

/// Create/update input for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StoreDraft {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub code: Option<String>,
}

impl StoreDraft {
    /// Trim optional fields and normalize the code.
    pub fn normalized(self) -> DomainResult<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("store name cannot be empty"));
        }
        let code = match self.code.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(normalize_code(raw, "store code")?),
        };
        Ok(Self {
            name,
            address: non_blank(self.address),
            phone: non_blank(self.phone),
            code,
        })
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn store_without_code_cannot_sell() {
        let store = Store {
            id: StoreId::new(),
            name: "Main".into(),
            address: None,
            phone: None,
            code: None,
            audit: AuditStamp::created(None, Utc::now()),
        };
        assert_eq!(store.require_code(), Err(DomainError::StoreHasNoCode(store.id)));
    }

    #[test]
    fn draft_normalizes_code_and_blanks() {
        let draft = StoreDraft {
            name: " Main ".into(),
            address: Some("  ".into()),
            phone: None,
            code: Some("mn1".into()),
        }
        .normalized()
        .unwrap();
        assert_eq!(draft.name, "Main");
        assert_eq!(draft.address, None);
        assert_eq!(draft.code.as_deref(), Some("MN1"));
    }
}
