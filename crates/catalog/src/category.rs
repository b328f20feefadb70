use serde::{Deserialize, Serialize};

use stockroom_core::{AuditStamp, CategoryId, DomainError, DomainResult, Entity};

use crate::code::normalize_code;

/// Category reference data. Its code seeds SKU generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub category_code: String,
    pub audit: AuditStamp,
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> CategoryId {
        self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CategoryDraft {
    pub name: String,
    pub category_code: String,
}

impl CategoryDraft {
    pub fn normalized(self) -> DomainResult<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("category name cannot be empty"));
        }
        Ok(Self {
            name,
            category_code: normalize_code(&self.category_code, "category_code")?,
        })
    }
}
