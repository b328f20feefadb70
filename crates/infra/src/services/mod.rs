//! Use-case services.
//!
//! Each operation takes the caller's [`Principal`] and a [`RequestContext`],
//! checks the policy table, talks to the [`Database`], and logs under the
//! request span. Storage errors become [`DomainError`]s here.

pub mod catalog;
pub mod checkout;
pub mod identity;
pub mod ledger;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use stockroom_auth::{Hs256Jwt, Principal, UserSummary};
use stockroom_core::{Clock, DomainResult, UserId};

use crate::db::Database;

pub use catalog::{CatalogService, ProductImportRow};
pub use checkout::{CheckoutService, MAX_CHECKOUT_ATTEMPTS};
pub use identity::{IdentityService, LoginResult, NewUser, RoleInput, UserUpdate};
pub use ledger::{Availability, LedgerService, LotImportRow};

/// Every service, wired to one database and one clock.
#[derive(Clone)]
pub struct Services {
    pub identity: IdentityService,
    pub catalog: CatalogService,
    pub ledger: LedgerService,
    pub checkout: CheckoutService,
}

impl Services {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>, tokens: Arc<Hs256Jwt>) -> Self {
        Self {
            identity: IdentityService::new(db.clone(), clock.clone(), tokens),
            catalog: CatalogService::new(db.clone(), clock.clone()),
            ledger: LedgerService::new(db.clone(), clock.clone()),
            checkout: CheckoutService::new(db, clock),
        }
    }
}

/// Resolve audit user references into `{id, name, email}` summaries.
///
/// Unknown (deleted) users are simply absent from the map.
pub async fn user_summaries(
    db: &dyn Database,
    ids: impl IntoIterator<Item = UserId>,
) -> DomainResult<HashMap<UserId, UserSummary>> {
    let ids: Vec<UserId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users = db.get_users(&ids).await?;
    Ok(users.into_iter().map(|u| (u.id, u.summary())).collect())
}

/// Only super admins see other stores' records.
pub(crate) fn visible_to(principal: &Principal, store_id: stockroom_core::StoreId) -> bool {
    principal.is_super_admin() || principal.store_id == Some(store_id)
}
