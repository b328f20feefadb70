//! `stockroom-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the shared error taxonomy, clocks, audit stamps and the
//! request-scoped context every service operation receives.

pub mod amount;
pub mod audit;
pub mod clock;
pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod page;

pub use amount::MAX_AMOUNT;
pub use audit::AuditStamp;
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::RequestContext;
pub use entity::Entity;
pub use error::{DomainError, DomainResult, FieldError};
pub use id::{CategoryId, LotId, OrderId, OrderLineId, ProductId, RoleId, StoreId, UserId};
pub use page::{Page, PageRequest};
