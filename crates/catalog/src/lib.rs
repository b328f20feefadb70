//! Catalog domain module.
//!
//! Stores, categories and products, with the rules that govern them: store
//! codes, SKU generation/uniqueness inputs and store ownership of products.
//! Deterministic domain logic only (no IO, no HTTP, no storage).

pub mod category;
pub mod code;
pub mod product;
pub mod sku;
pub mod store;

pub use category::{Category, CategoryDraft};
pub use code::normalize_code;
pub use product::{Product, ProductDraft, ProductPatch, prepare_product};
pub use sku::{SKU_TIMESTAMP_FORMAT, generate_sku, normalize_sku};
pub use store::{Store, StoreDraft};
