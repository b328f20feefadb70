//! Sales domain module.
//!
//! Carts, pricing, grand-total reconciliation, invoice numbering and the
//! immutable order records checkout produces. Deterministic logic only; the
//! checkout orchestration itself (locking, depletion, persistence) lives in
//! `stockroom-infra`.

pub mod cart;
pub mod invoice;
pub mod order;

pub use cart::{CartItem, CheckoutRequest, GRAND_TOTAL_TOLERANCE, PricedLine, reconcile};
pub use invoice::{INVOICE_TIMESTAMP_FORMAT, generate_invoice_number};
pub use order::{Order, OrderDraft, OrderLine, OrderLineDraft, OrderQuery};
