//! `stockroom-auth`: identity records and the authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it decides
//! *whether* a principal may perform an operation and *which store* it acts on,
//! and it issues/validates tokens and password hashes.

pub mod authorize;
pub mod claims;
pub mod password;
pub mod principal;
pub mod roles;
pub mod user;

pub use authorize::{
    AuthzError, Operation, authorize, can_assign_level, read_scope, required_level, resolve_store,
};
pub use claims::{Hs256Jwt, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use password::{PasswordError, hash_password, verify_password};
pub use principal::Principal;
pub use roles::{Level, Role};
pub use user::{User, UserSummary};
