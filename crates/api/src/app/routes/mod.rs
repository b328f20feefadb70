use axum::{Router, routing::get};

pub mod auth;
pub mod categories;
pub mod common;
pub mod inventory;
pub mod orders;
pub mod products;
pub mod roles;
pub mod stores;
pub mod system;
pub mod users;

/// Router for all authenticated endpoints.
pub fn router(max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/auth/me", get(system::me))
        .nest("/stores", stores::router())
        .nest("/roles", roles::router())
        .nest("/categories", categories::router())
        .nest("/users", users::router())
        .nest("/products", products::router(max_upload_bytes))
        .nest("/inventory", inventory::router(max_upload_bytes))
        .nest("/orders", orders::router())
}
