use stockroom_auth::{Principal, User};
use stockroom_core::RequestContext;

/// Correlation for a request, inserted by the request-id middleware.
///
/// Present on every route, authenticated or not.
#[derive(Debug, Clone)]
pub struct RequestScope(pub RequestContext);

impl RequestScope {
    pub fn ctx(&self) -> &RequestContext {
        &self.0
    }
}

/// Authenticated caller (identity + current level and home store).
///
/// Rebuilt from storage on every request, so role and store changes apply
/// without a new token.
#[derive(Debug, Clone)]
pub struct CallerContext {
    principal: Principal,
    user: User,
}

impl CallerContext {
    pub fn new(principal: Principal, user: User) -> Self {
        Self { principal, user }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user(&self) -> &User {
        &self.user
    }
}
