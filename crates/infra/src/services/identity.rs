//! Identity and access: login, token authentication, roles and users.

use std::sync::Arc;

use serde::Deserialize;

use stockroom_auth::{
    Hs256Jwt, JwtValidator, Level, Operation, Principal, Role, User, authorize, can_assign_level,
    hash_password, read_scope, resolve_store, verify_password,
};
use stockroom_core::{
    AuditStamp, Clock, DomainError, DomainResult, FieldError, Page, PageRequest, RequestContext,
    RoleId, StoreId, UserId,
};

use crate::db::{Database, UserQuery};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const SUPER_ADMIN_ROLE: &str = "super_admin";

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub token: String,
    pub user: User,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleInput {
    pub name: String,
    pub level: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub password: String,
    #[serde(default)]
    pub role_id: Option<RoleId>,
    #[serde(default)]
    pub store_id: Option<StoreId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub role_id: Option<RoleId>,
    pub store_id: Option<StoreId>,
}

#[derive(Clone)]
pub struct IdentityService {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    tokens: Arc<Hs256Jwt>,
}

fn check_credentials_shape(
    errors: &mut Vec<FieldError>,
    username: Option<&str>,
    email: Option<&str>,
    password: Option<&str>,
) {
    if username.is_some_and(|u| u.trim().is_empty()) {
        errors.push(FieldError::new("username", "username cannot be empty"));
    }
    if email.is_some_and(|e| !e.contains('@') || e.trim().len() < 3) {
        errors.push(FieldError::new("email", "email must be a valid address"));
    }
    if password.is_some_and(|p| p.chars().count() < MIN_PASSWORD_LEN) {
        errors.push(FieldError::new(
            "password",
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
}

fn hash(password: &str) -> DomainResult<String> {
    hash_password(password).map_err(|e| DomainError::internal(e.to_string()))
}

impl IdentityService {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>, tokens: Arc<Hs256Jwt>) -> Self {
        Self { db, clock, tokens }
    }

    /// Same 401 for unknown login and wrong password.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        username_or_email: &str,
        password: &str,
    ) -> DomainResult<LoginResult> {
        let rejected = || DomainError::authentication("invalid credentials");

        let Some(user) = self.db.find_user_by_login(username_or_email).await? else {
            tracing::warn!(parent: ctx.span(), "login rejected: unknown user");
            return Err(rejected());
        };
        let valid = verify_password(password, &user.password_hash).map_err(|e| {
            tracing::error!(parent: ctx.span(), user_id = %user.id, error = %e, "unusable password hash");
            rejected()
        })?;
        if !valid {
            tracing::warn!(parent: ctx.span(), user_id = %user.id, "login rejected: bad password");
            return Err(rejected());
        }

        let token = self
            .tokens
            .issue(user.id, self.clock.now())
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let role = self.role_for(&user).await?;
        tracing::info!(parent: ctx.span(), user_id = %user.id, "login succeeded");
        Ok(LoginResult { token, user, role })
    }

    /// Validate a bearer token and rebuild the principal from the user's
    /// current role and store.
    pub async fn authenticate(&self, ctx: &RequestContext, token: &str) -> DomainResult<(Principal, User)> {
        let claims = self.tokens.validate(token, self.clock.now()).map_err(|e| {
            tracing::debug!(parent: ctx.span(), error = %e, "token rejected");
            DomainError::authentication(e.to_string())
        })?;
        let user = self
            .db
            .get_user(claims.sub)
            .await?
            .ok_or_else(|| DomainError::authentication("user no longer exists"))?;
        let level = self.role_for(&user).await?.map_or(Level::ANY, |r| r.level);
        Ok((Principal::new(user.id, level, user.store_id), user))
    }

    pub async fn role_for(&self, user: &User) -> DomainResult<Option<Role>> {
        match user.role_id {
            Some(role_id) => Ok(self.db.get_role(role_id).await?),
            None => Ok(None),
        }
    }

    /// Seed role `super_admin` (99) and an admin user when no user exists yet.
    pub async fn bootstrap_super_admin(
        &self,
        ctx: &RequestContext,
        username: &str,
        email: &str,
        password: &str,
    ) -> DomainResult<Option<User>> {
        if self.db.count_users().await? > 0 {
            tracing::debug!(parent: ctx.span(), "users exist; skipping bootstrap");
            return Ok(None);
        }
        let now = self.clock.now();
        let role = match self.db.find_role_by_name(SUPER_ADMIN_ROLE).await? {
            Some(role) => role,
            None => {
                let role = Role {
                    id: RoleId::new(),
                    name: SUPER_ADMIN_ROLE.to_string(),
                    level: Level::SUPER_ADMIN,
                    audit: AuditStamp::created(None, now),
                };
                self.db.insert_role(&role).await?;
                role
            }
        };

        let mut errors = Vec::new();
        check_credentials_shape(&mut errors, Some(username), Some(email), Some(password));
        DomainError::from_field_errors(errors)?;

        let user = User {
            id: UserId::new(),
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            name: None,
            password_hash: hash(password)?,
            role_id: Some(role.id),
            store_id: None,
            audit: AuditStamp::created(None, now),
        };
        self.db.insert_user(&user).await?;
        tracing::info!(parent: ctx.span(), user_id = %user.id, "bootstrapped super admin");
        Ok(Some(user))
    }

    // ---- roles ----

    pub async fn create_role(&self, ctx: &RequestContext, principal: &Principal, input: RoleInput) -> DomainResult<Role> {
        authorize(principal, Operation::ManageRoles)?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        let level = Level(input.level);
        can_assign_level(principal, level)?;

        let role = Role {
            id: RoleId::new(),
            name,
            level,
            audit: AuditStamp::created(Some(principal.user_id), self.clock.now()),
        };
        self.db.insert_role(&role).await?;
        tracing::info!(parent: ctx.span(), role_id = %role.id, level = %role.level, "role created");
        Ok(role)
    }

    pub async fn update_role(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: RoleId,
        input: RoleInput,
    ) -> DomainResult<Role> {
        authorize(principal, Operation::ManageRoles)?;
        let mut role = self.get_role(principal, id).await?;
        can_assign_level(principal, role.level)?;
        let level = Level(input.level);
        can_assign_level(principal, level)?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        role.name = name;
        role.level = level;
        role.audit.touch(Some(principal.user_id), self.clock.now());
        self.db.update_role(&role).await?;
        tracing::info!(parent: ctx.span(), role_id = %role.id, "role updated");
        Ok(role)
    }

    pub async fn delete_role(&self, ctx: &RequestContext, principal: &Principal, id: RoleId) -> DomainResult<()> {
        authorize(principal, Operation::ManageRoles)?;
        let role = self.get_role(principal, id).await?;
        can_assign_level(principal, role.level)?;
        self.db.delete_role(id).await?;
        tracing::info!(parent: ctx.span(), role_id = %id, "role deleted");
        Ok(())
    }

    pub async fn get_role(&self, principal: &Principal, id: RoleId) -> DomainResult<Role> {
        authorize(principal, Operation::ReadCatalog)?;
        self.db
            .get_role(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role {id}")))
    }

    pub async fn list_roles(&self, principal: &Principal, page: PageRequest) -> DomainResult<Page<Role>> {
        authorize(principal, Operation::ReadCatalog)?;
        Ok(self.db.list_roles(page).await?)
    }

    // ---- users ----

    async fn target_level(&self, role_id: Option<RoleId>) -> DomainResult<Level> {
        match role_id {
            Some(role_id) => self
                .db
                .get_role(role_id)
                .await?
                .map(|r| r.level)
                .ok_or_else(|| DomainError::validation(format!("role {role_id} does not exist"))),
            None => Ok(Level::ANY),
        }
    }

    /// Non-super admins only manage users of their own store.
    fn ensure_manages(&self, principal: &Principal, user: &User) -> DomainResult<()> {
        if principal.is_super_admin() || (user.store_id.is_some() && user.store_id == principal.store_id) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("user {}", user.id)))
        }
    }

    pub async fn create_user(&self, ctx: &RequestContext, principal: &Principal, input: NewUser) -> DomainResult<User> {
        authorize(principal, Operation::ManageUsers)?;

        let mut errors = Vec::new();
        check_credentials_shape(
            &mut errors,
            Some(&input.username),
            Some(&input.email),
            Some(&input.password),
        );
        DomainError::from_field_errors(errors)?;

        let store_id = match input.store_id {
            None if principal.is_super_admin() => None,
            requested => Some(resolve_store(principal, requested)?),
        };
        can_assign_level(principal, self.target_level(input.role_id).await?)?;

        let user = User {
            id: UserId::new(),
            username: input.username.trim().to_string(),
            email: input.email.trim().to_string(),
            name: input.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            password_hash: hash(&input.password)?,
            role_id: input.role_id,
            store_id,
            audit: AuditStamp::created(Some(principal.user_id), self.clock.now()),
        };
        self.db.insert_user(&user).await?;
        tracing::info!(parent: ctx.span(), user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: UserId,
        update: UserUpdate,
    ) -> DomainResult<User> {
        authorize(principal, Operation::ManageUsers)?;
        let mut user = self.get_user(principal, id).await?;
        self.ensure_manages(principal, &user)?;
        can_assign_level(principal, self.target_level(user.role_id).await?)?;

        let mut errors = Vec::new();
        check_credentials_shape(
            &mut errors,
            update.username.as_deref(),
            update.email.as_deref(),
            update.password.as_deref(),
        );
        DomainError::from_field_errors(errors)?;

        if let Some(role_id) = update.role_id {
            can_assign_level(principal, self.target_level(Some(role_id)).await?)?;
            user.role_id = Some(role_id);
        }
        if let Some(store_id) = update.store_id {
            user.store_id = Some(resolve_store(principal, Some(store_id))?);
        }
        if let Some(username) = update.username {
            user.username = username.trim().to_string();
        }
        if let Some(email) = update.email {
            user.email = email.trim().to_string();
        }
        if let Some(name) = update.name {
            user.name = Some(name.trim().to_string()).filter(|n| !n.is_empty());
        }
        if let Some(password) = update.password {
            user.password_hash = hash(&password)?;
        }
        user.audit.touch(Some(principal.user_id), self.clock.now());
        self.db.update_user(&user).await?;
        tracing::info!(parent: ctx.span(), user_id = %user.id, "user updated");
        Ok(user)
    }

    pub async fn delete_user(&self, ctx: &RequestContext, principal: &Principal, id: UserId) -> DomainResult<()> {
        authorize(principal, Operation::ManageUsers)?;
        if id == principal.user_id {
            return Err(DomainError::conflict("cannot delete yourself"));
        }
        let user = self.get_user(principal, id).await?;
        self.ensure_manages(principal, &user)?;
        can_assign_level(principal, self.target_level(user.role_id).await?)?;
        self.db.delete_user(id).await?;
        tracing::info!(parent: ctx.span(), user_id = %id, "user deleted");
        Ok(())
    }

    pub async fn get_user(&self, principal: &Principal, id: UserId) -> DomainResult<User> {
        authorize(principal, Operation::ReadCatalog)?;
        let user = self
            .db
            .get_user(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {id}")))?;
        let visible = id == principal.user_id
            || principal.is_super_admin()
            || (user.store_id.is_some() && user.store_id == principal.store_id);
        if !visible {
            return Err(DomainError::not_found(format!("user {id}")));
        }
        Ok(user)
    }

    pub async fn list_users(
        &self,
        principal: &Principal,
        store_id: Option<StoreId>,
        search: Option<String>,
        page: PageRequest,
    ) -> DomainResult<Page<User>> {
        authorize(principal, Operation::ReadCatalog)?;
        let query = UserQuery {
            store_id: read_scope(principal, store_id)?,
            search,
        };
        Ok(self.db.list_users(&query, page).await?)
    }
}
