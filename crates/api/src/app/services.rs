//! Infrastructure wiring: storage backend, clock, token issuer and services.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use stockroom_auth::{Hs256Jwt, UserSummary};
use stockroom_core::{DomainResult, RequestContext, SystemClock, UserId};
use stockroom_infra::db::{Database, MemoryDatabase, PgDatabase};
use stockroom_infra::services::{Services, user_summaries};

use crate::config::AppConfig;

/// Everything handlers reach through `Extension<Arc<AppServices>>`.
#[derive(Clone)]
pub struct AppServices {
    pub domain: Services,
    db: Arc<dyn Database>,
    pub max_upload_bytes: usize,
}

impl AppServices {
    /// Assemble the services over an already opened database.
    pub fn new(db: Arc<dyn Database>, config: &AppConfig) -> Self {
        let tokens = Arc::new(Hs256Jwt::new(config.jwt_secret.as_bytes(), config.jwt_ttl));
        Self {
            domain: Services::new(db.clone(), Arc::new(SystemClock), tokens),
            db,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Rehydrate audit user references into `{id, name, email}`.
    pub async fn summaries(
        &self,
        ids: impl IntoIterator<Item = UserId>,
    ) -> DomainResult<HashMap<UserId, UserSummary>> {
        user_summaries(self.db.as_ref(), ids).await
    }
}

/// Open the configured backend: PostgreSQL when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let db: Arc<dyn Database> = match &config.database_url {
        Some(url) => {
            let pg = PgDatabase::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            pg.migrate().await.context("failed to apply schema")?;
            tracing::info!(max_connections = config.database_max_connections, "using postgres backend");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory backend (data is lost on restart)");
            Arc::new(MemoryDatabase::new())
        }
    };

    let services = AppServices::new(db, config);

    if let Some(admin) = &config.bootstrap_admin {
        let ctx = RequestContext::background();
        let seeded = services
            .domain
            .identity
            .bootstrap_super_admin(&ctx, &admin.username, &admin.email, &admin.password)
            .await
            .context("failed to seed bootstrap admin")?;
        if seeded.is_none() {
            tracing::info!("users already exist; bootstrap admin skipped");
        }
    }

    Ok(services)
}
