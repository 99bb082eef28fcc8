use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::{jwt::JwtService, rbac::AccessPolicy},
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    sla::PriorityMatrix,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub access: Arc<AccessPolicy>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, jwt: JwtService, access: AccessPolicy) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            access: Arc::new(access),
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn priority_matrix(&self) -> PriorityMatrix {
        self.config.priority_matrix
    }
}
