use std::env;

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use servicedesk::auth::jwt::JwtService;
use servicedesk::auth::password;
use servicedesk::auth::rbac::AccessPolicy;
use servicedesk::config::AppConfig;
use servicedesk::db::{self, PgPool};
use servicedesk::models::{NewOrgUnit, NewSlaPolicy, NewUser};
use servicedesk::routes;
use servicedesk::schema::{org_units, sla_policies, users};
use servicedesk::sla::PriorityMatrix;
use servicedesk::state::AppState;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    /// `None` when `TEST_DATABASE_URL` is unset; callers skip the test.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            webhook_secret: WEBHOOK_SECRET.to_string(),
            cors_allowed_origin: None,
            rbac_policy_path: None,
            priority_matrix: PriorityMatrix::default(),
            expose_error_details: false,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, jwt, AccessPolicy::default());
        let router = routes::create_router(state.clone());

        Ok(Some(Self { state, router }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    pub async fn insert_org_unit(&self, code: &str, name: &str) -> Result<Uuid> {
        let unit = NewOrgUnit {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            address: None,
            phone: None,
            email: None,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(org_units::table)
                .values(&unit)
                .execute(conn)
                .context("failed to insert org unit")?;
            Ok(unit.id)
        })
        .await
    }

    pub async fn insert_sla_policy(&self, org_unit_id: Uuid, priority: &str, hours: i32) -> Result<()> {
        let policy = NewSlaPolicy {
            id: Uuid::new_v4(),
            org_unit_id,
            priority: priority.to_string(),
            resolution_hours: hours,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(sla_policies::table)
                .values(&policy)
                .execute(conn)
                .context("failed to insert sla policy")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_user(
        &self,
        username: &str,
        password: &str,
        role: &str,
        org_unit_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email: format!("{username}@example.test"),
                full_name: username.clone(),
                username,
                password_hash: password::hash_password(&password)?,
                phone: None,
                role,
                org_unit_id,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response without token: {body}"))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::POST, path, Some(body), &[], token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::PUT, path, Some(body), &[], token).await
    }

    #[allow(dead_code)]
    pub async fn put(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::PUT, path, None, &[], token).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, &[], token).await
    }

    /// POST to a webhook route with the given secret and optional event id header.
    #[allow(dead_code)]
    pub async fn post_webhook<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        secret: &str,
        event_id: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut headers = vec![("x-webhook-secret", secret)];
        if let Some(event_id) = event_id {
            headers.push(("x-webhook-event-id", event_id));
        }
        self.send(Method::POST, path, Some(body), &headers, None).await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE webhook_events, notifications, knowledge_articles, ticket_change_links, \
         ticket_asset_links, ticket_logs, ticket_progress, ticket_comments, tickets, \
         sla_policies, users, org_units RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
