use axum::http::HeaderValue;
use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult, ErrorDetail, ErrorResponse},
    state::AppState,
};

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod integration;
pub mod knowledge_base;
pub mod notifications;
pub mod opd;
pub mod public;
pub mod tickets;
pub mod users;
pub mod webhooks;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn required<'a>(value: Option<&'a str>, field: &str) -> AppResult<&'a str> {
    non_empty(value).ok_or_else(|| AppError::bad_request(format!("{field} is required")))
}

/// Widths of the `VARCHAR` columns clients write to.
pub(crate) mod limits {
    pub const CODE: usize = 32;
    pub const PHONE: usize = 32;
    pub const CHANGE_TYPE: usize = 32;
    pub const CHANGE_STATUS: usize = 32;
    pub const USERNAME: usize = 100;
    pub const CATEGORY: usize = 100;
    pub const EXTERNAL_ID: usize = 100;
    pub const STATUS_CHANGE: usize = 100;
    pub const TEXT: usize = 255;
}

/// Rejects values longer than `max` characters.
pub(crate) fn within<'a>(value: &'a str, field: &str, max: usize) -> AppResult<&'a str> {
    if value.chars().count() > max {
        return Err(AppError::bad_request(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value)
}

pub(crate) fn required_within<'a>(
    value: Option<&'a str>,
    field: &str,
    max: usize,
) -> AppResult<&'a str> {
    within(required(value, field)?, field, max)
}

/// [`non_empty`] plus the length check.
pub(crate) fn optional_within<'a>(
    value: Option<&'a str>,
    field: &str,
    max: usize,
) -> AppResult<Option<&'a str>> {
    non_empty(value)
        .map(|value| within(value, field, max))
        .transpose()
}

/// Cuts generated text down to `max` characters.
pub(crate) fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Adds the internal failure text to 500 bodies when running in development.
async fn expose_error_details(State(state): State<AppState>, response: Response) -> Response {
    if !state.config.expose_error_details {
        return response;
    }
    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let status = response.status();
    let body = Json(ErrorResponse {
        error: "internal server error".to_string(),
        message: Some(detail),
    });
    (status, body).into_response()
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/profile", get(auth::profile).put(auth::update_profile));

    let ticket_routes = Router::new()
        .route("/", get(tickets::list_tickets).post(tickets::create_ticket))
        .route("/merge", post(tickets::merge_tickets))
        .route("/:id", get(tickets::get_ticket).put(tickets::update_ticket))
        .route("/:id/assign", post(tickets::assign_ticket))
        .route("/:id/comments", post(tickets::add_comment))
        .route("/:id/escalate", post(tickets::escalate_ticket))
        .route("/:id/classify", put(tickets::classify_ticket))
        .route("/:id/progress", post(tickets::add_progress));

    let user_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/technicians", get(users::list_technicians))
        .route("/:id", put(users::update_user));

    let dashboard_routes = Router::new()
        .route("/stats", get(dashboard::stats))
        .route("/recent-tickets", get(dashboard::recent_tickets));

    let report_routes =
        Router::new().route("/sla-compliance", get(dashboard::sla_compliance_report));

    let opd_routes = Router::new()
        .route("/", get(opd::list_org_units).post(opd::create_org_unit))
        .route("/:id/calendar", put(opd::update_calendar))
        .route("/:id/sla", get(opd::get_sla).put(opd::update_sla));

    let notification_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/read-all", put(notifications::mark_all_read))
        .route("/:id/read", put(notifications::mark_read));

    let integration_routes = Router::new()
        .route("/tickets/:id/link-asset", post(integration::link_asset))
        .route("/tickets/:id/assets", get(integration::list_assets))
        .route("/tickets/:id/create-change", post(integration::create_change))
        .route("/tickets/:id/changes", get(integration::list_changes))
        .route("/tickets/:id/related", get(integration::related));

    let protected_routes = Router::new()
        .nest("/api/tickets", ticket_routes)
        .nest("/api/users", user_routes)
        .nest("/api/dashboard", dashboard_routes)
        .nest("/api/reports", report_routes)
        .nest("/api/opd", opd_routes)
        .nest("/api/notifications", notification_routes)
        .nest("/api/integration", integration_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(
            state.clone(),
        ));

    // writes check the bearer token in the handler; reads work anonymously
    let knowledge_base_routes = Router::new()
        .route(
            "/",
            get(knowledge_base::list_articles).post(knowledge_base::create_article),
        )
        .route(
            "/:id",
            get(knowledge_base::get_article).put(knowledge_base::update_article),
        )
        .route("/:id/helpful", post(knowledge_base::mark_helpful));

    let public_routes = Router::new()
        .route("/incidents", post(public::create_incident))
        .route("/tickets/:ticket_number", get(public::track_ticket));

    let webhook_routes = Router::new()
        .route("/asset-status-changed", post(webhooks::asset_status_changed))
        .route("/change-completed", post(webhooks::change_completed))
        .route("/high-risk-asset", post(webhooks::high_risk_asset))
        .layer(middleware::from_extractor_with_state::<webhooks::WebhookSecret, _>(
            state.clone(),
        ));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/knowledge-base", knowledge_base_routes)
        .nest("/api/public", public_routes)
        .nest("/api/webhooks", webhook_routes)
        .route("/health", get(health::health_check))
        .layer(middleware::map_response_with_state(
            state.clone(),
            expose_error_details,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
