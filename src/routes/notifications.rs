use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Notification;
use crate::schema::notifications;
use crate::state::AppState;
use crate::utils::response::{clamp_limit, success, to_iso, Envelope};

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Deserialize)]
pub struct NotificationListQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_read: bool,
    pub created_at: String,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            is_read: notification.is_read,
            created_at: to_iso(notification.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct NotificationListPayload {
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct NotificationPayload {
    pub notification: NotificationResponse,
}

#[derive(Serialize)]
pub struct MarkAllPayload {
    pub updated: usize,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<NotificationListQuery>,
) -> AppResult<Json<Envelope<NotificationListPayload>>> {
    let limit = clamp_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT);
    let mut conn = state.db()?;

    let mut query = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .into_boxed();
    if params.unread_only {
        query = query.filter(notifications::is_read.eq(false));
    }
    let rows: Vec<Notification> = query
        .order(notifications::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    let unread_count: i64 = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::is_read.eq(false))
        .select(count_star())
        .first(&mut conn)?;

    Ok(success(NotificationListPayload {
        notifications: rows.into_iter().map(NotificationResponse::from).collect(),
        unread_count,
    }))
}

/// Idempotent: marking an already read notification succeeds again.
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<Envelope<NotificationPayload>>> {
    let mut conn = state.db()?;

    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .set(notifications::is_read.eq(true))
    .get_result::<Notification>(&mut conn)
    .optional()?
    .ok_or_else(AppError::not_found)?;

    Ok(success(NotificationPayload {
        notification: updated.into(),
    }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<MarkAllPayload>>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    Ok(success(MarkAllPayload { updated }))
}
