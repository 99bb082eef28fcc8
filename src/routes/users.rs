use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::auth::{UserPayload, UserResponse};
use super::{limits, non_empty, within};
use super::opd::ensure_org_unit_exists;
use crate::auth::{
    rbac::{self, Role},
    AuthenticatedUser,
};
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::models::User;
use crate::schema::users;
use crate::state::AppState;
use crate::utils::json::FieldUpdate;
use crate::utils::response::{success, Envelope};

#[derive(Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Serialize)]
pub struct UserListPayload {
    pub users: Vec<UserResponse>,
    pub count: usize,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UserChangeset {
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<Option<String>>,
    role: Option<String>,
    org_unit_id: Option<Option<Uuid>>,
    is_active: Option<bool>,
    updated_at: Option<NaiveDateTime>,
}

/// Users visible to an admin: everyone for top-level admins, the own unit
/// for unit admins (nobody when they have none).
fn scoped_users<'a>(caller: &AuthenticatedUser) -> users::BoxedQuery<'a, diesel::pg::Pg> {
    let query = users::table.into_boxed();
    if caller.role.is_top_level_admin() {
        return query;
    }
    match caller.org_unit_id {
        Some(unit) => query.filter(users::org_unit_id.eq(unit)),
        None => query.filter(users::id.is_null()),
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<UserListQuery>,
) -> AppResult<Json<Envelope<UserListPayload>>> {
    caller.require_admin()?;
    caller.require_permission(&state.access, rbac::USERS_READ)?;

    let mut query = scoped_users(&caller);
    if let Some(role) = non_empty(params.role.as_deref()) {
        let role: Role = role.parse()?;
        query = query.filter(users::role.eq(role.as_str()));
    }
    if let Some(active) = params.is_active {
        query = query.filter(users::is_active.eq(active));
    }
    if let Some(search) = non_empty(params.search.as_deref()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            users::username
                .ilike(pattern.clone())
                .or(users::full_name.ilike(pattern.clone()))
                .or(users::email.ilike(pattern)),
        );
    }

    let mut conn = state.db()?;
    let rows: Vec<User> = query.order(users::username.asc()).load(&mut conn)?;
    let users: Vec<UserResponse> = rows.into_iter().map(UserResponse::from).collect();

    Ok(success(UserListPayload {
        count: users.len(),
        users,
    }))
}

pub async fn list_technicians(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Envelope<UserListPayload>>> {
    caller.require_admin()?;

    let mut conn = state.db()?;
    let rows: Vec<User> = scoped_users(&caller)
        .filter(users::role.eq(Role::Technician.as_str()))
        .filter(users::is_active.eq(true))
        .order(users::full_name.asc())
        .load(&mut conn)?;
    let users: Vec<UserResponse> = rows.into_iter().map(UserResponse::from).collect();

    Ok(success(UserListPayload {
        count: users.len(),
        users,
    }))
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<Envelope<UserPayload>>> {
    caller.require_admin()?;
    caller.require_permission(&state.access, rbac::USERS_WRITE)?;

    let mut conn = state.db()?;
    let existing: User = scoped_users(&caller)
        .filter(users::id.eq(user_id))
        .first(&mut conn)?;

    let target_is_top_level = existing
        .role
        .parse::<Role>()
        .is_ok_and(Role::is_top_level_admin);
    if target_is_top_level && !caller.role.is_top_level_admin() {
        return Err(AppError::forbidden("cannot modify a top-level admin"));
    }

    let mut changes = UserChangeset::default();

    if let Some(full_name) = FieldUpdate::read_required(&body, "full_name")? {
        changes.full_name = Some(within(&full_name, "full_name", limits::TEXT)?.to_string());
    }
    if let Some(email) = FieldUpdate::read_required(&body, "email")? {
        changes.email = Some(within(&email, "email", limits::TEXT)?.to_ascii_lowercase());
    }

    match FieldUpdate::read(&body, &["phone"])? {
        FieldUpdate::Omitted => {}
        FieldUpdate::Cleared => changes.phone = Some(None),
        FieldUpdate::Set(phone) => {
            let phone = within(&phone, "phone", limits::PHONE)?;
            changes.phone = Some(non_empty(Some(phone)).map(str::to_string));
        }
    }

    if let Some(role) = FieldUpdate::read_required(&body, "role")? {
        let role: Role = role.parse()?;
        if role.is_top_level_admin() && !caller.role.is_top_level_admin() {
            return Err(AppError::forbidden(
                "only top-level admins may grant top-level roles",
            ));
        }
        changes.role = Some(role.as_str().to_string());
    }

    match FieldUpdate::read(&body, &["org_unit_id", "opd_id"])? {
        FieldUpdate::Omitted => {}
        FieldUpdate::Cleared => {
            if !caller.role.is_top_level_admin() {
                return Err(AppError::forbidden(
                    "unit admins cannot move users out of their unit",
                ));
            }
            changes.org_unit_id = Some(None);
        }
        FieldUpdate::Set(value) => {
            let unit = Uuid::parse_str(&value)
                .map_err(|_| AppError::bad_request("org_unit_id must be a UUID"))?;
            if !caller.role.is_top_level_admin() && Some(unit) != caller.org_unit_id {
                return Err(AppError::forbidden(
                    "unit admins cannot move users to another unit",
                ));
            }
            ensure_org_unit_exists(&mut conn, unit)?;
            changes.org_unit_id = Some(Some(unit));
        }
    }

    match body.get("is_active") {
        None => {}
        Some(Value::Bool(active)) => {
            if !active && existing.id == caller.user_id {
                return Err(AppError::invalid_operation("you cannot deactivate yourself"));
            }
            changes.is_active = Some(*active);
        }
        Some(other) => {
            return Err(AppError::bad_request(format!(
                "is_active must be a boolean, got {other}"
            )));
        }
    }

    changes.updated_at = Some(Utc::now().naive_utc());
    let updated: User = match diesel::update(users::table.find(existing.id))
        .set(&changes)
        .get_result(&mut conn)
    {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::conflict("email already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(user_id = %updated.id, updated_by = %caller.user_id, "user updated");
    Ok(success(UserPayload {
        user: updated.into(),
    }))
}
