use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{limits, optional_within, required, required_within};
use crate::{
    auth::{password, rbac::Role, AuthenticatedUser},
    error::{is_unique_violation, AppError, AppResult},
    models::{NewUser, User},
    routes::opd::ensure_org_unit_exists,
    schema::users::dsl,
    state::AppState,
    utils::response::{success, to_iso, Envelope},
};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "opd_id")]
    pub org_unit_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub org_unit_id: Option<Uuid>,
    pub is_active: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            phone: user.phone,
            role: user.role,
            org_unit_id: user.org_unit_id,
            is_active: user.is_active,
            last_login_at: user.last_login_at.map(to_iso),
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct UserPayload {
    pub user: UserResponse,
}

#[derive(Serialize)]
pub struct LoginPayload {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Serialize)]
pub struct ProfilePayload {
    pub user: UserResponse,
    pub permissions: Vec<String>,
}

pub async fn register(
    State(state): State<AppState>,
    caller: Option<AuthenticatedUser>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Envelope<UserPayload>>)> {
    let username = required_within(payload.username.as_deref(), "username", limits::USERNAME)?;
    let password = payload
        .password
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("password is required"))?;
    let email = required_within(payload.email.as_deref(), "email", limits::TEXT)?;
    let full_name = optional_within(payload.full_name.as_deref(), "full_name", limits::TEXT)?;
    let phone = optional_within(payload.phone.as_deref(), "phone", limits::PHONE)?;
    let role: Role = required(payload.role.as_deref(), "role")?.parse()?;

    // self-service signups are reporters; anything else is provisioned by a top-level admin
    if role != Role::User {
        let provisioned_by_admin = caller
            .as_ref()
            .is_some_and(|caller| caller.role.is_top_level_admin());
        if !provisioned_by_admin {
            return Err(AppError::forbidden(
                "only top-level admins may register staff accounts",
            ));
        }
    }

    let mut conn = state.db()?;
    if let Some(org_unit_id) = payload.org_unit_id {
        ensure_org_unit_exists(&mut conn, org_unit_id)?;
    }

    let password_hash = password::hash_password(password).map_err(AppError::from)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: email.to_ascii_lowercase(),
        password_hash,
        full_name: full_name.unwrap_or(username).to_string(),
        phone: phone.map(str::to_string),
        role: role.as_str().to_string(),
        org_unit_id: payload.org_unit_id,
    };

    let user: User = match diesel::insert_into(dsl::users)
        .values(&new_user)
        .get_result(&mut conn)
    {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::conflict("username or email already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(user_id = %user.id, role = %role, "user registered");
    Ok((
        StatusCode::CREATED,
        success(UserPayload { user: user.into() }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<Envelope<LoginPayload>>> {
    let mut conn = state.db()?;

    let user: User = dsl::users
        .filter(dsl::username.eq(payload.username.trim()))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    if !user.is_active {
        return Err(AppError::unauthorized());
    }

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let token = state
        .jwt
        .generate_token(user.id, &user.username, &user.role, user.org_unit_id)
        .map_err(AppError::from)?;

    let now = Utc::now().naive_utc();
    let user: User = diesel::update(dsl::users.find(user.id))
        .set(dsl::last_login_at.eq(Some(now)))
        .get_result(&mut conn)?;

    Ok(success(LoginPayload {
        token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
        user: user.into(),
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Envelope<ProfilePayload>>> {
    let mut conn = state.db()?;
    let user: User = dsl::users.find(caller.user_id).first(&mut conn)?;

    Ok(success(ProfilePayload {
        user: user.into(),
        permissions: state.access.permissions(caller.role),
    }))
}

#[derive(AsChangeset)]
#[diesel(table_name = crate::schema::users)]
struct ProfileChangeset {
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<Option<String>>,
    updated_at: chrono::NaiveDateTime,
}

pub async fn update_profile(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<Envelope<UserPayload>>> {
    let full_name = match payload.full_name.as_deref() {
        Some(value) => Some(required_within(Some(value), "full_name", limits::TEXT)?.to_string()),
        None => None,
    };
    let email = match payload.email.as_deref() {
        Some(value) => {
            Some(required_within(Some(value), "email", limits::TEXT)?.to_ascii_lowercase())
        }
        None => None,
    };
    let phone = match payload.phone.as_deref() {
        Some(value) => Some(optional_within(Some(value), "phone", limits::PHONE)?.map(str::to_string)),
        None => None,
    };

    let changeset = ProfileChangeset {
        full_name,
        email,
        phone,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let user: User = match diesel::update(dsl::users.find(caller.user_id))
        .set(&changeset)
        .get_result(&mut conn)
    {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::conflict("email already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    Ok(success(UserPayload { user: user.into() }))
}
