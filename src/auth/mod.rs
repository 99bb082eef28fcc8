pub mod jwt;
pub mod password;
pub mod rbac;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};
use rbac::{AccessPolicy, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub org_unit_id: Option<Uuid>,
}

impl AuthenticatedUser {
    pub fn require_any_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden("insufficient role"))
        }
    }

    pub fn require_permission(
        &self,
        policy: &AccessPolicy,
        permission: &str,
    ) -> Result<(), AppError> {
        if policy.has_permission(self.role, permission) {
            Ok(())
        } else {
            Err(AppError::forbidden("insufficient permission"))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_any_role(Role::ADMINS)
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::forbidden("insufficient role"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let role: Role = claims.role.parse().map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            username: claims.username,
            role,
            org_unit_id: claims.org_unit_id,
        })
    }
}
