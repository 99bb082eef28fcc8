use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{limits, non_empty, optional_within, required_within};
use crate::auth::AuthenticatedUser;
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::models::{NewOrgUnit, NewSlaPolicy, OrgUnit, SlaPolicy};
use crate::schema::{org_units, sla_policies};
use crate::sla::Priority;
use crate::state::AppState;
use crate::utils::response::{success, to_iso, Envelope};

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

#[derive(Deserialize)]
pub struct CreateOrgUnitRequest {
    pub code: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateCalendarRequest {
    pub working_hours: Option<Value>,
    pub holidays: Option<Vec<NaiveDate>>,
}

#[derive(Deserialize)]
pub struct SlaPolicyInput {
    pub priority: String,
    pub resolution_hours: i32,
}

#[derive(Deserialize)]
pub struct UpdateSlaRequest {
    pub policies: Vec<SlaPolicyInput>,
}

#[derive(Serialize)]
pub struct OrgUnitResponse {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub working_hours: Option<Value>,
    pub holidays: Vec<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<OrgUnit> for OrgUnitResponse {
    fn from(unit: OrgUnit) -> Self {
        Self {
            id: unit.id,
            code: unit.code,
            name: unit.name,
            address: unit.address,
            phone: unit.phone,
            email: unit.email,
            is_active: unit.is_active,
            working_hours: unit.working_hours,
            holidays: unit.holidays,
            created_at: to_iso(unit.created_at),
            updated_at: to_iso(unit.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct SlaPolicyResponse {
    pub priority: String,
    pub resolution_hours: i32,
    pub updated_at: String,
}

impl From<SlaPolicy> for SlaPolicyResponse {
    fn from(policy: SlaPolicy) -> Self {
        Self {
            priority: policy.priority,
            resolution_hours: policy.resolution_hours,
            updated_at: to_iso(policy.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct OrgUnitPayload {
    pub org_unit: OrgUnitResponse,
}

#[derive(Serialize)]
pub struct OrgUnitListPayload {
    pub org_units: Vec<OrgUnitResponse>,
}

#[derive(Serialize)]
pub struct SlaPayload {
    pub org_unit_id: Uuid,
    pub policies: Vec<SlaPolicyResponse>,
}

pub(crate) fn ensure_org_unit_exists(conn: &mut PgConnection, org_unit_id: Uuid) -> AppResult<()> {
    let exists: bool = diesel::select(diesel::dsl::exists(
        org_units::table.filter(org_units::id.eq(org_unit_id)),
    ))
    .get_result(conn)?;
    if exists {
        Ok(())
    } else {
        Err(AppError::bad_request("unknown org unit"))
    }
}

/// Top-level admins manage every unit; a unit admin only their own.
fn require_unit_admin(caller: &AuthenticatedUser, org_unit_id: Uuid) -> AppResult<()> {
    caller.require_admin()?;
    if caller.role.is_top_level_admin() || caller.org_unit_id == Some(org_unit_id) {
        Ok(())
    } else {
        Err(AppError::forbidden("not an admin of this org unit"))
    }
}

/// `working_hours` must be an object keyed by weekday.
fn validate_working_hours(value: &Value) -> AppResult<()> {
    let Some(days) = value.as_object() else {
        return Err(AppError::bad_request("working_hours must be an object"));
    };
    match days.keys().find(|day| !WEEKDAYS.contains(&day.as_str())) {
        Some(day) => Err(AppError::bad_request(format!(
            "working_hours has unknown weekday `{day}`"
        ))),
        None => Ok(()),
    }
}

pub async fn list_org_units(
    State(state): State<AppState>,
) -> AppResult<Json<Envelope<OrgUnitListPayload>>> {
    let mut conn = state.db()?;
    let units: Vec<OrgUnit> = org_units::table
        .filter(org_units::is_active.eq(true))
        .order(org_units::name.asc())
        .load(&mut conn)?;

    Ok(success(OrgUnitListPayload {
        org_units: units.into_iter().map(OrgUnitResponse::from).collect(),
    }))
}

pub async fn create_org_unit(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<CreateOrgUnitRequest>,
) -> AppResult<(StatusCode, Json<Envelope<OrgUnitPayload>>)> {
    if !caller.role.is_top_level_admin() {
        return Err(AppError::forbidden("only top-level admins may create org units"));
    }

    let code = required_within(payload.code.as_deref(), "code", limits::CODE)?.to_ascii_uppercase();
    let name = required_within(payload.name.as_deref(), "name", limits::TEXT)?;
    let phone = optional_within(payload.phone.as_deref(), "phone", limits::PHONE)?;
    let email = optional_within(payload.email.as_deref(), "email", limits::TEXT)?;

    let new_unit = NewOrgUnit {
        id: Uuid::new_v4(),
        code,
        name: name.to_string(),
        address: non_empty(payload.address.as_deref()).map(str::to_string),
        phone: phone.map(str::to_string),
        email: email.map(str::to_string),
    };

    let mut conn = state.db()?;
    let unit: OrgUnit = match diesel::insert_into(org_units::table)
        .values(&new_unit)
        .get_result(&mut conn)
    {
        Ok(unit) => unit,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::conflict("org unit code already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(org_unit_id = %unit.id, code = %unit.code, "org unit created");
    Ok((
        StatusCode::CREATED,
        success(OrgUnitPayload {
            org_unit: unit.into(),
        }),
    ))
}

pub async fn update_calendar(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(org_unit_id): Path<Uuid>,
    Json(payload): Json<UpdateCalendarRequest>,
) -> AppResult<Json<Envelope<OrgUnitPayload>>> {
    require_unit_admin(&caller, org_unit_id)?;

    if let Some(hours) = payload.working_hours.as_ref() {
        validate_working_hours(hours)?;
    }

    let mut conn = state.db()?;
    let existing: OrgUnit = org_units::table.find(org_unit_id).first(&mut conn)?;

    let working_hours = payload.working_hours.or(existing.working_hours);
    let mut holidays = payload.holidays.unwrap_or(existing.holidays);
    holidays.sort_unstable();
    holidays.dedup();

    let unit: OrgUnit = diesel::update(org_units::table.find(org_unit_id))
        .set((
            org_units::working_hours.eq(working_hours),
            org_units::holidays.eq(holidays),
            org_units::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    Ok(success(OrgUnitPayload {
        org_unit: unit.into(),
    }))
}

fn load_policies(conn: &mut PgConnection, org_unit_id: Uuid) -> AppResult<Vec<SlaPolicyResponse>> {
    let mut rows: Vec<SlaPolicy> = sla_policies::table
        .filter(sla_policies::org_unit_id.eq(org_unit_id))
        .load(conn)?;
    rows.sort_by_key(|policy| policy.priority.parse::<Priority>().ok());
    Ok(rows.into_iter().map(SlaPolicyResponse::from).collect())
}

pub async fn get_sla(
    State(state): State<AppState>,
    Path(org_unit_id): Path<Uuid>,
) -> AppResult<Json<Envelope<SlaPayload>>> {
    let mut conn = state.db()?;
    let _unit: OrgUnit = org_units::table.find(org_unit_id).first(&mut conn)?;

    Ok(success(SlaPayload {
        org_unit_id,
        policies: load_policies(&mut conn, org_unit_id)?,
    }))
}

pub async fn update_sla(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(org_unit_id): Path<Uuid>,
    Json(payload): Json<UpdateSlaRequest>,
) -> AppResult<Json<Envelope<SlaPayload>>> {
    require_unit_admin(&caller, org_unit_id)?;

    if payload.policies.is_empty() {
        return Err(AppError::bad_request("policies must not be empty"));
    }
    let mut rows = Vec::with_capacity(payload.policies.len());
    for input in &payload.policies {
        let priority: Priority = input.priority.parse()?;
        if input.resolution_hours <= 0 {
            return Err(AppError::bad_request(format!(
                "resolution_hours for {priority} must be positive"
            )));
        }
        rows.push(NewSlaPolicy {
            id: Uuid::new_v4(),
            org_unit_id,
            priority: priority.as_str().to_string(),
            resolution_hours: input.resolution_hours,
        });
    }

    let mut conn = state.db()?;
    let _unit: OrgUnit = org_units::table.find(org_unit_id).first(&mut conn)?;

    diesel::insert_into(sla_policies::table)
        .values(&rows)
        .on_conflict((sla_policies::org_unit_id, sla_policies::priority))
        .do_update()
        .set((
            sla_policies::resolution_hours.eq(excluded(sla_policies::resolution_hours)),
            sla_policies::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    tracing::info!(%org_unit_id, policies = rows.len(), "sla policies updated");
    Ok(success(SlaPayload {
        org_unit_id,
        policies: load_policies(&mut conn, org_unit_id)?,
    }))
}
