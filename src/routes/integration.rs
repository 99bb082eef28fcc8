use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tickets::load_scoped_ticket;
use super::{limits, non_empty, optional_within, required_within};
use crate::activity::{self, Action};
use crate::auth::{rbac::Role, AuthenticatedUser};
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::lifecycle;
use crate::models::{AssetLink, ChangeLink, NewAssetLink, NewChangeLink};
use crate::schema::{ticket_asset_links, ticket_change_links};
use crate::state::AppState;
use crate::utils::response::{success, to_iso, Envelope};

pub(crate) const CHANGE_PENDING: &str = "pending";

const CHANGE_CREATORS: &[Role] = &[
    Role::SuperAdmin,
    Role::CityAdmin,
    Role::UnitAdmin,
    Role::Technician,
];

#[derive(Deserialize)]
pub struct LinkAssetRequest {
    pub asset_id: Option<String>,
    pub asset_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CreateChangeRequest {
    pub change_id: Option<String>,
    pub change_type: Option<String>,
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct AssetLinkResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub asset_id: String,
    pub asset_name: String,
    pub description: Option<String>,
    pub linked_by: Option<Uuid>,
    pub created_at: String,
}

impl From<AssetLink> for AssetLinkResponse {
    fn from(link: AssetLink) -> Self {
        Self {
            id: link.id,
            ticket_id: link.ticket_id,
            asset_id: link.asset_id,
            asset_name: link.asset_name,
            description: link.description,
            linked_by: link.linked_by,
            created_at: to_iso(link.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct ChangeLinkResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub change_id: String,
    pub change_number: String,
    pub change_type: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ChangeLink> for ChangeLinkResponse {
    fn from(link: ChangeLink) -> Self {
        Self {
            id: link.id,
            ticket_id: link.ticket_id,
            change_id: link.change_id,
            change_number: link.change_number,
            change_type: link.change_type,
            title: link.title,
            status: link.status,
            created_by: link.created_by,
            created_at: to_iso(link.created_at),
            updated_at: to_iso(link.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct AssetLinkPayload {
    pub link: AssetLinkResponse,
}

#[derive(Serialize)]
pub struct AssetListPayload {
    pub assets: Vec<AssetLinkResponse>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct ChangePayload {
    pub ticket_number: String,
    pub change: ChangeLinkResponse,
}

#[derive(Serialize)]
pub struct ChangeListPayload {
    pub changes: Vec<ChangeLinkResponse>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct RelatedItems {
    pub assets: Vec<AssetLinkResponse>,
    pub changes: Vec<ChangeLinkResponse>,
    pub asset_count: usize,
    pub change_count: usize,
}

#[derive(Serialize)]
pub struct RelatedPayload {
    pub related: RelatedItems,
}

/// Inserts an asset link row. Shared with the high-risk-asset webhook.
pub(crate) fn insert_asset_link(
    conn: &mut PgConnection,
    link: &NewAssetLink,
) -> QueryResult<AssetLink> {
    diesel::insert_into(ticket_asset_links::table)
        .values(link)
        .get_result(conn)
}

fn load_assets(conn: &mut PgConnection, ticket_id: Uuid) -> AppResult<Vec<AssetLinkResponse>> {
    let rows: Vec<AssetLink> = ticket_asset_links::table
        .filter(ticket_asset_links::ticket_id.eq(ticket_id))
        .order(ticket_asset_links::created_at.desc())
        .load(conn)?;
    Ok(rows.into_iter().map(AssetLinkResponse::from).collect())
}

fn load_changes(conn: &mut PgConnection, ticket_id: Uuid) -> AppResult<Vec<ChangeLinkResponse>> {
    let rows: Vec<ChangeLink> = ticket_change_links::table
        .filter(ticket_change_links::ticket_id.eq(ticket_id))
        .order(ticket_change_links::created_at.desc())
        .load(conn)?;
    Ok(rows.into_iter().map(ChangeLinkResponse::from).collect())
}

pub async fn link_asset(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<LinkAssetRequest>,
) -> AppResult<(StatusCode, Json<Envelope<AssetLinkPayload>>)> {
    let asset_id = required_within(payload.asset_id.as_deref(), "asset_id", limits::EXTERNAL_ID)?;
    let asset_name = required_within(payload.asset_name.as_deref(), "asset_name", limits::TEXT)?;

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;

    let link = insert_asset_link(
        &mut conn,
        &NewAssetLink {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            asset_id: asset_id.to_string(),
            asset_name: asset_name.to_string(),
            description: non_empty(payload.description.as_deref()).map(str::to_string),
            linked_by: Some(user.user_id),
        },
    )?;

    activity::record(
        &mut conn,
        ticket.id,
        Some(user.user_id),
        Action::LinkAsset,
        &format!("asset linked: {asset_name} ({asset_id})"),
    );

    Ok((
        StatusCode::CREATED,
        success(AssetLinkPayload { link: link.into() }),
    ))
}

pub async fn list_assets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Envelope<AssetListPayload>>> {
    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    let assets = load_assets(&mut conn, ticket.id)?;

    Ok(success(AssetListPayload {
        count: assets.len(),
        assets,
    }))
}

pub async fn create_change(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    payload: Option<Json<CreateChangeRequest>>,
) -> AppResult<(StatusCode, Json<Envelope<ChangePayload>>)> {
    user.require_any_role(CHANGE_CREATORS)?;
    let payload = payload.map(|Json(body)| body).unwrap_or_default();

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;

    let now = Utc::now().naive_utc();
    let change_number = lifecycle::generate_change_number(now, &mut rand::thread_rng());
    let change_id = optional_within(payload.change_id.as_deref(), "change_id", limits::EXTERNAL_ID)?
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let new_link = NewChangeLink {
        id: Uuid::new_v4(),
        ticket_id: ticket.id,
        change_id,
        change_number,
        change_type: optional_within(payload.change_type.as_deref(), "change_type", limits::CHANGE_TYPE)?
            .map(str::to_string),
        title: optional_within(payload.title.as_deref(), "title", limits::TEXT)?.map(str::to_string),
        status: CHANGE_PENDING.to_string(),
        created_by: Some(user.user_id),
    };

    let link: ChangeLink = match diesel::insert_into(ticket_change_links::table)
        .values(&new_link)
        .get_result(&mut conn)
    {
        Ok(link) => link,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::conflict("change request already linked"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    activity::record(
        &mut conn,
        ticket.id,
        Some(user.user_id),
        Action::CreateChange,
        &format!("change request {} created", link.change_number),
    );
    tracing::info!(
        ticket_id = %ticket.id,
        change_number = %link.change_number,
        "change request created"
    );

    Ok((
        StatusCode::CREATED,
        success(ChangePayload {
            ticket_number: ticket.ticket_number,
            change: link.into(),
        }),
    ))
}

pub async fn list_changes(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ChangeListPayload>>> {
    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    let changes = load_changes(&mut conn, ticket.id)?;

    Ok(success(ChangeListPayload {
        count: changes.len(),
        changes,
    }))
}

pub async fn related(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Envelope<RelatedPayload>>> {
    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    let assets = load_assets(&mut conn, ticket.id)?;
    let changes = load_changes(&mut conn, ticket.id)?;

    Ok(success(RelatedPayload {
        related: RelatedItems {
            asset_count: assets.len(),
            change_count: changes.len(),
            assets,
            changes,
        },
    }))
}
