//! Unauthenticated intake and tracking for citizens without an account.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::opd::ensure_org_unit_exists;
use super::tickets::{insert_ticket, DEFAULT_CATEGORY};
use super::{limits, optional_within, required, required_within};
use crate::activity::{self, Action};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{TicketStatus, TicketType};
use crate::models::{NewTicket, Ticket, TicketComment};
use crate::notifications::{self, NotificationKind};
use crate::schema::{ticket_comments, tickets, users};
use crate::sla::{self, Priority};
use crate::state::AppState;
use crate::utils::response::{success, to_iso, Envelope};

#[derive(Deserialize)]
pub struct PublicIncidentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_phone: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "opd_id")]
    pub org_unit_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct TrackQuery {
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct PublicComment {
    pub content: String,
    pub created_at: String,
}

/// What a reporter may see of their ticket: no assignee, no internal notes.
#[derive(Serialize)]
pub struct PublicTicketView {
    pub ticket_number: String,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub title: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub resolution: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
    pub comments: Vec<PublicComment>,
}

impl PublicTicketView {
    fn new(ticket: Ticket, comments: Vec<TicketComment>) -> Self {
        Self {
            ticket_number: ticket.ticket_number,
            ticket_type: ticket.ticket_type,
            title: ticket.title,
            category: ticket.category,
            priority: ticket.priority,
            status: ticket.status,
            resolution: ticket.resolution,
            created_at: to_iso(ticket.created_at),
            updated_at: to_iso(ticket.updated_at),
            resolved_at: ticket.resolved_at.map(to_iso),
            closed_at: ticket.closed_at.map(to_iso),
            comments: comments
                .into_iter()
                .map(|comment| PublicComment {
                    content: comment.content,
                    created_at: to_iso(comment.created_at),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub struct PublicIncidentPayload {
    pub ticket_number: String,
    pub status: String,
    pub sla_due: Option<String>,
}

#[derive(Serialize)]
pub struct PublicTicketPayload {
    pub ticket: PublicTicketView,
}

pub async fn create_incident(
    State(state): State<AppState>,
    Json(payload): Json<PublicIncidentRequest>,
) -> AppResult<(StatusCode, Json<Envelope<PublicIncidentPayload>>)> {
    let title = required_within(payload.title.as_deref(), "title", limits::TEXT)?;
    let description = required(payload.description.as_deref(), "description")?;
    let reporter_name =
        required_within(payload.reporter_name.as_deref(), "reporter_name", limits::TEXT)?;
    let reporter_email =
        required_within(payload.reporter_email.as_deref(), "reporter_email", limits::TEXT)?;
    let reporter_phone =
        optional_within(payload.reporter_phone.as_deref(), "reporter_phone", limits::PHONE)?;
    if !reporter_email.contains('@') {
        return Err(AppError::bad_request("reporter_email is not a valid address"));
    }
    let category =
        optional_within(payload.category.as_deref(), "category", limits::CATEGORY)?.unwrap_or(DEFAULT_CATEGORY);

    let mut conn = state.db()?;
    if let Some(org_unit_id) = payload.org_unit_id {
        ensure_org_unit_exists(&mut conn, org_unit_id)?;
    }

    let now = Utc::now().naive_utc();
    let priority = Priority::Medium;
    let new_ticket = NewTicket {
        id: Uuid::new_v4(),
        ticket_number: String::new(),
        ticket_type: TicketType::Incident.as_str().to_string(),
        title: title.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        priority: priority.as_str().to_string(),
        status: TicketStatus::Open.as_str().to_string(),
        reporter_id: None,
        reporter_name: Some(reporter_name.to_string()),
        reporter_email: Some(reporter_email.to_ascii_lowercase()),
        reporter_phone: reporter_phone.map(str::to_string),
        org_unit_id: payload.org_unit_id,
        sla_due: sla::compute_sla_due(&mut *conn, priority, payload.org_unit_id, now),
        created_at: now,
        updated_at: now,
    };

    let ticket = insert_ticket(&mut conn, TicketType::Incident, new_ticket)?;
    activity::record(
        &mut conn,
        ticket.id,
        None,
        Action::Create,
        &format!("public incident {} reported by {reporter_name}", ticket.ticket_number),
    );
    notifications::notify_unit_admins(
        &mut conn,
        ticket.org_unit_id,
        "New public incident",
        &format!("{}: {}", ticket.ticket_number, ticket.title),
        NotificationKind::Info,
    );
    tracing::info!(
        ticket_id = %ticket.id,
        ticket_number = %ticket.ticket_number,
        "public incident reported"
    );

    Ok((
        StatusCode::CREATED,
        success(PublicIncidentPayload {
            ticket_number: ticket.ticket_number,
            status: ticket.status,
            sla_due: ticket.sla_due.map(to_iso),
        }),
    ))
}

/// Looks a ticket up by number. Answers 404 unless `email` belongs to the
/// reporter, so ticket numbers cannot be probed.
pub async fn track_ticket(
    State(state): State<AppState>,
    Path(ticket_number): Path<String>,
    Query(params): Query<TrackQuery>,
) -> AppResult<Json<Envelope<PublicTicketPayload>>> {
    let email = required(params.email.as_deref(), "email")?.to_ascii_lowercase();

    let mut conn = state.db()?;
    let ticket: Ticket = tickets::table
        .filter(tickets::ticket_number.eq(ticket_number.trim().to_ascii_uppercase()))
        .first(&mut conn)?;

    let reporter_email = match (&ticket.reporter_email, ticket.reporter_id) {
        (Some(stored), _) => Some(stored.to_ascii_lowercase()),
        (None, Some(reporter_id)) => users::table
            .find(reporter_id)
            .select(users::email)
            .first::<String>(&mut conn)
            .optional()?
            .map(|stored| stored.to_ascii_lowercase()),
        (None, None) => None,
    };
    if reporter_email.as_deref() != Some(email.as_str()) {
        return Err(AppError::not_found());
    }

    let comments: Vec<TicketComment> = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket.id))
        .filter(ticket_comments::is_internal.eq(false))
        .order(ticket_comments::created_at.asc())
        .load(&mut conn)?;

    Ok(success(PublicTicketPayload {
        ticket: PublicTicketView::new(ticket, comments),
    }))
}
