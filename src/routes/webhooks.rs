//! Inbound events from the asset and change management systems.
//!
//! Every route sits behind [`WebhookSecret`]; a delivery carrying an event id
//! (body `event_id` or the `x-webhook-event-id` header) is processed at most
//! once per `(source, event_id)`.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::integration::insert_asset_link;
use super::opd::ensure_org_unit_exists;
use super::{limits, required, required_within, truncate_chars, within};
use super::tickets::{insert_ticket, notify_reporter, TicketResponse};
use crate::activity::{self, Action};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{TicketStatus, TicketType, ACTIVE_STATUSES};
use crate::models::{
    ChangeLink, NewAssetLink, NewTicket, NewTicketComment, NewWebhookEvent, Ticket,
};
use crate::notifications::{self, NotificationKind};
use crate::schema::{
    ticket_asset_links, ticket_change_links, ticket_comments, tickets, webhook_events,
};
use crate::sla::{self, Priority};
use crate::state::AppState;
use crate::utils::response::{success, Envelope};

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const EVENT_ID_HEADER: &str = "x-webhook-event-id";

const ASSET_STATUS_SOURCE: &str = "asset-status-changed";
const CHANGE_COMPLETED_SOURCE: &str = "change-completed";
const HIGH_RISK_SOURCE: &str = "high-risk-asset";

const PREVENTIVE_CATEGORY: &str = "Preventive Maintenance";
const RESTORED_ASSET_STATUSES: [&str; 3] = ["operational", "fixed", "active"];

/// Proof that the request carried the shared webhook secret.
pub struct WebhookSecret;

#[async_trait]
impl FromRequestParts<AppState> for WebhookSecret {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(AppError::unauthorized)?;

        if secrets_match(provided, &state.config.webhook_secret) {
            Ok(WebhookSecret)
        } else {
            tracing::warn!(path = %parts.uri.path(), "webhook rejected: bad secret");
            Err(AppError::unauthorized())
        }
    }
}

/// Compares fixed-length digests so the check does not leak the secret's length.
fn secrets_match(provided: &str, expected: &str) -> bool {
    !expected.is_empty()
        && Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn delivery_id(headers: &HeaderMap, from_body: Option<&str>) -> AppResult<Option<String>> {
    from_body
        .or_else(|| headers.get(EVENT_ID_HEADER).and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| within(id, "event_id", limits::TEXT).map(str::to_string))
        .transpose()
}

/// Runs `handle` inside a transaction that first claims `(source, event_id)`.
/// `Ok(None)` means the event was already processed. A failure rolls the
/// claim back so a redelivery is processed again.
fn deliver_once<T>(
    conn: &mut PgConnection,
    source: &str,
    event_id: Option<&str>,
    handle: impl FnOnce(&mut PgConnection) -> AppResult<T>,
) -> AppResult<Option<T>> {
    conn.transaction::<_, AppError, _>(|conn| {
        if let Some(event_id) = event_id {
            let claimed = diesel::insert_into(webhook_events::table)
                .values(&NewWebhookEvent { source, event_id })
                .on_conflict_do_nothing()
                .execute(conn)?;
            if claimed == 0 {
                tracing::info!(source, event_id, "duplicate webhook delivery ignored");
                return Ok(None);
            }
        }
        handle(conn).map(Some)
    })
}

fn system_comment(conn: &mut PgConnection, ticket_id: Uuid, content: String) -> QueryResult<()> {
    diesel::insert_into(ticket_comments::table)
        .values(&NewTicketComment {
            id: Uuid::new_v4(),
            ticket_id,
            author_id: None,
            content,
            is_internal: false,
        })
        .execute(conn)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct AssetStatusEvent {
    pub event_id: Option<String>,
    pub asset_id: Option<String>,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangeCompletedEvent {
    pub event_id: Option<String>,
    pub change_id: Option<String>,
    pub change_number: Option<String>,
    pub status: Option<String>,
    pub result: Option<String>,
}

#[derive(Deserialize)]
pub struct HighRiskAssetEvent {
    pub event_id: Option<String>,
    pub asset_id: Option<String>,
    pub asset_name: Option<String>,
    pub risk_level: Option<String>,
    pub risk_description: Option<String>,
    #[serde(alias = "opd_id")]
    pub org_unit_id: Option<Uuid>,
}

#[derive(Serialize, Default)]
pub struct WebhookAck {
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_tickets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_resolved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketResponse>,
}

impl WebhookAck {
    fn duplicate() -> Self {
        Self {
            duplicate: true,
            ..Self::default()
        }
    }
}

pub async fn asset_status_changed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<AssetStatusEvent>,
) -> AppResult<Json<Envelope<WebhookAck>>> {
    let asset_id = required_within(event.asset_id.as_deref(), "asset_id", limits::EXTERNAL_ID)?;
    let new_status = required(event.new_status.as_deref(), "new_status")?;
    let old_status = event.old_status.as_deref().unwrap_or("unknown");
    let event_id = delivery_id(&headers, event.event_id.as_deref())?;

    let mut conn = state.db()?;
    let affected = deliver_once(&mut conn, ASSET_STATUS_SOURCE, event_id.as_deref(), |conn| {
        let linked: Vec<Ticket> = ticket_asset_links::table
            .inner_join(tickets::table)
            .filter(ticket_asset_links::asset_id.eq(asset_id))
            .filter(tickets::status.eq_any(ACTIVE_STATUSES.map(TicketStatus::as_str)))
            .select(tickets::all_columns)
            .distinct()
            .load(conn)?;

        let restored =
            RESTORED_ASSET_STATUSES.contains(&new_status.to_ascii_lowercase().as_str());
        for ticket in &linked {
            system_comment(
                conn,
                ticket.id,
                format!("asset {asset_id} status changed: {old_status} -> {new_status}"),
            )?;
            activity::record(
                conn,
                ticket.id,
                None,
                Action::AssetUpdate,
                &format!("asset {asset_id} status changed to {new_status}"),
            );
            if restored {
                notify_reporter(
                    conn,
                    ticket,
                    "Related asset repaired",
                    &format!(
                        "The asset linked to ticket {} is back in service. Please verify and close the ticket if the problem is solved.",
                        ticket.ticket_number
                    ),
                    NotificationKind::Success,
                );
            }
        }
        Ok(linked.len())
    })?;

    let ack = match affected {
        Some(count) => {
            tracing::info!(asset_id, new_status, affected_tickets = count, "asset status processed");
            WebhookAck {
                affected_tickets: Some(count),
                ..WebhookAck::default()
            }
        }
        None => WebhookAck::duplicate(),
    };
    Ok(success(ack))
}

pub async fn change_completed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<ChangeCompletedEvent>,
) -> AppResult<Json<Envelope<WebhookAck>>> {
    let change_id = required_within(event.change_id.as_deref(), "change_id", limits::EXTERNAL_ID)?;
    let status =
        required_within(event.status.as_deref(), "status", limits::CHANGE_STATUS)?.to_ascii_lowercase();
    let result = event
        .result
        .as_deref()
        .map(|r| r.trim().to_ascii_lowercase());
    let event_id = delivery_id(&headers, event.event_id.as_deref())?;

    let mut conn = state.db()?;
    let outcome = deliver_once(&mut conn, CHANGE_COMPLETED_SOURCE, event_id.as_deref(), |conn| {
        let Some(link) = ticket_change_links::table
            .filter(ticket_change_links::change_id.eq(change_id))
            .first::<ChangeLink>(conn)
            .optional()?
        else {
            tracing::info!(change_id, "change-completed for unknown change acknowledged");
            return Ok((false, false));
        };

        let now = Utc::now().naive_utc();
        diesel::update(ticket_change_links::table.find(link.id))
            .set((
                ticket_change_links::status.eq(&status),
                ticket_change_links::updated_at.eq(now),
            ))
            .execute(conn)?;

        let change_number = event
            .change_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&link.change_number)
            .to_string();
        let result_text = result.as_deref().unwrap_or("no result");

        system_comment(
            conn,
            link.ticket_id,
            format!("change request {change_number} {status}: {result_text}"),
        )?;
        activity::record(
            conn,
            link.ticket_id,
            None,
            Action::ChangeUpdate,
            &format!("change request {change_number} is now {status}"),
        );

        if status != "completed" || result.as_deref() != Some("success") {
            return Ok((true, false));
        }

        let ticket: Ticket = tickets::table.find(link.ticket_id).first(conn)?;
        let breached = sla::is_breached(ticket.sla_breached, ticket.sla_due, Some(now), now);
        let resolved: Option<Ticket> = diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket.id))
                .filter(tickets::status.eq_any(ACTIVE_STATUSES.map(TicketStatus::as_str))),
        )
        .set((
            tickets::status.eq(TicketStatus::Resolved.as_str()),
            tickets::resolved_at.eq(Some(now)),
            tickets::sla_breached.eq(breached),
            tickets::resolution.eq(Some(format!("Resolved via change request {change_number}"))),
            tickets::updated_at.eq(now),
        ))
        .get_result(conn)
        .optional()?;

        let Some(resolved) = resolved else {
            return Ok((true, false));
        };

        notify_reporter(
            conn,
            &resolved,
            "Ticket resolved",
            &format!(
                "Ticket {} was resolved by change request {change_number}",
                resolved.ticket_number
            ),
            NotificationKind::Success,
        );
        activity::record(
            conn,
            resolved.id,
            None,
            Action::AutoResolve,
            &format!("auto-resolved via change request {change_number}"),
        );
        tracing::info!(
            ticket_id = %resolved.id,
            change_number = %change_number,
            "ticket auto-resolved by change request"
        );
        Ok((true, true))
    })?;

    let ack = match outcome {
        Some((matched, auto_resolved)) => WebhookAck {
            matched: Some(matched),
            auto_resolved: Some(auto_resolved),
            ..WebhookAck::default()
        },
        None => WebhookAck::duplicate(),
    };
    Ok(success(ack))
}

pub async fn high_risk_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<HighRiskAssetEvent>,
) -> AppResult<(StatusCode, Json<Envelope<WebhookAck>>)> {
    let asset_id = required_within(event.asset_id.as_deref(), "asset_id", limits::EXTERNAL_ID)?;
    let asset_name = required_within(event.asset_name.as_deref(), "asset_name", limits::TEXT)?;
    let risk_level = event.risk_level.as_deref().unwrap_or("high");
    let risk_description = event
        .risk_description
        .as_deref()
        .unwrap_or("no details supplied");
    let event_id = delivery_id(&headers, event.event_id.as_deref())?;

    let mut conn = state.db()?;
    let created = deliver_once(&mut conn, HIGH_RISK_SOURCE, event_id.as_deref(), |conn| {
        if let Some(org_unit_id) = event.org_unit_id {
            ensure_org_unit_exists(conn, org_unit_id)?;
        }

        let now = Utc::now().naive_utc();
        let priority = Priority::High;
        let new_ticket = NewTicket {
            id: Uuid::new_v4(),
            ticket_number: String::new(),
            ticket_type: TicketType::Incident.as_str().to_string(),
            title: truncate_chars(&format!("High risk asset alert: {asset_name}"), limits::TEXT),
            description: format!(
                "Asset {asset_name} ({asset_id}) has been flagged as high-risk.\n\nRisk level: {risk_level}\nRisk details:\n{risk_description}\n\nPreventive action required."
            ),
            category: PREVENTIVE_CATEGORY.to_string(),
            priority: priority.as_str().to_string(),
            status: TicketStatus::Open.as_str().to_string(),
            reporter_id: None,
            reporter_name: None,
            reporter_email: None,
            reporter_phone: None,
            org_unit_id: event.org_unit_id,
            sla_due: sla::compute_sla_due(conn, priority, event.org_unit_id, now),
            created_at: now,
            updated_at: now,
        };

        let ticket = insert_ticket(conn, TicketType::Incident, new_ticket)?;
        insert_asset_link(
            conn,
            &NewAssetLink {
                id: Uuid::new_v4(),
                ticket_id: ticket.id,
                asset_id: asset_id.to_string(),
                asset_name: asset_name.to_string(),
                description: Some("auto-linked from risk alert".to_string()),
                linked_by: None,
            },
        )?;
        activity::record(
            conn,
            ticket.id,
            None,
            Action::Create,
            &format!("preventive ticket {} created from risk alert", ticket.ticket_number),
        );
        notifications::notify_unit_admins(
            conn,
            ticket.org_unit_id,
            "High-risk asset detected",
            &format!(
                "High-risk asset detected: {asset_name}. Preventive maintenance ticket created: {}",
                ticket.ticket_number
            ),
            NotificationKind::Warning,
        );
        Ok(ticket)
    })?;

    match created {
        Some(ticket) => {
            tracing::info!(
                ticket_id = %ticket.id,
                ticket_number = %ticket.ticket_number,
                asset_id,
                "preventive ticket created"
            );
            Ok((
                StatusCode::CREATED,
                success(WebhookAck {
                    ticket: Some(ticket.into()),
                    ..WebhookAck::default()
                }),
            ))
        }
        None => Ok((StatusCode::OK, success(WebhookAck::duplicate()))),
    }
}
