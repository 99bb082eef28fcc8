use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::max;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::opd::ensure_org_unit_exists;
use super::{limits, non_empty, optional_within, required, required_within, within};
use crate::activity::{self, Action};
use crate::auth::{
    rbac::{self, Role},
    AuthenticatedUser,
};
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::lifecycle::{self, TicketScope, TicketStatus, TicketType, ACTIVE_STATUSES};
use crate::models::{
    NewProgressUpdate, NewTicket, NewTicketComment, ProgressUpdate, Ticket, TicketComment,
    TicketLog, User,
};
use crate::notifications::{self, NotificationKind};
use crate::schema::{ticket_comments, ticket_progress, tickets, users};
use crate::sla::{self, Priority};
use crate::state::AppState;
use crate::utils::response::{clamp_limit, success, to_iso, Envelope};

pub(crate) const DEFAULT_CATEGORY: &str = "General";
pub const MAX_NUMBER_ATTEMPTS: usize = 8;

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "opd_id")]
    pub org_unit_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct TicketListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateTicketRequest {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Deserialize)]
pub struct ClassifyTicketRequest {
    pub urgency: i32,
    pub impact: i32,
}

#[derive(Deserialize)]
pub struct AssignTicketRequest {
    #[serde(alias = "assigned_to")]
    pub technician_id: Uuid,
}

#[derive(Deserialize)]
pub struct EscalateTicketRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Deserialize)]
pub struct CreateProgressRequest {
    pub status_change: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct MergeTicketsRequest {
    #[serde(alias = "source_ticket_ids")]
    pub source_ids: Vec<Uuid>,
    #[serde(alias = "target_ticket_id")]
    pub target_id: Uuid,
    pub reason: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = tickets)]
struct TicketChangeset {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    priority: Option<String>,
    status: Option<String>,
    resolution: Option<String>,
    sla_breached: Option<bool>,
    resolved_at: Option<Option<NaiveDateTime>>,
    closed_at: Option<Option<NaiveDateTime>>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub ticket_number: String,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub urgency: Option<i32>,
    pub impact: Option<i32>,
    pub status: String,
    pub reporter_id: Option<Uuid>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_phone: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub org_unit_id: Option<Uuid>,
    pub sla_due: Option<String>,
    pub sla_breached: bool,
    pub resolution: Option<String>,
    pub merged_into: Option<Uuid>,
    pub merge_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            ticket_number: ticket.ticket_number,
            ticket_type: ticket.ticket_type,
            title: ticket.title,
            description: ticket.description,
            category: ticket.category,
            priority: ticket.priority,
            urgency: ticket.urgency,
            impact: ticket.impact,
            status: ticket.status,
            reporter_id: ticket.reporter_id,
            reporter_name: ticket.reporter_name,
            reporter_email: ticket.reporter_email,
            reporter_phone: ticket.reporter_phone,
            assigned_to: ticket.assigned_to,
            org_unit_id: ticket.org_unit_id,
            sla_due: ticket.sla_due.map(to_iso),
            sla_breached: ticket.sla_breached,
            resolution: ticket.resolution,
            merged_into: ticket.merged_into,
            merge_reason: ticket.merge_reason,
            created_at: to_iso(ticket.created_at),
            updated_at: to_iso(ticket.updated_at),
            resolved_at: ticket.resolved_at.map(to_iso),
            closed_at: ticket.closed_at.map(to_iso),
        }
    }
}

#[derive(Serialize, Clone)]
pub struct PersonSummary {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<PersonSummary>,
    pub content: String,
    pub is_internal: bool,
    pub created_at: String,
}

impl CommentResponse {
    fn new(comment: TicketComment, author: Option<PersonSummary>) -> Self {
        Self {
            id: comment.id,
            ticket_id: comment.ticket_id,
            author_id: comment.author_id,
            author,
            content: comment.content,
            is_internal: comment.is_internal,
            created_at: to_iso(comment.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub update_number: i32,
    pub status_change: String,
    pub notes: Option<String>,
    pub author_id: Option<Uuid>,
    pub created_at: String,
}

impl From<ProgressUpdate> for ProgressResponse {
    fn from(update: ProgressUpdate) -> Self {
        Self {
            id: update.id,
            ticket_id: update.ticket_id,
            update_number: update.update_number,
            status_change: update.status_change,
            notes: update.notes,
            author_id: update.author_id,
            created_at: to_iso(update.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct LogResponse {
    pub id: Uuid,
    pub seq: i64,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub description: String,
    pub created_at: String,
}

impl From<TicketLog> for LogResponse {
    fn from(entry: TicketLog) -> Self {
        Self {
            id: entry.id,
            seq: entry.seq,
            actor_id: entry.actor_id,
            action: entry.action,
            description: entry.description,
            created_at: to_iso(entry.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: TicketResponse,
    pub comments: Vec<CommentResponse>,
    pub progress_updates: Vec<ProgressResponse>,
    pub activity_log: Vec<LogResponse>,
}

#[derive(Serialize)]
pub struct TicketPayload {
    pub ticket: TicketResponse,
}

#[derive(Serialize)]
pub struct TicketDetailPayload {
    pub ticket: TicketDetail,
}

#[derive(Serialize)]
pub struct TicketListPayload {
    pub tickets: Vec<TicketResponse>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct EscalationPayload {
    pub old_priority: Priority,
    pub new_priority: Priority,
    pub ticket: TicketResponse,
}

#[derive(Serialize)]
pub struct CommentPayload {
    pub comment: CommentResponse,
}

#[derive(Serialize)]
pub struct ProgressPayload {
    pub progress: ProgressResponse,
}

#[derive(Serialize)]
pub struct MergePayload {
    pub target: TicketResponse,
    pub merged_ticket_numbers: Vec<String>,
    pub merged_count: usize,
}

/// Tickets visible under `scope`, as a query filter.
pub(crate) fn scoped_tickets<'a>(scope: TicketScope) -> tickets::BoxedQuery<'a, Pg> {
    let query = tickets::table.into_boxed();
    match scope {
        TicketScope::All => query,
        TicketScope::ReportedBy(id) => query.filter(tickets::reporter_id.eq(id)),
        TicketScope::AssignedTo(id) => query.filter(tickets::assigned_to.eq(id)),
        TicketScope::OrgUnit(id) => query.filter(tickets::org_unit_id.eq(id)),
        TicketScope::Nothing => query.filter(tickets::id.is_null()),
    }
}

/// A ticket the caller may see; anything else reads as 404.
pub(crate) fn load_scoped_ticket(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    ticket_id: Uuid,
) -> AppResult<Ticket> {
    let ticket = scoped_tickets(TicketScope::for_user(user))
        .filter(tickets::id.eq(ticket_id))
        .first::<Ticket>(conn)?;
    Ok(ticket)
}

pub(crate) fn status_of(ticket: &Ticket) -> AppResult<TicketStatus> {
    ticket.status.parse().map_err(AppError::internal)
}

fn type_of(ticket: &Ticket) -> AppResult<TicketType> {
    ticket.ticket_type.parse().map_err(AppError::internal)
}

fn priority_of(ticket: &Ticket) -> AppResult<Priority> {
    ticket.priority.parse().map_err(AppError::internal)
}

/// Inserts `new_ticket` under a fresh number, regenerating the number when
/// it collides with an existing one.
pub(crate) fn insert_ticket(
    conn: &mut PgConnection,
    ticket_type: TicketType,
    new_ticket: NewTicket,
) -> AppResult<Ticket> {
    insert_ticket_with(conn, ticket_type, new_ticket, &mut rand::thread_rng())
}

/// [`insert_ticket`] drawing numbers from `rng`. Gives up after
/// [`MAX_NUMBER_ATTEMPTS`] collisions.
pub fn insert_ticket_with<R: Rng + ?Sized>(
    conn: &mut PgConnection,
    ticket_type: TicketType,
    mut new_ticket: NewTicket,
    rng: &mut R,
) -> AppResult<Ticket> {
    for attempt in 1..=MAX_NUMBER_ATTEMPTS {
        new_ticket.ticket_number =
            lifecycle::generate_ticket_number(ticket_type, new_ticket.created_at, rng);

        // savepoint, so a collision inside an outer transaction stays recoverable
        let inserted = conn.transaction(|conn| {
            diesel::insert_into(tickets::table)
                .values(&new_ticket)
                .get_result::<Ticket>(conn)
        });

        match inserted {
            Ok(ticket) => return Ok(ticket),
            Err(err) if is_unique_violation(&err) => {
                tracing::debug!(
                    attempt,
                    ticket_number = %new_ticket.ticket_number,
                    "ticket number already taken; regenerating"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(AppError::internal("could not allocate a unique ticket number"))
}

pub(crate) fn notify_reporter(
    conn: &mut PgConnection,
    ticket: &Ticket,
    title: &str,
    message: &str,
    kind: NotificationKind,
) {
    if let Some(reporter_id) = ticket.reporter_id {
        notifications::notify(conn, reporter_id, title, message, kind);
    }
}

fn load_people(
    conn: &mut PgConnection,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, PersonSummary>> {
    let ids: Vec<Uuid> = ids
        .into_iter()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, String, String)> = users::table
        .filter(users::id.eq_any(ids))
        .select((users::id, users::username, users::full_name))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(id, username, full_name)| {
            (
                id,
                PersonSummary {
                    id,
                    username,
                    full_name,
                },
            )
        })
        .collect())
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<Envelope<TicketPayload>>)> {
    user.require_permission(&state.access, rbac::TICKETS_WRITE)?;

    let ticket_type: TicketType = required(payload.ticket_type.as_deref(), "type")?.parse()?;
    let title = required_within(payload.title.as_deref(), "title", limits::TEXT)?;
    let description = required(payload.description.as_deref(), "description")?;
    let priority: Priority = required(payload.priority.as_deref(), "priority")?.parse()?;
    let category = optional_within(payload.category.as_deref(), "category", limits::CATEGORY)?
        .unwrap_or(DEFAULT_CATEGORY);

    let mut conn = state.db()?;
    if let Some(org_unit_id) = payload.org_unit_id {
        ensure_org_unit_exists(&mut conn, org_unit_id)?;
    }
    let org_unit_id = payload.org_unit_id.or(user.org_unit_id);

    let now = Utc::now().naive_utc();
    let sla_due = sla::compute_sla_due(&mut *conn, priority, org_unit_id, now);

    let new_ticket = NewTicket {
        id: Uuid::new_v4(),
        ticket_number: String::new(),
        ticket_type: ticket_type.as_str().to_string(),
        title: title.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        priority: priority.as_str().to_string(),
        status: TicketStatus::Open.as_str().to_string(),
        reporter_id: Some(user.user_id),
        reporter_name: None,
        reporter_email: None,
        reporter_phone: None,
        org_unit_id,
        sla_due,
        created_at: now,
        updated_at: now,
    };

    let ticket = insert_ticket(&mut conn, ticket_type, new_ticket)?;
    activity::record(
        &mut conn,
        ticket.id,
        Some(user.user_id),
        Action::Create,
        &format!("{} {} created", ticket_type, ticket.ticket_number),
    );
    tracing::info!(
        ticket_id = %ticket.id,
        ticket_number = %ticket.ticket_number,
        priority = %priority,
        "ticket created"
    );

    Ok((
        StatusCode::CREATED,
        success(TicketPayload {
            ticket: ticket.into(),
        }),
    ))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<TicketListQuery>,
) -> AppResult<Json<Envelope<TicketListPayload>>> {
    user.require_permission(&state.access, rbac::TICKETS_READ)?;

    let mut query = scoped_tickets(TicketScope::for_user(&user));

    if let Some(status) = non_empty(params.status.as_deref()) {
        let status: TicketStatus = status.parse()?;
        query = query.filter(tickets::status.eq(status.as_str()));
    }
    if let Some(priority) = non_empty(params.priority.as_deref()) {
        let priority: Priority = priority.parse()?;
        query = query.filter(tickets::priority.eq(priority.as_str()));
    }
    if let Some(ticket_type) = non_empty(params.ticket_type.as_deref()) {
        let ticket_type: TicketType = ticket_type.parse()?;
        query = query.filter(tickets::ticket_type.eq(ticket_type.as_str()));
    }
    if let Some(search) = non_empty(params.search.as_deref()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            tickets::title
                .ilike(pattern.clone())
                .or(tickets::description.ilike(pattern.clone()))
                .or(tickets::ticket_number.ilike(pattern)),
        );
    }

    let limit = clamp_limit(params.limit, 50, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut conn = state.db()?;
    let rows: Vec<Ticket> = query
        .order(tickets::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    let tickets: Vec<TicketResponse> = rows.into_iter().map(TicketResponse::from).collect();
    Ok(success(TicketListPayload {
        count: tickets.len(),
        tickets,
    }))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Envelope<TicketDetailPayload>>> {
    user.require_permission(&state.access, rbac::TICKETS_READ)?;

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;

    let mut comments_query = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket.id))
        .into_boxed();
    if user.role == Role::User {
        comments_query = comments_query.filter(ticket_comments::is_internal.eq(false));
    }
    let comments: Vec<TicketComment> = comments_query
        .order(ticket_comments::created_at.asc())
        .load(&mut conn)?;

    let progress: Vec<ProgressUpdate> = ticket_progress::table
        .filter(ticket_progress::ticket_id.eq(ticket.id))
        .order(ticket_progress::update_number.asc())
        .load(&mut conn)?;

    let log = activity::list_for_ticket(&mut conn, ticket.id)?;
    let authors = load_people(&mut conn, comments.iter().filter_map(|c| c.author_id))?;

    let comments = comments
        .into_iter()
        .map(|comment| {
            let author = comment
                .author_id
                .and_then(|id| authors.get(&id).cloned());
            CommentResponse::new(comment, author)
        })
        .collect();

    Ok(success(TicketDetailPayload {
        ticket: TicketDetail {
            ticket: ticket.into(),
            comments,
            progress_updates: progress.into_iter().map(ProgressResponse::from).collect(),
            activity_log: log.into_iter().map(LogResponse::from).collect(),
        },
    }))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<UpdateTicketRequest>,
) -> AppResult<Json<Envelope<TicketPayload>>> {
    user.require_permission(&state.access, rbac::TICKETS_WRITE)?;

    if user.role == Role::User
        && (payload.status.is_some() || payload.priority.is_some() || payload.resolution.is_some())
    {
        return Err(AppError::forbidden(
            "reporters may only edit title, description and category",
        ));
    }

    let mut conn = state.db()?;
    let existing = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    let now = Utc::now().naive_utc();

    let mut changes = TicketChangeset::default();
    let mut changed: Vec<&str> = Vec::new();

    if let Some(title) = payload.title.as_deref() {
        let title = non_empty(Some(title))
            .ok_or_else(|| AppError::bad_request("title must not be empty"))?;
        let title = within(title, "title", limits::TEXT)?;
        if title != existing.title {
            changes.title = Some(title.to_string());
            changed.push("title");
        }
    }
    if let Some(description) = payload.description.as_deref() {
        let description = non_empty(Some(description))
            .ok_or_else(|| AppError::bad_request("description must not be empty"))?;
        if description != existing.description {
            changes.description = Some(description.to_string());
            changed.push("description");
        }
    }
    if let Some(category) = payload.category.as_deref() {
        let category = optional_within(Some(category), "category", limits::CATEGORY)?
            .unwrap_or(DEFAULT_CATEGORY);
        if category != existing.category {
            changes.category = Some(category.to_string());
            changed.push("category");
        }
    }
    if let Some(priority) = payload.priority.as_deref() {
        let priority: Priority = priority.parse()?;
        if priority.as_str() != existing.priority {
            changes.priority = Some(priority.as_str().to_string());
            changed.push("priority");
        }
    }
    if let Some(resolution) = non_empty(payload.resolution.as_deref()) {
        if existing.resolution.as_deref() != Some(resolution) {
            changes.resolution = Some(resolution.to_string());
            changed.push("resolution");
        }
    }

    let mut new_status = None;
    if let Some(status) = payload.status.as_deref() {
        let target: TicketStatus = status.parse()?;
        let current = status_of(&existing)?;
        let has_resolution = changes.resolution.is_some()
            || existing
                .resolution
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
        lifecycle::check_transition(type_of(&existing)?, current, target, has_resolution)?;

        if target != current {
            changes.status = Some(target.as_str().to_string());
            changed.push("status");
            match target {
                TicketStatus::Resolved => {
                    changes.resolved_at = Some(Some(now));
                    changes.sla_breached = Some(sla::is_breached(
                        existing.sla_breached,
                        existing.sla_due,
                        Some(now),
                        now,
                    ));
                }
                TicketStatus::Closed => changes.closed_at = Some(Some(now)),
                TicketStatus::InProgress if current == TicketStatus::Resolved => {
                    changes.resolved_at = Some(None);
                }
                _ => {}
            }
            new_status = Some(target);
        }
    }

    if changed.is_empty() {
        return Ok(success(TicketPayload {
            ticket: existing.into(),
        }));
    }

    changes.updated_at = Some(now);
    let updated: Ticket = diesel::update(tickets::table.find(existing.id))
        .set(&changes)
        .get_result(&mut conn)?;

    activity::record(
        &mut conn,
        updated.id,
        Some(user.user_id),
        Action::Update,
        &activity::describe_changes(&changed),
    );
    if let Some(status) = new_status {
        if updated.reporter_id != Some(user.user_id) {
            notify_reporter(
                &mut conn,
                &updated,
                "Ticket status updated",
                &format!("Ticket {} is now {}", updated.ticket_number, status),
                NotificationKind::Info,
            );
        }
    }

    Ok(success(TicketPayload {
        ticket: updated.into(),
    }))
}

pub async fn classify_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<ClassifyTicketRequest>,
) -> AppResult<Json<Envelope<TicketPayload>>> {
    user.require_staff()?;
    let priority = state
        .priority_matrix()
        .classify(payload.urgency, payload.impact)?;

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    if status_of(&ticket)?.is_terminal() {
        return Err(AppError::invalid_operation(format!(
            "cannot classify a {} ticket",
            ticket.status
        )));
    }

    // the SLA clock keeps running from creation
    let sla_due = sla::compute_sla_due(&mut *conn, priority, ticket.org_unit_id, ticket.created_at);
    let now = Utc::now().naive_utc();

    let updated: Ticket = diesel::update(tickets::table.find(ticket.id))
        .set((
            tickets::urgency.eq(Some(payload.urgency)),
            tickets::impact.eq(Some(payload.impact)),
            tickets::priority.eq(priority.as_str()),
            tickets::sla_due.eq(sla_due),
            tickets::updated_at.eq(now),
        ))
        .get_result(&mut conn)?;

    activity::record(
        &mut conn,
        updated.id,
        Some(user.user_id),
        Action::Classify,
        &format!(
            "urgency {} impact {} classified as {priority}",
            payload.urgency, payload.impact
        ),
    );

    Ok(success(TicketPayload {
        ticket: updated.into(),
    }))
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<AssignTicketRequest>,
) -> AppResult<Json<Envelope<TicketPayload>>> {
    user.require_admin()?;

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    if status_of(&ticket)?.is_terminal() {
        return Err(AppError::invalid_operation(format!(
            "cannot assign a {} ticket",
            ticket.status
        )));
    }

    let technician = users::table
        .find(payload.technician_id)
        .first::<User>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::invalid_operation("technician not found"))?;
    let is_technician = technician.role.parse::<Role>() == Ok(Role::Technician);
    if !is_technician || !technician.is_active {
        return Err(AppError::invalid_operation(
            "tickets can only be assigned to active technicians",
        ));
    }
    if user.role == Role::UnitAdmin && technician.org_unit_id != ticket.org_unit_id {
        return Err(AppError::forbidden(
            "unit admins can only assign technicians of the ticket's unit",
        ));
    }

    let now = Utc::now().naive_utc();
    let updated: Ticket = diesel::update(
        tickets::table
            .filter(tickets::id.eq(ticket.id))
            .filter(tickets::status.eq_any(ACTIVE_STATUSES.map(TicketStatus::as_str))),
    )
    .set((
        tickets::assigned_to.eq(Some(technician.id)),
        tickets::status.eq(TicketStatus::InProgress.as_str()),
        tickets::updated_at.eq(now),
    ))
    .get_result(&mut conn)
    .optional()?
    .ok_or_else(|| AppError::invalid_operation("ticket changed status; reload and retry"))?;

    notifications::notify(
        &mut conn,
        technician.id,
        "Ticket assigned",
        &format!(
            "Ticket {} has been assigned to you: {}",
            updated.ticket_number, updated.title
        ),
        NotificationKind::Info,
    );
    activity::record(
        &mut conn,
        updated.id,
        Some(user.user_id),
        Action::Assign,
        &format!("assigned to {}", technician.username),
    );
    tracing::info!(
        ticket_id = %updated.id,
        technician_id = %technician.id,
        "ticket assigned"
    );

    Ok(success(TicketPayload {
        ticket: updated.into(),
    }))
}

pub async fn escalate_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<EscalateTicketRequest>,
) -> AppResult<Json<Envelope<EscalationPayload>>> {
    user.require_any_role(&[
        Role::SuperAdmin,
        Role::CityAdmin,
        Role::UnitAdmin,
        Role::Technician,
    ])?;

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;
    if status_of(&ticket)?.is_terminal() {
        return Err(AppError::invalid_operation(format!(
            "cannot escalate a {} ticket",
            ticket.status
        )));
    }

    let old_priority = priority_of(&ticket)?;
    let new_priority = old_priority
        .escalated()
        .ok_or_else(|| AppError::invalid_operation("ticket is already at critical priority"))?;

    let now = Utc::now().naive_utc();
    let updated: Ticket = diesel::update(
        tickets::table
            .filter(tickets::id.eq(ticket.id))
            .filter(tickets::status.eq_any(ACTIVE_STATUSES.map(TicketStatus::as_str))),
    )
    .set((
        tickets::priority.eq(new_priority.as_str()),
        tickets::updated_at.eq(now),
    ))
    .get_result(&mut conn)
    .optional()?
    .ok_or_else(|| AppError::invalid_operation("ticket changed status; reload and retry"))?;

    let reason = non_empty(payload.reason.as_deref()).unwrap_or("no reason given");
    notifications::notify_unit_admins(
        &mut conn,
        updated.org_unit_id,
        "Ticket escalated",
        &format!(
            "Ticket {} escalated from {old_priority} to {new_priority}: {reason}",
            updated.ticket_number
        ),
        NotificationKind::Warning,
    );
    activity::record(
        &mut conn,
        updated.id,
        Some(user.user_id),
        Action::Escalate,
        &format!("priority {old_priority} -> {new_priority}: {reason}"),
    );

    Ok(success(EscalationPayload {
        old_priority,
        new_priority,
        ticket: updated.into(),
    }))
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Envelope<CommentPayload>>)> {
    user.require_permission(&state.access, rbac::TICKETS_WRITE)?;
    let content = required(payload.content.as_deref(), "content")?;
    if payload.is_internal && user.role == Role::User {
        return Err(AppError::forbidden("internal comments are for staff only"));
    }

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;

    let comment: TicketComment = diesel::insert_into(ticket_comments::table)
        .values(&NewTicketComment {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            author_id: Some(user.user_id),
            content: content.to_string(),
            is_internal: payload.is_internal,
        })
        .get_result(&mut conn)?;

    let visibility = if payload.is_internal { "internal" } else { "public" };
    activity::record(
        &mut conn,
        ticket.id,
        Some(user.user_id),
        Action::Comment,
        &format!("{visibility} comment added"),
    );
    if !payload.is_internal && ticket.reporter_id != Some(user.user_id) {
        notify_reporter(
            &mut conn,
            &ticket,
            "New comment",
            &format!("A new comment was added to ticket {}", ticket.ticket_number),
            NotificationKind::Info,
        );
    }

    Ok((
        StatusCode::CREATED,
        success(CommentPayload {
            comment: CommentResponse::new(comment, None),
        }),
    ))
}

pub async fn add_progress(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CreateProgressRequest>,
) -> AppResult<(StatusCode, Json<Envelope<ProgressPayload>>)> {
    user.require_staff()?;
    let status_change = required_within(
        payload.status_change.as_deref(),
        "status_change",
        limits::STATUS_CHANGE,
    )?;

    let mut conn = state.db()?;
    let ticket = load_scoped_ticket(&mut conn, &user, ticket_id)?;

    let last: Option<i32> = ticket_progress::table
        .filter(ticket_progress::ticket_id.eq(ticket.id))
        .select(max(ticket_progress::update_number))
        .get_result(&mut conn)?;
    let update_number = last.unwrap_or(0) + 1;

    let inserted = diesel::insert_into(ticket_progress::table)
        .values(&NewProgressUpdate {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            update_number,
            status_change: status_change.to_string(),
            notes: non_empty(payload.notes.as_deref()).map(str::to_string),
            author_id: Some(user.user_id),
        })
        .get_result::<ProgressUpdate>(&mut conn);

    let progress = match inserted {
        Ok(progress) => progress,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::conflict(
                "another progress update was recorded concurrently; retry",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    activity::record(
        &mut conn,
        ticket.id,
        Some(user.user_id),
        Action::Progress,
        &format!("progress #{update_number}: {status_change}"),
    );

    Ok((
        StatusCode::CREATED,
        success(ProgressPayload {
            progress: progress.into(),
        }),
    ))
}

pub async fn merge_tickets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<MergeTicketsRequest>,
) -> AppResult<Json<Envelope<MergePayload>>> {
    user.require_staff()?;
    let reason = required(payload.reason.as_deref(), "reason")?.to_string();

    let mut seen = HashSet::new();
    let sources: Vec<Uuid> = payload
        .source_ids
        .into_iter()
        .filter(|id| seen.insert(*id))
        .collect();
    if sources.is_empty() {
        return Err(AppError::bad_request("source_ids must not be empty"));
    }
    if sources.contains(&payload.target_id) {
        return Err(AppError::bad_request("a ticket cannot be merged into itself"));
    }

    let scope = TicketScope::for_user(&user);
    let actor = Some(user.user_id);
    let target_id = payload.target_id;
    let now = Utc::now().naive_utc();

    let mut conn = state.db()?;
    let (target, merged) = conn.transaction::<_, AppError, _>(|conn| {
        let target: Ticket = scoped_tickets(scope)
            .filter(tickets::id.eq(target_id))
            .first(conn)?;
        if !lifecycle::can_merge_target(status_of(&target)?) {
            return Err(AppError::invalid_operation(format!(
                "ticket {} no longer accepts merges",
                target.ticket_number
            )));
        }

        let mut merged = Vec::with_capacity(sources.len());
        for source_id in &sources {
            let source: Ticket = scoped_tickets(scope)
                .filter(tickets::id.eq(*source_id))
                .first(conn)?;
            if !lifecycle::can_merge_source(status_of(&source)?) {
                return Err(AppError::invalid_operation(format!(
                    "ticket {} cannot be merged while {}",
                    source.ticket_number, source.status
                )));
            }

            let updated = diesel::update(
                tickets::table
                    .filter(tickets::id.eq(source.id))
                    .filter(tickets::status.eq_any(ACTIVE_STATUSES.map(TicketStatus::as_str))),
            )
            .set((
                tickets::status.eq(TicketStatus::Merged.as_str()),
                tickets::merged_into.eq(Some(target.id)),
                tickets::merge_reason.eq(Some(reason.as_str())),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;
            if updated == 0 {
                return Err(AppError::invalid_operation(format!(
                    "ticket {} changed status during the merge",
                    source.ticket_number
                )));
            }

            activity::append(
                conn,
                target.id,
                actor,
                Action::Merge,
                &format!("merged {} into this ticket: {reason}", source.ticket_number),
            )?;
            activity::append(
                conn,
                source.id,
                actor,
                Action::Merge,
                &format!("merged into {}", target.ticket_number),
            )?;
            merged.push(source.ticket_number);
        }

        Ok((target, merged))
    })?;

    tracing::info!(
        target_id = %target.id,
        merged = merged.len(),
        "tickets merged"
    );

    Ok(success(MergePayload {
        merged_count: merged.len(),
        merged_ticket_numbers: merged,
        target: target.into(),
    }))
}
