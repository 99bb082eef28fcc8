use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::tickets::{scoped_tickets, TicketResponse};
use crate::auth::{rbac, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{TicketScope, TicketStatus};
use crate::models::Ticket;
use crate::schema::tickets;
use crate::sla::{self, Priority};
use crate::state::AppState;
use crate::utils::response::{clamp_limit, success, Envelope};

const DEFAULT_RECENT_LIMIT: i64 = 10;
const MAX_RECENT_LIMIT: i64 = 100;

const FINISHED: [TicketStatus; 2] = [TicketStatus::Resolved, TicketStatus::Closed];

type TicketFacts = (
    String,
    String,
    String,
    bool,
    Option<NaiveDateTime>,
    Option<NaiveDateTime>,
);

#[derive(Deserialize)]
pub struct RecentTicketsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Serialize, Default, Debug, PartialEq)]
pub struct DashboardStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub sla_breached: usize,
    pub finished: usize,
    pub sla_compliance: f64,
}

#[derive(Serialize)]
pub struct StatsPayload {
    pub stats: DashboardStats,
}

#[derive(Serialize)]
pub struct RecentTicketsPayload {
    pub tickets: Vec<TicketResponse>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ComplianceRow {
    pub priority: Priority,
    pub total: usize,
    pub breached: usize,
    pub compliance: f64,
}

#[derive(Serialize)]
pub struct ComplianceReport {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total: usize,
    pub breached: usize,
    pub compliance: f64,
    pub by_priority: Vec<ComplianceRow>,
}

#[derive(Serialize)]
pub struct ReportPayload {
    pub report: ComplianceReport,
}

fn summarize(rows: &[TicketFacts], now: NaiveDateTime) -> DashboardStats {
    let mut stats = DashboardStats {
        total: rows.len(),
        ..DashboardStats::default()
    };
    let mut finished_breached = 0;

    for (status, priority, ticket_type, flagged, sla_due, resolved_at) in rows {
        *stats.by_status.entry(status.clone()).or_default() += 1;
        *stats.by_priority.entry(priority.clone()).or_default() += 1;
        *stats.by_type.entry(ticket_type.clone()).or_default() += 1;

        let breached = sla::is_breached(*flagged, *sla_due, *resolved_at, now);
        if breached {
            stats.sla_breached += 1;
        }
        if status.parse::<TicketStatus>().is_ok_and(TicketStatus::is_finished) {
            stats.finished += 1;
            if breached {
                finished_breached += 1;
            }
        }
    }

    stats.sla_compliance = sla::sla_compliance(stats.finished, finished_breached);
    stats
}

pub async fn stats(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Envelope<StatsPayload>>> {
    caller.require_permission(&state.access, rbac::DASHBOARD_READ)?;

    let mut conn = state.db()?;
    let rows: Vec<TicketFacts> = scoped_tickets(TicketScope::for_user(&caller))
        .select((
            tickets::status,
            tickets::priority,
            tickets::ticket_type,
            tickets::sla_breached,
            tickets::sla_due,
            tickets::resolved_at,
        ))
        .load(&mut conn)?;

    Ok(success(StatsPayload {
        stats: summarize(&rows, Utc::now().naive_utc()),
    }))
}

pub async fn recent_tickets(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<RecentTicketsQuery>,
) -> AppResult<Json<Envelope<RecentTicketsPayload>>> {
    caller.require_permission(&state.access, rbac::DASHBOARD_READ)?;
    let limit = clamp_limit(params.limit, DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT);

    let mut conn = state.db()?;
    let rows: Vec<Ticket> = scoped_tickets(TicketScope::for_user(&caller))
        .order(tickets::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(success(RecentTicketsPayload {
        tickets: rows.into_iter().map(TicketResponse::from).collect(),
    }))
}

fn compliance_by_priority(
    rows: &[(String, bool, Option<NaiveDateTime>, Option<NaiveDateTime>)],
    now: NaiveDateTime,
) -> (usize, Vec<ComplianceRow>) {
    let mut buckets: BTreeMap<Priority, (usize, usize)> =
        Priority::ALL.iter().map(|p| (*p, (0, 0))).collect();
    let mut breached_total = 0;

    for (priority, flagged, sla_due, resolved_at) in rows {
        let breached = sla::is_breached(*flagged, *sla_due, *resolved_at, now);
        if breached {
            breached_total += 1;
        }
        match priority.parse::<Priority>() {
            Ok(priority) => {
                let bucket = buckets.entry(priority).or_default();
                bucket.0 += 1;
                if breached {
                    bucket.1 += 1;
                }
            }
            Err(err) => tracing::warn!(error = %err, "ticket with unknown priority skipped"),
        }
    }

    let rows = buckets
        .into_iter()
        .map(|(priority, (total, breached))| ComplianceRow {
            priority,
            total,
            breached,
            compliance: sla::sla_compliance(total, breached),
        })
        .collect();
    (breached_total, rows)
}

pub async fn sla_compliance_report(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<ReportQuery>,
) -> AppResult<Json<Envelope<ReportPayload>>> {
    caller.require_admin()?;
    caller.require_permission(&state.access, rbac::REPORTS_READ)?;

    if let (Some(start), Some(end)) = (params.start_date, params.end_date) {
        if start > end {
            return Err(AppError::bad_request("start_date must not be after end_date"));
        }
    }

    let mut query = scoped_tickets(TicketScope::for_user(&caller))
        .filter(tickets::status.eq_any(FINISHED.map(TicketStatus::as_str)));
    if let Some(start) = params.start_date {
        query = query.filter(tickets::created_at.ge(start.and_time(chrono::NaiveTime::MIN)));
    }
    if let Some(end) = params.end_date {
        let next_day = end.and_time(chrono::NaiveTime::MIN) + Duration::days(1);
        query = query.filter(tickets::created_at.lt(next_day));
    }

    let mut conn = state.db()?;
    let rows: Vec<(String, bool, Option<NaiveDateTime>, Option<NaiveDateTime>)> = query
        .select((
            tickets::priority,
            tickets::sla_breached,
            tickets::sla_due,
            tickets::resolved_at,
        ))
        .load(&mut conn)?;

    let (breached, by_priority) = compliance_by_priority(&rows, Utc::now().naive_utc());
    Ok(success(ReportPayload {
        report: ComplianceReport {
            start_date: params.start_date,
            end_date: params.end_date,
            total: rows.len(),
            breached,
            compliance: sla::sla_compliance(rows.len(), breached),
            by_priority,
        },
    }))
}
