//! Append-only per-ticket audit trail.

use std::fmt;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::models::{NewTicketLog, TicketLog};
use crate::schema::ticket_logs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Classify,
    Assign,
    Comment,
    Progress,
    Escalate,
    Merge,
    LinkAsset,
    CreateChange,
    AssetUpdate,
    ChangeUpdate,
    AutoResolve,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Classify => "classify",
            Action::Assign => "assign",
            Action::Comment => "comment",
            Action::Progress => "progress",
            Action::Escalate => "escalate",
            Action::Merge => "merge",
            Action::LinkAsset => "link_asset",
            Action::CreateChange => "create_change",
            Action::AssetUpdate => "asset_update",
            Action::ChangeUpdate => "change_update",
            Action::AutoResolve => "auto_resolve",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn append(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor_id: Option<Uuid>,
    action: Action,
    description: &str,
) -> QueryResult<()> {
    let entry = NewTicketLog {
        id: Uuid::new_v4(),
        ticket_id,
        actor_id,
        action: action.as_str().to_string(),
        description: description.to_string(),
    };
    diesel::insert_into(ticket_logs::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// Like [`append`], but a failed insert is logged instead of returned. Used
/// after the primary write of a request has already succeeded. The insert
/// runs in its own savepoint so a failure leaves an enclosing transaction
/// usable.
pub fn record(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor_id: Option<Uuid>,
    action: Action,
    description: &str,
) {
    let stored = conn.transaction(|conn| append(conn, ticket_id, actor_id, action, description));
    if let Err(err) = stored {
        tracing::warn!(
            error = %err,
            %ticket_id,
            action = %action,
            "failed to append ticket log entry"
        );
    }
}

/// Entries in the order the mutations happened.
pub fn list_for_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> QueryResult<Vec<TicketLog>> {
    ticket_logs::table
        .filter(ticket_logs::ticket_id.eq(ticket_id))
        .order(ticket_logs::seq.asc())
        .load(conn)
}

/// `"title, status"` style summary of the fields an update touched.
pub fn describe_changes(fields: &[&str]) -> String {
    if fields.is_empty() {
        "no fields changed".to_string()
    } else {
        format!("updated {}", fields.join(", "))
    }
}
