//! Fire-and-forget per-user notifications.

use std::fmt;
use std::str::FromStr;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::rbac::Role;
use crate::models::NewNotification;
use crate::schema::{notifications, users};
use crate::sla::InvalidValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = InvalidValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(NotificationKind::Info),
            "success" => Ok(NotificationKind::Success),
            "warning" => Ok(NotificationKind::Warning),
            "error" => Ok(NotificationKind::Error),
            _ => Err(InvalidValue::new("type", value)),
        }
    }
}

/// Inserts one notification inside a savepoint. Failures are logged and
/// swallowed; the caller's primary write has already happened.
pub fn notify(
    conn: &mut PgConnection,
    user_id: Uuid,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> bool {
    let row = NewNotification {
        id: Uuid::new_v4(),
        user_id,
        title: title.to_string(),
        message: message.to_string(),
        kind: kind.as_str().to_string(),
    };

    let stored = conn.transaction(|conn| {
        diesel::insert_into(notifications::table)
            .values(&row)
            .execute(conn)
    });
    match stored {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, %user_id, title, "failed to store notification");
            false
        }
    }
}

/// Notifies every active unit admin of `org_unit_id`. Returns how many
/// notifications were stored.
pub fn notify_unit_admins(
    conn: &mut PgConnection,
    org_unit_id: Option<Uuid>,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> usize {
    let Some(org_unit_id) = org_unit_id else {
        return 0;
    };

    let admins = conn.transaction(|conn| {
        users::table
            .filter(users::role.eq(Role::UnitAdmin.as_str()))
            .filter(users::org_unit_id.eq(org_unit_id))
            .filter(users::is_active.eq(true))
            .select(users::id)
            .load::<Uuid>(conn)
    });
    let admins = match admins {
        Ok(ids) => ids,
        Err(err) => {
            tracing::warn!(error = %err, %org_unit_id, "failed to look up unit admins");
            return 0;
        }
    };

    admins
        .into_iter()
        .filter(|admin_id| notify(conn, *admin_id, title, message, kind))
        .count()
}
