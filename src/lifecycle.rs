//! Ticket state machine, ticket numbering and per-role visibility.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::{rbac::Role, AuthenticatedUser};
use crate::sla::InvalidValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Incident,
    Request,
}

impl TicketType {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketType::Incident => "incident",
            TicketType::Request => "request",
        }
    }

    pub fn number_prefix(self) -> &'static str {
        match self {
            TicketType::Incident => "INC",
            TicketType::Request => "REQ",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = InvalidValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incident" => Ok(TicketType::Incident),
            "request" => Ok(TicketType::Request),
            _ => Err(InvalidValue::new("type", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Assigned,
    InProgress,
    Resolved,
    Closed,
    Rejected,
    Merged,
}

/// Statuses a ticket is still being worked in.
pub const ACTIVE_STATUSES: [TicketStatus; 3] = [
    TicketStatus::Open,
    TicketStatus::Assigned,
    TicketStatus::InProgress,
];

impl TicketStatus {
    pub const ALL: [TicketStatus; 7] = [
        TicketStatus::Open,
        TicketStatus::Assigned,
        TicketStatus::InProgress,
        TicketStatus::Resolved,
        TicketStatus::Closed,
        TicketStatus::Rejected,
        TicketStatus::Merged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Assigned => "assigned",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::Rejected => "rejected",
            TicketStatus::Merged => "merged",
        }
    }

    /// No further work happens on the ticket. A resolved ticket only moves
    /// again through an explicit reopen or close.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    /// Resolved or closed, the population SLA compliance is measured over.
    pub fn is_finished(self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = InvalidValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| InvalidValue::new("status", value))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// Not an edge of the status graph.
    #[error("cannot move ticket from {from} to {to}")]
    Illegal {
        from: TicketStatus,
        to: TicketStatus,
    },
    #[error("only requests can be rejected")]
    RejectIncident,
    #[error("use the merge operation to merge tickets")]
    MergeViaUpdate,
    #[error("a resolution note is required to resolve a request")]
    ResolutionRequired,
}

/// Validates a status change requested through a ticket update.
/// Re-asserting the current status is accepted as a no-op.
pub fn check_transition(
    ticket_type: TicketType,
    from: TicketStatus,
    to: TicketStatus,
    has_resolution: bool,
) -> Result<(), TransitionError> {
    use TicketStatus::*;

    if from == to {
        return Ok(());
    }
    if to == Merged {
        return Err(TransitionError::MergeViaUpdate);
    }

    let allowed = match from {
        Open => matches!(to, Assigned | InProgress | Rejected),
        Assigned => matches!(to, InProgress | Rejected),
        InProgress => matches!(to, Resolved | Rejected),
        Resolved => matches!(to, Closed | InProgress),
        Closed | Rejected | Merged => false,
    };
    if !allowed {
        return Err(TransitionError::Illegal { from, to });
    }
    if to == Rejected && ticket_type != TicketType::Request {
        return Err(TransitionError::RejectIncident);
    }
    if to == Resolved && ticket_type == TicketType::Request && !has_resolution {
        return Err(TransitionError::ResolutionRequired);
    }
    Ok(())
}

/// A ticket may be absorbed into another while it is still being worked.
pub fn can_merge_source(status: TicketStatus) -> bool {
    status.is_active()
}

/// A merge target must still accept work.
pub fn can_merge_target(status: TicketStatus) -> bool {
    !status.is_terminal()
}

/// `{PREFIX}-{YEAR}-{NNNN}` with a random four digit suffix. Uniqueness is
/// enforced by the database; callers regenerate on conflict.
pub fn generate_ticket_number<R: Rng + ?Sized>(
    ticket_type: TicketType,
    now: NaiveDateTime,
    rng: &mut R,
) -> String {
    prefixed_number(ticket_type.number_prefix(), now, rng)
}

pub fn generate_change_number<R: Rng + ?Sized>(now: NaiveDateTime, rng: &mut R) -> String {
    prefixed_number("CHG", now, rng)
}

fn prefixed_number<R: Rng + ?Sized>(prefix: &str, now: NaiveDateTime, rng: &mut R) -> String {
    let suffix: u16 = rng.gen_range(0..10_000);
    format!("{prefix}-{}-{suffix:04}", now.year())
}

/// Which tickets a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    All,
    ReportedBy(Uuid),
    AssignedTo(Uuid),
    OrgUnit(Uuid),
    Nothing,
}

impl TicketScope {
    pub fn for_user(user: &AuthenticatedUser) -> Self {
        match user.role {
            Role::SuperAdmin | Role::CityAdmin | Role::Agent => TicketScope::All,
            Role::UnitAdmin => user
                .org_unit_id
                .map(TicketScope::OrgUnit)
                .unwrap_or(TicketScope::Nothing),
            Role::Technician => TicketScope::AssignedTo(user.user_id),
            Role::User => TicketScope::ReportedBy(user.user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::mock::StepRng;
    use TicketStatus::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn is_number(value: &str, prefix: &str) -> bool {
        let parts: Vec<&str> = value.split('-').collect();
        parts.len() == 3
            && parts[0] == prefix
            && parts[1].len() == 4
            && parts[1].chars().all(|c| c.is_ascii_digit())
            && parts[2].len() == 4
            && parts[2].chars().all(|c| c.is_ascii_digit())
    }

    #[test]
    fn ticket_numbers_follow_the_format() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let inc = generate_ticket_number(TicketType::Incident, now(), &mut rng);
            assert!(is_number(&inc, "INC"), "{inc}");
            assert!(inc.starts_with("INC-2025-"));
            let req = generate_ticket_number(TicketType::Request, now(), &mut rng);
            assert!(is_number(&req, "REQ"), "{req}");
        }
        let chg = generate_change_number(now(), &mut rng);
        assert!(is_number(&chg, "CHG"), "{chg}");
    }

    #[test]
    fn small_suffixes_are_zero_padded() {
        let mut rng = StepRng::new(0, 0);
        assert_eq!(
            generate_ticket_number(TicketType::Incident, now(), &mut rng),
            "INC-2025-0000"
        );
    }

    #[test]
    fn happy_path_transitions() {
        let t = TicketType::Incident;
        assert!(check_transition(t, Open, InProgress, false).is_ok());
        assert!(check_transition(t, Open, Assigned, false).is_ok());
        assert!(check_transition(t, Assigned, InProgress, false).is_ok());
        assert!(check_transition(t, InProgress, Resolved, false).is_ok());
        assert!(check_transition(t, Resolved, Closed, false).is_ok());
        assert!(check_transition(t, Resolved, InProgress, false).is_ok());
    }

    #[test]
    fn same_status_is_a_noop() {
        for status in TicketStatus::ALL {
            assert!(check_transition(TicketType::Incident, status, status, false).is_ok());
        }
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let t = TicketType::Incident;
        assert_eq!(
            check_transition(t, Open, Closed, false),
            Err(TransitionError::Illegal {
                from: Open,
                to: Closed
            })
        );
        assert!(check_transition(t, Open, Resolved, false).is_err());
        assert!(check_transition(t, Closed, Open, false).is_err());
        assert!(check_transition(t, Merged, InProgress, false).is_err());
        assert!(check_transition(t, Resolved, Open, false).is_err());
    }

    #[test]
    fn merge_is_not_a_plain_transition() {
        assert_eq!(
            check_transition(TicketType::Incident, Open, Merged, false),
            Err(TransitionError::MergeViaUpdate)
        );
    }

    #[test]
    fn only_requests_can_be_rejected() {
        assert_eq!(
            check_transition(TicketType::Incident, Open, Rejected, false),
            Err(TransitionError::RejectIncident)
        );
        assert!(check_transition(TicketType::Request, Open, Rejected, false).is_ok());
    }

    #[test]
    fn requests_need_a_resolution_note() {
        assert_eq!(
            check_transition(TicketType::Request, InProgress, Resolved, false),
            Err(TransitionError::ResolutionRequired)
        );
        assert!(check_transition(TicketType::Request, InProgress, Resolved, true).is_ok());
    }

    #[test]
    fn merge_eligibility() {
        assert!(can_merge_source(Open));
        assert!(can_merge_source(InProgress));
        assert!(!can_merge_source(Resolved));
        assert!(!can_merge_source(Merged));
        assert!(can_merge_target(Open));
        assert!(!can_merge_target(Resolved));
        assert!(!can_merge_target(Merged));
        assert!(!can_merge_target(Closed));
    }

    #[test]
    fn only_active_statuses_accept_work() {
        for status in [Open, Assigned, InProgress] {
            assert!(!status.is_terminal(), "{status}");
        }
        for status in [Resolved, Closed, Rejected, Merged] {
            assert!(status.is_terminal(), "{status}");
        }
    }

    #[test]
    fn transition_errors_read_naturally() {
        let err = TransitionError::Illegal {
            from: Resolved,
            to: Open,
        };
        assert_eq!(err.to_string(), "cannot move ticket from resolved to open");
    }

    #[test]
    fn parses_statuses_and_types() {
        assert_eq!("in_progress".parse::<TicketStatus>(), Ok(InProgress));
        assert!("pending".parse::<TicketStatus>().is_err());
        assert_eq!("Request".parse::<TicketType>(), Ok(TicketType::Request));
        assert!("bug".parse::<TicketType>().is_err());
    }

    fn user(role: Role, unit: Option<Uuid>) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "u".into(),
            role,
            org_unit_id: unit,
        }
    }

    #[test]
    fn scope_follows_role() {
        let unit = Uuid::new_v4();
        let reporter = user(Role::User, Some(unit));
        let tech = user(Role::Technician, Some(unit));
        assert_eq!(
            TicketScope::for_user(&reporter),
            TicketScope::ReportedBy(reporter.user_id)
        );
        assert_eq!(
            TicketScope::for_user(&tech),
            TicketScope::AssignedTo(tech.user_id)
        );
        assert_eq!(
            TicketScope::for_user(&user(Role::UnitAdmin, Some(unit))),
            TicketScope::OrgUnit(unit)
        );
        assert_eq!(
            TicketScope::for_user(&user(Role::UnitAdmin, None)),
            TicketScope::Nothing
        );
        assert_eq!(
            TicketScope::for_user(&user(Role::CityAdmin, None)),
            TicketScope::All
        );
    }
}
