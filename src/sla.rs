//! SLA due dates, priority derivation and compliance arithmetic.
//!
//! Everything here is pure except the [`SlaSource`] implementation for
//! `PgConnection`, which reads the per-unit resolution table.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::sla_policies;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: `{value}`")]
pub struct InvalidValue {
    pub field: &'static str,
    pub value: String,
}

impl InvalidValue {
    pub fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Next step up `low < medium < high < critical`; `None` at the ceiling.
    pub fn escalated(self) -> Option<Priority> {
        match self {
            Priority::Low => Some(Priority::Medium),
            Priority::Medium => Some(Priority::High),
            Priority::High => Some(Priority::Critical),
            Priority::Critical => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = InvalidValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(InvalidValue::new("priority", value)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriorityError {
    #[error("{field} must be between 1 and 5, got {value}")]
    OutOfRange { field: &'static str, value: i32 },
    #[error("priority thresholds must satisfy 1 <= medium < high < critical <= 25")]
    Thresholds,
}

/// Score thresholds over `urgency * impact` (each 1..=5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityMatrix {
    pub medium_from: i32,
    pub high_from: i32,
    pub critical_from: i32,
}

impl Default for PriorityMatrix {
    fn default() -> Self {
        Self {
            medium_from: 5,
            high_from: 10,
            critical_from: 16,
        }
    }
}

impl PriorityMatrix {
    pub fn new(medium_from: i32, high_from: i32, critical_from: i32) -> Result<Self, PriorityError> {
        let ordered = 1 <= medium_from
            && medium_from < high_from
            && high_from < critical_from
            && critical_from <= 25;
        if !ordered {
            return Err(PriorityError::Thresholds);
        }
        Ok(Self {
            medium_from,
            high_from,
            critical_from,
        })
    }

    pub fn classify(&self, urgency: i32, impact: i32) -> Result<Priority, PriorityError> {
        check_scale("urgency", urgency)?;
        check_scale("impact", impact)?;

        let score = urgency * impact;
        let priority = if score >= self.critical_from {
            Priority::Critical
        } else if score >= self.high_from {
            Priority::High
        } else if score >= self.medium_from {
            Priority::Medium
        } else {
            Priority::Low
        };
        Ok(priority)
    }
}

fn check_scale(field: &'static str, value: i32) -> Result<(), PriorityError> {
    if (1..=5).contains(&value) {
        Ok(())
    } else {
        Err(PriorityError::OutOfRange { field, value })
    }
}

/// Where resolution times come from.
pub trait SlaSource {
    fn resolution_hours(
        &mut self,
        org_unit_id: Uuid,
        priority: Priority,
    ) -> anyhow::Result<Option<i32>>;
}

impl SlaSource for PgConnection {
    fn resolution_hours(
        &mut self,
        org_unit_id: Uuid,
        priority: Priority,
    ) -> anyhow::Result<Option<i32>> {
        // savepoint: a failed lookup must not poison an enclosing transaction
        let hours = self.transaction(|conn| {
            sla_policies::table
                .filter(sla_policies::org_unit_id.eq(org_unit_id))
                .filter(sla_policies::priority.eq(priority.as_str()))
                .select(sla_policies::resolution_hours)
                .first::<i32>(conn)
                .optional()
        })?;
        Ok(hours)
    }
}

/// `now + resolution_hours` for the unit's row, or `None` when no SLA applies.
/// Lookup failures are logged and treated as "no SLA".
pub fn compute_sla_due<S: SlaSource + ?Sized>(
    source: &mut S,
    priority: Priority,
    org_unit_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let org_unit_id = org_unit_id?;
    match source.resolution_hours(org_unit_id, priority) {
        Ok(Some(hours)) if hours > 0 => Some(now + Duration::hours(i64::from(hours))),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(
                error = %err,
                %org_unit_id,
                priority = %priority,
                "sla lookup failed; ticket gets no due date"
            );
            None
        }
    }
}

/// Percentage of `total` that met their SLA, rounded to two decimals.
pub fn sla_compliance(total: usize, breached: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let met = total.saturating_sub(breached) as f64;
    round2(met / total as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether a ticket missed its due date, judged at resolution time or at
/// `now` when it is still open.
pub fn is_breached(
    flagged: bool,
    sla_due: Option<NaiveDateTime>,
    resolved_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> bool {
    if flagged {
        return true;
    }
    match sla_due {
        Some(due) => resolved_at.unwrap_or(now) > due,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use anyhow::anyhow;
    use chrono::NaiveDate;

    struct Table(HashMap<(Uuid, Priority), i32>);

    impl SlaSource for Table {
        fn resolution_hours(
            &mut self,
            org_unit_id: Uuid,
            priority: Priority,
        ) -> anyhow::Result<Option<i32>> {
            Ok(self.0.get(&(org_unit_id, priority)).copied())
        }
    }

    struct Broken;

    impl SlaSource for Broken {
        fn resolution_hours(&mut self, _: Uuid, _: Priority) -> anyhow::Result<Option<i32>> {
            Err(anyhow!("connection reset"))
        }
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn due_date_adds_configured_hours() {
        let unit = Uuid::new_v4();
        let mut table = Table(HashMap::from([
            ((unit, Priority::Medium), 4),
            ((unit, Priority::Critical), 1),
        ]));

        assert_eq!(
            compute_sla_due(&mut table, Priority::Medium, Some(unit), at(8)),
            Some(at(12))
        );
        assert_eq!(
            compute_sla_due(&mut table, Priority::Critical, Some(unit), at(8)),
            Some(at(9))
        );
    }

    #[test]
    fn missing_configuration_yields_none() {
        let unit = Uuid::new_v4();
        let mut table = Table(HashMap::from([((unit, Priority::Medium), 4)]));

        assert_eq!(compute_sla_due(&mut table, Priority::Low, Some(unit), at(8)), None);
        assert_eq!(
            compute_sla_due(&mut table, Priority::Medium, Some(Uuid::new_v4()), at(8)),
            None
        );
        assert_eq!(compute_sla_due(&mut table, Priority::Medium, None, at(8)), None);
    }

    #[test]
    fn lookup_failure_yields_none() {
        assert_eq!(
            compute_sla_due(&mut Broken, Priority::High, Some(Uuid::new_v4()), at(8)),
            None
        );
    }

    #[test]
    fn priority_is_monotonic_in_both_inputs() {
        let matrix = PriorityMatrix::default();
        for fixed in 1..=5 {
            for step in 1..5 {
                let lo_u = matrix.classify(step, fixed).unwrap();
                let hi_u = matrix.classify(step + 1, fixed).unwrap();
                assert!(hi_u >= lo_u, "urgency {step}->{} at impact {fixed}", step + 1);

                let lo_i = matrix.classify(fixed, step).unwrap();
                let hi_i = matrix.classify(fixed, step + 1).unwrap();
                assert!(hi_i >= lo_i, "impact {step}->{} at urgency {fixed}", step + 1);
            }
        }
    }

    #[test]
    fn default_thresholds() {
        let matrix = PriorityMatrix::default();
        assert_eq!(matrix.classify(1, 1), Ok(Priority::Low));
        assert_eq!(matrix.classify(2, 2), Ok(Priority::Low));
        assert_eq!(matrix.classify(1, 5), Ok(Priority::Medium));
        assert_eq!(matrix.classify(4, 3), Ok(Priority::High));
        assert_eq!(matrix.classify(4, 4), Ok(Priority::Critical));
        assert_eq!(matrix.classify(5, 5), Ok(Priority::Critical));
    }

    #[test]
    fn rejects_out_of_scale_inputs() {
        let matrix = PriorityMatrix::default();
        assert_eq!(
            matrix.classify(0, 3),
            Err(PriorityError::OutOfRange {
                field: "urgency",
                value: 0
            })
        );
        assert!(matrix.classify(3, 6).is_err());
    }

    #[test]
    fn threshold_ordering_is_enforced() {
        assert!(PriorityMatrix::new(5, 10, 16).is_ok());
        assert_eq!(PriorityMatrix::new(10, 5, 16), Err(PriorityError::Thresholds));
        assert_eq!(PriorityMatrix::new(5, 10, 26), Err(PriorityError::Thresholds));
        assert_eq!(PriorityMatrix::new(0, 10, 16), Err(PriorityError::Thresholds));
    }

    #[test]
    fn escalation_walks_the_total_order() {
        assert_eq!(Priority::Low.escalated(), Some(Priority::Medium));
        assert_eq!(Priority::Medium.escalated(), Some(Priority::High));
        assert_eq!(Priority::High.escalated(), Some(Priority::Critical));
        assert_eq!(Priority::Critical.escalated(), None);
    }

    #[test]
    fn parses_priorities() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn compliance_percentages() {
        assert_eq!(sla_compliance(0, 0), 100.0);
        assert_eq!(sla_compliance(4, 1), 75.0);
        assert_eq!(sla_compliance(3, 1), 66.67);
        assert_eq!(sla_compliance(3, 3), 0.0);
        assert_eq!(sla_compliance(2, 5), 0.0);
    }

    #[test]
    fn breach_detection() {
        assert!(is_breached(true, None, None, at(8)));
        assert!(!is_breached(false, None, None, at(8)));
        assert!(is_breached(false, Some(at(9)), None, at(10)));
        assert!(!is_breached(false, Some(at(9)), None, at(8)));
        assert!(!is_breached(false, Some(at(9)), Some(at(9)), at(23)));
        assert!(is_breached(false, Some(at(9)), Some(at(10)), at(8)));
    }
}
