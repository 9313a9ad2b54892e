//! Capacity accumulation over an already-reconciled work-item set.
//!
//! Role counting is positional: the single-assignee contributes one primary
//! assignment, and each multi-assignee entry that is not the single
//! assignee contributes by its index in the stored list (0 secondary,
//! 1 reviewer, 2+ collaborator). Stored role labels beyond position are
//! ignored when counting, which keeps the counts stable if labels drift.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{AccountId, CapacitySettings, UserRef, WorkItem};

pub const UTILIZATION_CAP: f64 = 1.5;
pub const OVERLOADED_THRESHOLD: f64 = 1.0;
pub const BUSY_THRESHOLD: f64 = 0.8;

/// Statuses that exclude a work item from capacity counting.
#[must_use]
pub fn default_terminal_statuses() -> Vec<String> {
    vec![
        "done".to_string(),
        "closed".to_string(),
        "resolved".to_string(),
        "cancelled".to_string(),
    ]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Optimal,
    Busy,
    Overloaded,
}

impl Health {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimal => "optimal",
            Self::Busy => "busy",
            Self::Overloaded => "overloaded",
        }
    }

    #[must_use]
    pub fn from_utilization(rate: f64) -> Self {
        if rate >= OVERLOADED_THRESHOLD {
            Self::Overloaded
        } else if rate >= BUSY_THRESHOLD {
            Self::Busy
        } else {
            Self::Optimal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum ScopeHealth {
    Good,
    Warning,
    Critical,
}

impl ScopeHealth {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Per-user role tallies accumulated while scanning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RoleCounts {
    pub primary: u32,
    pub secondary: u32,
    pub reviewer: u32,
    pub collaborator: u32,
}

impl RoleCounts {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.primary + self.secondary + self.reviewer + self.collaborator
    }
}

/// One user's tally paired with the identity snapshot seen while scanning.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserTally {
    pub user: UserRef,
    pub counts: RoleCounts,
}

/// Derived per-user capacity record. Recomputed per run, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityRecord {
    pub user: UserRef,
    pub counts: RoleCounts,
    pub total_assignments: u32,
    pub weekly_capacity_hours: f64,
    pub utilization_rate: f64,
    pub health: Health,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeMetrics {
    pub average_utilization: f64,
    pub total_assignments: u32,
    pub member_count: usize,
    pub health: ScopeHealth,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityAlert {
    pub user: UserRef,
    pub severity: AlertSeverity,
    pub message: String,
}

fn is_terminal(status: &str, terminal_statuses: &[String]) -> bool {
    terminal_statuses
        .iter()
        .any(|terminal| terminal.eq_ignore_ascii_case(status))
}

/// Tally role contributions for every user across the scanned items,
/// skipping items in a terminal status. Deterministic order by account id.
#[must_use]
pub fn accumulate_assignments(
    items: &[WorkItem],
    terminal_statuses: &[String],
) -> BTreeMap<AccountId, UserTally> {
    let mut tallies: BTreeMap<AccountId, UserTally> = BTreeMap::new();

    let mut bump = |user: &UserRef, pick: fn(&mut RoleCounts) -> &mut u32| {
        let tally = tallies
            .entry(user.account_id.clone())
            .or_insert_with(|| UserTally { user: user.clone(), counts: RoleCounts::default() });
        *pick(&mut tally.counts) += 1;
    };

    for item in items {
        if is_terminal(&item.status, terminal_statuses) {
            continue;
        }

        if let Some(assignee) = &item.single_assignee {
            bump(assignee, |counts| &mut counts.primary);
        }

        for (index, entry) in item.multi_assignees.iter().enumerate() {
            let duplicates_assignee = item
                .single_assignee
                .as_ref()
                .is_some_and(|assignee| assignee.same_user(&entry.user));
            if duplicates_assignee {
                continue;
            }
            // Skipped entries still occupy their index.
            match index {
                0 => bump(&entry.user, |counts| &mut counts.secondary),
                1 => bump(&entry.user, |counts| &mut counts.reviewer),
                _ => bump(&entry.user, |counts| &mut counts.collaborator),
            }
        }
    }

    tallies
}

/// Finish one user's record from their tally and capacity settings.
#[must_use]
pub fn finish_record(tally: &UserTally, settings: &CapacitySettings) -> CapacityRecord {
    let total = tally.counts.total();
    let weekly = settings.weekly_capacity_hours();
    let raw = if weekly > 0.0 { f64::from(total) / weekly } else { UTILIZATION_CAP };
    let utilization_rate = raw.clamp(0.0, UTILIZATION_CAP);

    CapacityRecord {
        user: tally.user.clone(),
        counts: tally.counts.clone(),
        total_assignments: total,
        weekly_capacity_hours: weekly,
        utilization_rate,
        health: Health::from_utilization(utilization_rate),
    }
}

/// Roll per-user records up into scope-level metrics.
#[must_use]
pub fn scope_metrics(records: &[CapacityRecord]) -> ScopeMetrics {
    let member_count = records.len();
    let total_assignments = records.iter().map(|record| record.total_assignments).sum();
    let average_utilization = if member_count == 0 {
        0.0
    } else {
        let count_f64 = member_count as f64;
        records.iter().map(|record| record.utilization_rate).sum::<f64>() / count_f64
    };

    let overloaded = records.iter().filter(|record| record.health == Health::Overloaded).count();
    let busy = records.iter().filter(|record| record.health == Health::Busy).count();
    let health = if overloaded > 0 {
        ScopeHealth::Critical
    } else if busy * 2 > member_count {
        ScopeHealth::Warning
    } else {
        ScopeHealth::Good
    };

    ScopeMetrics { average_utilization, total_assignments, member_count, health }
}

/// One alert per busy or overloaded member.
#[must_use]
pub fn capacity_alerts(records: &[CapacityRecord]) -> Vec<CapacityAlert> {
    records
        .iter()
        .filter_map(|record| {
            let severity = match record.health {
                Health::Overloaded => AlertSeverity::Critical,
                Health::Busy => AlertSeverity::Warning,
                Health::Optimal => return None,
            };
            let message = format!(
                "[{}] {} is {} at {:.0}% utilization ({} active assignments, {:.0}h weekly capacity)",
                severity.as_str().to_ascii_uppercase(),
                record.user.display_name,
                record.health.as_str(),
                record.utilization_rate * 100.0,
                record.total_assignments,
                record.weekly_capacity_hours,
            );
            Some(CapacityAlert { user: record.user.clone(), severity, message })
        })
        .collect()
}
