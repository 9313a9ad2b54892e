use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ModelError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// Opaque tracker account identifier. Two user snapshots refer to the same
/// person exactly when their account ids are equal.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AccountId(pub String);

impl AccountId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity snapshot captured when an assignment was made. Not re-resolved
/// against the tracker unless explicitly refreshed.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserRef {
    pub account_id: AccountId,
    pub display_name: String,
    pub email_address: Option<String>,
}

impl UserRef {
    #[must_use]
    pub fn new(account_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            account_id: AccountId::new(account_id),
            display_name: display_name.into(),
            email_address: None,
        }
    }

    /// Identity comparison: account id only, never the display fields.
    #[must_use]
    pub fn same_user(&self, other: &Self) -> bool {
        self.account_id == other.account_id
    }
}

/// Assignment roles, totally ordered for tie-breaking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Secondary,
    Reviewer,
    Collaborator,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Reviewer => "reviewer",
            Self::Collaborator => "collaborator",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            "reviewer" => Some(Self::Reviewer),
            "collaborator" => Some(Self::Collaborator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RoleAssignment {
    pub user: UserRef,
    pub role: Role,
}

impl RoleAssignment {
    #[must_use]
    pub fn new(user: UserRef, role: Role) -> Self {
        Self { user, role }
    }
}

/// Which tracker field a change event reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    SingleAssignee,
    MultiAssignees,
}

/// Field-level before/after from the tracker changelog. The changelog
/// carries rendered values, so only emptiness transitions are reliable at
/// this granularity; user-level old/new ids for the single-assignee field
/// travel on the trigger instead.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChangeRecord {
    pub field: ChangedField,
    pub from_nonempty: bool,
    pub to_nonempty: bool,
}

/// A work item as read from the tracker. Owned by the tracker; this side
/// only reads it and issues partial-field writes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct WorkItem {
    pub key: String,
    pub single_assignee: Option<UserRef>,
    pub multi_assignees: Vec<RoleAssignment>,
    pub status: String,
    pub change_record: Option<ChangeRecord>,
}

impl WorkItem {
    /// Whether `account` appears anywhere in the multi-assignee list.
    #[must_use]
    pub fn list_contains(&self, account: &AccountId) -> bool {
        self.multi_assignees
            .iter()
            .any(|entry| entry.user.account_id == *account)
    }

    #[must_use]
    pub fn first_assignee(&self) -> Option<&UserRef> {
        self.multi_assignees.first().map(|entry| &entry.user)
    }
}

/// Per-user capacity configuration, stored outside the tracker fields and
/// read-only to the aggregator. Created lazily with defaults on first read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacitySettings {
    pub max_concurrent_assignments: u32,
    pub working_hours_per_day: f64,
    /// Explicit weekly override; `None` means derive from daily hours.
    pub total_weekly_capacity_hours: Option<f64>,
}

impl CapacitySettings {
    /// Effective weekly capacity: the override when present, otherwise a
    /// five-day week of the daily hours.
    #[must_use]
    pub fn weekly_capacity_hours(&self) -> f64 {
        self.total_weekly_capacity_hours
            .unwrap_or(self.working_hours_per_day * 5.0)
    }

    /// # Errors
    /// Returns [`ModelError::Validation`] when any capacity figure is
    /// non-positive or non-finite.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.max_concurrent_assignments == 0 {
            return Err(ModelError::Validation(
                "max_concurrent_assignments MUST be at least 1".to_string(),
            ));
        }
        if !self.working_hours_per_day.is_finite() || self.working_hours_per_day <= 0.0 {
            return Err(ModelError::Validation(
                "working_hours_per_day MUST be a positive number".to_string(),
            ));
        }
        if let Some(weekly) = self.total_weekly_capacity_hours {
            if !weekly.is_finite() || weekly <= 0.0 {
                return Err(ModelError::Validation(
                    "total_weekly_capacity_hours MUST be a positive number".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            max_concurrent_assignments: 10,
            working_hours_per_day: 8.0,
            total_weekly_capacity_hours: None,
        }
    }
}

/// Inferred authority rank. Lower rank number means higher authority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    EnterpriseAdmin,
    DivisionManager,
    DepartmentManager,
    TeamLead,
    Individual,
}

impl HierarchyLevel {
    pub const ALL: [Self; 5] = [
        Self::EnterpriseAdmin,
        Self::DivisionManager,
        Self::DepartmentManager,
        Self::TeamLead,
        Self::Individual,
    ];

    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::EnterpriseAdmin => 0,
            Self::DivisionManager => 1,
            Self::DepartmentManager => 2,
            Self::TeamLead => 3,
            Self::Individual => 4,
        }
    }

    /// `self` holds at least as much authority as `other`.
    #[must_use]
    pub fn at_least(self, other: Self) -> bool {
        self.rank() <= other.rank()
    }

    #[must_use]
    pub fn visibility_scope(self) -> VisibilityScope {
        match self {
            Self::EnterpriseAdmin => VisibilityScope::Global,
            Self::DivisionManager => VisibilityScope::MultiProject,
            Self::DepartmentManager => VisibilityScope::Project,
            Self::TeamLead => VisibilityScope::Team,
            Self::Individual => VisibilityScope::Individual,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnterpriseAdmin => "enterprise_admin",
            Self::DivisionManager => "division_manager",
            Self::DepartmentManager => "department_manager",
            Self::TeamLead => "team_lead",
            Self::Individual => "individual",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enterprise_admin" => Some(Self::EnterpriseAdmin),
            "division_manager" => Some(Self::DivisionManager),
            "department_manager" => Some(Self::DepartmentManager),
            "team_lead" => Some(Self::TeamLead),
            "individual" => Some(Self::Individual),
            _ => None,
        }
    }
}

/// Visibility boundary attached to a hierarchy level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
    Global,
    MultiProject,
    Project,
    Team,
    Individual,
}

impl VisibilityScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::MultiProject => "multi_project",
            Self::Project => "project",
            Self::Team => "team",
            Self::Individual => "individual",
        }
    }
}

/// Group membership reference as returned by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GroupRef {
    pub group_id: Option<String>,
    pub name: String,
}

impl GroupRef {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { group_id: None, name: name.into() }
    }
}
