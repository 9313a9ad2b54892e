//! Core engines for multi-assignee synchronization on top of a
//! single-assignee tracker: the reconciliation planner, the capacity
//! aggregator, and the permission-based hierarchy classifier. Everything
//! here is pure or in-process; remote I/O lives behind the gateway crate.

pub mod cache;
pub mod capacity;
pub mod hierarchy;
pub mod model;
pub mod reconcile;

pub use cache::{Clock, FixedClock, SystemClock, TtlCache};
pub use capacity::{
    accumulate_assignments, capacity_alerts, default_terminal_statuses, finish_record,
    scope_metrics, AlertSeverity, CapacityAlert, CapacityRecord, Health, RoleCounts, ScopeHealth,
    ScopeMetrics, UserTally,
};
pub use hierarchy::{
    classify, default_level_requirements, GroupNameClassifier, LevelRequirement,
};
pub use model::{
    AccountId, CapacitySettings, ChangeRecord, ChangedField, GroupRef, HierarchyLevel, ModelError,
    Role, RoleAssignment, UserRef, VisibilityScope, WorkItem,
};
pub use reconcile::{plan_reconciliation, FieldUpdate, Trigger};
