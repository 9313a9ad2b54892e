//! Reconciliation planning for the single-assignee field and the ordered
//! multi-assignee list.
//!
//! `plan_reconciliation` is pure: it inspects a freshly fetched work item
//! plus the classified trigger and returns at most one field mutation. The
//! caller issues the actual write. Every branch compares against the
//! already-reconciled state first, so re-planning after a write is always a
//! no-op.

use serde::{Deserialize, Serialize};

use crate::model::{AccountId, ChangedField, Role, RoleAssignment, UserRef, WorkItem};

/// Classified cause of a reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Trigger {
    /// The single-assignee field changed; old/new ids come from the event.
    AssigneeChanged {
        from: Option<AccountId>,
        to: Option<AccountId>,
    },
    /// The multi-assignee list changed; the changelog does not carry
    /// user-granular old/new values for it.
    MultiListChanged,
    /// The work item was just created.
    ItemCreated,
    /// Periodic or fallback pass with no change record available.
    FallbackScan,
}

/// A single partial-field write to send back to the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "field", content = "value")]
pub enum FieldUpdate {
    SetSingleAssignee(Option<UserRef>),
    SetMultiAssignees(Vec<RoleAssignment>),
}

impl FieldUpdate {
    /// Apply this update to an in-memory work item, producing the state a
    /// re-fetch would observe after a successful write.
    pub fn apply(&self, item: &mut WorkItem) {
        match self {
            Self::SetSingleAssignee(user) => item.single_assignee = user.clone(),
            Self::SetMultiAssignees(list) => item.multi_assignees = list.clone(),
        }
    }
}

/// Compute the minimal mutation that restores the consistency invariant
/// for `item` under `trigger`, or `None` when the invariant already holds
/// for the branch that fires.
#[must_use]
pub fn plan_reconciliation(item: &WorkItem, trigger: &Trigger) -> Option<FieldUpdate> {
    match trigger {
        Trigger::AssigneeChanged { to, .. } => plan_assignee_changed(item, to.as_ref()),
        Trigger::MultiListChanged => plan_multi_list_changed(item),
        Trigger::ItemCreated => plan_item_created(item),
        Trigger::FallbackScan => plan_fallback(item),
    }
}

fn plan_assignee_changed(item: &WorkItem, to: Option<&AccountId>) -> Option<FieldUpdate> {
    // Cleared assignee never clears the list; the list is managed on its
    // own removal path.
    let new_account = to?;

    // Act on the re-fetched field, not the event payload. If the field
    // moved again since the event, skip and let the newer event reconcile.
    let assignee = item.single_assignee.as_ref()?;
    if assignee.account_id != *new_account {
        return None;
    }

    if item.list_contains(new_account) {
        return None;
    }

    let mut list = Vec::with_capacity(item.multi_assignees.len() + 1);
    list.push(RoleAssignment::new(assignee.clone(), Role::Primary));
    list.extend(item.multi_assignees.iter().cloned());
    Some(FieldUpdate::SetMultiAssignees(list))
}

fn plan_multi_list_changed(item: &WorkItem) -> Option<FieldUpdate> {
    if let Some(first) = item.first_assignee() {
        // Covers both the absent case and the departed-assignee case: the
        // first element supersedes whatever the field held.
        let matches_first = item
            .single_assignee
            .as_ref()
            .is_some_and(|assignee| assignee.same_user(first));
        if matches_first {
            return None;
        }
        return Some(FieldUpdate::SetSingleAssignee(Some(first.clone())));
    }

    // The list is empty. Only clear the field when the changelog shows the
    // list actually transitioned to empty in this event; an already-empty
    // list leaves the field exactly as the caller last set it.
    let assignee = item.single_assignee.as_ref()?;
    let emptied_now = item.change_record.as_ref().is_some_and(|record| {
        record.field == ChangedField::MultiAssignees && record.from_nonempty && !record.to_nonempty
    });
    if emptied_now && !item.list_contains(&assignee.account_id) {
        return Some(FieldUpdate::SetSingleAssignee(None));
    }
    None
}

fn plan_item_created(item: &WorkItem) -> Option<FieldUpdate> {
    if item.single_assignee.is_none() {
        if let Some(first) = item.first_assignee() {
            return Some(FieldUpdate::SetSingleAssignee(Some(first.clone())));
        }
    }
    None
}

fn plan_fallback(item: &WorkItem) -> Option<FieldUpdate> {
    match (&item.single_assignee, item.first_assignee()) {
        (None, Some(first)) => Some(FieldUpdate::SetSingleAssignee(Some(first.clone()))),
        (Some(assignee), Some(_)) if !item.list_contains(&assignee.account_id) => {
            // Prefer augmenting the list over overwriting the field when
            // the two disagree with no trigger information.
            let mut list = Vec::with_capacity(item.multi_assignees.len() + 1);
            list.push(RoleAssignment::new(assignee.clone(), Role::Primary));
            list.extend(item.multi_assignees.iter().cloned());
            Some(FieldUpdate::SetMultiAssignees(list))
        }
        _ => None,
    }
}
