//! Operations facade over the tracker gateway: reconciliation, capacity
//! aggregation, and hierarchy classification/checks. Generic over the
//! [`Tracker`] contract so hosts wire the HTTP client and tests wire an
//! in-memory tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use assignsync_core::{
    accumulate_assignments, capacity_alerts, classify, default_level_requirements,
    default_terminal_statuses, finish_record, plan_reconciliation, scope_metrics, AccountId,
    CapacityAlert, CapacityRecord, CapacitySettings, Clock, FieldUpdate, GroupNameClassifier,
    HierarchyLevel, LevelRequirement, ScopeMetrics, SystemClock, Trigger, TtlCache,
    VisibilityScope,
};
use assignsync_gateway::{GatewayError, Tracker};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Tracker unreachable or non-2xx. For reconciliation this aborts the
    /// single attempt; for aggregation a work-item fetch failure aborts
    /// the whole scan.
    #[error("remote fetch failed: {0}")]
    RemoteFetch(#[from] GatewayError),
}

/// Tunables shared by the operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Statuses excluded from capacity counting (case-insensitive).
    pub terminal_statuses: Vec<String>,
    /// Upper bound for one scope scan.
    pub search_page_size: u32,
    /// Concurrent settings fetches during aggregation.
    pub settings_fanout: usize,
    /// Hierarchy cache entry lifetime in seconds.
    pub hierarchy_cache_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            terminal_statuses: default_terminal_statuses(),
            search_page_size: 1000,
            settings_fanout: 8,
            hierarchy_cache_ttl_secs: 300,
        }
    }
}

/// Aggregation boundary: one project, or an explicit set of visible users.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CapacityScope {
    Project(String),
    Users(Vec<AccountId>),
}

impl CapacityScope {
    #[must_use]
    pub fn query(&self) -> String {
        match self {
            Self::Project(key) => format!("project = {key}"),
            Self::Users(accounts) => {
                let ids: Vec<&str> = accounts.iter().map(AccountId::as_str).collect();
                format!("assignee in ({})", ids.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub update: Option<FieldUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityReport {
    pub per_user: Vec<CapacityRecord>,
    pub metrics: ScopeMetrics,
    pub alerts: Vec<CapacityAlert>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HierarchyProfile {
    pub account_id: AccountId,
    pub level: HierarchyLevel,
    pub scope: VisibilityScope,
    pub permissions: Vec<String>,
    pub groups: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
}

/// Actions gated by hierarchy level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyAction {
    /// View capacity data of users other than yourself.
    ViewTeamCapacity,
    /// View capacity data across multiple projects.
    ViewCrossProject,
    /// Assign work to a target user.
    AssignWork,
}

impl HierarchyAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewTeamCapacity => "view_team_capacity",
            Self::ViewCrossProject => "view_cross_project",
            Self::AssignWork => "assign_work",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "view_team_capacity" => Some(Self::ViewTeamCapacity),
            "view_cross_project" => Some(Self::ViewCrossProject),
            "assign_work" => Some(Self::AssignWork),
            _ => None,
        }
    }
}

/// Advisory outcome of a hierarchy check; denial is data, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: String,
}

type HierarchyCacheKey = (AccountId, Option<String>);

/// The operations facade. One instance per process; the hierarchy cache
/// lives inside it.
pub struct SyncApi<T: Tracker> {
    tracker: T,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    requirements: Vec<LevelRequirement>,
    group_classifier: GroupNameClassifier,
    hierarchy_cache: TtlCache<HierarchyCacheKey, HierarchyProfile>,
}

impl<T: Tracker> SyncApi<T> {
    #[must_use]
    pub fn new(tracker: T, config: SyncConfig) -> Self {
        Self::with_parts(
            tracker,
            config,
            Arc::new(SystemClock),
            default_level_requirements(),
            GroupNameClassifier::default(),
        )
    }

    /// Full wiring for hosts that inject a deterministic clock or their
    /// own level/group tables.
    #[must_use]
    pub fn with_parts(
        tracker: T,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        requirements: Vec<LevelRequirement>,
        group_classifier: GroupNameClassifier,
    ) -> Self {
        let hierarchy_cache = TtlCache::new(
            Duration::from_secs(config.hierarchy_cache_ttl_secs),
            Arc::clone(&clock),
        );
        Self { tracker, config, clock, requirements, group_classifier, hierarchy_cache }
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Run one reconciliation pass for a work item.
    ///
    /// Re-fetches the item first so the plan acts on current state rather
    /// than the triggering event's payload, then issues at most one
    /// partial-field write.
    ///
    /// # Errors
    /// Returns [`ApiError::RemoteFetch`] when the read or the write fails;
    /// a failed write is surfaced for the event to be retried, never
    /// retried here.
    pub async fn reconcile(&self, key: &str, trigger: &Trigger) -> Result<ReconcileOutcome, ApiError> {
        let item = self.tracker.fetch_work_item(key).await?;

        let Some(update) = plan_reconciliation(&item, trigger) else {
            tracing::debug!(item = key, "fields already consistent, skipping write");
            return Ok(ReconcileOutcome { changed: false, update: None });
        };

        self.tracker.update_work_item_fields(key, &update).await?;
        tracing::info!(item = key, ?trigger, "reconciled assignee fields");
        Ok(ReconcileOutcome { changed: true, update: Some(update) })
    }

    /// Aggregate per-user capacity and scope metrics for a scope.
    ///
    /// # Errors
    /// Returns [`ApiError::RemoteFetch`] when the work-item scan fails.
    /// Per-user settings fetch failures degrade to defaults and continue.
    pub async fn aggregate_capacity(&self, scope: &CapacityScope) -> Result<CapacityReport, ApiError> {
        let items = self
            .tracker
            .search_work_items(&scope.query(), self.config.search_page_size)
            .await?;

        let mut tallies = accumulate_assignments(&items, &self.config.terminal_statuses);
        if let CapacityScope::Users(accounts) = scope {
            tallies.retain(|account, _| accounts.contains(account));
        }

        let settings = self.fetch_settings(tallies.keys().cloned().collect()).await;
        let per_user: Vec<CapacityRecord> = tallies
            .values()
            .map(|tally| {
                let user_settings = settings
                    .get(&tally.user.account_id)
                    .cloned()
                    .unwrap_or_default();
                finish_record(tally, &user_settings)
            })
            .collect();

        let metrics = scope_metrics(&per_user);
        let alerts = capacity_alerts(&per_user);
        tracing::debug!(
            members = metrics.member_count,
            assignments = metrics.total_assignments,
            health = metrics.health.as_str(),
            "capacity aggregation complete"
        );
        Ok(CapacityReport { per_user, metrics, alerts })
    }

    /// One settings fetch per distinct user, bounded fan-out, degrading to
    /// defaults on failure or invalid stored values.
    async fn fetch_settings(&self, accounts: Vec<AccountId>) -> HashMap<AccountId, CapacitySettings> {
        let fetched: Vec<(AccountId, Result<CapacitySettings, GatewayError>)> =
            stream::iter(accounts)
                .map(|account| async move {
                    let result = self.tracker.get_user_capacity_settings(&account).await;
                    (account, result)
                })
                .buffer_unordered(self.config.settings_fanout.max(1))
                .collect()
                .await;

        let mut settings = HashMap::new();
        for (account, result) in fetched {
            let resolved = match result {
                Ok(value) if value.validate().is_ok() => value,
                Ok(_) => {
                    tracing::warn!(user = %account, "stored capacity settings invalid, using defaults");
                    CapacitySettings::default()
                }
                Err(err) => {
                    tracing::warn!(user = %account, error = %err, "settings fetch failed, using defaults");
                    CapacitySettings::default()
                }
            };
            settings.insert(account, resolved);
        }
        settings
    }

    /// Resolve a user's hierarchy level, consulting the TTL cache unless
    /// `bypass_cache` forces a fresh classification.
    ///
    /// # Errors
    /// Returns [`ApiError::RemoteFetch`] when the permission lookup fails;
    /// a failed group lookup degrades to an empty membership set.
    pub async fn classify_hierarchy(
        &self,
        user: &AccountId,
        scope: Option<&str>,
        bypass_cache: bool,
    ) -> Result<HierarchyProfile, ApiError> {
        let cache_key = (user.clone(), scope.map(ToString::to_string));
        if !bypass_cache {
            if let Some(profile) = self.hierarchy_cache.get(&cache_key) {
                return Ok(profile);
            }
        }

        let permissions = self.tracker.get_user_permissions(user, scope).await?;
        let groups = match self.tracker.get_user_groups(user).await {
            Ok(groups) => groups,
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "group lookup failed, classifying without groups");
                Vec::new()
            }
        };

        let level = classify(&permissions, &groups, &self.requirements, &self.group_classifier);
        let profile = HierarchyProfile {
            account_id: user.clone(),
            level,
            scope: level.visibility_scope(),
            permissions: permissions.into_iter().collect(),
            groups: groups.into_iter().map(|group| group.name).collect(),
            cached_at: self.clock.now(),
        };
        self.hierarchy_cache.insert(cache_key, profile.clone());
        Ok(profile)
    }

    /// Advisory hierarchy check. Gateway permission denials surface as
    /// `allowed: false` with a reason, never as an error.
    ///
    /// # Errors
    /// Returns [`ApiError::RemoteFetch`] only for transport-level failures
    /// other than authorization.
    pub async fn check_hierarchy_permission(
        &self,
        action: HierarchyAction,
        requester: &AccountId,
        target: Option<&AccountId>,
        scope: Option<&str>,
    ) -> Result<PermissionDecision, ApiError> {
        let requester_level = match self.classify_hierarchy(requester, scope, false).await {
            Ok(profile) => profile.level,
            Err(ApiError::RemoteFetch(GatewayError::AuthFailed)) => {
                return Ok(PermissionDecision {
                    allowed: false,
                    reason: "permission lookup was denied by the tracker".to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        let decision = match action {
            HierarchyAction::ViewTeamCapacity => {
                if target.is_some_and(|t| t == requester) {
                    allow("own capacity data is always visible")
                } else if requester_level.at_least(HierarchyLevel::TeamLead) {
                    allow_level("team lead authority or higher", requester_level)
                } else {
                    deny("viewing other users' capacity requires team lead authority or higher", requester_level)
                }
            }
            HierarchyAction::ViewCrossProject => {
                if requester_level.at_least(HierarchyLevel::DivisionManager) {
                    allow_level("division manager authority or higher", requester_level)
                } else {
                    deny("cross-project visibility requires division manager authority or higher", requester_level)
                }
            }
            HierarchyAction::AssignWork => match target {
                Some(target_account) => {
                    let target_level =
                        match self.classify_hierarchy(target_account, scope, false).await {
                            Ok(profile) => profile.level,
                            Err(ApiError::RemoteFetch(GatewayError::AuthFailed)) => {
                                return Ok(PermissionDecision {
                                    allowed: false,
                                    reason: "target permission lookup was denied by the tracker"
                                        .to_string(),
                                });
                            }
                            Err(err) => return Err(err),
                        };
                    if requester_level.at_least(target_level) {
                        allow(&format!(
                            "requester ({}) holds at least the target's authority ({})",
                            requester_level.as_str(),
                            target_level.as_str()
                        ))
                    } else {
                        PermissionDecision {
                            allowed: false,
                            reason: format!(
                                "requester ({}) holds less authority than the target ({})",
                                requester_level.as_str(),
                                target_level.as_str()
                            ),
                        }
                    }
                }
                None => {
                    if requester_level.at_least(HierarchyLevel::TeamLead) {
                        allow_level("team lead authority or higher", requester_level)
                    } else {
                        deny("assigning work without a named target requires team lead authority or higher", requester_level)
                    }
                }
            },
        };

        Ok(decision)
    }
}

fn allow(reason: &str) -> PermissionDecision {
    PermissionDecision { allowed: true, reason: reason.to_string() }
}

fn allow_level(requirement: &str, level: HierarchyLevel) -> PermissionDecision {
    PermissionDecision {
        allowed: true,
        reason: format!("{requirement} satisfied at level {}", level.as_str()),
    }
}

fn deny(requirement: &str, level: HierarchyLevel) -> PermissionDecision {
    PermissionDecision {
        allowed: false,
        reason: format!("{requirement} (requester is {})", level.as_str()),
    }
}
