//! Remote tracker gateway: the narrow read/write contract the engines
//! depend on, plus its HTTP implementation.

use std::collections::BTreeSet;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use assignsync_core::{AccountId, CapacitySettings, FieldUpdate, GroupRef, WorkItem};

pub mod http;

pub use http::HttpTracker;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("tracker API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not configured")]
    NotConfigured,
    #[error("authentication failed - check the API token")]
    AuthFailed,
    #[error("rate limited - try again later")]
    RateLimited,
    #[error("request timeout")]
    Timeout,
    #[error("not found: {0}")]
    NotFound(String),
}

/// Request timeout/retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Number of retries for transient errors (default: 2)
    pub max_retries: u32,
    /// Retry delay in milliseconds (default: 1000)
    pub retry_delay_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, max_retries: 2, retry_delay_ms: 1000 }
    }
}

/// The narrow contract against the remote tracker. Every method is a
/// bounded remote call; failures are local to the one unit of work.
pub trait Tracker {
    /// Fresh read of one work item, including its changelog-derived change
    /// record when available.
    fn fetch_work_item(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<WorkItem, GatewayError>> + Send;

    /// Partial-field write; only the field named by the update is touched.
    fn update_work_item_fields(
        &self,
        key: &str,
        update: &FieldUpdate,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Scope query, bounded page size.
    fn search_work_items(
        &self,
        query: &str,
        max_results: u32,
    ) -> impl Future<Output = Result<Vec<WorkItem>, GatewayError>> + Send;

    /// Project-scoped permissions when `scope` names a project, else global.
    fn get_user_permissions(
        &self,
        user: &AccountId,
        scope: Option<&str>,
    ) -> impl Future<Output = Result<BTreeSet<String>, GatewayError>> + Send;

    fn get_user_groups(
        &self,
        user: &AccountId,
    ) -> impl Future<Output = Result<Vec<GroupRef>, GatewayError>> + Send;

    /// Reads the lazily created default when the user has no stored
    /// settings yet.
    fn get_user_capacity_settings(
        &self,
        user: &AccountId,
    ) -> impl Future<Output = Result<CapacitySettings, GatewayError>> + Send;

    fn set_user_capacity_settings(
        &self,
        user: &AccountId,
        settings: &CapacitySettings,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
