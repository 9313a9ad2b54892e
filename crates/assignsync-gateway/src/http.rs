//! HTTP implementation of the tracker contract against the tracker's REST
//! surface. Auth is basic-auth built once at construction; transient
//! failures retry with linear backoff, auth failures never do.

use std::collections::BTreeSet;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use assignsync_core::{
    AccountId, CapacitySettings, ChangeRecord, ChangedField, FieldUpdate, GroupRef, Role,
    RoleAssignment, UserRef, WorkItem,
};

use crate::{GatewayError, RequestConfig, Tracker};

const CAPACITY_PROPERTY_KEY: &str = "assignsync.capacity";

/// Connection settings for one tracker site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub base_url: String,
    pub email: String,
    /// Field id of the ordered multi-assignee custom field,
    /// e.g. `customfield_10050`.
    pub multi_assignee_field: String,
    #[serde(default)]
    pub request: RequestConfig,
}

/// Tracker client over HTTP.
pub struct HttpTracker {
    client: Client,
    base_url: String,
    auth_header: String,
    multi_assignee_field: String,
    config: RequestConfig,
}

impl std::fmt::Debug for HttpTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTracker")
            .field("base_url", &self.base_url)
            .field("multi_assignee_field", &self.multi_assignee_field)
            .finish_non_exhaustive()
    }
}

impl HttpTracker {
    /// Build a client from connection settings and the API token.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotConfigured`] when a required setting is
    /// blank, or a request error when the HTTP client cannot be built.
    pub fn new(config: &TrackerConfig, api_token: &str) -> Result<Self, GatewayError> {
        if config.base_url.trim().is_empty()
            || config.email.trim().is_empty()
            || api_token.trim().is_empty()
            || config.multi_assignee_field.trim().is_empty()
        {
            return Err(GatewayError::NotConfigured);
        }

        let auth = format!("{}:{}", config.email, api_token);
        let auth_header = format!("Basic {}", general_purpose::STANDARD.encode(auth));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header,
            multi_assignee_field: config.multi_assignee_field.clone(),
            config: config.request.clone(),
        })
    }

    /// Probe the connection by fetching the authenticated user.
    ///
    /// # Errors
    /// Returns the underlying request error when the probe cannot be sent.
    pub async fn test_connection(&self) -> Result<bool, GatewayError> {
        let url = format!("{}/rest/api/3/myself", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, &self.auth_header)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    async fn get_json(&self, url: &str) -> Result<Value, GatewayError> {
        let response = self
            .execute_with_retry(|| async {
                self.client
                    .get(url)
                    .header(header::AUTHORIZATION, &self.auth_header)
                    .header(header::ACCEPT, "application/json")
                    .send()
                    .await
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<reqwest::Response, GatewayError> {
        self.execute_with_retry(|| async {
            self.client
                .request(method.clone(), url)
                .header(header::AUTHORIZATION, &self.auth_header)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCEPT, "application/json")
                .json(body)
                .send()
                .await
        })
        .await
    }

    /// Execute a request with retry for transient errors. Auth errors
    /// (401/403) and rate limits fail immediately; 5xx and connection
    /// errors retry with linear backoff.
    async fn execute_with_retry<F, Fut>(&self, request_fn: F) -> Result<reqwest::Response, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match request_fn().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(GatewayError::AuthFailed);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(GatewayError::RateLimited);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(GatewayError::NotFound(format!("HTTP 404 for {}", response.url())));
                    }
                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.is_server_error() {
                        last_error = Some(GatewayError::Api(format!("server error: {status}")));
                        if attempt < self.config.max_retries {
                            tokio::time::sleep(Duration::from_millis(
                                self.config.retry_delay_ms * (u64::from(attempt) + 1),
                            ))
                            .await;
                            continue;
                        }
                    } else {
                        // Log size only; response bodies may carry user data.
                        let body = response.text().await.unwrap_or_default();
                        tracing::debug!(status = %status, bytes = body.len(), "tracker API error response");
                        return Err(GatewayError::Api(format!("HTTP {status}")));
                    }
                }
                Err(err) => {
                    if err.is_timeout() {
                        last_error = Some(GatewayError::Timeout);
                    } else if err.is_connect() || err.is_request() {
                        last_error = Some(GatewayError::Request(err));
                    } else {
                        return Err(GatewayError::Request(err));
                    }

                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.retry_delay_ms * (u64::from(attempt) + 1),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::Api("unknown error".to_string())))
    }
}

fn parse_user(value: &Value) -> Option<UserRef> {
    let account_id = value["accountId"].as_str()?;
    Some(UserRef {
        account_id: AccountId::new(account_id),
        display_name: value["displayName"].as_str().unwrap_or("").to_string(),
        email_address: value["emailAddress"].as_str().map(ToString::to_string),
    })
}

fn parse_assignments(value: &Value) -> Vec<RoleAssignment> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let user = parse_user(entry)?;
            let role = entry["role"]
                .as_str()
                .and_then(Role::parse)
                .unwrap_or(Role::Collaborator);
            Some(RoleAssignment::new(user, role))
        })
        .collect()
}

fn value_nonempty(item: &Value, key: &str) -> bool {
    item[key].as_str().is_some_and(|text| !text.trim().is_empty())
}

/// Most recent changelog entry touching either synchronized field.
fn parse_change_record(changelog: &Value, multi_field: &str) -> Option<ChangeRecord> {
    let histories = changelog["histories"].as_array()?;
    for history in histories.iter().rev() {
        let Some(items) = history["items"].as_array() else {
            continue;
        };
        for item in items {
            let field_id = item["fieldId"].as_str().or_else(|| item["field"].as_str());
            let field = match field_id {
                Some("assignee") => ChangedField::SingleAssignee,
                Some(id) if id == multi_field => ChangedField::MultiAssignees,
                _ => continue,
            };
            return Some(ChangeRecord {
                field,
                from_nonempty: value_nonempty(item, "from") || value_nonempty(item, "fromString"),
                to_nonempty: value_nonempty(item, "to") || value_nonempty(item, "toString"),
            });
        }
    }
    None
}

fn parse_work_item(json: &Value, multi_field: &str) -> Result<WorkItem, GatewayError> {
    let key = json["key"]
        .as_str()
        .ok_or_else(|| GatewayError::Parse("work item is missing its key".to_string()))?;
    let fields = &json["fields"];

    Ok(WorkItem {
        key: key.to_string(),
        single_assignee: parse_user(&fields["assignee"]),
        multi_assignees: parse_assignments(&fields[multi_field]),
        status: fields["status"]["name"].as_str().unwrap_or("").to_string(),
        change_record: parse_change_record(&json["changelog"], multi_field),
    })
}

fn assignment_value(assignment: &RoleAssignment) -> Value {
    let mut entry = serde_json::json!({
        "accountId": assignment.user.account_id.as_str(),
        "displayName": assignment.user.display_name,
        "role": assignment.role.as_str(),
    });
    if let Some(email) = &assignment.user.email_address {
        entry["emailAddress"] = Value::String(email.clone());
    }
    entry
}

fn update_body(update: &FieldUpdate, multi_field: &str) -> Value {
    match update {
        FieldUpdate::SetSingleAssignee(user) => {
            let assignee = user
                .as_ref()
                .map_or(Value::Null, |user| serde_json::json!({ "accountId": user.account_id.as_str() }));
            serde_json::json!({ "fields": { "assignee": assignee } })
        }
        FieldUpdate::SetMultiAssignees(list) => {
            let entries: Vec<Value> = list.iter().map(assignment_value).collect();
            serde_json::json!({ "fields": { multi_field: entries } })
        }
    }
}

fn parse_permissions(json: &Value) -> BTreeSet<String> {
    let mut granted = BTreeSet::new();
    if let Some(permissions) = json["permissions"].as_object() {
        for (name, detail) in permissions {
            if detail["havePermission"].as_bool().unwrap_or(false) {
                granted.insert(name.clone());
            }
        }
    }
    granted
}

fn parse_groups(json: &Value) -> Vec<GroupRef> {
    let Some(entries) = json.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let name = entry["name"].as_str()?;
            Some(GroupRef {
                group_id: entry["groupId"].as_str().map(ToString::to_string),
                name: name.to_string(),
            })
        })
        .collect()
}

fn parse_settings(json: &Value) -> Result<CapacitySettings, GatewayError> {
    serde_json::from_value(json["value"].clone())
        .map_err(|err| GatewayError::Parse(format!("capacity settings: {err}")))
}

impl Tracker for HttpTracker {
    async fn fetch_work_item(&self, key: &str) -> Result<WorkItem, GatewayError> {
        let url = format!(
            "{}/rest/api/3/issue/{}?fields=assignee,status,{}&expand=changelog",
            self.base_url, key, self.multi_assignee_field
        );
        let json = self.get_json(&url).await?;
        parse_work_item(&json, &self.multi_assignee_field)
    }

    async fn update_work_item_fields(
        &self,
        key: &str,
        update: &FieldUpdate,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/rest/api/3/issue/{}", self.base_url, key);
        let body = update_body(update, &self.multi_assignee_field);
        self.send_json(reqwest::Method::PUT, &url, &body).await?;
        tracing::info!(item = key, "applied partial field update");
        Ok(())
    }

    async fn search_work_items(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<WorkItem>, GatewayError> {
        let url = format!("{}/rest/api/3/search", self.base_url);
        let body = serde_json::json!({
            "jql": query,
            "maxResults": max_results,
            "fields": ["assignee", "status", self.multi_assignee_field],
        });
        let response = self.send_json(reqwest::Method::POST, &url, &body).await?;
        let json: Value = response.json().await?;

        let issues = json["issues"]
            .as_array()
            .ok_or_else(|| GatewayError::Parse("search response is missing issues".to_string()))?;
        issues
            .iter()
            .map(|issue| parse_work_item(issue, &self.multi_assignee_field))
            .collect()
    }

    async fn get_user_permissions(
        &self,
        user: &AccountId,
        scope: Option<&str>,
    ) -> Result<BTreeSet<String>, GatewayError> {
        let mut url = format!(
            "{}/rest/api/3/user/permission/search?accountId={}",
            self.base_url,
            user.as_str()
        );
        if let Some(project) = scope {
            url.push_str("&projectKey=");
            url.push_str(project);
        }
        let json = self.get_json(&url).await?;
        Ok(parse_permissions(&json))
    }

    async fn get_user_groups(&self, user: &AccountId) -> Result<Vec<GroupRef>, GatewayError> {
        let url = format!("{}/rest/api/3/user/groups?accountId={}", self.base_url, user.as_str());
        let json = self.get_json(&url).await?;
        Ok(parse_groups(&json))
    }

    async fn get_user_capacity_settings(
        &self,
        user: &AccountId,
    ) -> Result<CapacitySettings, GatewayError> {
        let url = format!(
            "{}/rest/api/3/user/properties/{}?accountId={}",
            self.base_url,
            CAPACITY_PROPERTY_KEY,
            user.as_str()
        );
        match self.get_json(&url).await {
            Ok(json) => parse_settings(&json),
            // First read before any explicit settings write: defaults.
            Err(GatewayError::NotFound(_)) => Ok(CapacitySettings::default()),
            Err(err) => Err(err),
        }
    }

    async fn set_user_capacity_settings(
        &self,
        user: &AccountId,
        settings: &CapacitySettings,
    ) -> Result<(), GatewayError> {
        let url = format!(
            "{}/rest/api/3/user/properties/{}?accountId={}",
            self.base_url,
            CAPACITY_PROPERTY_KEY,
            user.as_str()
        );
        let body = serde_json::to_value(settings)
            .map_err(|err| GatewayError::Parse(format!("capacity settings: {err}")))?;
        self.send_json(reqwest::Method::PUT, &url, &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn tracker_fixture() -> HttpTracker {
        let config = TrackerConfig {
            base_url: "https://tracker.invalid".to_string(),
            email: "svc@example.com".to_string(),
            multi_assignee_field: "customfield_10050".to_string(),
            request: RequestConfig { timeout_secs: 5, max_retries: 2, retry_delay_ms: 1 },
        };
        match HttpTracker::new(&config, "token") {
            Ok(tracker) => tracker,
            Err(err) => panic!("fixture config should build: {err}"),
        }
    }

    fn synthetic_response(status: u16) -> reqwest::Response {
        let built = match http::Response::builder().status(status).body("") {
            Ok(response) => response,
            Err(err) => panic!("synthetic response should build: {err}"),
        };
        reqwest::Response::from(built)
    }

    #[tokio::test]
    async fn auth_failures_never_retry() {
        for status in [401, 403] {
            let tracker = tracker_fixture();
            let attempts = AtomicUsize::new(0);
            let result = tracker
                .execute_with_retry(|| async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(synthetic_response(status))
                })
                .await;
            assert!(matches!(result, Err(GatewayError::AuthFailed)));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn rate_limit_fails_fast() {
        let tracker = tracker_fixture();
        let attempts = AtomicUsize::new(0);
        let result = tracker
            .execute_with_retry(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(synthetic_response(429))
            })
            .await;
        assert!(matches!(result, Err(GatewayError::RateLimited)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_resources_map_to_not_found_without_retry() {
        let tracker = tracker_fixture();
        let attempts = AtomicUsize::new(0);
        let result = tracker
            .execute_with_retry(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(synthetic_response(404))
            })
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries_then_surface() {
        let tracker = tracker_fixture();
        let attempts = AtomicUsize::new(0);
        let result = tracker
            .execute_with_retry(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(synthetic_response(503))
            })
            .await;
        let err = match result {
            Ok(_) => panic!("expected the server error to surface"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("server error"));
        // Initial attempt plus max_retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_server_error_recovers_on_retry() {
        let tracker = tracker_fixture();
        let attempts = AtomicUsize::new(0);
        let result = tracker
            .execute_with_retry(|| async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                Ok(synthetic_response(if attempt == 0 { 500 } else { 200 }))
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_surface_without_retry() {
        let tracker = tracker_fixture();
        let attempts = AtomicUsize::new(0);
        let result = tracker
            .execute_with_retry(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(synthetic_response(400))
            })
            .await;
        let err = match result {
            Ok(_) => panic!("expected a client error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("400"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    fn issue_fixture() -> Value {
        serde_json::json!({
            "key": "PROJ-42",
            "fields": {
                "assignee": {
                    "accountId": "acc-alice",
                    "displayName": "Alice",
                    "emailAddress": "alice@example.com"
                },
                "status": { "name": "In Progress" },
                "customfield_10050": [
                    { "accountId": "acc-alice", "displayName": "Alice", "role": "primary" },
                    { "accountId": "acc-bob", "displayName": "Bob", "role": "reviewer" }
                ]
            },
            "changelog": {
                "histories": [
                    {
                        "items": [
                            { "fieldId": "assignee", "from": null, "to": "acc-alice" }
                        ]
                    },
                    {
                        "items": [
                            { "fieldId": "customfield_10050", "fromString": "Alice", "toString": "Alice, Bob" }
                        ]
                    }
                ]
            }
        })
    }

    #[test]
    fn work_item_parses_fields_and_ordered_list() {
        let item = match parse_work_item(&issue_fixture(), "customfield_10050") {
            Ok(item) => item,
            Err(err) => panic!("fixture should parse: {err}"),
        };
        assert_eq!(item.key, "PROJ-42");
        assert_eq!(item.status, "In Progress");
        let assignee = match &item.single_assignee {
            Some(user) => user,
            None => panic!("assignee should be set"),
        };
        assert_eq!(assignee.account_id, AccountId::new("acc-alice"));
        assert_eq!(assignee.email_address.as_deref(), Some("alice@example.com"));
        assert_eq!(item.multi_assignees.len(), 2);
        assert_eq!(item.multi_assignees[0].role, Role::Primary);
        assert_eq!(item.multi_assignees[1].user.account_id, AccountId::new("acc-bob"));
    }

    #[test]
    fn change_record_uses_the_most_recent_matching_history() {
        let item = match parse_work_item(&issue_fixture(), "customfield_10050") {
            Ok(item) => item,
            Err(err) => panic!("fixture should parse: {err}"),
        };
        assert_eq!(
            item.change_record,
            Some(ChangeRecord {
                field: ChangedField::MultiAssignees,
                from_nonempty: true,
                to_nonempty: true,
            })
        );
    }

    #[test]
    fn missing_key_is_a_parse_error() {
        let err = match parse_work_item(&serde_json::json!({ "fields": {} }), "customfield_10050") {
            Ok(_) => panic!("expected parse error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("missing its key"));
    }

    #[test]
    fn unknown_role_labels_degrade_to_collaborator() {
        let value = serde_json::json!([
            { "accountId": "acc-x", "displayName": "X", "role": "owner" }
        ]);
        let parsed = parse_assignments(&value);
        assert_eq!(parsed[0].role, Role::Collaborator);
    }

    #[test]
    fn update_body_sets_and_clears_the_assignee() {
        let set = update_body(
            &FieldUpdate::SetSingleAssignee(Some(UserRef::new("acc-a", "A"))),
            "customfield_10050",
        );
        assert_eq!(set["fields"]["assignee"]["accountId"], "acc-a");

        let clear = update_body(&FieldUpdate::SetSingleAssignee(None), "customfield_10050");
        assert!(clear["fields"]["assignee"].is_null());
    }

    #[test]
    fn update_body_writes_the_ordered_list_to_the_custom_field() {
        let list = vec![
            RoleAssignment::new(UserRef::new("acc-a", "A"), Role::Primary),
            RoleAssignment::new(UserRef::new("acc-b", "B"), Role::Secondary),
        ];
        let body = update_body(&FieldUpdate::SetMultiAssignees(list), "customfield_10050");
        let entries = match body["fields"]["customfield_10050"].as_array() {
            Some(entries) => entries,
            None => panic!("custom field should be an array"),
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["accountId"], "acc-a");
        assert_eq!(entries[0]["role"], "primary");
        assert_eq!(entries[1]["role"], "secondary");
    }

    #[test]
    fn permissions_keep_only_granted_entries() {
        let json = serde_json::json!({
            "permissions": {
                "ADMINISTER": { "havePermission": false },
                "ASSIGN_ISSUES": { "havePermission": true },
                "BROWSE_PROJECTS": { "havePermission": true }
            }
        });
        let granted = parse_permissions(&json);
        assert!(granted.contains("ASSIGN_ISSUES"));
        assert!(granted.contains("BROWSE_PROJECTS"));
        assert!(!granted.contains("ADMINISTER"));
    }

    #[test]
    fn groups_parse_name_and_optional_id() {
        let json = serde_json::json!([
            { "name": "site-admins", "groupId": "g-1" },
            { "name": "team-leads" }
        ]);
        let groups = parse_groups(&json);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id.as_deref(), Some("g-1"));
        assert_eq!(groups[1].name, "team-leads");
    }

    #[test]
    fn settings_parse_from_the_property_envelope() {
        let json = serde_json::json!({
            "key": "assignsync.capacity",
            "value": {
                "max_concurrent_assignments": 6,
                "working_hours_per_day": 7.5,
                "total_weekly_capacity_hours": null
            }
        });
        let settings = match parse_settings(&json) {
            Ok(settings) => settings,
            Err(err) => panic!("fixture should parse: {err}"),
        };
        assert_eq!(settings.max_concurrent_assignments, 6);
        assert!((settings.weekly_capacity_hours() - 37.5).abs() < f64::EPSILON);
    }
}
