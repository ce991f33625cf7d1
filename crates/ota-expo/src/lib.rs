// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client for the upstream account service.
//!
//! The server itself stores no channel or account state: channels map to
//! branches through the upstream GraphQL API, branches are created lazily
//! there, and publisher credentials are validated against it.  Every call
//! is bounded by a request-scoped deadline.

#![deny(unsafe_code)]

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Production GraphQL endpoint.
const DEFAULT_ENDPOINT: &str = "https://api.expo.dev/graphql";

/// Deadline for a single upstream round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the upstream account service.
#[derive(Debug, thiserror::Error)]
pub enum ExpoError {
    /// The HTTP round-trip failed (network, timeout).
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream returned a non-200 status.
    #[error("upstream request failed with status {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The presented credential is missing or does not resolve to the
    /// configured operator account.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

// ---------------------------------------------------------------------------
// Auth material
// ---------------------------------------------------------------------------

/// Credential presented by a publisher request.
#[derive(Debug, Clone, Default)]
pub struct ExpoAuth {
    /// `Authorization: Bearer <token>`.
    pub token: Option<String>,
    /// `expo-session: <secret>`.
    pub session_secret: Option<String>,
}

impl ExpoAuth {
    /// Credential built from a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            session_secret: None,
        }
    }

    /// Whether any credential is present.
    pub fn is_present(&self) -> bool {
        self.token.is_some() || self.session_secret.is_some()
    }
}

/// Account returned by the upstream `me` query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExpoAccount {
    /// Account id.
    #[serde(default)]
    pub id: String,
    /// Account username; publisher requests must resolve to the operator's.
    #[serde(default)]
    pub username: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
}

/// A channel together with the branch it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchChannel {
    /// Branch name.
    pub branch_name: String,
    /// Channel name.
    pub channel_name: String,
}

// ---------------------------------------------------------------------------
// GraphQL response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NamedNode {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChannelNode {
    #[serde(default)]
    name: String,
    #[serde(rename = "branchMapping", default)]
    branch_mapping: String,
}

#[derive(Debug, Deserialize)]
struct BranchMappingRule {
    #[serde(rename = "branchId")]
    branch_id: String,
    #[serde(rename = "branchMappingLogic")]
    branch_mapping_logic: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BranchMappingDoc {
    #[serde(default)]
    data: Vec<BranchMappingRule>,
}

/// Resolve the branch id selected by a serialized branch-mapping document:
/// the first rule whose logic is the literal string `"true"`.
fn select_branch_id(branch_mapping: &str) -> Result<Option<String>, ExpoError> {
    if branch_mapping.is_empty() {
        return Ok(None);
    }
    let doc: BranchMappingDoc = serde_json::from_str(branch_mapping)
        .map_err(|err| ExpoError::Decode(format!("branchMapping: {err}")))?;
    Ok(doc
        .data
        .into_iter()
        .find(|rule| rule.branch_mapping_logic == json!("true"))
        .map(|rule| rule.branch_id))
}

// ---------------------------------------------------------------------------
// ExpoClient
// ---------------------------------------------------------------------------

/// HTTP client for the upstream account service.
pub struct ExpoClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    app_id: String,
}

impl ExpoClient {
    /// Client against the production endpoint.
    pub fn new(access_token: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, access_token, app_id)
    }

    /// Client against an explicit endpoint (tests point this at a mock).
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            app_id: app_id.into(),
        }
    }

    fn own_auth(&self) -> ExpoAuth {
        ExpoAuth::bearer(self.access_token.clone())
    }

    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
        auth: &ExpoAuth,
    ) -> Result<serde_json::Value, ExpoError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &auth.token {
            request = request.bearer_auth(token);
        }
        if let Some(secret) = &auth.session_secret {
            request = request.header("expo-session", secret);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExpoError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    /// The account the given credential resolves to, if any.
    pub async fn account(&self, auth: &ExpoAuth) -> Result<Option<ExpoAccount>, ExpoError> {
        let query = r#"
            query GetCurrentUserAccount {
                me {
                    id
                    username
                    email
                }
            }
        "#;
        let body = self.graphql(query, json!(null), auth).await?;
        let me = &body["data"]["me"];
        if me.is_null() {
            return Ok(None);
        }
        let account: ExpoAccount = serde_json::from_value(me.clone())
            .map_err(|err| ExpoError::Decode(format!("me: {err}")))?;
        Ok(Some(account))
    }

    /// Username of the operator account the server itself runs as.
    pub async fn self_username(&self) -> Result<String, ExpoError> {
        let account = self
            .account(&self.own_auth())
            .await?
            .ok_or_else(|| ExpoError::Unauthorized("access token resolves to no account".into()))?;
        Ok(account.username)
    }

    /// Validate a publisher credential: it must be present and resolve to
    /// the same account as the server's own access token.
    pub async fn validate_publisher(&self, auth: &ExpoAuth) -> Result<ExpoAccount, ExpoError> {
        if !auth.is_present() {
            return Err(ExpoError::Unauthorized("no credential provided".into()));
        }
        let account = self
            .account(auth)
            .await?
            .ok_or_else(|| ExpoError::Unauthorized("credential resolves to no account".into()))?;
        let own = self.self_username().await?;
        if account.username != own {
            return Err(ExpoError::Unauthorized(
                "credential does not match the operator account".into(),
            ));
        }
        Ok(account)
    }

    /// All branch names of the application.
    pub async fn branches(&self) -> Result<Vec<String>, ExpoError> {
        let query = r#"
            query FetchAppBranches($appId: String!) {
                app {
                    byId(appId: $appId) {
                        id
                        updateBranches(offset: 0, limit: 10000) {
                            id
                            name
                        }
                    }
                }
            }
        "#;
        let body = self
            .graphql(query, json!({ "appId": self.app_id }), &self.own_auth())
            .await?;
        let branches: Vec<NamedNode> =
            serde_json::from_value(body["data"]["app"]["byId"]["updateBranches"].clone())
                .map_err(|err| ExpoError::Decode(format!("updateBranches: {err}")))?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    /// Create a branch upstream.
    pub async fn create_branch(&self, branch: &str) -> Result<(), ExpoError> {
        let query = r#"
            mutation CreateUpdateBranchForAppMutation($appId: ID!, $name: String!) {
              updateBranch {
                createUpdateBranchForApp(appId: $appId, name: $name) {
                  id
                }
              }
            }
        "#;
        self.graphql(
            query,
            json!({ "appId": self.app_id, "name": branch }),
            &self.own_auth(),
        )
        .await?;
        Ok(())
    }

    /// Make sure a branch exists upstream (idempotent).
    pub async fn ensure_branch(&self, branch: &str) -> Result<(), ExpoError> {
        let branches = self.branches().await?;
        if branches.iter().any(|name| name == branch) {
            return Ok(());
        }
        self.create_branch(branch).await
    }

    /// Resolve a channel to the branch it maps to.  `Ok(None)` means the
    /// channel exists but maps to no branch, or does not exist at all.
    pub async fn channel_mapping(&self, channel: &str) -> Result<Option<String>, ExpoError> {
        let query = r#"
            query FetchAppChannel($appId: String!, $channelName: String!) {
                app {
                    byId(appId: $appId) {
                        id
                        updateBranches(offset: 0, limit: 10000) {
                            id
                            name
                        }
                        updateChannelByName(name: $channelName) {
                            id
                            name
                            branchMapping
                        }
                    }
                }
            }
        "#;
        let body = self
            .graphql(
                query,
                json!({ "appId": self.app_id, "channelName": channel }),
                &self.own_auth(),
            )
            .await?;
        let by_id = &body["data"]["app"]["byId"];
        let channel_node = &by_id["updateChannelByName"];
        if channel_node.is_null() {
            return Ok(None);
        }
        let channel_node: ChannelNode = serde_json::from_value(channel_node.clone())
            .map_err(|err| ExpoError::Decode(format!("updateChannelByName: {err}")))?;
        let Some(branch_id) = select_branch_id(&channel_node.branch_mapping)? else {
            return Ok(None);
        };
        let branches: Vec<NamedNode> = serde_json::from_value(by_id["updateBranches"].clone())
            .map_err(|err| ExpoError::Decode(format!("updateBranches: {err}")))?;
        Ok(branches
            .into_iter()
            .find(|branch| branch.id == branch_id)
            .map(|branch| branch.name))
    }

    /// Every channel of the application joined with its mapped branch.
    pub async fn branches_mapping(&self) -> Result<Vec<BranchChannel>, ExpoError> {
        let query = r#"
            query FetchAppChannels($appId: String!) {
                app {
                    byId(appId: $appId) {
                        id
                        updateBranches(offset: 0, limit: 10000) {
                            id
                            name
                        }
                        updateChannels(offset: 0, limit: 10000) {
                            id
                            name
                            branchMapping
                        }
                    }
                }
            }
        "#;
        let body = self
            .graphql(query, json!({ "appId": self.app_id }), &self.own_auth())
            .await?;
        let by_id = &body["data"]["app"]["byId"];
        let branches: Vec<NamedNode> = serde_json::from_value(by_id["updateBranches"].clone())
            .map_err(|err| ExpoError::Decode(format!("updateBranches: {err}")))?;
        let channels: Vec<ChannelNode> = serde_json::from_value(by_id["updateChannels"].clone())
            .map_err(|err| ExpoError::Decode(format!("updateChannels: {err}")))?;

        let mut mappings = Vec::new();
        for channel in channels {
            let Some(branch_id) = select_branch_id(&channel.branch_mapping)? else {
                continue;
            };
            let Some(branch) = branches.iter().find(|b| b.id == branch_id) else {
                continue;
            };
            mappings.push(BranchChannel {
                branch_name: branch.name.clone(),
                channel_name: channel.name,
            });
        }
        Ok(mappings)
    }
}
