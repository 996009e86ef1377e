//! HTTP client for the policy-administration service.
//!
//! # Purpose
//! Wraps the permission, policy-group, and group-permission relation
//! endpoints plus the credential exchange at `/auth/token`.
//!
//! # Key invariants
//! - Every call except [`AuthorizationClient::request_token`] carries the
//!   current session token as a bearer credential. With no session the call
//!   fails with a status-less [`RequestError`] and nothing is sent.
//! - Grant and revoke are idempotent: "already granted" (409) and "not
//!   granted" (404) come back as [`RelationChange::Unchanged`].
//! - Failures are logged before they are returned and never swallowed.
mod error;
mod types;

pub use error::{RequestError, RequestResult};
pub use types::{
    GroupPermission, NewPermission, Permission, PermissionPatch, PolicyGroup, PolicyGroupInput,
    RelationChange, TokenResponse,
};

use crate::config::ClientConfig;
use crate::observability::RELATION_MUTATIONS_TOTAL;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use types::detail_message;

/// Supplies the raw session token for outgoing requests.
pub trait BearerSource: Send + Sync {
    fn bearer_token(&self) -> Option<Arc<str>>;
}

enum Reply {
    Success(Response),
    Tolerated,
}

#[derive(Clone)]
pub struct AuthorizationClient {
    http: reqwest::Client,
    base_url: String,
    bearer: Arc<dyn BearerSource>,
}

impl AuthorizationClient {
    pub fn new(config: &ClientConfig, bearer: Arc<dyn BearerSource>) -> RequestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RequestError::transport("build http client", &err))?;
        Ok(Self::with_http(http, &config.api_base_url, bearer))
    }

    pub fn with_http(http: reqwest::Client, base_url: &str, bearer: Arc<dyn BearerSource>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_permissions(&self) -> RequestResult<Vec<Permission>> {
        let request = self.authorized(Method::GET, "/permissions/")?;
        self.send_json(request, "failed to list permissions").await
    }

    pub async fn get_permission(&self, id: i64) -> RequestResult<Permission> {
        let request = self.authorized(Method::GET, &format!("/permissions/{id}"))?;
        self.send_json(request, "failed to load permission").await
    }

    pub async fn create_permission(&self, permission: &NewPermission) -> RequestResult<Permission> {
        let request = self
            .authorized(Method::POST, "/permissions/")?
            .json(permission);
        self.send_json(request, "failed to create permission").await
    }

    pub async fn update_permission(
        &self,
        id: i64,
        patch: &PermissionPatch,
    ) -> RequestResult<Permission> {
        let request = self
            .authorized(Method::PUT, &format!("/permissions/{id}"))?
            .json(patch);
        self.send_json(request, "failed to update permission").await
    }

    pub async fn delete_permission(&self, id: i64) -> RequestResult<()> {
        let request = self.authorized(Method::DELETE, &format!("/permissions/{id}"))?;
        self.send_empty(request, "failed to delete permission").await
    }

    pub async fn list_policy_groups(&self) -> RequestResult<Vec<PolicyGroup>> {
        let request = self.authorized(Method::GET, "/policy-groups/")?;
        self.send_json(request, "failed to list policy groups").await
    }

    pub async fn get_policy_group(&self, id: i64) -> RequestResult<PolicyGroup> {
        let request = self.authorized(Method::GET, &format!("/policy-groups/{id}"))?;
        self.send_json(request, "failed to load policy group").await
    }

    pub async fn create_policy_group(&self, group: &PolicyGroupInput) -> RequestResult<PolicyGroup> {
        let request = self
            .authorized(Method::POST, "/policy-groups/")?
            .json(group);
        self.send_json(request, "failed to create policy group").await
    }

    pub async fn update_policy_group(
        &self,
        id: i64,
        group: &PolicyGroupInput,
    ) -> RequestResult<PolicyGroup> {
        let request = self
            .authorized(Method::PUT, &format!("/policy-groups/{id}"))?
            .json(group);
        self.send_json(request, "failed to update policy group").await
    }

    pub async fn delete_policy_group(&self, id: i64) -> RequestResult<()> {
        let request = self.authorized(Method::DELETE, &format!("/policy-groups/{id}"))?;
        self.send_empty(request, "failed to delete policy group").await
    }

    pub async fn list_group_permission_relations(&self) -> RequestResult<Vec<GroupPermission>> {
        let request = self.authorized(Method::GET, "/policy-group-permissions/")?;
        self.send_json(request, "failed to list group permissions").await
    }

    /// Add the `(group, permission)` edge. Granting an existing edge is not an
    /// error.
    pub async fn grant_permission_to_group(
        &self,
        relation: &GroupPermission,
    ) -> RequestResult<RelationChange> {
        let request = self
            .authorized(Method::POST, "/policy-group-permissions/")?
            .json(relation);
        let result = self
            .execute(request, "failed to grant permission", Some(StatusCode::CONFLICT))
            .await
            .map(|reply| match reply {
                Reply::Success(_) => RelationChange::Applied,
                Reply::Tolerated => RelationChange::Unchanged,
            });
        record_mutation("grant", &result);
        if let Ok(change) = &result {
            tracing::info!(
                group = %relation.group_name,
                permission = %relation.permission_namespace,
                ?change,
                "permission granted to group"
            );
        }
        result
    }

    /// Remove the `(group, permission)` edge. Revoking an absent edge is not an
    /// error.
    pub async fn revoke_permission_from_group(
        &self,
        group_name: &str,
        permission_namespace: &str,
    ) -> RequestResult<RelationChange> {
        let request = self
            .authorized(Method::DELETE, "/policy-group-permissions/")?
            .query(&[
                ("group_name", group_name),
                ("permission_namespace", permission_namespace),
            ]);
        let result = self
            .execute(request, "failed to revoke permission", Some(StatusCode::NOT_FOUND))
            .await
            .map(|reply| match reply {
                Reply::Success(_) => RelationChange::Applied,
                Reply::Tolerated => RelationChange::Unchanged,
            });
        record_mutation("revoke", &result);
        if let Ok(change) = &result {
            tracing::info!(
                group = %group_name,
                permission = %permission_namespace,
                ?change,
                "permission revoked from group"
            );
        }
        result
    }

    /// Exchange credentials for a signed session token. Sent without a bearer.
    pub async fn request_token(&self, username: &str, password: &str) -> RequestResult<TokenResponse> {
        let request = self
            .http
            .post(self.url("/auth/token"))
            .form(&[("username", username), ("password", password)]);
        self.send_json(request, "failed to sign in").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, method: Method, path: &str) -> RequestResult<RequestBuilder> {
        let Some(token) = self.bearer.bearer_token() else {
            tracing::warn!(path, "request refused: no session token");
            return Err(RequestError::unauthenticated());
        };
        Ok(self
            .http
            .request(method, self.url(path))
            .bearer_auth(token.as_ref()))
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        context: &'static str,
        tolerated: Option<StatusCode>,
    ) -> RequestResult<Reply> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "{context}: transport failure");
                return Err(RequestError::transport(context, &err));
            }
        };
        let status = response.status();
        if status.is_success() {
            return Ok(Reply::Success(response));
        }
        if tolerated == Some(status) {
            tracing::debug!(status = status.as_u16(), "{context}: tolerated status");
            return Ok(Reply::Tolerated);
        }
        let body = response.text().await.unwrap_or_default();
        let message = detail_message(&body).unwrap_or_else(|| context.to_string());
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), message = %message, "{context}");
        } else {
            tracing::warn!(status = status.as_u16(), message = %message, "{context}");
        }
        Err(RequestError::new(Some(status.as_u16()), message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> RequestResult<T> {
        let Reply::Success(response) = self.execute(request, context, None).await? else {
            return Err(RequestError::new(None, context));
        };
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|err| {
            tracing::warn!(error = %err, status, "{context}: invalid response body");
            RequestError::new(Some(status), format!("{context}: invalid response body"))
        })
    }

    async fn send_empty(&self, request: RequestBuilder, context: &'static str) -> RequestResult<()> {
        self.execute(request, context, None).await.map(|_| ())
    }
}

fn record_mutation(op: &'static str, result: &RequestResult<RelationChange>) {
    let outcome = match result {
        Ok(RelationChange::Applied) => "applied",
        Ok(RelationChange::Unchanged) => "unchanged",
        Err(_) => "error",
    };
    metrics::counter!(RELATION_MUTATIONS_TOTAL, "op" => op, "result" => outcome).increment(1);
}
