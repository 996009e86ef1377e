//! In-memory policy-administration service.
//!
//! # Purpose
//! Serves the permission, policy-group, relation, and token endpoints the
//! Lectern client consumes, with the same status codes and `{"detail": ...}`
//! error bodies as the production service.
//!
//! # Key invariants
//! - Every policy endpoint re-checks `admin.create` from a verified bearer
//!   token, independent of any client-side gating.
//! - `(group_name, permission_namespace)` pairs are unique; both ends must
//!   exist; deleting or renaming either end cascades to the relations.
//! - Issued tokens embed the capabilities of the user's group at issuance
//!   time. Later graph edits do not touch tokens already issued.
//!
//! # Test controls
//! Request counting, injected latency, and a 503 switch let tests observe
//! when the client does or does not reach the network.
use crate::tokens::{mint_token, verify_token};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use lectern_authz::{ADMIN_CAPABILITY, Claims, now_epoch_seconds};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

const TOKEN_TTL_SECS: i64 = 3600;

/// Error response in FastAPI shape: `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: serde_json::Value,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

fn api_error(status: StatusCode, detail: &str) -> ApiError {
    ApiError {
        status,
        detail: serde_json::Value::String(detail.to_string()),
    }
}

fn api_not_found(detail: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, detail)
}

fn api_conflict(detail: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, detail)
}

fn api_unauthorized(detail: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, detail)
}

fn api_forbidden(detail: &str) -> ApiError {
    api_error(StatusCode::FORBIDDEN, detail)
}

fn api_unprocessable(field: &str) -> ApiError {
    ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        detail: json!([{ "loc": ["body", field], "msg": format!("{field} must not be blank") }]),
    }
}

fn require_present(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(api_unprocessable(field));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, Serialize)]
struct PermissionRecord {
    id: i64,
    namespace: String,
    display_name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
struct GroupRecord {
    id: i64,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct RelationRecord {
    group_name: String,
    permission_namespace: String,
}

#[derive(Debug, Deserialize)]
struct NewPermissionBody {
    namespace: String,
    display_name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermissionPatchBody {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    username: String,
    password: String,
}

/// A user that can exchange credentials at `/auth/token`.
#[derive(Debug, Clone)]
struct SeedUser {
    id: i64,
    username: String,
    password: String,
    group: Option<String>,
}

impl SeedUser {
    fn new(id: i64, username: &str, password: &str, group: Option<&str>) -> Self {
        Self {
            id,
            username: username.to_string(),
            password: password.to_string(),
            group: group.map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
struct PolicyState {
    permissions: BTreeMap<i64, PermissionRecord>,
    groups: BTreeMap<i64, GroupRecord>,
    relations: BTreeSet<RelationRecord>,
    users: HashMap<String, SeedUser>,
    next_permission_id: i64,
    next_group_id: i64,
}

impl PolicyState {
    fn insert_permission(
        &mut self,
        namespace: String,
        display_name: String,
        description: Option<String>,
    ) -> Result<PermissionRecord, ApiError> {
        if self.permission_by_namespace(&namespace).is_some() {
            return Err(api_conflict("Permission already exists"));
        }
        self.next_permission_id += 1;
        let now = timestamp();
        let record = PermissionRecord {
            id: self.next_permission_id,
            namespace,
            display_name,
            description,
            created_at: now.clone(),
            updated_at: now,
        };
        self.permissions.insert(record.id, record.clone());
        Ok(record)
    }

    fn insert_group(&mut self, name: String) -> Result<GroupRecord, ApiError> {
        if self.group_by_name(&name).is_some() {
            return Err(api_conflict("Policy group already exists"));
        }
        self.next_group_id += 1;
        let record = GroupRecord {
            id: self.next_group_id,
            name,
        };
        self.groups.insert(record.id, record.clone());
        Ok(record)
    }

    fn insert_relation(&mut self, relation: RelationRecord) -> Result<RelationRecord, ApiError> {
        if self.group_by_name(&relation.group_name).is_none() {
            return Err(api_not_found("Policy group not found"));
        }
        if self
            .permission_by_namespace(&relation.permission_namespace)
            .is_none()
        {
            return Err(api_not_found("Permission not found"));
        }
        if !self.relations.insert(relation.clone()) {
            return Err(api_conflict("Permission already assigned to group"));
        }
        Ok(relation)
    }

    fn permission_by_namespace(&self, namespace: &str) -> Option<&PermissionRecord> {
        self.permissions
            .values()
            .find(|permission| permission.namespace == namespace)
    }

    fn group_by_name(&self, name: &str) -> Option<&GroupRecord> {
        self.groups.values().find(|group| group.name == name)
    }

    fn capabilities_of(&self, group: Option<&str>) -> Vec<String> {
        let Some(group) = group else {
            return Vec::new();
        };
        self.relations
            .iter()
            .filter(|relation| relation.group_name == group)
            .map(|relation| relation.permission_namespace.clone())
            .collect()
    }
}

fn timestamp() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

pub struct PolicyService {
    state: RwLock<PolicyState>,
    requests: AtomicUsize,
    delay_ms: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for PolicyService {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyService {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PolicyState::default()),
            requests: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Service preloaded with a small library policy:
    /// - permissions `admin.create`, `books.write`, `books.read`
    /// - group `admin` holding `admin.create` and `books.write`
    /// - group `reader` holding `books.read`
    /// - users `ana` (id 7, admin) and `bruno` (id 8, reader), password
    ///   `<username>-password`
    pub async fn seeded() -> anyhow::Result<Self> {
        let service = Self::new();
        {
            let mut state = service.state.write().await;
            for (namespace, display_name) in [
                (ADMIN_CAPABILITY, "Administer the catalogue"),
                ("books.write", "Edit books"),
                ("books.read", "Read books"),
            ] {
                state
                    .insert_permission(namespace.to_string(), display_name.to_string(), None)
                    .map_err(|err| anyhow::anyhow!("seed permission: {:?}", err.detail))?;
            }
            for name in ["admin", "reader"] {
                state
                    .insert_group(name.to_string())
                    .map_err(|err| anyhow::anyhow!("seed group: {:?}", err.detail))?;
            }
            for (group, namespace) in [
                ("admin", ADMIN_CAPABILITY),
                ("admin", "books.write"),
                ("reader", "books.read"),
            ] {
                state
                    .insert_relation(RelationRecord {
                        group_name: group.to_string(),
                        permission_namespace: namespace.to_string(),
                    })
                    .map_err(|err| anyhow::anyhow!("seed relation: {:?}", err.detail))?;
            }
            for user in [
                SeedUser::new(7, "ana", "ana-password", Some("admin")),
                SeedUser::new(8, "bruno", "bruno-password", Some("reader")),
            ] {
                state.users.insert(user.username.clone(), user);
            }
        }
        Ok(service)
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/auth/token", post(issue_token))
            .route("/permissions/", get(list_permissions).post(create_permission))
            .route(
                "/permissions/:id",
                get(get_permission)
                    .put(update_permission)
                    .delete(delete_permission),
            )
            .route("/policy-groups/", get(list_groups).post(create_group))
            .route(
                "/policy-groups/:id",
                get(get_group).put(update_group).delete(delete_group),
            )
            .route(
                "/policy-group-permissions/",
                get(list_relations)
                    .post(grant_relation)
                    .delete(revoke_relation),
            )
            .with_state(self.clone())
    }

    /// Sign a token for `username` exactly as `/auth/token` would.
    pub async fn token_for(&self, username: &str) -> anyhow::Result<String> {
        let state = self.state.read().await;
        let user = state
            .users
            .get(username)
            .ok_or_else(|| anyhow::anyhow!("unknown user {username}"))?;
        mint_token(&claims_for(&state, user))
    }

    pub async fn relations(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .await
            .relations
            .iter()
            .map(|relation| {
                (
                    relation.group_name.clone(),
                    relation.permission_namespace.clone(),
                )
            })
            .collect()
    }

    pub async fn group_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .groups
            .values()
            .map(|group| group.name.clone())
            .collect()
    }

    /// Requests received so far, including rejected ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// While set, every endpoint answers 503.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), ApiError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
            ));
        }
        Ok(())
    }

    async fn admit(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        self.gate().await?;
        let bearer = extract_bearer(headers).ok_or_else(|| api_unauthorized("Not authenticated"))?;
        let claims = verify_token(bearer).map_err(|err| {
            tracing::debug!(error = %err, "bearer token rejected");
            api_unauthorized("Could not validate credentials")
        })?;
        let allowed = claims
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.iter().any(|cap| cap == ADMIN_CAPABILITY));
        if !allowed {
            return Err(api_forbidden("Not enough permissions"));
        }
        Ok(claims)
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

fn claims_for(state: &PolicyState, user: &SeedUser) -> Claims {
    let now = now_epoch_seconds();
    Claims {
        id: Some(user.id),
        sub: Some(user.username.clone()),
        capabilities: Some(state.capabilities_of(user.group.as_deref())),
        group: user.group.clone(),
        exp: Some(now + TOKEN_TTL_SECS),
        iat: Some(now),
    }
}

type Service = State<Arc<PolicyService>>;

async fn issue_token(
    State(service): Service,
    Form(form): Form<TokenForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    service.gate().await?;
    let state = service.state.read().await;
    let user = state
        .users
        .get(form.username.trim())
        .filter(|user| user.password == form.password)
        .ok_or_else(|| api_unauthorized("Incorrect username or password"))?;
    let token = mint_token(&claims_for(&state, user)).map_err(|err| {
        tracing::error!(error = %err, "failed to sign token");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })?;
    Ok(Json(json!({ "access_token": token, "token_type": "bearer" })))
}

async fn list_permissions(
    State(service): Service,
    headers: HeaderMap,
) -> Result<Json<Vec<PermissionRecord>>, ApiError> {
    service.admit(&headers).await?;
    let state = service.state.read().await;
    Ok(Json(state.permissions.values().cloned().collect()))
}

async fn get_permission(
    State(service): Service,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<PermissionRecord>, ApiError> {
    service.admit(&headers).await?;
    let state = service.state.read().await;
    state
        .permissions
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_not_found("Permission not found"))
}

async fn create_permission(
    State(service): Service,
    headers: HeaderMap,
    Json(body): Json<NewPermissionBody>,
) -> Result<(StatusCode, Json<PermissionRecord>), ApiError> {
    service.admit(&headers).await?;
    let namespace = require_present("namespace", &body.namespace)?;
    let display_name = require_present("display_name", &body.display_name)?;
    let mut state = service.state.write().await;
    let record = state.insert_permission(namespace, display_name, body.description)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_permission(
    State(service): Service,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<PermissionPatchBody>,
) -> Result<Json<PermissionRecord>, ApiError> {
    service.admit(&headers).await?;
    let mut state = service.state.write().await;
    let current = state
        .permissions
        .get(&id)
        .cloned()
        .ok_or_else(|| api_not_found("Permission not found"))?;
    let mut updated = current.clone();
    if let Some(namespace) = body.namespace {
        let namespace = require_present("namespace", &namespace)?;
        if namespace != current.namespace && state.permission_by_namespace(&namespace).is_some() {
            return Err(api_conflict("Permission already exists"));
        }
        updated.namespace = namespace;
    }
    if let Some(display_name) = body.display_name {
        updated.display_name = require_present("display_name", &display_name)?;
    }
    if let Some(description) = body.description {
        updated.description = Some(description);
    }
    updated.updated_at = timestamp();
    if updated.namespace != current.namespace {
        let renamed: Vec<RelationRecord> = state
            .relations
            .iter()
            .filter(|relation| relation.permission_namespace == current.namespace)
            .cloned()
            .collect();
        for relation in renamed {
            state.relations.remove(&relation);
            state.relations.insert(RelationRecord {
                group_name: relation.group_name,
                permission_namespace: updated.namespace.clone(),
            });
        }
    }
    state.permissions.insert(id, updated.clone());
    Ok(Json(updated))
}

async fn delete_permission(
    State(service): Service,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    service.admit(&headers).await?;
    let mut state = service.state.write().await;
    let removed = state
        .permissions
        .remove(&id)
        .ok_or_else(|| api_not_found("Permission not found"))?;
    state
        .relations
        .retain(|relation| relation.permission_namespace != removed.namespace);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_groups(
    State(service): Service,
    headers: HeaderMap,
) -> Result<Json<Vec<GroupRecord>>, ApiError> {
    service.admit(&headers).await?;
    let state = service.state.read().await;
    Ok(Json(state.groups.values().cloned().collect()))
}

async fn get_group(
    State(service): Service,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<GroupRecord>, ApiError> {
    service.admit(&headers).await?;
    let state = service.state.read().await;
    state
        .groups
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_not_found("Policy group not found"))
}

async fn create_group(
    State(service): Service,
    headers: HeaderMap,
    Json(body): Json<GroupBody>,
) -> Result<(StatusCode, Json<GroupRecord>), ApiError> {
    service.admit(&headers).await?;
    let name = require_present("name", &body.name)?;
    let mut state = service.state.write().await;
    let record = state.insert_group(name)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_group(
    State(service): Service,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<GroupBody>,
) -> Result<Json<GroupRecord>, ApiError> {
    service.admit(&headers).await?;
    let name = require_present("name", &body.name)?;
    let mut state = service.state.write().await;
    let current = state
        .groups
        .get(&id)
        .cloned()
        .ok_or_else(|| api_not_found("Policy group not found"))?;
    if name == current.name {
        return Ok(Json(current));
    }
    if state.group_by_name(&name).is_some() {
        return Err(api_conflict("Policy group already exists"));
    }
    let moved: Vec<RelationRecord> = state
        .relations
        .iter()
        .filter(|relation| relation.group_name == current.name)
        .cloned()
        .collect();
    for relation in moved {
        state.relations.remove(&relation);
        state.relations.insert(RelationRecord {
            group_name: name.clone(),
            permission_namespace: relation.permission_namespace,
        });
    }
    for user in state.users.values_mut() {
        if user.group.as_deref() == Some(current.name.as_str()) {
            user.group = Some(name.clone());
        }
    }
    let updated = GroupRecord { id, name };
    state.groups.insert(id, updated.clone());
    Ok(Json(updated))
}

async fn delete_group(
    State(service): Service,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    service.admit(&headers).await?;
    let mut state = service.state.write().await;
    let removed = state
        .groups
        .remove(&id)
        .ok_or_else(|| api_not_found("Policy group not found"))?;
    state
        .relations
        .retain(|relation| relation.group_name != removed.name);
    for user in state.users.values_mut() {
        if user.group.as_deref() == Some(removed.name.as_str()) {
            user.group = None;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_relations(
    State(service): Service,
    headers: HeaderMap,
) -> Result<Json<Vec<RelationRecord>>, ApiError> {
    service.admit(&headers).await?;
    let state = service.state.read().await;
    Ok(Json(state.relations.iter().cloned().collect()))
}

async fn grant_relation(
    State(service): Service,
    headers: HeaderMap,
    Json(body): Json<RelationRecord>,
) -> Result<(StatusCode, Json<RelationRecord>), ApiError> {
    service.admit(&headers).await?;
    let relation = RelationRecord {
        group_name: require_present("group_name", &body.group_name)?,
        permission_namespace: require_present("permission_namespace", &body.permission_namespace)?,
    };
    let mut state = service.state.write().await;
    let created = state.insert_relation(relation)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn revoke_relation(
    State(service): Service,
    headers: HeaderMap,
    Query(query): Query<RelationRecord>,
) -> Result<StatusCode, ApiError> {
    service.admit(&headers).await?;
    let mut state = service.state.write().await;
    if !state.relations.remove(&query) {
        return Err(api_not_found("Relation not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
