//! driftsync reference server
//!
//! Implements the server side of the sync contract for local development
//! and integration testing: a health endpoint, entity writes that honour
//! idempotency keys and optimistic concurrency, and HLC exchange.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DRIFTSYNC_PORT`: Port to listen on (default: 8080)
//! - `DRIFTSYNC_SERVER_CONFIG`: Path to config file (default: ~/.config/driftsync-server/config.yaml)
//! - `DRIFTSYNC_SERVER_NODE_ID`: HLC node ID of the server (default: derived)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     client: "laptop"
//! ```
//!
//! Without any API keys the entity routes accept unauthenticated requests.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /api/entities/{collection}`: Create an entity
//! - `GET /api/entities/{collection}/{id}`: Fetch an entity
//! - `PUT /api/entities/{collection}/{id}`: Update an entity
//! - `DELETE /api/entities/{collection}/{id}`: Delete an entity
//!
//! Every entity request may carry `X-HLC` and `Idempotency-Key`. Responses
//! carry the server's `X-HLC`; a repeated idempotency key gets the stored
//! response back without re-applying the write.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use driftsync_core::executor::{HLC_HEADER, IDEMPOTENCY_KEY_HEADER};
use driftsync_core::hlc::{HlcTimestamp, HybridLogicalClock, NodeId};

/// Marks a response served from the idempotency cache.
const REPLAYED_HEADER: &str = "Idempotent-Replayed";

/// Idempotency keys remembered before the oldest are dropped.
const REPLY_CACHE_CAPACITY: usize = 10_000;

// ============================================================================
// Configuration
// ============================================================================

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    client: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Path to config file
    config_path: PathBuf,
    /// Fixed HLC node ID
    node_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("DRIFTSYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let config_path = std::env::var("DRIFTSYNC_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("driftsync-server")
                    .join("config.yaml")
            });

        Self {
            port,
            config_path,
            node_id: std::env::var("DRIFTSYNC_SERVER_NODE_ID").ok(),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated client, added to request extensions after auth
#[derive(Debug, Clone)]
struct AuthClient {
    name: String,
}

/// API key store - maps key -> client
#[derive(Debug, Clone, Default)]
struct ApiKeyStore {
    keys: HashMap<String, AuthClient>,
}

impl ApiKeyStore {
    /// Load API keys from config file
    fn load(config_path: &PathBuf) -> Self {
        let contents = match std::fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                return Self::default();
            }
        };

        match serde_yaml::from_str::<ConfigFile>(&contents) {
            Ok(config) => {
                let store = Self::from_entries(config.api_keys);
                tracing::info!("Loaded {} API key(s)", store.keys.len());
                store
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file: {}", e);
                Self::default()
            }
        }
    }

    fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|entry| (entry.key, AuthClient { name: entry.client }))
            .collect();
        Self { keys }
    }

    /// No keys configured: every request is let through.
    fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    /// Validate an API key and return the associated client
    fn validate(&self, key: &str) -> Option<AuthClient> {
        self.keys.get(key).cloned()
    }
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if state.api_keys.is_open() {
        return next.run(request).await;
    }

    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(key) => key,
        None if auth_header.is_some() => {
            return ApiError::unauthorized(
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            )
            .into_response();
        }
        None => {
            return ApiError::unauthorized("missing_auth", "Authorization header required")
                .into_response();
        }
    };

    match state.api_keys.validate(api_key) {
        Some(client) => {
            tracing::debug!(client = %client.name, "Authenticated request");
            request.extensions_mut().insert(client);
            next.run(request).await
        }
        None => ApiError::unauthorized("invalid_key", "Invalid API key").into_response(),
    }
}

// ============================================================================
// Sync contract: HLC exchange and idempotency
// ============================================================================

/// Server HLC timestamp assigned to the current request.
#[derive(Debug, Clone)]
struct Stamp(HlcTimestamp);

/// Merges the client's `X-HLC` into the server clock and stamps the
/// response with the server's timestamp.
async fn hlc_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let stamp = match request.headers().get(HLC_HEADER) {
        Some(value) => match value.to_str().ok().map(HlcTimestamp::parse) {
            Some(Ok(remote)) => state.clock.receive(&remote),
            _ => {
                return ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "invalid_hlc",
                    format!("Malformed {} header", HLC_HEADER),
                )
                .into_response();
            }
        },
        None => state.clock.now(),
    };

    request.extensions_mut().insert(Stamp(stamp.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&stamp.to_string()) {
        response.headers_mut().insert(HLC_HEADER, value);
    }
    response
}

/// A response kept for replay under its idempotency key.
#[derive(Debug, Clone)]
struct StoredReply {
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: Bytes,
}

impl IntoResponse for StoredReply {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
            .headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
        response
    }
}

/// Slot holding the reply for one idempotency key. Locked for the whole
/// first application, so a concurrent duplicate waits and then replays.
type ReplySlot = Arc<Mutex<Option<StoredReply>>>;

/// Bounded cache of replies; the oldest keys are forgotten first.
#[derive(Debug)]
struct ReplyCache {
    capacity: usize,
    slots: HashMap<String, ReplySlot>,
    order: VecDeque<String>,
}

impl ReplyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn slot(&mut self, key: &str) -> ReplySlot {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }

        let slot = ReplySlot::default();
        self.slots.insert(key.to_string(), slot.clone());
        self.order.push_back(key.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.slots.remove(&oldest);
            }
        }
        slot
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Answers a repeated write with the response of its first application.
/// Server errors are not stored so the client can retry them.
async fn idempotency_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = if request.method() == Method::GET {
        None
    } else {
        request
            .headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let Some(key) = key else {
        return next.run(request).await;
    };

    let slot = state.replies.lock().await.slot(&key);
    let mut stored = slot.lock().await;
    if let Some(reply) = stored.clone() {
        tracing::debug!(key = %key, "Replaying stored response");
        return reply.into_response();
    }

    let response = next.run(request).await;
    if response.status().is_server_error() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Failed to buffer response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    *stored = Some(StoredReply {
        status: parts.status,
        content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
        body: body.clone(),
    });
    Response::from_parts(parts, Body::from(body))
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Entity {
    id: String,
    collection: String,
    version: i64,
    data: Value,
    updated_at: String,
}

type EntityKey = (String, String);

#[derive(Deserialize)]
struct CreateRequest {
    id: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    #[serde(default)]
    data: Value,
    entity_version: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest {
    entity_version: Option<i64>,
}

/// Error response body: `{"error": "...", "message": "..."}`
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    fn unauthorized(error: &'static str, message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error, message)
    }

    fn not_found(key: &EntityKey) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Entity {}/{} not found", key.0, key.1),
        )
    }

    fn stale_version(key: &EntityKey, expected: i64, current: i64) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "version_conflict",
            format!(
                "Entity {}/{} was modified: expected version {}, current version {}",
                key.0, key.1, expected, current
            ),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.error,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn check_version(key: &EntityKey, expected: Option<i64>, current: i64) -> Result<(), ApiError> {
    match expected {
        Some(expected) if expected != current => {
            Err(ApiError::stale_version(key, expected, current))
        }
        _ => Ok(()),
    }
}

/// Object fields are merged key by key; anything else replaces the data.
fn merge_data(current: &mut Value, update: Value) {
    match (current, update) {
        (Value::Object(current), Value::Object(update)) => {
            for (field, value) in update {
                current.insert(field, value);
            }
        }
        (current, update) => *current = update,
    }
}

async fn create_entity(
    State(state): State<AppState>,
    Extension(stamp): Extension<Stamp>,
    Path(collection): Path<String>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let key = (collection, id);

    let mut entities = state.entities.lock().await;
    if entities.contains_key(&key) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "already_exists",
            format!("Entity {}/{} already exists", key.0, key.1),
        ));
    }

    let entity = Entity {
        id: key.1.clone(),
        collection: key.0.clone(),
        version: 1,
        data: request.data,
        updated_at: stamp.0.to_string(),
    };
    entities.insert(key, entity.clone());
    tracing::info!(collection = %entity.collection, id = %entity.id, "Created entity");

    Ok((StatusCode::CREATED, Json(entity)))
}

async fn get_entity(
    State(state): State<AppState>,
    Path(key): Path<EntityKey>,
) -> Result<Json<Entity>, ApiError> {
    let entities = state.entities.lock().await;
    entities
        .get(&key)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&key))
}

async fn update_entity(
    State(state): State<AppState>,
    Extension(stamp): Extension<Stamp>,
    Path(key): Path<EntityKey>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Entity>, ApiError> {
    let mut entities = state.entities.lock().await;
    let entity = entities
        .get_mut(&key)
        .ok_or_else(|| ApiError::not_found(&key))?;

    check_version(&key, request.entity_version, entity.version)?;

    merge_data(&mut entity.data, request.data);
    entity.version += 1;
    entity.updated_at = stamp.0.to_string();
    tracing::info!(collection = %key.0, id = %key.1, version = entity.version, "Updated entity");

    Ok(Json(entity.clone()))
}

/// Deleting an entity that does not exist succeeds.
async fn delete_entity(
    State(state): State<AppState>,
    Path(key): Path<EntityKey>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: DeleteRequest = if body.is_empty() {
        DeleteRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, "invalid_body", e.to_string())
        })?
    };

    let mut entities = state.entities.lock().await;
    if let Some(entity) = entities.get(&key) {
        check_version(&key, request.entity_version, entity.version)?;
        entities.remove(&key);
        tracing::info!(collection = %key.0, id = %key.1, "Deleted entity");
    }

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Main
// ============================================================================

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    api_keys: Arc<ApiKeyStore>,
    clock: Arc<HybridLogicalClock>,
    entities: Arc<Mutex<HashMap<EntityKey, Entity>>>,
    replies: Arc<Mutex<ReplyCache>>,
}

impl AppState {
    fn new(api_keys: ApiKeyStore, node_id: NodeId) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            clock: Arc::new(HybridLogicalClock::new(node_id)),
            entities: Arc::new(Mutex::new(HashMap::new())),
            replies: Arc::new(Mutex::new(ReplyCache::new(REPLY_CACHE_CAPACITY))),
        }
    }
}

fn build_app(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Entity routes; the last layer added runs first
    let entity_routes = Router::new()
        .route("/api/entities/{collection}", post(create_entity))
        .route(
            "/api/entities/{collection}/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            idempotency_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), hlc_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(entity_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftsync_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Config file: {}", config.config_path.display());

    let node_id = match config.node_id.as_deref().map(NodeId::new) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            tracing::error!("Invalid DRIFTSYNC_SERVER_NODE_ID: {}", e);
            std::process::exit(1);
        }
        None => NodeId::derive(),
    };
    tracing::info!("Node ID: {}", node_id);

    let api_keys = ApiKeyStore::load(&config.config_path);
    if api_keys.is_open() {
        tracing::warn!("No API keys configured - entity routes accept unauthenticated requests");
    }

    let app = build_app(AppState::new(api_keys, node_id));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
