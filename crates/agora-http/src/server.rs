//! Registry HTTP server
//!
//! Exposes the registry's pull-based operations over REST plus an SSE
//! watch stream. The request timeout layer is deliberately separate from
//! the health monitor's liveness thresholds: a slow heartbeat request
//! times out at the transport level without counting against the agent's
//! liveness.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use agora_registry::{
    AgentRecord, AgentRegistration, AgentStatusReport, DependencyRequest, DiscoveryQuery,
    DiscoveryService, HealthMonitor, HealthStatus, HeartbeatHandler, HeartbeatResponse,
    InMemoryStore, PingResponse, RegistryConfig, RegistryError, ResourceStore, StoreCounts, watch,
};

use crate::error::ApiError;

/// Transport-level settings, distinct from the registry's liveness config.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server-side processing timeout per request
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
struct AppState {
    heartbeat: Arc<HeartbeatHandler>,
    discovery: Arc<DiscoveryService>,
    store: Arc<dyn ResourceStore>,
}

/// The registry server: store, heartbeat write path, discovery read path,
/// and the background health monitor.
pub struct RegistryServer {
    state: AppState,
    registry_config: RegistryConfig,
    server_config: ServerConfig,
}

impl RegistryServer {
    /// Server over a fresh in-memory store.
    pub fn new(registry_config: RegistryConfig) -> Self {
        let store: Arc<dyn ResourceStore> =
            Arc::new(InMemoryStore::new(registry_config.event_capacity));
        Self::with_store(store, registry_config)
    }

    /// Server over a caller-provided store backend.
    pub fn with_store(store: Arc<dyn ResourceStore>, registry_config: RegistryConfig) -> Self {
        let heartbeat = Arc::new(HeartbeatHandler::new(
            Arc::clone(&store),
            registry_config.clone(),
        ));
        let discovery = Arc::new(DiscoveryService::new(Arc::clone(&store)));
        Self {
            state: AppState {
                heartbeat,
                discovery,
                store,
            },
            registry_config,
            server_config: ServerConfig::default(),
        }
    }

    /// Override transport settings.
    pub fn with_server_config(mut self, config: ServerConfig) -> Self {
        self.server_config = config;
        self
    }

    /// Build the router with CORS, tracing, and timeout layers.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/v1/agents", post(register_agent).get(discover_agents))
            .route("/v1/agents/{id}", get(get_agent).delete(unregister_agent))
            .route("/v1/agents/{id}/ping", post(heartbeat_ping))
            .route("/v1/agents/{id}/heartbeat", post(heartbeat_full))
            .route("/v1/agents/{id}/status", get(agent_status))
            .route("/v1/watch", get(watch_events))
            .route("/v1/health", get(registry_health))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(self.server_config.request_timeout))
    }

    /// Bind and serve, with the health monitor running alongside.
    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(address = %addr, "Registry server starting");

        let monitor = HealthMonitor::new(
            Arc::clone(&self.state.store),
            self.registry_config.clone(),
        )
        .spawn();

        let router = self.router();
        let result = axum::serve(listener, router).await;
        monitor.stop();
        result
    }
}

// =============================================================================
// Request/response shapes
// =============================================================================

/// Response to an initial registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Version assigned to the committed record
    pub resource_version: u64,
    /// Version the record carried before this write, if it existed.
    /// A writer that last saw a different version was raced and
    /// overwritten (last-writer-wins).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<u64>,
    /// Status after commit
    pub status: HealthStatus,
    /// Whether this call created the record
    pub created: bool,
}

/// Full heartbeat body: the registration payload plus declared
/// dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Full agent payload
    pub agent: AgentRegistration,
    /// Declared dependencies, bare names or structured specs
    #[serde(default)]
    pub dependencies: Vec<DependencyRequest>,
    /// Record version this writer last saw. When set and the write
    /// replaced a different version, the response is a 409 so the writer
    /// learns it raced another registration (the write still applied,
    /// last-writer-wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

/// Query parameters accepted by `GET /v1/agents`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverParams {
    namespace: Option<String>,
    /// Comma-separated capability tags
    tags: Option<String>,
    category: Option<String>,
    capability: Option<String>,
    #[serde(default)]
    fuzzy: bool,
    version: Option<String>,
    /// Comma-separated `key=value` label selectors
    labels: Option<String>,
    status: Option<String>,
    #[serde(default)]
    healthy_only: bool,
    #[serde(default)]
    include_expired: bool,
    limit: Option<usize>,
}

impl DiscoverParams {
    fn into_query(self) -> Result<DiscoveryQuery, RegistryError> {
        let mut query = DiscoveryQuery {
            namespace: self.namespace,
            category: self.category,
            capability: self.capability,
            fuzzy: self.fuzzy,
            healthy_only: self.healthy_only,
            include_expired: self.include_expired,
            limit: self.limit,
            ..DiscoveryQuery::default()
        };

        if let Some(tags) = self.tags {
            query.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(raw) = self.version {
            query.version = Some(VersionReq::parse(&raw).map_err(|e| {
                RegistryError::validation(format!("invalid version range '{}': {}", raw, e))
            })?);
        }
        if let Some(raw) = self.status {
            query.status = Some(parse_status(&raw)?);
        }
        if let Some(raw) = self.labels {
            let mut labels = HashMap::new();
            for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((key, value)) = pair.split_once('=') else {
                    return Err(RegistryError::validation(format!(
                        "invalid label selector '{}': expected key=value",
                        pair
                    )));
                };
                labels.insert(key.to_string(), value.to_string());
            }
            query.labels = labels;
        }
        Ok(query)
    }
}

fn parse_status(raw: &str) -> Result<HealthStatus, RegistryError> {
    match raw.to_lowercase().as_str() {
        "unknown" => Ok(HealthStatus::Unknown),
        "healthy" => Ok(HealthStatus::Healthy),
        "degraded" => Ok(HealthStatus::Degraded),
        "expired" => Ok(HealthStatus::Expired),
        other => Err(RegistryError::validation(format!(
            "unknown status filter '{}'",
            other
        ))),
    }
}

/// Parameters for the watch stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchParams {
    /// Replay events with a resource version strictly greater than this
    since: Option<u64>,
}

/// Registry self-health body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryHealth {
    /// Always "ok" when the store answers
    pub status: String,
    /// Aggregate store counts
    pub counts: StoreCounts,
}

// =============================================================================
// Route handlers
// =============================================================================

/// POST /v1/agents
async fn register_agent(
    State(state): State<AppState>,
    Json(registration): Json<AgentRegistration>,
) -> Result<Json<RegisterResponse>, ApiError> {
    debug!(agent_id = %registration.id, "Register request");
    let outcome = state.heartbeat.store().upsert_agent(registration).await?;
    Ok(Json(RegisterResponse {
        resource_version: outcome.resource_version,
        previous_version: outcome.previous_version,
        status: HealthStatus::Healthy,
        created: outcome.created,
    }))
}

/// POST /v1/agents/{id}/ping
async fn heartbeat_ping(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<PingResponse>, ApiError> {
    let response = state.heartbeat.ping(&agent_id).await?;
    Ok(Json(response))
}

/// POST /v1/agents/{id}/heartbeat
async fn heartbeat_full(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    if request.agent.id != agent_id {
        return Err(RegistryError::validation(format!(
            "path agent id '{}' does not match payload id '{}'",
            agent_id, request.agent.id
        ))
        .into());
    }
    let response = state
        .heartbeat
        .full(request.agent, request.dependencies)
        .await?;

    if let Some(expected) = request.expected_version
        && response.previous_version != Some(expected)
    {
        return Err(RegistryError::Conflict {
            agent_id,
            expected,
            actual: response.previous_version.unwrap_or(0),
        }
        .into());
    }
    Ok(Json(response))
}

/// GET /v1/agents
async fn discover_agents(
    State(state): State<AppState>,
    Query(params): Query<DiscoverParams>,
) -> Result<Json<Vec<AgentRecord>>, ApiError> {
    let query = params.into_query()?;
    let agents = state.discovery.discover(&query).await?;
    Ok(Json(agents))
}

/// GET /v1/agents/{id}
async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentRecord>, ApiError> {
    let record = state.discovery.get_agent(&agent_id).await?;
    Ok(Json(record))
}

/// GET /v1/agents/{id}/status
async fn agent_status(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentStatusReport>, ApiError> {
    let report = state.discovery.agent_status(&agent_id).await?;
    Ok(Json(report))
}

/// DELETE /v1/agents/{id}
async fn unregister_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.heartbeat.unregister(&agent_id).await?;
    Ok(Json(serde_json::json!({ "unregistered": agent_id })))
}

/// GET /v1/watch
async fn watch_events(
    State(state): State<AppState>,
    Query(params): Query<WatchParams>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let events = watch(Arc::clone(&state.store), params.since).await?;
    let stream = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize watch event");
            String::new()
        });
        Ok(SseEvent::default()
            .event(event.event_type.to_string())
            .id(event.resource_version.to_string())
            .data(data))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /v1/health
async fn registry_health(
    State(state): State<AppState>,
) -> Result<Json<RegistryHealth>, ApiError> {
    let counts = state.discovery.counts().await?;
    Ok(Json(RegistryHealth {
        status: "ok".to_string(),
        counts,
    }))
}
