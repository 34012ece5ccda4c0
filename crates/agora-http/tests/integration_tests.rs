//! HTTP round trips against a live server: register, heartbeat, discover,
//! status, unregister, and the SSE watch stream.

use std::time::Duration;

use agora_http::{HeartbeatRequest, RegisterResponse, RegistryServer};
use agora_registry::{
    AgentRegistration, Capability, DependencyPayload, DependencyRequest, HeartbeatResponse,
    PingResponse, RegistryConfig,
};

/// Start a server on an OS-assigned port and return its base URL.
async fn start_server(config: RegistryConfig) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = RegistryServer::new(config).router();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give the acceptor a moment
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{}", addr)
}

fn provider(id: &str, tags: &[&str]) -> AgentRegistration {
    let mut cap = Capability::new("llm");
    for tag in tags {
        cap = cap.with_tag(*tag);
    }
    AgentRegistration::new(id, format!("Agent {}", id), format!("http://{}:9000", id))
        .with_capability(cap)
}

#[tokio::test]
async fn register_discover_status_unregister() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    // Register
    let response = client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &["claude"]))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: RegisterResponse = response.json().await.unwrap();
    assert!(body.created);
    assert!(body.resource_version >= 1);

    // Discover by tag
    let agents: Vec<serde_json::Value> = client
        .get(format!("{}/v1/agents?tags=claude", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["id"], "agent-a");

    // Status
    let status: serde_json::Value = client
        .get(format!("{}/v1/agents/agent-a/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "healthy");

    // Unregister, twice (idempotent)
    for _ in 0..2 {
        let response = client
            .delete(format!("{}/v1/agents/agent-a", base))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    // Gone from default discovery
    let agents: Vec<serde_json::Value> = client
        .get(format!("{}/v1/agents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(agents.is_empty());
}

#[tokio::test]
async fn ping_signals_needs_full_refresh() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    // Unknown agent: asked to do a full registration
    let ping: PingResponse = client
        .post(format!("{}/v1/agents/newcomer/ping", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(ping.needs_full_refresh);

    // After registering, pings are plain liveness
    client
        .post(format!("{}/v1/agents", base))
        .json(&provider("newcomer", &[]))
        .send()
        .await
        .unwrap();
    let ping: PingResponse = client
        .post(format!("{}/v1/agents/newcomer/ping", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!ping.needs_full_refresh);
}

#[tokio::test]
async fn full_heartbeat_resolves_dependencies() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/v1/agents", base))
        .json(&provider("llm-opus", &["claude", "opus"]))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/v1/agents", base))
        .json(&provider("llm-sonnet", &["claude", "sonnet"]))
        .send()
        .await
        .unwrap();

    let request = HeartbeatRequest {
        agent: AgentRegistration::new("consumer", "Consumer", "http://consumer:9000"),
        dependencies: vec![DependencyRequest::Spec(DependencyPayload {
            capability: "llm".to_string(),
            tags: vec!["claude".to_string(), "+opus".to_string()],
            version: None,
            namespace: None,
            fuzzy: false,
        })],
        expected_version: None,
    };

    let first: HeartbeatResponse = client
        .post(format!("{}/v1/agents/consumer/heartbeat", base))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let resolved = first.resolved.get("llm").unwrap();
    assert_eq!(resolved.agent_id, "llm-opus");
    assert!(first.topology_changed);

    // Same topology on the next heartbeat: no rewiring needed
    let second: HeartbeatResponse = client
        .post(format!("{}/v1/agents/consumer/heartbeat", base))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!second.topology_changed);
    assert_eq!(first.topology_hash, second.topology_hash);
}

#[tokio::test]
async fn reregistration_reports_previous_version() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let first: RegisterResponse = client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &[]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first.previous_version, None);

    let second: RegisterResponse = client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &[]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.previous_version, Some(first.resource_version));
}

#[tokio::test]
async fn stale_expected_version_is_a_conflict() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let first: RegisterResponse = client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &[]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Another writer bumps the record in between
    client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &["claude"]))
        .send()
        .await
        .unwrap();

    // A heartbeat still citing the first version is told it raced
    let request = HeartbeatRequest {
        agent: AgentRegistration::new("agent-a", "Agent agent-a", "http://agent-a:9000"),
        dependencies: Vec::new(),
        expected_version: Some(first.resource_version),
    };
    let response = client
        .post(format!("{}/v1/agents/agent-a/heartbeat", base))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    // Citing the current version succeeds
    let current: serde_json::Value = client
        .get(format!("{}/v1/agents/agent-a", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let request = HeartbeatRequest {
        expected_version: Some(current["resource_version"].as_u64().unwrap()),
        ..request
    };
    let response = client
        .post(format!("{}/v1/agents/agent-a/heartbeat", base))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn heartbeat_id_mismatch_is_rejected() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let request = HeartbeatRequest {
        agent: AgentRegistration::new("actual-id", "Agent", "http://agent:9000"),
        dependencies: Vec::new(),
        expected_version: None,
    };
    let response = client
        .post(format!("{}/v1/agents/other-id/heartbeat", base))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_registration_is_rejected() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/agents", base))
        .json(&serde_json::json!({"id": "a1", "name": "Agent", "endpoint": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn status_of_unknown_agent_is_404() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/v1/agents/ghost/status", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registry_health_reports_counts() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &[]))
        .send()
        .await
        .unwrap();

    let health: serde_json::Value = client
        .get(format!("{}/v1/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["counts"]["agents"], 1);
    assert_eq!(health["counts"]["capabilities"], 1);
}

#[tokio::test]
async fn watch_streams_events_over_sse() {
    let base = start_server(RegistryConfig::default()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/v1/agents", base))
        .json(&provider("agent-a", &[]))
        .send()
        .await
        .unwrap();

    let response = client
        .get(format!("{}/v1/watch", base))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Read the first SSE frame: the replayed ADDED event
    use futures::StreamExt;
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let chunk = tokio::time::timeout_at(deadline, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        if buffer.contains("\n\n") {
            break;
        }
    }
    assert!(buffer.contains("event: ADDED"));
    assert!(buffer.contains("agent-a"));
}
