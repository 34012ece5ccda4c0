//! Registry server binary
//!
//! Configuration comes from the environment:
//!
//! - `AGORA_BIND`: listen address (default `0.0.0.0:7420`)
//! - `AGORA_DEGRADED_AFTER`: humantime duration (default `15s`)
//! - `AGORA_EXPIRE_AFTER`: humantime duration (default `60s`)
//! - `AGORA_SWEEP_INTERVAL`: humantime duration (default `5s`)
//! - `AGORA_REFRESH_STALENESS`: humantime duration (default `5m`)
//! - `AGORA_REQUEST_TIMEOUT`: humantime duration (default `10s`)
//! - `RUST_LOG`: tracing filter (default `info`)

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use agora_http::{RegistryServer, ServerConfig};
use agora_registry::RegistryConfig;

fn duration_env(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => match humantime::parse_duration(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Ignoring invalid {}='{}': {}", key, raw, e);
                default
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let bind = std::env::var("AGORA_BIND").unwrap_or_else(|_| "0.0.0.0:7420".to_string());

    let registry_config = RegistryConfig::default()
        .with_degraded_after(duration_env("AGORA_DEGRADED_AFTER", Duration::from_secs(15)))
        .with_expire_after(duration_env("AGORA_EXPIRE_AFTER", Duration::from_secs(60)))
        .with_sweep_interval(duration_env("AGORA_SWEEP_INTERVAL", Duration::from_secs(5)))
        .with_refresh_staleness(duration_env(
            "AGORA_REFRESH_STALENESS",
            Duration::from_secs(300),
        ));

    let server_config = ServerConfig {
        request_timeout: duration_env("AGORA_REQUEST_TIMEOUT", Duration::from_secs(10)),
    };

    info!(
        bind = %bind,
        degraded_after = ?registry_config.degraded_after,
        expire_after = ?registry_config.expire_after,
        "Starting Agora registry"
    );

    RegistryServer::new(registry_config)
        .with_server_config(server_config)
        .serve(&bind)
        .await?;

    Ok(())
}
