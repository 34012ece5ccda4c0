//! # Agora HTTP
//!
//! REST and SSE surface for the Agora capability registry. Agents push
//! registrations and heartbeats in and read their resolved topology out
//! of the response; watchers follow the ordered event stream over SSE.
//!
//! # Example
//!
//! ```rust,no_run
//! use agora_http::RegistryServer;
//! use agora_registry::RegistryConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RegistryServer::new(RegistryConfig::default());
//!     server.serve("0.0.0.0:7420").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use server::{
    DiscoverParams, HeartbeatRequest, RegisterResponse, RegistryHealth, RegistryServer,
    ServerConfig, WatchParams,
};
