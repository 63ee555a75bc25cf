//! Axum adapter for the session bridge.
//!
//! Mounts the login/logout/session routes and the terminal endpoints, and runs
//! session synchronization in front of every handler.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rs_session_bridge::MemorySessionStore;
//! use rs_session_bridge::middleware::{BridgeConfig, bridge_routes};
//!
//! // 1. Pick a SessionStore (MemorySessionStore for a single instance)
//! // 2. Configure from environment
//! let config = BridgeConfig::from_env(MemorySessionStore::new())?;
//!
//! // 3. Mount the routes
//! let app = axum::Router::new().merge(bridge_routes(config));
//!
//! // 4. Use the BridgedSession extractor in your own handlers
//! async fn whoami(session: BridgedSession) -> String { session.user.username }
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use extractor::BridgedSession;
pub use routes::bridge_routes;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
