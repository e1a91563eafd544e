//! HTTP server for Ember.
//!
//! Exposes anonymous upload and download of opaque payloads over HTTP, with
//! per-IP rate limiting and a background expiry sweeper tied to the server's
//! lifetime.

pub mod config;
pub mod error;
pub mod handler;
pub mod ratelimit;
pub mod router;
pub mod server;

pub use config::{RateLimitConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::AppState;
pub use ratelimit::RateLimitState;
pub use server::EmberServer;
