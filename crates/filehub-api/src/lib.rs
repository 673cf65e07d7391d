//! # filehub-api
//!
//! HTTP API layer for FileHub built on Axum.
//!
//! Provides the WebSocket upgrade into the realtime hub, the job
//! submission and lookup endpoints, health reporting, middleware (CORS,
//! logging), DTOs, and error mapping.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
