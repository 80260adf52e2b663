//! Session and token lifecycle management for the querydeck dashboard.
//!
//! The dashboard talks to a single API endpoint. This crate signs users in,
//! keeps their tokens fresh, restores sessions across restarts and falls back
//! to a local degraded session when the endpoint cannot be used.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod utils;

pub use auth::{AuthError, AuthSessionManager, Session, SessionState};
pub use config::Config;
