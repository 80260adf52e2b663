//! Local caching of session-adjacent data.
//!
//! The only cached item is the last known profile (user and company) of an
//! authoritative session, which lets startup fall back to a recognizable
//! degraded session when the backend is down.

pub mod manager;

pub use manager::{CachedData, CachedProfile, ProfileCache};
