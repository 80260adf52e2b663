//! Session and token lifecycle.
//!
//! This module provides:
//! - `AuthSessionManager`: login, logout, silent renewal and startup recovery
//! - `TokenStore`: durable token persistence (file, OS keyring, memory)
//! - `SessionScheduler`: the single renewal timer
//! - `DegradedProvider`: local pseudo-sessions when the backend is unusable
//!
//! Access tokens are renewed a fixed lead time (60 seconds by default)
//! before they expire.

pub mod credentials;
pub mod degraded;
pub mod error;
pub mod manager;
pub mod notify;
pub mod provider;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tokens;

pub use credentials::KeyringTokenStore;
pub use degraded::DegradedProvider;
pub use error::AuthError;
pub use manager::{AuthSessionManager, ManagerOptions};
pub use notify::{Notification, NotificationLevel, NotificationSink, TracingNotifier};
pub use provider::{AuthProvider, Grant};
pub use scheduler::SessionScheduler;
pub use session::{Company, Credentials, Session, SessionState, User};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use tokens::{TokenEnvelope, TokenPair};
