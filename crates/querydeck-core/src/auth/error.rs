use thiserror::Error;

/// Session-level failures as the UI sees them. Transport and protocol
/// details never leak past the manager in raw form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server rejected the submitted credentials; carries its message.
    #[error("{0}")]
    CredentialsInvalid(String),

    #[error("Session expired - please sign in again")]
    SessionExpired,

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Not signed in")]
    NotAuthenticated,

    /// A logout or new login replaced the session while this call was in flight.
    #[error("Session changed while the request was in flight")]
    Superseded,

    /// The server rejected a request other than login; carries its message.
    #[error("{0}")]
    Rejected(String),
}
