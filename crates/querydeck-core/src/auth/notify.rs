use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// User-visible messages raised by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    SignedIn { name: String },
    /// Running on a local session because the backend could not be used.
    Degraded { reason: String },
    LoginFailed { message: String },
    SessionExpired,
    ProfileUpdated,
    ProfileUpdateFailed { message: String },
}

impl Notification {
    pub fn level(&self) -> NotificationLevel {
        match self {
            Notification::SignedIn { .. } | Notification::ProfileUpdated => {
                NotificationLevel::Success
            }
            Notification::Degraded { .. } => NotificationLevel::Warning,
            Notification::SessionExpired => NotificationLevel::Info,
            Notification::LoginFailed { .. } | Notification::ProfileUpdateFailed { .. } => {
                NotificationLevel::Error
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::SignedIn { name } => format!("Welcome back, {}", name),
            Notification::Degraded { reason } => {
                format!("Server unavailable ({}). Working offline.", reason)
            }
            Notification::LoginFailed { message } => message.clone(),
            Notification::SessionExpired => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Notification::ProfileUpdated => "Profile updated".to_string(),
            Notification::ProfileUpdateFailed { message } => message.clone(),
        }
    }
}

/// Surface for user-visible messages (toasts, status lines, stderr).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let message = notification.message();
        match notification.level() {
            NotificationLevel::Success | NotificationLevel::Info => info!(%message, "notification"),
            NotificationLevel::Warning => warn!(%message, "notification"),
            NotificationLevel::Error => error!(%message, "notification"),
        }
    }
}
