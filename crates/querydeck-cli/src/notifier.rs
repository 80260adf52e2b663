use querydeck_core::auth::{Notification, NotificationLevel, NotificationSink};

/// Prints notifications to stderr so they never mix with command output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl TerminalNotifier {
    fn prefix(level: NotificationLevel) -> &'static str {
        match level {
            NotificationLevel::Success => "ok",
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }
}

impl NotificationSink for TerminalNotifier {
    fn notify(&self, notification: Notification) {
        eprintln!(
            "[{}] {}",
            Self::prefix(notification.level()),
            notification.message()
        );
    }
}
