use serde::Deserialize;
use thiserror::Error;

/// A named error carried inside a well-formed response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiErrorItem {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl ApiErrorItem {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref().and_then(|e| e.code.as_deref())
    }
}

#[derive(Error, Debug)]
pub enum RequestError {
    /// The endpoint could not be contacted at all.
    #[error("Cannot reach {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Something answered, but not with the expected envelope
    /// (an HTML error page from a proxy, an empty body, a mangled payload).
    #[error("Malformed response (status {status}): {detail}")]
    ProtocolViolation { status: u16, detail: String },

    /// A well-formed envelope carrying one or more named errors.
    #[error("{}", first_message(.0))]
    Application(Vec<ApiErrorItem>),
}

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

fn first_message(errors: &[ApiErrorItem]) -> &str {
    errors
        .first()
        .map(|e| e.message.as_str())
        .unwrap_or("Request rejected")
}

impl RequestError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub(crate) fn protocol(status: reqwest::StatusCode, detail: impl Into<String>) -> Self {
        RequestError::ProtocolViolation {
            status: status.as_u16(),
            detail: detail.into(),
        }
    }

    /// True for failures where the backend itself is unusable, as opposed to
    /// the backend answering with a rejection.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            RequestError::Transport { .. } | RequestError::ProtocolViolation { .. }
        )
    }

    /// The server-provided message for application errors.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            RequestError::Application(errors) => Some(first_message(errors)),
            _ => None,
        }
    }

    /// Machine-readable code of the first application error, if any.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            RequestError::Application(errors) => errors.first().and_then(ApiErrorItem::code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(message: &str) -> ApiErrorItem {
        ApiErrorItem {
            message: message.to_string(),
            extensions: None,
        }
    }

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(RequestError::truncate_body("<html>"), "<html>");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(1200);
        let truncated = RequestError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 1200 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = RequestError::truncate_body(&body);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_application_error_uses_first_message() {
        let err = RequestError::Application(vec![item("Invalid credentials"), item("second")]);
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(err.server_message(), Some("Invalid credentials"));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn test_protocol_violation_is_unreachable() {
        let err = RequestError::protocol(reqwest::StatusCode::BAD_GATEWAY, "<html>");
        assert!(err.is_unreachable());
        assert_eq!(err.server_message(), None);
        assert_eq!(err.to_string(), "Malformed response (status 502): <html>");
    }

    #[test]
    fn test_error_item_code() {
        let parsed: ApiErrorItem = serde_json::from_str(
            r#"{"message":"nope","extensions":{"code":"UNAUTHENTICATED"}}"#,
        )
        .expect("valid error item");
        assert_eq!(parsed.code(), Some("UNAUTHENTICATED"));
        assert_eq!(item("x").code(), None);
    }

    #[test]
    fn test_server_code_comes_from_first_error() {
        let coded: ApiErrorItem = serde_json::from_str(
            r#"{"message":"expired","extensions":{"code":"TOKEN_EXPIRED"}}"#,
        )
        .expect("valid error item");
        let err = RequestError::Application(vec![coded, item("second")]);
        assert_eq!(err.server_code(), Some("TOKEN_EXPIRED"));

        assert_eq!(RequestError::Application(vec![item("plain")]).server_code(), None);
        let protocol = RequestError::protocol(reqwest::StatusCode::OK, "<html>");
        assert_eq!(protocol.server_code(), None);
    }
}
