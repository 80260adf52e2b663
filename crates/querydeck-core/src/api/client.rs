//! Client for the single structured-request endpoint.
//!
//! Every call is a POST of `{operationName, query, variables}`; every answer is
//! classified into success, application error, protocol violation, or
//! transport failure. The caller decides what each class means.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{ApiErrorItem, RequestError};
use super::operations::{
    LoginData, LoginPayload, LogoutData, MeData, MePayload, Operation, ProfileData, RefreshData,
    LOGIN, LOGOUT, ME, REFRESH_TOKEN, UPDATE_PROFILE,
};
use crate::auth::{Credentials, TokenEnvelope, TokenStore, User};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    operation_name: &'a str,
    query: &'a str,
    variables: &'a Value,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<ApiErrorItem>>,
}

/// Client for the remote endpoint.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RequestClient {
    client: Client,
    endpoint: String,
    store: Arc<dyn TokenStore>,
}

impl RequestClient {
    pub fn new(
        endpoint: impl Into<String>,
        store: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            store,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue `operation`, attaching the stored access token as a bearer
    /// credential when `with_auth` is set and a live token is stored.
    pub async fn send<T: DeserializeOwned>(
        &self,
        operation: Operation,
        variables: Value,
        with_auth: bool,
    ) -> Result<T, RequestError> {
        let bearer = if with_auth { self.stored_bearer() } else { None };
        self.execute(operation, &variables, bearer.as_deref()).await
    }

    /// Issue `operation` with an explicit bearer credential.
    pub async fn send_with_token<T: DeserializeOwned>(
        &self,
        operation: Operation,
        variables: Value,
        token: &str,
    ) -> Result<T, RequestError> {
        self.execute(operation, &variables, Some(token)).await
    }

    /// The stored access token, unless it is missing or stale.
    fn stored_bearer(&self) -> Option<String> {
        match self.store.load() {
            Ok(Some(pair)) if !pair.is_expired() => Some(pair.access_token),
            Ok(Some(_)) => {
                debug!("Stored access token is stale, sending without credential");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read token store");
                None
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: Operation,
        variables: &Value,
        bearer: Option<&str>,
    ) -> Result<T, RequestError> {
        let body = RequestBody {
            operation_name: operation.name,
            query: operation.document,
            variables,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| {
            debug!(operation = operation.name, error = %source, "Transport failure");
            RequestError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| RequestError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        })?;

        let result = Self::classify(status, &text);
        match &result {
            Ok(_) => debug!(operation = operation.name, %status, "Request succeeded"),
            Err(e) => debug!(operation = operation.name, %status, error = %e, "Request failed"),
        }
        result
    }

    /// Sort a raw response into success or one of the error classes.
    pub(crate) fn classify<T: DeserializeOwned>(
        status: StatusCode,
        body: &str,
    ) -> Result<T, RequestError> {
        let value: Value = serde_json::from_str(body).map_err(|_| {
            RequestError::protocol(status, RequestError::truncate_body(body))
        })?;
        if !value.is_object() {
            return Err(RequestError::protocol(
                status,
                "response is not a JSON object",
            ));
        }

        let envelope: ResponseEnvelope = serde_json::from_value(value)
            .map_err(|e| RequestError::protocol(status, format!("unexpected envelope: {}", e)))?;

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            return Err(RequestError::Application(errors));
        }

        match envelope.data {
            Some(data) if !data.is_null() => serde_json::from_value(data).map_err(|e| {
                RequestError::protocol(status, format!("unexpected data shape: {}", e))
            }),
            _ => Err(RequestError::protocol(
                status,
                "response carried neither data nor errors",
            )),
        }
    }

    // ===== Named Operations =====

    pub async fn login(&self, credentials: &Credentials) -> Result<LoginPayload, RequestError> {
        let variables = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
            "companySlug": credentials.company_slug,
        });
        let data: LoginData = self.send(LOGIN, variables, false).await?;
        Ok(data.login)
    }

    pub async fn me(&self, access_token: &str) -> Result<MePayload, RequestError> {
        let data: MeData = self
            .send_with_token(ME, serde_json::json!({}), access_token)
            .await?;
        Ok(data.me)
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenEnvelope, RequestError> {
        let variables = serde_json::json!({ "refreshToken": refresh_token });
        let data: RefreshData = self.send(REFRESH_TOKEN, variables, false).await?;
        Ok(data.refresh_token.tokens)
    }

    pub async fn logout(&self, access_token: &str) -> Result<bool, RequestError> {
        let data: LogoutData = self
            .send_with_token(LOGOUT, serde_json::json!({}), access_token)
            .await?;
        Ok(data.logout.success)
    }

    pub async fn update_profile(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, RequestError> {
        let variables = serde_json::json!({
            "firstName": first_name,
            "lastName": last_name,
        });
        let data: ProfileData = self.send(UPDATE_PROFILE, variables, true).await?;
        Ok(data.update_profile.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Pong {
        pong: bool,
    }

    #[test]
    fn test_classify_success() {
        let pong: Pong = RequestClient::classify(StatusCode::OK, r#"{"data":{"pong":true}}"#)
            .expect("success");
        assert!(pong.pong);
    }

    #[test]
    fn test_classify_html_is_protocol_violation() {
        let err = RequestClient::classify::<Pong>(
            StatusCode::BAD_GATEWAY,
            "<html><body>502 Bad Gateway</body></html>",
        )
        .expect_err("html must not parse");
        assert!(matches!(err, RequestError::ProtocolViolation { status: 502, .. }));
    }

    #[test]
    fn test_classify_errors_win_over_status() {
        let err = RequestClient::classify::<Pong>(
            StatusCode::UNAUTHORIZED,
            r#"{"data":null,"errors":[{"message":"Invalid email or password"}]}"#,
        )
        .expect_err("errors present");
        assert_eq!(err.server_message(), Some("Invalid email or password"));
    }

    #[test]
    fn test_classify_empty_errors_with_data_is_success() {
        let pong: Pong =
            RequestClient::classify(StatusCode::OK, r#"{"data":{"pong":true},"errors":[]}"#)
                .expect("success");
        assert!(pong.pong);
    }

    #[test]
    fn test_classify_non_object_json() {
        let err = RequestClient::classify::<Pong>(StatusCode::OK, r#"["data"]"#)
            .expect_err("array is not an envelope");
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_classify_empty_envelope() {
        let err = RequestClient::classify::<Pong>(StatusCode::INTERNAL_SERVER_ERROR, "{}")
            .expect_err("nothing to use");
        assert!(matches!(err, RequestError::ProtocolViolation { status: 500, .. }));
    }

    #[test]
    fn test_classify_wrong_data_shape() {
        let err = RequestClient::classify::<Pong>(StatusCode::OK, r#"{"data":{"ping":1}}"#)
            .expect_err("shape mismatch");
        assert!(err.to_string().contains("unexpected data shape"));
    }
}
