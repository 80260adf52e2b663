use chrono::Utc;

use super::degraded::DegradedProvider;
use super::session::{Company, Credentials, User};
use super::tokens::TokenPair;
use crate::api::{RequestClient, RequestError};

/// What a successful sign-in yields, whichever provider produced it.
#[derive(Debug, Clone)]
pub struct Grant {
    pub user: User,
    pub company: Option<Company>,
    pub tokens: TokenPair,
}

/// Source of a session: the real backend, or the local fallback chosen when
/// the backend is unreachable or answers with something that is not the
/// expected envelope.
#[derive(Clone, Copy)]
pub enum AuthProvider<'a> {
    Remote(&'a RequestClient),
    Degraded(&'a DegradedProvider),
}

impl<'a> AuthProvider<'a> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, AuthProvider::Degraded(_))
    }

    /// Provider to fall back to after `err`, if the failure class allows it.
    pub fn fallback_for(
        err: &RequestError,
        degraded: &'a DegradedProvider,
        allow_degraded: bool,
    ) -> Option<AuthProvider<'a>> {
        (allow_degraded && err.is_unreachable()).then_some(AuthProvider::Degraded(degraded))
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Grant, RequestError> {
        match self {
            AuthProvider::Remote(client) => {
                let payload = client.login(credentials).await?;
                Ok(Grant {
                    user: payload.user,
                    company: payload.company,
                    tokens: TokenPair::from_envelope(payload.tokens, Utc::now()),
                })
            }
            AuthProvider::Degraded(provider) => Ok(provider.login(credentials, Utc::now())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_fallback_only_for_unreachable() {
        let degraded = DegradedProvider::new();

        let protocol = RequestError::protocol(StatusCode::BAD_GATEWAY, "<html>");
        let fallback = AuthProvider::fallback_for(&protocol, &degraded, true);
        assert!(fallback.is_some_and(|p| p.is_degraded()));

        let rejected = RequestError::Application(vec![]);
        assert!(AuthProvider::fallback_for(&rejected, &degraded, true).is_none());

        assert!(AuthProvider::fallback_for(&protocol, &degraded, false).is_none());
    }

    #[tokio::test]
    async fn test_degraded_login_never_fails() {
        let degraded = DegradedProvider::new();
        let grant = AuthProvider::Degraded(&degraded)
            .login(&Credentials::new("ana@acme.test", "pw", "acme"))
            .await
            .expect("degraded login");
        assert_eq!(grant.user.email, "ana@acme.test");
    }
}
