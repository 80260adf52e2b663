use serde::{Deserialize, Serialize};

use super::tokens::TokenPair;

/// Login input. Never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub company_slug: String,
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        company_slug: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            company_slug: company_slug.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("company_slug", &self.company_slug)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Coarse role string; no permission model hangs off it.
    pub role: String,
}

impl User {
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Company {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// Lifecycle position of the single client session.
///
/// `Unauthenticated -> Authenticating -> Authenticated <-> Refreshing -> Expired`,
/// with degraded sessions reported as `Authenticated` plus `is_degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    Expired,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "signed out",
            SessionState::Authenticating => "signing in",
            SessionState::Authenticated => "signed in",
            SessionState::Refreshing => "renewing",
            SessionState::Expired => "expired",
        }
    }

    /// States in which a token-bearing session is live.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }
}

/// The current session as the UI sees it. Owned by the session manager;
/// everyone else works from snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: Option<User>,
    pub company: Option<Company>,
    pub tokens: Option<TokenPair>,
    pub state: SessionState,
    pub is_degraded: bool,
}

impl Session {
    /// Empty session in the given state.
    pub fn empty(state: SessionState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn authenticated(
        user: User,
        company: Option<Company>,
        tokens: TokenPair,
        is_degraded: bool,
    ) -> Self {
        Self {
            user: Some(user),
            company,
            tokens: Some(tokens),
            state: SessionState::Authenticated,
            is_degraded,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_active() && self.user.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn company_id(&self) -> Option<&str> {
        self.company.as_ref().map(|c| c.id.as_str())
    }
}
