//! Local pseudo-sessions for when the backend cannot be used.
//!
//! Everything produced here is structurally valid but non-authoritative:
//! ids carry a `local:` prefix, tokens a `local-` prefix, and none of it is
//! persisted or sent to the real backend.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::provider::Grant;
use super::session::{Company, Credentials, User};
use super::tokens::TokenPair;
use crate::cache::CachedProfile;

/// Prefix marking locally fabricated ids.
pub const LOCAL_ID_PREFIX: &str = "local:";

/// Prefix marking locally fabricated tokens.
pub const LOCAL_TOKEN_PREFIX: &str = "local-";

/// Fabricated tokens never need renewal within a run.
const DEGRADED_TOKEN_DAYS: i64 = 365;

const DEGRADED_ROLE: &str = "user";

#[derive(Debug, Default, Clone, Copy)]
pub struct DegradedProvider;

impl DegradedProvider {
    pub fn new() -> Self {
        Self
    }

    /// Synthesize a session from submitted credentials.
    pub fn login(&self, credentials: &Credentials, now: DateTime<Utc>) -> Grant {
        let email = credentials.email.trim().to_lowercase();
        let (first_name, last_name) = names_from_email(&email);
        let user = User {
            id: format!("{}{}", LOCAL_ID_PREFIX, email),
            email,
            first_name,
            last_name,
            role: DEGRADED_ROLE.to_string(),
        };
        Grant {
            user,
            company: company_from_slug(&credentials.company_slug),
            tokens: local_tokens(now),
        }
    }

    /// Synthesize a session at startup, reusing the last known profile when
    /// there is one.
    pub fn resume(&self, profile: Option<CachedProfile>, now: DateTime<Utc>) -> Grant {
        let (user, company) = match profile {
            Some(profile) => (profile.user, profile.company),
            None => (
                User {
                    id: format!("{}guest", LOCAL_ID_PREFIX),
                    email: String::new(),
                    first_name: "Guest".to_string(),
                    last_name: String::new(),
                    role: DEGRADED_ROLE.to_string(),
                },
                None,
            ),
        };
        Grant {
            user,
            company,
            tokens: local_tokens(now),
        }
    }
}

pub fn is_local_token(token: &str) -> bool {
    token.starts_with(LOCAL_TOKEN_PREFIX)
}

fn local_tokens(now: DateTime<Utc>) -> TokenPair {
    TokenPair {
        access_token: random_token(),
        refresh_token: random_token(),
        expires_at: now + Duration::days(DEGRADED_TOKEN_DAYS),
    }
}

fn random_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{}{}", LOCAL_TOKEN_PREFIX, suffix)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// "ana.lopez@acme.test" -> ("Ana", "Lopez")
fn names_from_email(email: &str) -> (String, String) {
    let local = email.split('@').next().unwrap_or_default();
    let mut parts = local
        .split(|c: char| c == '.' || c == '_' || c == '-' || c == '+')
        .filter(|p| !p.is_empty());
    let first = parts.next().map(capitalize).unwrap_or_else(|| "User".to_string());
    let last = parts.map(capitalize).collect::<Vec<_>>().join(" ");
    (first, last)
}

/// "acme-corp" -> Company { name: "Acme Corp", .. }; blank slug -> None
fn company_from_slug(slug: &str) -> Option<Company> {
    let slug = slug.trim().to_lowercase();
    if slug.is_empty() {
        return None;
    }
    let name = slug
        .split(|c: char| c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    Some(Company {
        id: format!("{}{}", LOCAL_ID_PREFIX, slug),
        name,
        slug,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_synthesizes_from_credentials() {
        let now = Utc::now();
        let grant = DegradedProvider::new().login(
            &Credentials::new("Ana.Lopez@Acme.test", "pw", "acme-corp"),
            now,
        );
        assert_eq!(grant.user.id, "local:ana.lopez@acme.test");
        assert_eq!(grant.user.first_name, "Ana");
        assert_eq!(grant.user.last_name, "Lopez");
        let company = grant.company.expect("company from slug");
        assert_eq!(company.name, "Acme Corp");
        assert_eq!(company.slug, "acme-corp");
        assert_eq!(company.id, "local:acme-corp");
        assert!(is_local_token(&grant.tokens.access_token));
        assert!(is_local_token(&grant.tokens.refresh_token));
        assert!(grant.tokens.expires_at > now + Duration::days(300));
    }

    #[test]
    fn test_login_without_company() {
        let grant =
            DegradedProvider::new().login(&Credentials::new("bob@x.test", "pw", "  "), Utc::now());
        assert!(grant.company.is_none());
        assert_eq!(grant.user.first_name, "Bob");
        assert_eq!(grant.user.last_name, "");
    }

    #[test]
    fn test_tokens_are_unique() {
        let provider = DegradedProvider::new();
        let creds = Credentials::new("a@b.test", "pw", "b");
        let a = provider.login(&creds, Utc::now());
        let b = provider.login(&creds, Utc::now());
        assert_ne!(a.tokens.access_token, b.tokens.access_token);
    }

    #[test]
    fn test_resume_prefers_cached_profile() {
        let profile = CachedProfile {
            user: User {
                id: "u-42".to_string(),
                email: "kim@acme.test".to_string(),
                first_name: "Kim".to_string(),
                last_name: "Park".to_string(),
                role: "admin".to_string(),
            },
            company: None,
        };
        let grant = DegradedProvider::new().resume(Some(profile.clone()), Utc::now());
        assert_eq!(grant.user, profile.user);
        assert!(is_local_token(&grant.tokens.access_token));
    }

    #[test]
    fn test_resume_without_profile_is_guest() {
        let grant = DegradedProvider::new().resume(None, Utc::now());
        assert_eq!(grant.user.id, "local:guest");
        assert_eq!(grant.user.full_name(), "Guest");
    }

    #[test]
    fn test_names_from_email_edge_cases() {
        assert_eq!(names_from_email("@nowhere"), ("User".to_string(), String::new()));
        assert_eq!(
            names_from_email("mary_jane.watson@x"),
            ("Mary".to_string(), "Jane Watson".to_string())
        );
    }
}
