//! Named operations accepted by the endpoint and their typed payloads.

use serde::Deserialize;

use crate::auth::{Company, TokenEnvelope, User};

/// A named operation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub document: &'static str,
}

pub const LOGIN: Operation = Operation {
    name: "login",
    document: "mutation login($email: String!, $password: String!, $companySlug: String!) { \
               login(email: $email, password: $password, companySlug: $companySlug) { \
               user { id email firstName lastName role } \
               company { id name slug } \
               tokens { accessToken refreshToken expiresIn } } }",
};

pub const ME: Operation = Operation {
    name: "me",
    document: "query me { me { \
               user { id email firstName lastName role } \
               company { id name slug } } }",
};

pub const REFRESH_TOKEN: Operation = Operation {
    name: "refreshToken",
    document: "mutation refreshToken($refreshToken: String!) { \
               refreshToken(refreshToken: $refreshToken) { \
               tokens { accessToken refreshToken expiresIn } } }",
};

pub const LOGOUT: Operation = Operation {
    name: "logout",
    document: "mutation logout { logout { success } }",
};

pub const UPDATE_PROFILE: Operation = Operation {
    name: "updateProfile",
    document: "mutation updateProfile($firstName: String!, $lastName: String!) { \
               updateProfile(firstName: $firstName, lastName: $lastName) { \
               user { id email firstName lastName role } } }",
};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginPayload {
    pub user: User,
    #[serde(default)]
    pub company: Option<Company>,
    pub tokens: TokenEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MePayload {
    pub user: User,
    #[serde(default)]
    pub company: Option<Company>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshPayload {
    pub tokens: TokenEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutPayload {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfilePayload {
    pub user: User,
}

// `data` objects, keyed by the operation's root field.

#[derive(Debug, Deserialize)]
pub(crate) struct LoginData {
    pub login: LoginPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MeData {
    pub me: MePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshData {
    pub refresh_token: RefreshPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogoutData {
    pub logout: LogoutPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileData {
    pub update_profile: ProfilePayload,
}
