//! Client module for the querydeck API endpoint.
//!
//! The API is a single endpoint accepting named operations (`login`, `me`,
//! `refreshToken`, `logout`, `updateProfile`) with JSON variables, answering
//! with a `{data, errors}` envelope. Authenticated operations carry the
//! access token as a bearer credential.

pub mod client;
pub mod error;
pub mod operations;

pub use client::RequestClient;
pub use error::{ApiErrorItem, RequestError};
pub use operations::Operation;
