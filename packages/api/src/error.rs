//! Errors returned by the [`crate::Midas`] service.

use store::StoreError;

use crate::auth::SessionError;
use crate::market::LookupError;

/// Message shown for every failed login, whatever the cause.
pub const INVALID_CREDENTIALS: &str = "Username and password do not match known users";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Wrong password, unknown user or duplicate user rows. Deliberately opaque.
    #[error("{}", INVALID_CREDENTIALS)]
    InvalidCredentials,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}
