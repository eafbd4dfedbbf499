//! Credential validation against the user store.

use std::sync::Arc;

use store::{StoreError, UserId, UserStore};

use super::password::Passwords;

/// Outcome of checking a username/password pair.
///
/// Every variant other than [`Validation::Matched`] must be shown to the client
/// as the same generic failure so usernames cannot be enumerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validation {
    Matched(UserId),
    NoSuchUser,
    BadPassword,
    /// More than one user matched ignoring case: a store integrity defect.
    AmbiguousUser,
}

impl Validation {
    pub fn user_id(self) -> Option<UserId> {
        match self {
            Validation::Matched(id) => Some(id),
            _ => None,
        }
    }
}

/// Looks users up case-insensitively and checks the submitted password digest.
///
/// Has no side effects beyond logging: it never touches sessions.
pub struct CredentialValidator<S> {
    store: Arc<S>,
    passwords: Passwords,
}

impl<S: UserStore> CredentialValidator<S> {
    pub fn new(store: Arc<S>, passwords: Passwords) -> Self {
        Self { store, passwords }
    }

    pub async fn validate(&self, username: &str, password: &str) -> Result<Validation, StoreError> {
        tracing::info!("validate: user '{}' attempted login", username);
        let mut users = self.store.find_by_username(username).await?;

        let user = match users.len() {
            0 => {
                tracing::debug!("validate: no user named '{}'", username);
                return Ok(Validation::NoSuchUser);
            }
            1 => users.swap_remove(0),
            n => {
                tracing::warn!(
                    "validate: {} users match '{}' ignoring case, refusing login",
                    n,
                    username
                );
                return Ok(Validation::AmbiguousUser);
            }
        };

        let passwords = self.passwords.clone();
        let password = password.to_string();
        let hash = user.password_hash;
        let matched = tokio::task::spawn_blocking(move || passwords.verify(&password, &hash))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("validate: password verification task failed: {}", e);
                false
            });

        if !matched {
            tracing::info!("validate: password mismatch for user {}", user.id);
            return Ok(Validation::BadPassword);
        }

        tracing::info!("validate: user {} authenticated", user.id);
        Ok(Validation::Matched(user.id))
    }
}
