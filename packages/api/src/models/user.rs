//! # Client-safe user projection
//!
//! [`store::User`] carries the password digest and must never leave the server.
//! [`UserInfo`] is the subset returned to clients; build it with
//! `UserInfo::from(&user)`.

use serde::{Deserialize, Serialize};
use store::{User, UserId};

/// User information safe to send to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}
