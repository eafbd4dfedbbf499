//! # UserStore: the storage contract consumed by authentication and watchlists
//!
//! Everything above the storage layer talks to users and watchlists through the
//! [`UserStore`] trait, so the same logic runs against the in-memory
//! [`crate::MemoryStore`] (tests, offline server) or the Postgres store in the
//! `api` crate.
//!
//! ## Read path
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`find_by_username`](UserStore::find_by_username) | Case-insensitive lookup. Returns every matching row, so callers can detect duplicates. |
//! | [`get_user`](UserStore::get_user) | Lookup by id. |
//! | [`watchlist`](UserStore::watchlist) | Current symbols and version token, `None` for an unknown user. |
//!
//! ## Write path
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`create_user`](UserStore::create_user) | Inserts a user, refusing usernames that collide ignoring case. |
//! | [`append_symbol`](UserStore::append_symbol) | Compare-and-swap append keyed on the watchlist version. |
//!
//! `append_symbol` is the only way a watchlist changes. It never checks for
//! duplicates itself; the caller reads the watchlist, decides, and passes the
//! version it read. If another writer got there first the store answers
//! [`Append::Conflict`] and the caller starts over.

use std::future::Future;

use crate::models::{Append, NewUser, Symbol, User, UserId, Watchlist};

/// Errors reported by a [`UserStore`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Async storage for users and their watchlists.
pub trait UserStore: Send + Sync + 'static {
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Vec<User>, StoreError>> + Send;
    fn get_user(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;
    fn create_user(
        &self,
        user: NewUser,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;
    fn watchlist(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<Watchlist>, StoreError>> + Send;
    fn append_symbol(
        &self,
        id: UserId,
        expected_version: u64,
        symbol: &Symbol,
    ) -> impl Future<Output = Result<Append, StoreError>> + Send;
}
