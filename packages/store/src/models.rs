//! # Domain models for users and watchlists
//!
//! Defines the records every [`crate::UserStore`] hands out. These types are
//! `Serialize + Deserialize` so the web layer can return them as JSON without a
//! second set of DTOs.
//!
//! ## Types
//!
//! | Struct | Represents |
//! |--------|-----------|
//! | [`UserId`] | Numeric identity of a user. |
//! | [`User`] | A stored account: id, username and the PHC password digest. |
//! | [`NewUser`] | Registration payload handed to [`crate::UserStore::create_user`]. |
//! | [`Symbol`] | A validated, non-blank ticker identifier such as `"AAPL"`. |
//! | [`Watchlist`] | The user's deduplicated symbols plus the version token used for compare-and-swap appends. |
//! | [`Append`] | Outcome of a versioned append: applied, or rejected because the version moved. |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric user identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored user account.
///
/// `password_hash` is an opaque digest string and is never the plaintext password.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
}

/// Data needed to create a user.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

/// A ticker symbol.
///
/// Equality is exact and case-sensitive. Casing is normalised by the market-data
/// gateway before a symbol reaches a watchlist, not here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Trim surrounding whitespace and reject blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's tracked symbols.
///
/// Symbols are kept in the order they were first added and never repeat.
/// `version` increases by one with every successful append.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub symbols: Vec<Symbol>,
    pub version: u64,
}

impl Watchlist {
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }
}

/// Result of [`crate::UserStore::append_symbol`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Append {
    /// The symbol was written and the watchlist now has this version.
    Applied { version: u64 },
    /// The stored version no longer matched; nothing was written.
    Conflict,
}
