use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::{Append, NewUser, Symbol, User, UserId, Watchlist};
use crate::repo::{StoreError, UserStore};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    users: BTreeMap<UserId, User>,
    watchlists: BTreeMap<UserId, Watchlist>,
}

/// In-memory UserStore for tests and for running without a database.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a user without the case-insensitive uniqueness check.
    ///
    /// Only useful to reproduce a store that already contains duplicates.
    pub fn insert_raw_user(&self, username: &str, password_hash: &str) -> User {
        let mut inner = self.lock();
        insert(&mut inner, username, password_hash)
    }

    /// Delete a user together with their watchlist. Returns whether the user existed.
    pub fn remove_user(&self, id: UserId) -> bool {
        let mut inner = self.lock();
        inner.watchlists.remove(&id);
        inner.users.remove(&id).is_some()
    }
}

fn insert(inner: &mut Inner, username: &str, password_hash: &str) -> User {
    inner.next_id += 1;
    let user = User {
        id: UserId(inner.next_id),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
    };
    inner.users.insert(user.id, user.clone());
    inner.watchlists.insert(user.id, Watchlist::default());
    user
}

impl UserStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Vec<User>, StoreError> {
        let needle = username.to_lowercase();
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.username.to_lowercase() == needle)
            .cloned()
            .collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock();
        let needle = user.username.to_lowercase();
        if inner
            .users
            .values()
            .any(|u| u.username.to_lowercase() == needle)
        {
            return Err(StoreError::UsernameTaken);
        }
        Ok(insert(&mut inner, &user.username, &user.password_hash))
    }

    async fn watchlist(&self, id: UserId) -> Result<Option<Watchlist>, StoreError> {
        Ok(self.lock().watchlists.get(&id).cloned())
    }

    async fn append_symbol(
        &self,
        id: UserId,
        expected_version: u64,
        symbol: &Symbol,
    ) -> Result<Append, StoreError> {
        let mut inner = self.lock();
        let list = inner
            .watchlists
            .get_mut(&id)
            .ok_or(StoreError::UnknownUser(id))?;
        if list.version != expected_version {
            return Ok(Append::Conflict);
        }
        list.symbols.push(symbol.clone());
        list.version += 1;
        Ok(Append::Applied {
            version: list.version,
        })
    }
}
