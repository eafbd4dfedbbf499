//! # Watchlist mutation: concurrency-safe add-symbol-if-absent
//!
//! [`WatchlistMutator`] is the only writer of watchlists. A naive
//! read-check-append-save sequence loses updates when two requests for the same
//! user interleave, so every mutation is a compare-and-swap on the watchlist
//! version, wrapped in a per-user lock:
//!
//! 1. Take the user's lock from the lock table, waiting at most `lock_timeout`.
//!    If the wait runs out the call continues without it; the version check
//!    below still guarantees correctness, the lock only keeps same-user writers
//!    from burning retries against each other.
//! 2. Load the watchlist. If the symbol is present, return `false` without
//!    writing anything.
//! 3. Append with the version that was read. A conflict means another writer
//!    committed in between; start again from step 2.
//!
//! Locks are keyed by user id only, so different users never wait on each
//! other. Entries leave the lock table once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use store::{Append, StoreError, Symbol, UserId, UserStore};
use tokio::sync::OwnedMutexGuard;

type UserLock = Arc<tokio::sync::Mutex<()>>;
type LockTable = Mutex<HashMap<UserId, UserLock>>;

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<UserId, UserLock>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a user's lock (when acquired) and prunes the table entry on drop,
/// including when the owning future is cancelled.
struct Lease<'a> {
    table: &'a LockTable,
    user: UserId,
    lock: Option<UserLock>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        let mut table = lock_table(self.table);
        if table
            .get(&self.user)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.user);
        }
    }
}

pub struct WatchlistMutator<S> {
    store: Arc<S>,
    locks: LockTable,
    lock_timeout: Duration,
}

impl<S: UserStore> WatchlistMutator<S> {
    pub fn new(store: Arc<S>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Add `raw_symbol` to the user's watchlist unless it is already there.
    ///
    /// Returns `Ok(true)` only for the call that actually added the symbol.
    /// Blank symbols and unknown users give `Ok(false)` and write nothing.
    pub async fn add_symbol_if_absent(
        &self,
        user: UserId,
        raw_symbol: &str,
    ) -> Result<bool, StoreError> {
        let Some(symbol) = Symbol::parse(raw_symbol) else {
            tracing::debug!("add_symbol_if_absent: user {} sent a blank symbol", user);
            return Ok(false);
        };

        let _lease = self.acquire(user).await;
        self.append_with_retry(user, &symbol).await
    }

    /// Current symbols for a user, in the order they were added.
    pub async fn symbols(&self, user: UserId) -> Result<Vec<Symbol>, StoreError> {
        Ok(self
            .store
            .watchlist(user)
            .await?
            .map(|list| list.symbols)
            .unwrap_or_default())
    }

    async fn acquire(&self, user: UserId) -> Lease<'_> {
        let lock = lock_table(&self.locks)
            .entry(user)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let mut lease = Lease {
            table: &self.locks,
            user,
            lock: Some(lock.clone()),
            guard: None,
        };
        match tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => lease.guard = Some(guard),
            Err(_) => tracing::warn!(
                "add_symbol_if_absent: lock wait for user {} exceeded {:?}, continuing optimistically",
                user,
                self.lock_timeout
            ),
        }
        lease
    }

    async fn append_with_retry(&self, user: UserId, symbol: &Symbol) -> Result<bool, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let Some(list) = self.store.watchlist(user).await? else {
                tracing::debug!("add_symbol_if_absent: unknown user {}", user);
                return Ok(false);
            };
            if list.contains(symbol) {
                tracing::debug!(
                    "add_symbol_if_absent: user {} already tracks {}",
                    user,
                    symbol
                );
                return Ok(false);
            }

            match self.store.append_symbol(user, list.version, symbol).await {
                Ok(Append::Applied { version }) => {
                    tracing::debug!(
                        "add_symbol_if_absent: user {} added {} (version {}, attempt {})",
                        user,
                        symbol,
                        version,
                        attempt
                    );
                    return Ok(true);
                }
                Ok(Append::Conflict) => {
                    tracing::debug!(
                        "add_symbol_if_absent: version {} for user {} is stale, retrying",
                        list.version,
                        user
                    );
                    tokio::task::yield_now().await;
                }
                Err(StoreError::UnknownUser(_)) => return Ok(false),
                Err(e) => {
                    tracing::error!("add_symbol_if_absent: store failure for user {}: {}", user, e);
                    return Err(e);
                }
            }
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        lock_table(&self.locks).len()
    }
}
