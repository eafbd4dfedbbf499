//! # Session registry: binding authenticated users to server-side sessions
//!
//! [`SessionRegistry`] is the process-wide table of live sessions. The transport
//! layer only carries an opaque [`SessionId`] (the web crate keeps it in a cookie
//! session under [`SESSION_ID_KEY`]); everything else lives here.
//!
//! ## Lifecycle
//!
//! ```text
//! create() ──> Anonymous ──bind(user)──> Bound(user) ──invalidate()──> Destroyed
//!                  │                                                     ^
//!                  └─────────────────── invalidate() / expiry ───────────┘
//! ```
//!
//! `Destroyed` is terminal. Once a session is bound its user never changes; a
//! different user needs a fresh session.
//!
//! ## Locking
//!
//! The table lock is held only to find, insert or remove an entry. Each entry has
//! its own lock, so operations on one session id are linearizable while
//! different ids never wait on each other. Lock order is always table, then
//! entry; nothing takes the table lock while holding an entry lock.
//!
//! ## Bounds
//!
//! Sessions idle for longer than `idle_timeout` are expired lazily on access and
//! eagerly by [`sweep_expired`](SessionRegistry::sweep_expired). When the table
//! holds `max_sessions` entries, [`create`](SessionRegistry::create) sweeps and,
//! if still full, evicts the least recently used session, anonymous ones first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use store::UserId;
use tokio::time::Instant;

use crate::settings;

/// Key under which the transport session stores the [`SessionId`].
pub const SESSION_ID_KEY: &str = "midas.session_id";

/// Opaque session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is already bound to a different user")]
    AlreadyBoundToDifferentUser,
    #[error("unknown, expired or invalidated session")]
    UnknownSession,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Anonymous,
    Bound(UserId),
    Destroyed,
}

#[derive(Debug)]
struct Record {
    state: State,
    last_seen: Instant,
}

type Entry = Arc<Mutex<Record>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded, expiring table of sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    table: Mutex<HashMap<SessionId, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_settings(settings: &settings::Sessions) -> Self {
        Self::new(settings.idle_timeout(), settings.max_sessions)
    }

    fn is_expired(&self, record: &Record, now: Instant) -> bool {
        now.duration_since(record.last_seen) > self.idle_timeout
    }

    /// Create a new anonymous session.
    pub fn create(&self) -> SessionId {
        let mut table = lock(&self.table);
        if table.len() >= self.max_sessions {
            self.make_room(&mut table);
        }
        let id = SessionId::generate();
        table.insert(
            id.clone(),
            Arc::new(Mutex::new(Record {
                state: State::Anonymous,
                last_seen: Instant::now(),
            })),
        );
        tracing::debug!("Created session {}", id.as_str());
        id
    }

    /// Return `id` if it still names a live session, otherwise create a new one.
    pub fn ensure(&self, id: Option<&SessionId>) -> SessionId {
        if let Some(id) = id {
            if let Some(entry) = self.entry(id) {
                if self.touch(id, &entry).is_some() {
                    return id.clone();
                }
            }
        }
        self.create()
    }

    /// Record `user` as the identity of the session.
    ///
    /// Binding the same user twice is a no-op. Binding another user fails and
    /// keeps the original binding.
    pub fn bind(&self, id: &SessionId, user: UserId) -> Result<(), SessionError> {
        let entry = self.entry(id).ok_or(SessionError::UnknownSession)?;
        let mut record = lock(&entry);
        let now = Instant::now();
        if record.state != State::Destroyed && self.is_expired(&record, now) {
            record.state = State::Destroyed;
            drop(record);
            self.forget(id, &entry);
            return Err(SessionError::UnknownSession);
        }
        match record.state {
            State::Anonymous => {
                record.state = State::Bound(user);
                record.last_seen = now;
                tracing::info!("Session {} bound to user {}", id.as_str(), user);
                Ok(())
            }
            State::Bound(existing) if existing == user => {
                record.last_seen = now;
                Ok(())
            }
            State::Bound(existing) => {
                tracing::warn!(
                    "Session {} is bound to user {}, refusing to rebind to {}",
                    id.as_str(),
                    existing,
                    user
                );
                Err(SessionError::AlreadyBoundToDifferentUser)
            }
            State::Destroyed => Err(SessionError::UnknownSession),
        }
    }

    /// The user bound to the session, if any.
    pub fn resolve(&self, id: &SessionId) -> Option<UserId> {
        let entry = self.entry(id)?;
        match self.touch(id, &entry)? {
            State::Bound(user) => Some(user),
            _ => None,
        }
    }

    /// Check that the session is live and not yet bound to anyone.
    pub fn require_anonymous(&self, id: &SessionId) -> Result<(), SessionError> {
        let entry = self.entry(id).ok_or(SessionError::UnknownSession)?;
        match self.touch(id, &entry) {
            Some(State::Anonymous) => Ok(()),
            Some(State::Bound(_)) => Err(SessionError::AlreadyBoundToDifferentUser),
            Some(State::Destroyed) | None => Err(SessionError::UnknownSession),
        }
    }

    /// Destroy the session. Returns whether it was live.
    pub fn invalidate(&self, id: &SessionId) -> bool {
        let removed = lock(&self.table).remove(id);
        match removed {
            Some(entry) => {
                let mut record = lock(&entry);
                let was_live = record.state != State::Destroyed;
                record.state = State::Destroyed;
                tracing::info!("Session {} invalidated", id.as_str());
                was_live
            }
            None => false,
        }
    }

    /// Remove every session idle for longer than the timeout.
    pub fn sweep_expired(&self) -> usize {
        let mut table = lock(&self.table);
        let removed = self.sweep(&mut table);
        if removed > 0 {
            tracing::debug!("Swept {} expired sessions", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: &SessionId) -> Option<Entry> {
        lock(&self.table).get(id).cloned()
    }

    /// Refresh the idle clock and return the current state of a live session.
    fn touch(&self, id: &SessionId, entry: &Entry) -> Option<State> {
        let mut record = lock(entry);
        let now = Instant::now();
        if record.state == State::Destroyed {
            return None;
        }
        if self.is_expired(&record, now) {
            record.state = State::Destroyed;
            drop(record);
            self.forget(id, entry);
            return None;
        }
        record.last_seen = now;
        Some(record.state)
    }

    /// Drop `entry` from the table unless the id was already replaced.
    fn forget(&self, id: &SessionId, entry: &Entry) {
        let mut table = lock(&self.table);
        if table.get(id).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            table.remove(id);
        }
    }

    fn sweep(&self, table: &mut HashMap<SessionId, Entry>) -> usize {
        let now = Instant::now();
        let before = table.len();
        table.retain(|_, entry| {
            let mut record = lock(entry);
            if record.state == State::Destroyed || self.is_expired(&record, now) {
                record.state = State::Destroyed;
                false
            } else {
                true
            }
        });
        before - table.len()
    }

    /// Sweep, then evict until there is room. Anonymous sessions go first so
    /// unauthenticated traffic cannot push signed-in users out.
    fn make_room(&self, table: &mut HashMap<SessionId, Entry>) {
        self.sweep(table);
        while table.len() >= self.max_sessions {
            let victim = table
                .iter()
                .map(|(id, entry)| {
                    let record = lock(entry);
                    let bound = matches!(record.state, State::Bound(_));
                    (bound, record.last_seen, id)
                })
                .min_by_key(|(bound, last_seen, _)| (*bound, *last_seen))
                .map(|(bound, _, id)| (bound, id.clone()));
            let Some((bound, victim)) = victim else { break };
            if let Some(entry) = table.remove(&victim) {
                lock(&entry).state = State::Destroyed;
                if bound {
                    tracing::info!("Evicted least recently used signed-in session {}", victim.as_str());
                } else {
                    tracing::debug!("Evicted least recently used anonymous session {}", victim.as_str());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(60), 100)
    }

    #[test]
    fn test_new_session_is_anonymous() {
        let sessions = registry();
        let id = sessions.create();
        assert_eq!(sessions.resolve(&id), None);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_bind_then_resolve() {
        let sessions = registry();
        let id = sessions.create();
        sessions.bind(&id, UserId(7)).unwrap();
        assert_eq!(sessions.resolve(&id), Some(UserId(7)));
    }

    #[test]
    fn test_bind_is_idempotent_for_same_user() {
        let sessions = registry();
        let id = sessions.create();
        sessions.bind(&id, UserId(7)).unwrap();
        sessions.bind(&id, UserId(7)).unwrap();
        assert_eq!(sessions.resolve(&id), Some(UserId(7)));
    }

    #[test]
    fn test_rebind_to_other_user_is_rejected() {
        let sessions = registry();
        let id = sessions.create();
        sessions.bind(&id, UserId(7)).unwrap();

        let err = sessions.bind(&id, UserId(9)).unwrap_err();
        assert_eq!(err, SessionError::AlreadyBoundToDifferentUser);
        assert_eq!(sessions.resolve(&id), Some(UserId(7)));
    }

    #[test]
    fn test_invalidate_is_terminal() {
        let sessions = registry();
        let id = sessions.create();
        sessions.bind(&id, UserId(7)).unwrap();

        assert!(sessions.invalidate(&id));
        assert_eq!(sessions.resolve(&id), None);
        assert_eq!(
            sessions.bind(&id, UserId(7)).unwrap_err(),
            SessionError::UnknownSession
        );
        assert!(!sessions.invalidate(&id));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_ensure_reuses_live_and_replaces_dead_sessions() {
        let sessions = registry();
        let id = sessions.create();
        assert_eq!(sessions.ensure(Some(&id)), id);

        sessions.invalidate(&id);
        let fresh = sessions.ensure(Some(&id));
        assert_ne!(fresh, id);
        assert_ne!(sessions.ensure(None), fresh);
    }

    #[test]
    fn test_sessions_do_not_share_bindings() {
        let sessions = registry();
        let a = sessions.create();
        let b = sessions.create();
        sessions.bind(&a, UserId(1)).unwrap();
        sessions.bind(&b, UserId(2)).unwrap();

        sessions.invalidate(&a);
        assert_eq!(sessions.resolve(&b), Some(UserId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_expire() {
        let sessions = registry();
        let id = sessions.create();
        sessions.bind(&id, UserId(7)).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        // Access refreshes the idle clock
        assert_eq!(sessions.resolve(&id), Some(UserId(7)));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(sessions.resolve(&id), Some(UserId(7)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sessions.resolve(&id), None);
        assert!(sessions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let sessions = registry();
        let stale = sessions.create();
        tokio::time::advance(Duration::from_secs(40)).await;
        let fresh = sessions.create();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(sessions.sweep_expired(), 1);
        assert_eq!(sessions.len(), 1);
        assert_eq!(
            sessions.bind(&stale, UserId(1)).unwrap_err(),
            SessionError::UnknownSession
        );
        sessions.bind(&fresh, UserId(1)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let sessions = SessionRegistry::new(Duration::from_secs(600), 2);
        let first = sessions.create();
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = sessions.create();
        tokio::time::advance(Duration::from_secs(1)).await;

        // Touch the older session so the second one becomes least recently used
        sessions.resolve(&first);
        tokio::time::advance(Duration::from_secs(1)).await;

        let third = sessions.create();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.bind(&first, UserId(1)).is_ok());
        assert!(sessions.bind(&third, UserId(3)).is_ok());
        assert_eq!(
            sessions.bind(&second, UserId(2)).unwrap_err(),
            SessionError::UnknownSession
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_anonymous_before_signed_in() {
        let sessions = SessionRegistry::new(Duration::from_secs(600), 2);
        let signed_in = sessions.create();
        sessions.bind(&signed_in, UserId(1)).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let anonymous = sessions.create();
        tokio::time::advance(Duration::from_secs(1)).await;

        // The signed-in session is older but survives
        let newest = sessions.create();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.resolve(&signed_in), Some(UserId(1)));
        assert!(sessions.require_anonymous(&newest).is_ok());
        assert_eq!(
            sessions.require_anonymous(&anonymous).unwrap_err(),
            SessionError::UnknownSession
        );

        // With only signed-in sessions left, the least recently used one goes
        sessions.bind(&newest, UserId(2)).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        sessions.resolve(&signed_in);
        sessions.create();
        assert_eq!(sessions.resolve(&signed_in), Some(UserId(1)));
        assert_eq!(sessions.resolve(&newest), None);
    }

    #[test]
    fn test_require_anonymous() {
        let sessions = registry();
        let id = sessions.create();
        assert!(sessions.require_anonymous(&id).is_ok());

        sessions.bind(&id, UserId(7)).unwrap();
        assert_eq!(
            sessions.require_anonymous(&id).unwrap_err(),
            SessionError::AlreadyBoundToDifferentUser
        );

        sessions.invalidate(&id);
        assert_eq!(
            sessions.require_anonymous(&id).unwrap_err(),
            SessionError::UnknownSession
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invalidate_racing_bind_is_terminal() {
        let sessions = Arc::new(registry());

        for round in 0..200 {
            let id = sessions.create();
            let barrier = Arc::new(tokio::sync::Barrier::new(2));

            let binder = {
                let sessions = sessions.clone();
                let id = id.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    sessions.bind(&id, UserId(round))
                })
            };
            let invalidator = {
                let sessions = sessions.clone();
                let id = id.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    sessions.invalidate(&id)
                })
            };

            let bound = binder.await.unwrap();
            let was_live = invalidator.await.unwrap();

            // Either order, the session was live when invalidated and is gone now
            assert!(was_live);
            match bound {
                Ok(()) => {}
                Err(e) => assert_eq!(e, SessionError::UnknownSession),
            }
            assert_eq!(sessions.resolve(&id), None);
            assert_eq!(
                sessions.bind(&id, UserId(round)).unwrap_err(),
                SessionError::UnknownSession
            );
        }
        assert!(sessions.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_binds_keep_a_single_user() {
        let sessions = Arc::new(registry());
        let id = sessions.create();

        let mut handles = Vec::new();
        for user in 1..=8 {
            let sessions = sessions.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                sessions.bind(&id, UserId(user)).is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(sessions.resolve(&id).is_some());
    }
}
