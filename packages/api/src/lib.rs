//! # API crate: authentication, sessions and watchlists for Midas
//!
//! This crate holds everything the web server does apart from HTTP plumbing.
//! [`Midas`] ties the pieces together and is the one place request handlers go
//! through, so identity is always resolved the same way.
//!
//! ## Modules
//!
//! | Module | Feature gate | Purpose |
//! |--------|-------------|---------|
//! | [`auth`] | none | Argon2id password digests, credential validation, the session registry |
//! | [`watchlist`] | none | Concurrency-safe add-symbol-if-absent on per-user watchlists |
//! | [`market`] | none | Market-data gateway trait, Alpha Vantage client, fixed in-memory gateway |
//! | [`settings`] | none | Layered configuration (`config` + `dotenvy`) |
//! | [`db`] | `server` | Postgres pool and the SQLx-backed [`store::UserStore`] |
//! | [`models`] | none | Client-safe projections (`UserInfo`) |
//!
//! ## Flow
//!
//! 1. **Login**: [`Midas::login`] validates the credentials and binds the
//!    authenticated user to the caller's session.
//! 2. **Ticker lookup**: [`Midas::lookup_ticker`] resolves the session's user,
//!    asks the gateway for the series under a timeout, and only when the
//!    ticker resolved folds the canonical symbol into the user's watchlist.
//! 3. **Logout**: [`Midas::logout`] destroys the session.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub mod auth;
pub mod db;
mod error;
pub mod market;
pub mod models;
pub mod settings;
pub mod watchlist;

pub use error::{ApiError, INVALID_CREDENTIALS};
pub use models::UserInfo;
pub use settings::Settings;
pub use store::{MemoryStore, StoreError, Symbol, UserId, UserStore};

use auth::{CredentialValidator, Passwords, SessionId, SessionRegistry, Validation};
use market::{Interval, LookupError, MarketData, TimeSeries};
use store::NewUser;
use watchlist::WatchlistMutator;

/// Shortest accepted username at registration.
pub const MIN_USERNAME_LEN: usize = 6;
/// Shortest accepted password at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Result of a successful ticker lookup.
#[derive(Debug, Clone, Serialize)]
pub struct TickerLookup {
    pub series: TimeSeries,
    /// Whether this lookup put the symbol on the watchlist for the first time.
    pub added: bool,
}

/// The service behind every request handler.
pub struct Midas<S, M> {
    store: Arc<S>,
    market: M,
    sessions: SessionRegistry,
    credentials: CredentialValidator<S>,
    watchlists: WatchlistMutator<S>,
    passwords: Passwords,
    lookup_timeout: Duration,
}

impl<S: UserStore, M: MarketData> Midas<S, M> {
    pub fn new(store: S, market: M, settings: &Settings) -> Result<Self, ApiError> {
        let passwords = Passwords::new(&settings.password).map_err(ApiError::Internal)?;
        Ok(Self::with_passwords(store, market, settings, passwords))
    }

    fn with_passwords(store: S, market: M, settings: &Settings, passwords: Passwords) -> Self {
        let store = Arc::new(store);
        Self {
            credentials: CredentialValidator::new(store.clone(), passwords.clone()),
            watchlists: WatchlistMutator::new(store.clone(), settings.watchlist.lock_timeout()),
            sessions: SessionRegistry::from_settings(&settings.sessions),
            lookup_timeout: settings.market_data.timeout(),
            store,
            market,
            passwords,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create an account and sign the session in as the new user.
    ///
    /// The session must be live and anonymous; otherwise nothing is created.
    pub async fn register(
        &self,
        session: &SessionId,
        username: &str,
        password: &str,
    ) -> Result<UserInfo, ApiError> {
        self.sessions.require_anonymous(session)?;
        let username = username.trim();
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(ApiError::InvalidInput(format!(
                "Username must be at least {} characters long",
                MIN_USERNAME_LEN
            )));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::InvalidInput(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }

        let passwords = self.passwords.clone();
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::Internal)?;

        let user = self
            .store
            .create_user(NewUser {
                username: username.to_string(),
                password_hash,
            })
            .await
            .map_err(|e| match e {
                StoreError::UsernameTaken => {
                    ApiError::InvalidInput("An account with this username already exists".into())
                }
                other => ApiError::Store(other),
            })?;
        tracing::info!("register: created user {} '{}'", user.id, user.username);

        self.sessions.bind(session, user.id)?;
        Ok(UserInfo::from(&user))
    }

    /// Check credentials and bind the user to the session.
    pub async fn login(
        &self,
        session: &SessionId,
        username: &str,
        password: &str,
    ) -> Result<UserInfo, ApiError> {
        let user_id = match self.credentials.validate(username, password).await? {
            Validation::Matched(id) => id,
            Validation::NoSuchUser | Validation::BadPassword | Validation::AmbiguousUser => {
                return Err(ApiError::InvalidCredentials);
            }
        };

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;
        self.sessions.bind(session, user.id)?;
        tracing::info!("login: user {} signed in on session {}", user.id, session.as_str());
        Ok(UserInfo::from(&user))
    }

    /// Destroy the session.
    pub fn logout(&self, session: &SessionId) {
        if let Some(user) = self.sessions.resolve(session) {
            tracing::info!("logout: user {} signed out", user);
        }
        self.sessions.invalidate(session);
    }

    /// The signed-in user, if the session is bound to one that still exists.
    pub async fn current_user(&self, session: &SessionId) -> Result<Option<UserInfo>, ApiError> {
        let Some(user_id) = self.sessions.resolve(session) else {
            return Ok(None);
        };
        match self.store.get_user(user_id).await? {
            Some(user) => Ok(Some(UserInfo::from(&user))),
            None => {
                tracing::info!(
                    "Session {} refers to deleted user {}, invalidating",
                    session.as_str(),
                    user_id
                );
                self.sessions.invalidate(session);
                Ok(None)
            }
        }
    }

    async fn require_user(&self, session: &SessionId) -> Result<UserId, ApiError> {
        self.current_user(session)
            .await?
            .map(|user| user.id)
            .ok_or(ApiError::NotAuthenticated)
    }

    /// Fetch a series and track its canonical symbol for the signed-in user.
    ///
    /// The watchlist is only touched after the gateway resolved the ticker, so
    /// unknown tickers, provider failures, timeouts and cancelled requests all
    /// leave it unchanged.
    pub async fn lookup_ticker(
        &self,
        session: &SessionId,
        ticker: &str,
        interval: Interval,
    ) -> Result<TickerLookup, ApiError> {
        let user = self.require_user(session).await?;
        let ticker = ticker.trim();
        if ticker.is_empty() {
            return Err(ApiError::InvalidInput("Ticker is required".into()));
        }

        let series = match tokio::time::timeout(
            self.lookup_timeout,
            self.market.lookup(ticker, interval),
        )
        .await
        {
            Ok(Ok(series)) => series,
            Ok(Err(e)) => {
                tracing::warn!("lookup_ticker: user {} searched '{}': {}", user, ticker, e);
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!("lookup_ticker: user {} searched '{}': timed out", user, ticker);
                return Err(LookupError::Timeout.into());
            }
        };

        let added = self
            .watchlists
            .add_symbol_if_absent(user, series.symbol.as_str())
            .await?;
        tracing::debug!(
            "lookup_ticker: user {} searched '{}', symbol {}, added {}",
            user,
            ticker,
            series.symbol,
            added
        );
        Ok(TickerLookup { series, added })
    }

    /// The signed-in user's watchlist.
    pub async fn watchlist(&self, session: &SessionId) -> Result<Vec<Symbol>, ApiError> {
        let user = self.require_user(session).await?;
        Ok(self.watchlists.symbols(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionError;
    use crate::market::{DataPoint, FixedMarketData};

    fn point(time: &str, close: f64) -> DataPoint {
        DataPoint {
            time: time.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }
    }

    fn market() -> FixedMarketData {
        FixedMarketData::new()
            .with_series("AAPL", vec![point("2024-03-01", 180.0)])
            .with_series("MSFT", vec![point("2024-03-01", 410.0)])
            .with_series("TSLA", vec![point("2024-03-01", 200.0)])
    }

    fn midas_with<M: MarketData>(market: M) -> Midas<MemoryStore, M> {
        Midas::with_passwords(
            MemoryStore::new(),
            market,
            &Settings::default(),
            auth::password::cheap(),
        )
    }

    async fn signed_up(midas: &Midas<MemoryStore, FixedMarketData>) -> (SessionId, UserInfo) {
        let session = midas.sessions().create();
        let alice = midas
            .register(&session, "alice123", "correctpass")
            .await
            .unwrap();
        (session, alice)
    }

    #[tokio::test]
    async fn test_wrong_password_does_not_bind() {
        let midas = midas_with(market());
        let (setup, _) = signed_up(&midas).await;
        midas.logout(&setup);

        let session = midas.sessions().create();
        let err = midas
            .login(&session, "alice123", "wrongpass")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
        assert_eq!(midas.current_user(&session).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_ignores_username_case() {
        let midas = midas_with(market());
        let (setup, alice) = signed_up(&midas).await;
        midas.logout(&setup);

        let session = midas.sessions().create();
        let user = midas
            .login(&session, "Alice123", "correctpass")
            .await
            .unwrap();
        assert_eq!(user, alice);
        assert_eq!(midas.current_user(&session).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn test_failures_share_one_message() {
        let midas = midas_with(market());
        signed_up(&midas).await;
        midas.store().insert_raw_user("BOBBY123", "x");
        midas.store().insert_raw_user("bobby123", "y");

        let session = midas.sessions().create();
        let unknown = midas.login(&session, "nobody99", "correctpass").await.unwrap_err();
        let wrong = midas.login(&session, "alice123", "wrongpass").await.unwrap_err();
        let ambiguous = midas.login(&session, "bobby123", "whatever1").await.unwrap_err();

        assert_eq!(unknown.to_string(), INVALID_CREDENTIALS);
        assert_eq!(wrong.to_string(), INVALID_CREDENTIALS);
        assert_eq!(ambiguous.to_string(), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_login_as_other_user_keeps_binding() {
        let midas = midas_with(market());
        let (session, alice) = signed_up(&midas).await;
        let other = midas.sessions().create();
        midas.register(&other, "bobby123", "otherpass").await.unwrap();

        let err = midas
            .login(&session, "bobby123", "otherpass")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Session(SessionError::AlreadyBoundToDifferentUser)
        ));
        assert_eq!(midas.current_user(&session).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn test_register_on_bound_session_creates_nothing() {
        let midas = midas_with(market());
        let (session, alice) = signed_up(&midas).await;

        let err = midas
            .register(&session, "bobby123", "otherpass")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Session(SessionError::AlreadyBoundToDifferentUser)
        ));
        assert!(midas.store().find_by_username("bobby123").await.unwrap().is_empty());
        assert_eq!(midas.current_user(&session).await.unwrap(), Some(alice));

        // The name is still free for a fresh session
        let fresh = midas.sessions().create();
        midas.register(&fresh, "bobby123", "otherpass").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_on_dead_session_creates_nothing() {
        let midas = midas_with(market());
        let session = midas.sessions().create();
        midas.logout(&session);

        let err = midas
            .register(&session, "bobby123", "otherpass")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Session(SessionError::UnknownSession)));
        assert!(midas.store().find_by_username("bobby123").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_validation() {
        let midas = midas_with(market());
        let session = midas.sessions().create();

        let short_name = midas.register(&session, "al", "correctpass").await;
        assert!(matches!(short_name, Err(ApiError::InvalidInput(_))));
        let short_pass = midas.register(&session, "alice123", "short").await;
        assert!(matches!(short_pass, Err(ApiError::InvalidInput(_))));

        midas.register(&session, "alice123", "correctpass").await.unwrap();
        let other = midas.sessions().create();
        let taken = midas.register(&other, "ALICE123", "correctpass").await;
        assert!(matches!(taken, Err(ApiError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_logout_then_anonymous() {
        let midas = midas_with(market());
        let (session, _) = signed_up(&midas).await;

        midas.logout(&session);
        assert_eq!(midas.current_user(&session).await.unwrap(), None);
        assert!(matches!(
            midas.watchlist(&session).await,
            Err(ApiError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_deleted_user_invalidates_session() {
        let midas = midas_with(market());
        let (session, alice) = signed_up(&midas).await;

        midas.store().remove_user(alice.id);
        assert_eq!(midas.current_user(&session).await.unwrap(), None);
        assert_eq!(midas.sessions().resolve(&session), None);
    }

    #[tokio::test]
    async fn test_lookup_tracks_canonical_symbol() {
        let midas = midas_with(market());
        let (session, _) = signed_up(&midas).await;

        let first = midas
            .lookup_ticker(&session, " aapl", Interval::Daily)
            .await
            .unwrap();
        assert!(first.added);
        assert_eq!(first.series.symbol.as_str(), "AAPL");
        assert_eq!(first.series.points.len(), 1);

        let again = midas
            .lookup_ticker(&session, "AAPL", Interval::Weekly)
            .await
            .unwrap();
        assert!(!again.added);

        let symbols = midas.watchlist(&session).await.unwrap();
        assert_eq!(symbols, vec![Symbol::parse("AAPL").unwrap()]);
    }

    #[tokio::test]
    async fn test_lookup_requires_session() {
        let midas = midas_with(market());
        let session = midas.sessions().create();
        let err = midas
            .lookup_ticker(&session, "AAPL", Interval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_unknown_ticker_leaves_watchlist_untouched() {
        let midas = midas_with(market());
        let (session, _) = signed_up(&midas).await;

        let err = midas
            .lookup_ticker(&session, "ZZZZ", Interval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Lookup(ref e) if e.is_not_found()));
        assert!(midas.watchlist(&session).await.unwrap().is_empty());

        let blank = midas.lookup_ticker(&session, "  ", Interval::Daily).await;
        assert!(matches!(blank, Err(ApiError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_provider_outage_is_distinct_and_harmless() {
        let midas = midas_with(market().unavailable());
        let (session, _) = signed_up(&midas).await;

        let err = midas
            .lookup_ticker(&session, "AAPL", Interval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Lookup(LookupError::Upstream(_))));
        assert!(midas.watchlist(&session).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let midas = midas_with(market().with_delay(Duration::from_secs(60)));
        let (session, _) = signed_up(&midas).await;

        let err = midas
            .lookup_ticker(&session, "AAPL", Interval::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Lookup(LookupError::Timeout)));
        assert!(midas.watchlist(&session).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_lookups_from_two_tabs() {
        let midas = Arc::new(midas_with(market()));
        let (first_tab, _) = signed_up(&midas).await;
        let second_tab = midas.sessions().create();
        midas
            .login(&second_tab, "alice123", "correctpass")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for (i, ticker) in ["TSLA", "TSLA", "AAPL", "MSFT", "tsla", "AAPL"]
            .into_iter()
            .enumerate()
        {
            let midas = midas.clone();
            let session = if i % 2 == 0 {
                first_tab.clone()
            } else {
                second_tab.clone()
            };
            handles.push(tokio::spawn(async move {
                midas
                    .lookup_ticker(&session, ticker, Interval::Daily)
                    .await
                    .unwrap()
                    .added
            }));
        }
        let mut added = 0;
        for handle in handles {
            if handle.await.unwrap() {
                added += 1;
            }
        }

        let mut symbols: Vec<String> = midas
            .watchlist(&first_tab)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        symbols.sort();
        assert_eq!(added, 3);
        assert_eq!(symbols, vec!["AAPL", "MSFT", "TSLA"]);
    }
}
