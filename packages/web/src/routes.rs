//! HTTP routes. Handlers stay thin: they turn the cookie session into a
//! [`SessionId`] and hand everything else to [`Midas`].
//!
//! Only a successful register or login writes to the cookie session, so
//! anonymous traffic leaves no records behind.

use std::sync::Arc;
use std::time::Duration;

use api::auth::{SessionError, SessionId, SESSION_ID_KEY};
use api::market::{Interval, LookupError, MarketData};
use api::{ApiError, Midas, Symbol, TickerLookup, UserInfo, UserStore};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::cookie::SameSite;
use tower_sessions::session_store::SessionStore;
use tower_sessions::{Expiry, Session, SessionManagerLayer};

type AppState<S, M> = State<Arc<Midas<S, M>>>;

/// Error wrapper that renders [`ApiError`] as a JSON response.
pub struct AppError(ApiError);

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<tower_sessions::session::Error> for AppError {
    fn from(e: tower_sessions::session::Error) -> Self {
        Self(ApiError::Internal(format!("session store: {}", e)))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ApiError::InvalidCredentials | ApiError::NotAuthenticated => {
                (StatusCode::UNAUTHORIZED, self.0.to_string())
            }
            ApiError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Session(SessionError::AlreadyBoundToDifferentUser) => (
                StatusCode::CONFLICT,
                "Already signed in as another user, log out first".to_string(),
            ),
            ApiError::Session(SessionError::UnknownSession) => {
                (StatusCode::UNAUTHORIZED, "Session expired".to_string())
            }
            ApiError::Lookup(LookupError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Invalid ticker".to_string())
            }
            ApiError::Lookup(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Market data service unavailable".to_string(),
            ),
            ApiError::Store(e) => {
                tracing::error!("Store failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TickerRequest {
    pub ticker: String,
    #[serde(default)]
    pub interval: Interval,
}

async fn stored_session(session: &Session) -> Result<Option<SessionId>, AppError> {
    Ok(session.get(SESSION_ID_KEY).await?)
}

async fn signed_in_session(session: &Session) -> Result<SessionId, AppError> {
    stored_session(session)
        .await?
        .ok_or_else(|| ApiError::NotAuthenticated.into())
}

/// Store the registry id after a successful sign-in and rotate the cookie id.
async fn remember(
    session: &Session,
    current: Option<SessionId>,
    id: &SessionId,
) -> Result<(), AppError> {
    if current.as_ref() != Some(id) {
        session.insert(SESSION_ID_KEY, id).await?;
    }
    session.cycle_id().await?;
    Ok(())
}

async fn register<S: UserStore, M: MarketData>(
    State(midas): AppState<S, M>,
    session: Session,
    Json(form): Json<Credentials>,
) -> Result<Json<UserInfo>, AppError> {
    let current = stored_session(&session).await?;
    let id = midas.sessions().ensure(current.as_ref());
    let user = midas.register(&id, &form.username, &form.password).await?;
    remember(&session, current, &id).await?;
    Ok(Json(user))
}

async fn login<S: UserStore, M: MarketData>(
    State(midas): AppState<S, M>,
    session: Session,
    Json(form): Json<Credentials>,
) -> Result<Json<UserInfo>, AppError> {
    let current = stored_session(&session).await?;
    let id = midas.sessions().ensure(current.as_ref());
    let user = midas.login(&id, &form.username, &form.password).await?;
    remember(&session, current, &id).await?;
    Ok(Json(user))
}

async fn logout<S: UserStore, M: MarketData>(
    State(midas): AppState<S, M>,
    session: Session,
) -> Result<StatusCode, AppError> {
    if let Some(id) = stored_session(&session).await? {
        midas.logout(&id);
    }
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me<S: UserStore, M: MarketData>(
    State(midas): AppState<S, M>,
    session: Session,
) -> Result<Json<Option<UserInfo>>, AppError> {
    let user = match stored_session(&session).await? {
        Some(id) => midas.current_user(&id).await?,
        None => None,
    };
    Ok(Json(user))
}

async fn watchlist<S: UserStore, M: MarketData>(
    State(midas): AppState<S, M>,
    session: Session,
) -> Result<Json<Vec<Symbol>>, AppError> {
    let id = signed_in_session(&session).await?;
    Ok(Json(midas.watchlist(&id).await?))
}

async fn ticker<S: UserStore, M: MarketData>(
    State(midas): AppState<S, M>,
    session: Session,
    Json(request): Json<TickerRequest>,
) -> Result<Json<TickerLookup>, AppError> {
    let id = signed_in_session(&session).await?;
    let lookup = midas
        .lookup_ticker(&id, &request.ticker, request.interval)
        .await?;
    Ok(Json(lookup))
}

/// Build the application router with its cookie session layer.
pub fn router<S, M, T>(midas: Arc<Midas<S, M>>, session_store: T, idle_timeout: Duration) -> Router
where
    S: UserStore,
    M: MarketData,
    T: SessionStore + Clone,
{
    let idle_secs = i64::try_from(idle_timeout.as_secs()).unwrap_or(i64::MAX);
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // Set to true in production with HTTPS
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(idle_secs)));

    Router::new()
        .route("/api/auth/register", post(register::<S, M>))
        .route("/api/auth/login-password", post(login::<S, M>))
        .route("/api/auth/logout", post(logout::<S, M>))
        .route("/api/auth/me", get(me::<S, M>))
        .route("/api/watchlist", get(watchlist::<S, M>))
        .route("/api/ticker", post(ticker::<S, M>))
        .with_state(midas)
        .layer(session_layer)
}
