mod routes;
mod session_store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api::db::PgStore;
use api::market::{AlphaVantage, FixedMarketData, MarketData};
use api::{MemoryStore, Midas, Settings, UserStore};
use session_store::BoundedMemoryStore;
use tower_sessions::session_store::ExpiredDeletion;
use tower_sessions_sqlx_store::PostgresStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new().context("Failed to load settings")?;

    match settings.database.url.as_deref() {
        Some(url) => {
            let pool = api::db::get_pool(url)
                .await
                .context("Failed to connect to database")?;
            let store = PgStore::new(pool.clone());
            store.migrate().await.context("Failed to run migrations")?;

            let cookies = PostgresStore::new(pool.clone());
            cookies
                .migrate()
                .await
                .context("Failed to create session table")?;
            with_market(store, cookies, &settings).await
        }
        None => {
            tracing::warn!("No database configured, accounts are kept in memory");
            let cookies = BoundedMemoryStore::new(settings.sessions.max_sessions);
            with_market(MemoryStore::new(), cookies, &settings).await
        }
    }
}

async fn with_market<S, T>(store: S, cookies: T, settings: &Settings) -> anyhow::Result<()>
where
    S: UserStore,
    T: ExpiredDeletion + Clone,
{
    let market = &settings.market_data;
    match market.api_key.clone() {
        Some(key) => {
            let gateway = AlphaVantage::new(market.base_url.clone(), key, market.timeout())
                .context("Failed to build market data client")?;
            launch_server(store, gateway, cookies, settings).await
        }
        None => {
            tracing::warn!("No market data API key configured, every ticker lookup will fail");
            launch_server(store, FixedMarketData::new(), cookies, settings).await
        }
    }
}

async fn launch_server<S, M, T>(
    store: S,
    market: M,
    cookies: T,
    settings: &Settings,
) -> anyhow::Result<()>
where
    S: UserStore,
    M: MarketData,
    T: ExpiredDeletion + Clone,
{
    let midas = Arc::new(Midas::new(store, market, settings)?);

    // Idle sessions are also dropped lazily on access; this keeps the table small.
    let sweeper = Arc::clone(&midas);
    let expired = cookies.clone();
    let every = settings.sessions.sweep_interval().max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            sweeper.sessions().sweep_expired();
            if let Err(e) = expired.delete_expired().await {
                tracing::error!("Failed to delete expired cookie sessions: {}", e);
            }
        }
    });

    let router = routes::router(midas, cookies, settings.sessions.idle_timeout());

    let addr = &settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
