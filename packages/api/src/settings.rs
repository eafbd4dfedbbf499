//! Layered runtime configuration.
//!
//! Defaults are set in code, then overridden by an optional `midas.toml` in the
//! working directory, then by `MIDAS_`-prefixed environment variables using `__`
//! between nested keys (`MIDAS_SESSIONS__MAX_SESSIONS=500`). A `.env` file is
//! loaded first via `dotenvy`.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Database {
    /// Postgres connection string. Without it the server keeps users in memory.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sessions {
    pub idle_timeout_secs: u64,
    pub max_sessions: usize,
    pub sweep_interval_secs: u64,
}

impl Sessions {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Watchlist {
    /// Longest wait for the per-user lock before falling back to optimistic writes.
    pub lock_timeout_ms: u64,
}

impl Watchlist {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketData {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl MarketData {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct Password {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: Server,
    #[serde(default)]
    pub database: Database,
    pub sessions: Sessions,
    pub watchlist: Watchlist,
    pub market_data: MarketData,
    pub password: Password,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server {
                addr: "127.0.0.1:8080".into(),
            },
            database: Database::default(),
            sessions: Sessions {
                idle_timeout_secs: 60 * 30,
                max_sessions: 10_000,
                sweep_interval_secs: 60,
            },
            watchlist: Watchlist {
                lock_timeout_ms: 2_000,
            },
            market_data: MarketData {
                api_key: None,
                base_url: "https://www.alphavantage.co/query".into(),
                timeout_secs: 10,
            },
            password: Password {
                memory_kib: 19_456,
                iterations: 2,
                parallelism: 1,
            },
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Config::builder()
            .set_default("server.addr", defaults.server.addr)?
            .set_default("sessions.idle_timeout_secs", defaults.sessions.idle_timeout_secs)?
            .set_default("sessions.max_sessions", defaults.sessions.max_sessions as u64)?
            .set_default(
                "sessions.sweep_interval_secs",
                defaults.sessions.sweep_interval_secs,
            )?
            .set_default("watchlist.lock_timeout_ms", defaults.watchlist.lock_timeout_ms)?
            .set_default("market_data.base_url", defaults.market_data.base_url)?
            .set_default("market_data.timeout_secs", defaults.market_data.timeout_secs)?
            .set_default("password.memory_kib", defaults.password.memory_kib)?
            .set_default("password.iterations", defaults.password.iterations)?
            .set_default("password.parallelism", defaults.password.parallelism)?
            .add_source(
                File::with_name("midas.toml")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("MIDAS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
