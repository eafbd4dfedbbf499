//! # Market-data gateway
//!
//! Resolves a ticker and an [`Interval`] into a [`TimeSeries`]. The watchlist
//! only ever sees the canonical symbol from a resolved series, never the raw
//! user input.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`AlphaVantage`] | Live data from the Alpha Vantage `query` endpoint. |
//! | [`FixedMarketData`] | Canned series for tests and for running offline. |

mod alpha_vantage;
mod fixed;

use std::future::Future;

use serde::{Deserialize, Serialize};
use store::Symbol;

pub use alpha_vantage::AlphaVantage;
pub use fixed::FixedMarketData;

/// Sampling interval of a series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1min")]
    OneMin,
    #[serde(rename = "5min")]
    FiveMin,
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "30min")]
    ThirtyMin,
    #[serde(rename = "60min")]
    SixtyMin,
    #[default]
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMin => "1min",
            Interval::FiveMin => "5min",
            Interval::FifteenMin => "15min",
            Interval::ThirtyMin => "30min",
            Interval::SixtyMin => "60min",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        }
    }

    pub fn is_intraday(self) -> bool {
        !matches!(self, Interval::Daily | Interval::Weekly | Interval::Monthly)
    }
}

/// One OHLCV sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Timestamp as reported upstream: "2024-03-01" or "2024-03-01 16:00:00"
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A resolved lookup. Points are ordered oldest first, ready for charting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub symbol: Symbol,
    pub interval: Interval,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("unknown ticker '{0}'")]
    NotFound(String),
    #[error("market data provider failed: {0}")]
    Upstream(String),
    #[error("market data provider timed out")]
    Timeout,
}

impl LookupError {
    /// Whether the user asked for a ticker that does not exist, as opposed to
    /// the provider being unavailable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound(_))
    }
}

/// Source of time-series data.
pub trait MarketData: Send + Sync + 'static {
    fn lookup(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> impl Future<Output = Result<TimeSeries, LookupError>> + Send;
}
