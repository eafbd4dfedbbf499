use std::collections::HashMap;
use std::time::Duration;

use store::Symbol;

use super::{DataPoint, Interval, LookupError, MarketData, TimeSeries};

/// In-memory gateway returning canned series, keyed by upper-cased symbol.
#[derive(Clone, Debug, Default)]
pub struct FixedMarketData {
    series: HashMap<String, Vec<DataPoint>>,
    unavailable: bool,
    delay: Option<Duration>,
}

impl FixedMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `symbol` resolvable, returning `points` for every interval.
    pub fn with_series(mut self, symbol: &str, points: Vec<DataPoint>) -> Self {
        self.series.insert(symbol.trim().to_uppercase(), points);
        self
    }

    /// Fail every lookup as if the provider were down.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Wait this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl MarketData for FixedMarketData {
    async fn lookup(&self, symbol: &str, interval: Interval) -> Result<TimeSeries, LookupError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable {
            return Err(LookupError::Upstream("service unavailable".to_string()));
        }
        let key = symbol.trim().to_uppercase();
        let points = self
            .series
            .get(&key)
            .ok_or_else(|| LookupError::NotFound(symbol.to_string()))?;
        let symbol = Symbol::parse(&key).ok_or_else(|| LookupError::NotFound(String::new()))?;
        Ok(TimeSeries {
            symbol,
            interval,
            points: points.clone(),
        })
    }
}
