//! # Alpha Vantage client
//!
//! Calls the `query` endpoint with `TIME_SERIES_INTRADAY` (compact output) for
//! intraday intervals and `TIME_SERIES_DAILY` / `WEEKLY` / `MONTHLY` otherwise.
//!
//! Alpha Vantage answers most failures with HTTP 200 and a JSON body, so the
//! body decides the outcome:
//!
//! | Body | Result |
//! |------|--------|
//! | `"Meta Data"` + a `"... Time Series ..."` object | [`TimeSeries`] with the symbol from `"2. Symbol"`, upper-cased |
//! | `"Error Message"` | [`LookupError::NotFound`] (unknown ticker) |
//! | `"Note"` / `"Information"` | [`LookupError::Upstream`] (rate limit, bad key) |
//! | anything else | [`LookupError::Upstream`] |

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use store::Symbol;

use super::{DataPoint, Interval, LookupError, MarketData, TimeSeries};

/// Alpha Vantage time-series client.
#[derive(Clone, Debug)]
pub struct AlphaVantage {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantage {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Midas")
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

fn function(interval: Interval) -> &'static str {
    match interval {
        Interval::Daily => "TIME_SERIES_DAILY",
        Interval::Weekly => "TIME_SERIES_WEEKLY",
        Interval::Monthly => "TIME_SERIES_MONTHLY",
        _ => "TIME_SERIES_INTRADAY",
    }
}

fn upstream(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Upstream(e.to_string())
    }
}

impl MarketData for AlphaVantage {
    async fn lookup(&self, symbol: &str, interval: Interval) -> Result<TimeSeries, LookupError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(LookupError::NotFound(String::new()));
        }

        let mut query = vec![
            ("function", function(interval)),
            ("symbol", symbol),
            ("outputsize", "compact"),
            ("apikey", self.api_key.as_str()),
        ];
        if interval.is_intraday() {
            query.push(("interval", interval.as_str()));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(upstream)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Upstream(format!("HTTP {}", status)));
        }

        let body: Value = response.json().await.map_err(upstream)?;
        parse_series(symbol, interval, &body)
    }
}

/// Turn an Alpha Vantage response body into a series.
fn parse_series(requested: &str, interval: Interval, body: &Value) -> Result<TimeSeries, LookupError> {
    if body.get("Error Message").is_some() {
        return Err(LookupError::NotFound(requested.to_string()));
    }
    for key in ["Note", "Information"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return Err(LookupError::Upstream(message.to_string()));
        }
    }

    let symbol = body
        .get("Meta Data")
        .and_then(|meta| meta.get("2. Symbol"))
        .and_then(Value::as_str)
        .and_then(|s| Symbol::parse(&s.to_uppercase()))
        .ok_or_else(|| LookupError::Upstream("response has no symbol metadata".to_string()))?;

    let series = body
        .as_object()
        .and_then(|obj| {
            obj.iter()
                .find(|(key, _)| key.contains("Time Series"))
                .map(|(_, value)| value)
        })
        .and_then(Value::as_object)
        .ok_or_else(|| LookupError::Upstream("response has no time series".to_string()))?;

    let mut points = series
        .iter()
        .map(|(time, sample)| parse_point(time, sample))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| LookupError::Upstream("malformed time series sample".to_string()))?;
    points.sort_by(|a, b| a.time.cmp(&b.time));

    Ok(TimeSeries {
        symbol,
        interval,
        points,
    })
}

fn parse_point(time: &str, sample: &Value) -> Option<DataPoint> {
    let field = |name: &str| sample.get(name)?.as_str()?.parse::<f64>().ok();
    Some(DataPoint {
        time: time.to_string(),
        open: field("1. open")?,
        high: field("2. high")?,
        low: field("3. low")?,
        close: field("4. close")?,
        volume: sample.get("5. volume")?.as_str()?.parse().ok()?,
    })
}
