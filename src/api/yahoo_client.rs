//! Yahoo Finance v8 chart client, used for index history.

use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;
use url::Url;

use super::{get_text, http_client, ApiError, ApiRateLimiter};
use crate::models::{DataSource, PriceRow};

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

pub struct YahooClient {
    client: Client,
    base_url: String,
    rate_limiter: ApiRateLimiter,
}

impl YahooClient {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, Duration::from_secs(1))
    }

    pub fn with_base_url(base_url: &str, wait: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: http_client("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: ApiRateLimiter::new(wait),
        })
    }

    /// Daily bars for `symbol` between `start` and `end` inclusive, newest first.
    /// Rows are stamped with `stored_symbol` (e.g. `GSPC` for `^GSPC`).
    pub async fn get_history(
        &self,
        symbol: &str,
        stored_symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRow>, ApiError> {
        info!("📊 Fetching {} history {} to {} from Yahoo", symbol, start, end);

        let start_ts = start.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp()).unwrap_or(0);
        let end_ts = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(start_ts);

        let mut url = Url::parse(&format!("{}/v8/finance/chart/{}", self.base_url, symbol))?;
        url.query_pairs_mut()
            .append_pair("period1", &start_ts.to_string())
            .append_pair("period2", &end_ts.to_string())
            .append_pair("interval", "1d")
            .append_pair("includeAdjustedClose", "true");

        self.rate_limiter.wait().await;
        let text = get_text(&self.client, url).await?;
        let response: ChartResponse = serde_json::from_str(&text)?;
        parse_chart(stored_symbol, response, Utc::now().date_naive())
    }
}

fn parse_chart(stored_symbol: &str, response: ChartResponse, capture_date: NaiveDate) -> Result<Vec<PriceRow>, ApiError> {
    let result = response.chart.result.ok_or_else(|| match response.chart.error {
        Some(err) => ApiError::Provider(format!("{}: {}", err.code, err.description)),
        None => ApiError::Format("empty result with no error".to_string()),
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Format("result array is empty".to_string()))?;

    // No timestamps means no trading days in the range
    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Format("no quote data".to_string()))?;
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let n = timestamps.len();
    let aligned = quote.open.len() == n
        && quote.high.len() == n
        && quote.low.len() == n
        && quote.close.len() == n
        && quote.volume.len() == n
        && adj_closes.as_ref().map_or(true, |a| a.len() == n);
    if !aligned {
        return Err(ApiError::Format(
            "quote columns do not line up with timestamps".to_string(),
        ));
    }

    let mut rows = Vec::with_capacity(n);
    for (i, &ts) in timestamps.iter().enumerate() {
        let date_stamp = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| ApiError::Format(format!("invalid timestamp: {ts}")))?;

        // Holidays and partial sessions come back as nulls
        let Some(close) = quote.close[i] else { continue };
        let adjusted_close = adj_closes.as_ref().and_then(|a| a[i]).unwrap_or(close);

        rows.push(PriceRow {
            symbol: stored_symbol.to_string(),
            date_stamp,
            open: quote.open[i].unwrap_or(close),
            high: quote.high[i].unwrap_or(close),
            low: quote.low[i].unwrap_or(close),
            close,
            adjusted_close,
            volume: quote.volume[i].unwrap_or(0) as i64,
            dividend_amount: 0.0,
            split_coefficient: 1.0,
            capture_date,
            data_source: DataSource::Yahoo,
        });
    }

    rows.sort_by(|a, b| b.date_stamp.cmp(&a.date_stamp));
    Ok(rows)
}
