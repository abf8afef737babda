use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{get_text, http_client, ApiError, ApiRateLimiter, EarningsSource, PriceSource};
use crate::models::{open_ended_date, Config, DataSource, EarningsRow, ListingRow, PriceRow};
use crate::reconcile::PullMode;
use crate::utils::{parse_optional_date, parse_vendor_date};

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

const DAILY_ADJUSTED_COLUMNS: [&str; 9] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "adjusted_close",
    "volume",
    "dividend_amount",
    "split_coefficient",
];

const LISTING_COLUMNS: [&str; 7] = [
    "symbol",
    "name",
    "exchange",
    "assetType",
    "ipoDate",
    "delistingDate",
    "status",
];

/// Which side of the listing status endpoint to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingState {
    Active,
    Delisted,
}

impl ListingState {
    fn as_param(&self) -> &'static str {
        match self {
            ListingState::Active => "active",
            ListingState::Delisted => "delisted",
        }
    }
}

/// Daily adjusted CSV row
#[derive(Debug, Deserialize)]
struct DailyAdjustedRecord {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adjusted_close: f64,
    volume: f64,
    dividend_amount: f64,
    split_coefficient: f64,
}

#[derive(Debug, Deserialize)]
struct EarningsResponse {
    #[serde(rename = "quarterlyEarnings")]
    quarterly_earnings: Option<Vec<QuarterlyEarning>>,
}

#[derive(Debug, Deserialize)]
struct QuarterlyEarning {
    #[serde(rename = "fiscalDateEnding")]
    fiscal_date_ending: String,
    #[serde(rename = "reportedDate")]
    reported_date: String,
    #[serde(rename = "reportedEPS")]
    reported_eps: Option<String>,
    #[serde(rename = "estimatedEPS")]
    estimated_eps: Option<String>,
    surprise: Option<String>,
    #[serde(rename = "surprisePercentage")]
    surprise_percentage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingRecord {
    symbol: String,
    name: Option<String>,
    exchange: String,
    #[serde(rename = "assetType")]
    asset_type: String,
    #[serde(rename = "ipoDate")]
    ipo_date: Option<String>,
    #[serde(rename = "delistingDate")]
    delisting_date: Option<String>,
    status: String,
}

/// Alpha Vantage client for daily adjusted prices, earnings and listing status
pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: ApiRateLimiter,
}

impl AlphaVantageClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::with_base_url(
            config.alpha_vantage_key()?,
            DEFAULT_BASE_URL,
            Duration::from_secs(config.av_wait_seconds),
        )?)
    }

    /// Client against an arbitrary endpoint, spacing calls by `wait`
    pub fn with_base_url(api_key: &str, base_url: &str, wait: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: http_client("equity-loader/0.1")?,
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            rate_limiter: ApiRateLimiter::new(wait),
        })
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<String, ApiError> {
        let mut url = Url::parse(&self.base_url)?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("apikey", &self.api_key);

        self.rate_limiter.wait().await;
        let text = get_text(&self.client, url).await?;
        check_provider_message(&text)?;
        Ok(text)
    }

    /// Daily adjusted bars, newest first
    pub async fn get_daily_adjusted(&self, symbol: &str, mode: PullMode) -> Result<Vec<PriceRow>, ApiError> {
        let outputsize = match mode {
            PullMode::Compact => "compact",
            PullMode::Full => "full",
        };
        info!("📊 Fetching {} daily prices for {} from Alpha Vantage", outputsize, symbol);

        let text = self
            .query(&[
                ("function", "TIME_SERIES_DAILY_ADJUSTED"),
                ("symbol", symbol),
                ("outputsize", outputsize),
                ("datatype", "csv"),
            ])
            .await?;

        let rows = parse_daily_adjusted_csv(symbol, &text, Utc::now().date_naive())?;
        debug!("Parsed {} daily rows for {}", rows.len(), symbol);
        Ok(rows)
    }

    /// Quarterly earnings, most recently reported first
    pub async fn get_earnings(&self, symbol: &str) -> Result<Vec<EarningsRow>, ApiError> {
        info!("📊 Fetching earnings for {} from Alpha Vantage", symbol);
        let text = self.query(&[("function", "EARNINGS"), ("symbol", symbol)]).await?;
        parse_earnings_json(symbol, &text, Utc::now().date_naive())
    }

    /// Stock listings as of `date`; other asset types are dropped.
    pub async fn get_listing_status(&self, date: NaiveDate, state: ListingState) -> Result<Vec<ListingRow>, ApiError> {
        info!("📋 Fetching {} listings as of {} from Alpha Vantage", state.as_param(), date);
        let date_param = date.format("%Y-%m-%d").to_string();
        let text = self
            .query(&[
                ("function", "LISTING_STATUS"),
                ("date", &date_param),
                ("state", state.as_param()),
            ])
            .await?;
        parse_listing_csv(&text, state, Utc::now().date_naive())
    }
}

#[async_trait]
impl PriceSource for AlphaVantageClient {
    fn data_source(&self) -> DataSource {
        DataSource::AlphaVantage
    }

    async fn fetch_daily(&self, symbol: &str, mode: PullMode) -> Result<Vec<PriceRow>, ApiError> {
        self.get_daily_adjusted(symbol, mode).await
    }
}

#[async_trait]
impl EarningsSource for AlphaVantageClient {
    async fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsRow>, ApiError> {
        self.get_earnings(symbol).await
    }
}

/// Alpha Vantage answers bad keys, unknown symbols and throttling with HTTP 200
/// and a one-key JSON object, even when CSV was requested.
fn check_provider_message(text: &str) -> Result<(), ApiError> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return Ok(());
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };
    for key in ["Error Message", "Note", "Information"] {
        if let Some(message) = value.get(key).and_then(|m| m.as_str()) {
            return Err(ApiError::Provider(message.to_string()));
        }
    }
    Ok(())
}

fn check_headers(reader: &mut csv::Reader<&[u8]>, expected: &[&str]) -> Result<(), ApiError> {
    let headers = reader.headers()?;
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    if found != expected {
        return Err(ApiError::Format(format!(
            "expected columns {:?}, found {:?}",
            expected, found
        )));
    }
    Ok(())
}

pub(crate) fn parse_daily_adjusted_csv(
    symbol: &str,
    text: &str,
    capture_date: NaiveDate,
) -> Result<Vec<PriceRow>, ApiError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    check_headers(&mut reader, &DAILY_ADJUSTED_COLUMNS)?;

    let mut rows = Vec::new();
    for record in reader.deserialize::<DailyAdjustedRecord>() {
        let record = record?;
        rows.push(PriceRow {
            symbol: symbol.to_string(),
            date_stamp: parse_vendor_date(&record.timestamp)?,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            adjusted_close: record.adjusted_close,
            volume: record.volume as i64,
            dividend_amount: record.dividend_amount,
            split_coefficient: record.split_coefficient,
            capture_date,
            data_source: DataSource::AlphaVantage,
        });
    }

    rows.sort_by(|a, b| b.date_stamp.cmp(&a.date_stamp));
    Ok(rows)
}

pub(crate) fn parse_earnings_json(
    symbol: &str,
    text: &str,
    capture_date: NaiveDate,
) -> Result<Vec<EarningsRow>, ApiError> {
    let response: EarningsResponse = serde_json::from_str(text)?;
    let quarters = response
        .quarterly_earnings
        .ok_or_else(|| ApiError::Format("missing quarterlyEarnings".to_string()))?;

    let mut rows = quarters
        .into_iter()
        .map(|q| {
            Ok(EarningsRow {
                symbol: symbol.to_string(),
                date_stamp: parse_vendor_date(&q.reported_date)?,
                report_date: parse_vendor_date(&q.fiscal_date_ending)?,
                reported_eps: coerce_number(q.reported_eps.as_deref()),
                estimated_eps: coerce_number(q.estimated_eps.as_deref()),
                eps_surprise: coerce_number(q.surprise.as_deref()),
                eps_surprise_perc: coerce_number(q.surprise_percentage.as_deref()),
                capture_date,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    rows.sort_by(|a, b| b.date_stamp.cmp(&a.date_stamp));
    Ok(rows)
}

pub(crate) fn parse_listing_csv(
    text: &str,
    state: ListingState,
    capture_date: NaiveDate,
) -> Result<Vec<ListingRow>, ApiError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    check_headers(&mut reader, &LISTING_COLUMNS)?;

    let mut rows = Vec::new();
    for record in reader.deserialize::<ListingRecord>() {
        let record = record?;
        if record.asset_type != "Stock" {
            continue;
        }

        let delist_date = match state {
            ListingState::Active => Some(open_ended_date()),
            ListingState::Delisted => parse_optional_date(record.delisting_date.as_deref())?,
        };

        rows.push(ListingRow {
            symbol: record.symbol,
            name: record.name.filter(|n| !n.is_empty()),
            exchange: record.exchange,
            ipo_date: parse_optional_date(record.ipo_date.as_deref())?,
            delist_date,
            status: record.status,
            capture_date,
        });
    }
    Ok(rows)
}

/// Numeric string to number; "None", blanks and junk become null.
fn coerce_number(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
