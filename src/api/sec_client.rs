use chrono::{NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{get_text, http_client, ApiError, ApiRateLimiter};
use crate::models::{CompanyTicker, Config};

const COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";
const STATEMENT_ARCHIVE_BASE_URL: &str = "https://www.sec.gov/files/dera/data/financial-statement-data-sets/";

const COMPANY_TICKER_KEYS: [&str; 3] = ["cik_str", "ticker", "title"];

#[derive(Debug, Deserialize)]
struct CompanyTickerRecord {
    cik_str: i64,
    ticker: String,
    title: String,
}

/// SEC EDGAR client. The SEC rejects requests without a descriptive User-Agent.
pub struct SecClient {
    client: Client,
    company_tickers_url: String,
    archive_base_url: String,
    rate_limiter: ApiRateLimiter,
}

impl SecClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        Self::with_urls(
            &config.sec_user_agent,
            COMPANY_TICKERS_URL,
            STATEMENT_ARCHIVE_BASE_URL,
            Duration::from_secs(2),
        )
    }

    pub fn with_urls(
        user_agent: &str,
        company_tickers_url: &str,
        archive_base_url: &str,
        wait: Duration,
    ) -> Result<Self, ApiError> {
        let mut archive_base_url = archive_base_url.to_string();
        if !archive_base_url.ends_with('/') {
            archive_base_url.push('/');
        }

        Ok(Self {
            client: http_client(user_agent)?,
            company_tickers_url: company_tickers_url.to_string(),
            archive_base_url,
            rate_limiter: ApiRateLimiter::new(wait),
        })
    }

    pub fn archive_base_url(&self) -> &str {
        &self.archive_base_url
    }

    pub async fn get_company_tickers(&self) -> Result<Vec<CompanyTicker>, ApiError> {
        info!("📋 Fetching SEC company tickers");
        self.rate_limiter.wait().await;
        let text = get_text(&self.client, Url::parse(&self.company_tickers_url)?).await?;
        parse_company_tickers(&text, Utc::now().date_naive())
    }

    /// HEAD the archive URL; true when the SEC serves it.
    pub async fn archive_available(&self, url: &str) -> Result<bool, ApiError> {
        self.rate_limiter.wait().await;
        let response = self.client.head(Url::parse(url)?).send().await?;
        debug!("HEAD {} -> {}", url, response.status());
        Ok(response.status() == StatusCode::OK)
    }
}

/// `company_tickers.json` is an object keyed by row number; every record must
/// carry exactly `cik_str`, `ticker` and `title`.
pub(crate) fn parse_company_tickers(text: &str, capture_date: NaiveDate) -> Result<Vec<CompanyTicker>, ApiError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let records = value
        .as_object()
        .ok_or_else(|| ApiError::Format("expected an object of company records".to_string()))?;

    let expected: BTreeSet<&str> = COMPANY_TICKER_KEYS.into_iter().collect();
    let mut tickers = Vec::with_capacity(records.len());
    for (key, record) in records {
        let found: BTreeSet<&str> = record
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        if found != expected {
            return Err(ApiError::Format(format!(
                "record {} has keys {:?}, expected {:?}",
                key, found, expected
            )));
        }

        let record: CompanyTickerRecord = serde_json::from_value(record.clone())?;
        tickers.push(CompanyTicker {
            cik_str: record.cik_str,
            ticker: record.ticker,
            title: record.title,
            capture_date,
        });
    }

    Ok(tickers)
}
