use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::models::{DataSource, EarningsRow, PriceRow};
use crate::reconcile::PullMode;

pub mod alpha_vantage_client;
pub mod iex_client;
pub mod sec_client;
pub mod wikipedia_client;
pub mod yahoo_client;

pub use alpha_vantage_client::{AlphaVantageClient, ListingState};
pub use iex_client::IexClient;
pub use sec_client::SecClient;
pub use wikipedia_client::WikipediaClient;
pub use yahoo_client::YahooClient;

/// Errors raised while talking to a data vendor
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Error or throttling message delivered with a 200 response
    #[error("provider error: {0}")]
    Provider(String),

    #[error("response does not conform to the expected format: {0}")]
    Format(String),
}

impl From<csv::Error> for ApiError {
    fn from(e: csv::Error) -> Self {
        ApiError::Format(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Format(e.to_string())
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Fixed spacing between requests to one vendor
pub struct ApiRateLimiter {
    limiter: Option<DirectLimiter>,
}

impl ApiRateLimiter {
    /// One request per `period`; a zero period disables the wait.
    pub fn new(period: Duration) -> Self {
        Self {
            limiter: Quota::with_period(period).map(RateLimiter::direct),
        }
    }

    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Daily price history from a vendor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn data_source(&self) -> DataSource;

    /// Bars for `symbol`, newest first
    async fn fetch_daily(&self, symbol: &str, mode: PullMode) -> Result<Vec<PriceRow>, ApiError>;
}

/// Quarterly earnings from a vendor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EarningsSource: Send + Sync {
    /// Quarterly earnings for `symbol`, most recently reported first
    async fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsRow>, ApiError>;
}

pub(crate) fn http_client(user_agent: &str) -> Result<Client, ApiError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(user_agent)
        .build()?)
}

/// GET `url` and return the body, treating any non-2xx status as an error.
pub(crate) async fn get_text(client: &Client, url: Url) -> Result<String, ApiError> {
    debug!("Making request to: {}", redact(&url));

    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(ApiError::Status {
            url: redact(&url),
            status: response.status().as_u16(),
        });
    }

    Ok(response.text().await?)
}

/// Strip credentials from a URL before it is logged.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apikey" || k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        clean.query_pairs_mut().clear().extend_pairs(pairs);
    }
    clean.to_string()
}
