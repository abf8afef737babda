use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{get_text, http_client, ApiError, ApiRateLimiter, PriceSource};
use crate::models::{Config, DataSource, PriceRow};
use crate::reconcile::PullMode;
use crate::utils::parse_vendor_date;

const CLOUD_BASE_URL: &str = "https://cloud.iexapis.com/stable";
const SANDBOX_BASE_URL: &str = "https://sandbox.iexapis.com/stable";

/// Implied split ratios below this are dividend adjustment noise, not splits.
const MIN_SPLIT_RATIO: f64 = 1.2;

/// One bar of the IEX chart endpoint
#[derive(Debug, Deserialize)]
struct ChartBar {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    /// Unadjusted close
    #[serde(rename = "uClose")]
    u_close: Option<f64>,
    /// Close adjusted for splits and dividends
    #[serde(rename = "fClose")]
    f_close: Option<f64>,
    #[serde(rename = "uVolume")]
    u_volume: Option<f64>,
}

/// IEX Cloud chart client
pub struct IexClient {
    client: Client,
    token: String,
    base_url: String,
    rate_limiter: ApiRateLimiter,
}

impl IexClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let base_url = if config.iex_sandbox { SANDBOX_BASE_URL } else { CLOUD_BASE_URL };
        Ok(Self::with_base_url(
            config.iex_token()?,
            base_url,
            Duration::from_millis(config.iex_wait_ms),
        )?)
    }

    pub fn with_base_url(token: &str, base_url: &str, wait: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: http_client("equity-loader/0.1")?,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: ApiRateLimiter::new(wait),
        })
    }

    /// Daily bars for `range` (`3m`, `max`, ...), newest first
    pub async fn get_chart(&self, symbol: &str, range: &str) -> Result<Vec<PriceRow>, ApiError> {
        info!("📊 Fetching {} chart for {} from IEX", range, symbol);

        let mut url = Url::parse(&format!("{}/stock/{}/chart/{}", self.base_url, symbol, range))?;
        url.query_pairs_mut().append_pair("token", &self.token);

        self.rate_limiter.wait().await;
        let text = get_text(&self.client, url).await?;
        let rows = parse_chart_json(symbol, &text, Utc::now().date_naive())?;
        debug!("Parsed {} IEX bars for {}", rows.len(), symbol);
        Ok(rows)
    }
}

#[async_trait]
impl PriceSource for IexClient {
    fn data_source(&self) -> DataSource {
        DataSource::Iex
    }

    async fn fetch_daily(&self, symbol: &str, mode: PullMode) -> Result<Vec<PriceRow>, ApiError> {
        let range = match mode {
            PullMode::Compact => "3m",
            PullMode::Full => "max",
        };
        self.get_chart(symbol, range).await
    }
}

pub(crate) fn parse_chart_json(symbol: &str, text: &str, capture_date: NaiveDate) -> Result<Vec<PriceRow>, ApiError> {
    let bars: Vec<ChartBar> = serde_json::from_str(text)?;

    let mut dated = bars
        .into_iter()
        .map(|bar| Ok((parse_vendor_date(&bar.date)?, bar)))
        .collect::<Result<Vec<(NaiveDate, ChartBar)>, ApiError>>()?;
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    let mut rows = Vec::with_capacity(dated.len());
    for (i, (date_stamp, bar)) in dated.iter().enumerate() {
        let (close, u_close, f_close) = match (bar.close, bar.u_close, bar.f_close) {
            (Some(c), Some(u), Some(f)) => (c, u, f),
            _ => {
                return Err(ApiError::Format(format!(
                    "{} bar on {} is missing close prices",
                    symbol, date_stamp
                )))
            }
        };
        let previous = dated
            .get(i + 1)
            .and_then(|(_, p)| Some((p.close?, p.u_close?, p.f_close?)));
        let (split_coefficient, dividend_amount) = implied_corporate_action(u_close, f_close, previous);

        rows.push(PriceRow {
            symbol: symbol.to_string(),
            date_stamp: *date_stamp,
            open: bar.open.unwrap_or(close),
            high: bar.high.unwrap_or(close),
            low: bar.low.unwrap_or(close),
            close,
            adjusted_close: u_close,
            volume: bar.u_volume.unwrap_or(0.0) as i64,
            dividend_amount,
            split_coefficient,
            capture_date,
            data_source: DataSource::Iex,
        });
    }

    Ok(rows)
}

/// Infer (split coefficient, dividend amount) for a bar from its unadjusted and
/// fully adjusted close and those of the previous trading day.
///
/// IEX only reports adjusted series, so an event shows up as the first day on
/// which unadjusted and adjusted closes agree while the day before they still
/// differ. The ratio of the previous day's unadjusted to split-adjusted close
/// gives the split; without a split, the gap between unadjusted and fully
/// adjusted close gives the dividend.
pub fn implied_corporate_action(u_close: f64, f_close: f64, previous: Option<(f64, f64, f64)>) -> (f64, f64) {
    let Some((prev_close, prev_u_close, prev_f_close)) = previous else {
        return (1.0, 0.0);
    };

    let event = u_close - f_close == 0.0 && prev_u_close - prev_f_close != 0.0;
    if !event {
        return (1.0, 0.0);
    }

    let raw_split = if prev_close != 0.0 { prev_u_close / prev_close } else { 1.0 };
    if raw_split.abs() < MIN_SPLIT_RATIO {
        (1.0, prev_u_close - prev_f_close)
    } else {
        (raw_split, 0.0)
    }
}
