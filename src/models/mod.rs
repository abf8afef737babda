use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Placeholder for "no history stored yet"; a worklist row carrying this date gets a full pull.
pub fn default_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1980, 12, 31).unwrap_or_default()
}

/// Delist / membership end date used for rows that are still open.
pub fn open_ended_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9998, 12, 31).unwrap_or_default()
}

/// Vendor a price row was captured from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSource {
    AlphaVantage,
    Iex,
    Yahoo,
}

impl DataSource {
    /// Tag stored in the `data_source` column
    pub fn tag(&self) -> &'static str {
        match self {
            DataSource::AlphaVantage => "AV",
            DataSource::Iex => "IEX",
            DataSource::Yahoo => "yfnc",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// One daily bar in the shared `shareprices_daily` layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub symbol: String,
    pub date_stamp: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: i64,
    pub dividend_amount: f64,
    pub split_coefficient: f64,
    pub capture_date: NaiveDate,
    pub data_source: DataSource,
}

/// Quarterly earnings as reported by the vendor.
///
/// `date_stamp` is the date the figures were reported, `report_date` the fiscal
/// period end. Numeric fields the vendor sends as "None" are stored as null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsRow {
    pub symbol: String,
    pub date_stamp: NaiveDate,
    pub report_date: NaiveDate,
    pub reported_eps: Option<f64>,
    pub estimated_eps: Option<f64>,
    pub eps_surprise: Option<f64>,
    pub eps_surprise_perc: Option<f64>,
    pub capture_date: NaiveDate,
}

/// Worklist entry for the price and earnings updaters
#[derive(Debug, Clone, PartialEq)]
pub struct TickerToUpdate {
    pub symbol: String,
    pub last_date_in_db: NaiveDate,
    pub last_adj_close: f64,
    pub last_eps_date: NaiveDate,
}

impl TickerToUpdate {
    /// Build from nullable database columns, filling the defaults for missing history
    pub fn from_nullable(
        symbol: String,
        last_date_in_db: Option<NaiveDate>,
        last_adj_close: Option<f64>,
        last_eps_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            symbol,
            last_date_in_db: last_date_in_db.unwrap_or_else(default_date),
            last_adj_close: last_adj_close.unwrap_or(0.0),
            last_eps_date: last_eps_date.unwrap_or_else(default_date),
        }
    }
}

/// Listing status row (active or delisted security)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRow {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: String,
    pub ipo_date: Option<NaiveDate>,
    pub delist_date: Option<NaiveDate>,
    pub status: String,
    pub capture_date: NaiveDate,
}

/// SEC CIK to ticker mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyTicker {
    pub cik_str: i64,
    pub ticker: String,
    pub title: String,
    pub capture_date: NaiveDate,
}

/// One row of the S&P 500 membership change history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentChange {
    pub date_stamp: NaiveDate,
    pub added_ticker: Option<String>,
    pub added_name: Option<String>,
    pub removed_ticker: Option<String>,
    pub removed_name: Option<String>,
    pub reason: Option<String>,
    pub capture_date: NaiveDate,
}

/// Configuration for the loader jobs
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub alpha_vantage_api_key: Option<String>,
    pub iex_api_token: Option<String>,
    pub iex_sandbox: bool,
    pub sec_user_agent: String,
    pub av_wait_seconds: u64,
    pub iex_wait_ms: u64,
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub av_close_tolerance: f64,
    pub iex_close_tolerance: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "stocks.db".to_string()),
            alpha_vantage_api_key: env_var_opt("ALPHA_VANTAGE_API_KEY"),
            iex_api_token: env_var_opt("IEX_API_TOKEN"),
            iex_sandbox: env_var_bool("IEX_SANDBOX", false),
            sec_user_agent: std::env::var("SEC_USER_AGENT")
                .unwrap_or_else(|_| "equity-loader/0.1 (admin@example.com)".to_string()),
            av_wait_seconds: env_var_parse("AV_WAIT_SECONDS", 15),
            iex_wait_ms: env_var_parse("IEX_WAIT_MS", 100),
            batch_size: env_var_parse("BATCH_SIZE", 350),
            retry_attempts: env_var_parse::<u32>("RETRY_ATTEMPTS", 1).max(1),
            av_close_tolerance: env_var_parse("AV_CLOSE_TOLERANCE", 0.03),
            iex_close_tolerance: env_var_parse("IEX_CLOSE_TOLERANCE", 0.02),
        })
    }

    pub fn alpha_vantage_key(&self) -> anyhow::Result<&str> {
        self.alpha_vantage_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ALPHA_VANTAGE_API_KEY environment variable required"))
    }

    pub fn iex_token(&self) -> anyhow::Result<&str> {
        self.iex_api_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("IEX_API_TOKEN environment variable required"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "stocks.db".to_string(),
            alpha_vantage_api_key: None,
            iex_api_token: None,
            iex_sandbox: false,
            sec_user_agent: "equity-loader/0.1 (admin@example.com)".to_string(),
            av_wait_seconds: 15,
            iex_wait_ms: 100,
            batch_size: 350,
            retry_attempts: 1,
            av_close_tolerance: 0.03,
            iex_close_tolerance: 0.02,
        }
    }
}

fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Accepts the short `t` / `f` flags as well as true/false.
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "t" | "true" | "1" | "yes"))
        .unwrap_or(default)
}
