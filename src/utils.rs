use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use crate::api::ApiError;

/// Initialize the global tracing subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("equity_loader=info,update_sp500=info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    // A subscriber may already be installed (e.g. by a test harness)
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Parse a vendor `YYYY-MM-DD` date
pub fn parse_vendor_date(value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| ApiError::Format(format!("invalid date '{}': {}", value, e)))
}

/// Like [`parse_vendor_date`] but blanks and the literal `null` mean no date.
pub fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match value.map(str::trim) {
        None | Some("") | Some("null") | Some("None") => Ok(None),
        Some(v) => parse_vendor_date(v).map(Some),
    }
}

/// Parse a database date column stored as text
pub fn parse_db_date(value: Option<String>) -> anyhow::Result<Option<NaiveDate>> {
    value
        .map(|v| {
            // Timestamps written by other tools carry a time part
            let day = v.get(..10).unwrap_or(v.as_str());
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("invalid date '{}' in database: {}", v, e))
        })
        .transpose()
}
