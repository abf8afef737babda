//! Common test utilities and helpers


pub use database::TestDatabase;

/// Test data utilities
pub mod test_data {
    use chrono::NaiveDate;
    use equity_loader::models::{DataSource, PriceRow};

    pub const AV_CSV_HEADER: &str =
        "timestamp,open,high,low,close,adjusted_close,volume,dividend_amount,split_coefficient";

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Stored bar as an earlier run would have written it
    pub fn stored_bar(symbol: &str, d: &str, adjusted_close: f64, source: DataSource) -> PriceRow {
        PriceRow {
            symbol: symbol.to_string(),
            date_stamp: date(d),
            open: adjusted_close,
            high: adjusted_close + 1.0,
            low: adjusted_close - 1.0,
            close: adjusted_close,
            adjusted_close,
            volume: 1_000_000,
            dividend_amount: 0.0,
            split_coefficient: 1.0,
            capture_date: date("2021-06-01"),
            data_source: source,
        }
    }

    /// Alpha Vantage daily adjusted CSV body, rows given as (date, adjusted close)
    pub fn av_daily_csv(rows: &[(&str, f64)]) -> String {
        let mut body = format!("{}\r\n", AV_CSV_HEADER);
        for (d, adj) in rows {
            body.push_str(&format!(
                "{},{:.2},{:.2},{:.2},{:.2},{:.4},1000000,0.0000,1.0\r\n",
                d,
                adj,
                adj + 1.0,
                adj - 1.0,
                adj,
                adj
            ));
        }
        body
    }

    /// IEX chart JSON body, rows given as (date, close, uClose, fClose)
    pub fn iex_chart_json(rows: &[(&str, f64, f64, f64)]) -> String {
        let bars: Vec<serde_json::Value> = rows
            .iter()
            .map(|(d, close, u_close, f_close)| {
                serde_json::json!({
                    "date": d,
                    "open": close,
                    "high": close,
                    "low": close,
                    "close": close,
                    "uClose": u_close,
                    "fClose": f_close,
                    "uVolume": 1200000,
                    "key": "KO"
                })
            })
            .collect();
        serde_json::Value::Array(bars).to_string()
    }
}

/// Logging utilities for tests
pub mod logging {
    use std::sync::Once;
    use tracing::{debug, info};

    static INIT: Once = Once::new();

    /// Initialize test logging
    pub fn init_test_logging() {
        INIT.call_once(|| {
            let _ = tracing::subscriber::set_global_default(
                tracing_subscriber::fmt()
                    .with_env_filter("equity_loader=debug,main=debug")
                    .with_test_writer()
                    .finish(),
            );
        });
    }

    /// Log test step
    pub fn log_test_step(step: &str) {
        info!("🧪 Test Step: {}", step);
    }

    /// Log test data
    pub fn log_test_data<T: std::fmt::Debug>(label: &str, data: &T) {
        debug!("📊 {}: {:?}", label, data);
    }
}
