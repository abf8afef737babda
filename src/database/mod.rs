use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::models::{
    default_date, open_ended_date, CompanyTicker, ConstituentChange, DataSource, EarningsRow, ListingRow, PriceRow,
    TickerToUpdate,
};
use crate::utils::parse_db_date;

/// Price tables, one per vendor plus the index table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTable {
    AlphaVantage,
    Iex,
    Index,
}

impl PriceTable {
    pub fn for_source(source: DataSource) -> Self {
        match source {
            DataSource::AlphaVantage => PriceTable::AlphaVantage,
            DataSource::Iex => PriceTable::Iex,
            DataSource::Yahoo => PriceTable::Index,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            PriceTable::AlphaVantage => "av_shareprices_daily",
            PriceTable::Iex => "iex_shareprices_daily",
            PriceTable::Index => "shareprices_daily",
        }
    }
}

/// Row counts for the summary printed after each job
pub const SUMMARY_TABLES: [&str; 9] = [
    "tickers",
    "av_shareprices_daily",
    "iex_shareprices_daily",
    "shareprices_daily",
    "av_earnings",
    "active_delisted",
    "company_tickers",
    "sp500_cons",
    "sp500_cons_temp",
];

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tickers (
        symbol TEXT PRIMARY KEY,
        name TEXT,
        added_date DATE DEFAULT CURRENT_DATE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ticker_excl (
        symbol TEXT PRIMARY KEY,
        reason TEXT,
        excluded_date DATE DEFAULT CURRENT_DATE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS av_earnings (
        symbol TEXT NOT NULL,
        date_stamp DATE NOT NULL,
        report_date DATE NOT NULL,
        reported_eps REAL,
        estimated_eps REAL,
        eps_surprise REAL,
        eps_surprise_perc REAL,
        capture_date DATE NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_av_earnings_symbol_date ON av_earnings(symbol, date_stamp)",
    r#"
    CREATE TABLE IF NOT EXISTS active_delisted (
        symbol TEXT NOT NULL,
        name TEXT,
        exchange TEXT NOT NULL,
        ipo_date DATE,
        delist_date DATE,
        status TEXT NOT NULL,
        capture_date DATE NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS company_tickers (
        cik_str INTEGER NOT NULL,
        ticker TEXT NOT NULL,
        title TEXT,
        capture_date DATE NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sp500_cons (
        ticker TEXT NOT NULL,
        name TEXT,
        min_date DATE NOT NULL,
        max_date DATE NOT NULL,
        capture_date DATE NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sp500_cons_temp (
        date_stamp DATE NOT NULL,
        added_ticker TEXT,
        added_name TEXT,
        removed_ticker TEXT,
        removed_name TEXT,
        reason TEXT,
        capture_date DATE NOT NULL
    )
    "#,
];

/// Outcome of merging staged constituent changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstituentMerge {
    pub added: u64,
    pub removed: u64,
}

/// SQLite-backed store for the loader tables
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if missing) the database at `database_path` and ensure the tables exist
    pub async fn new(database_path: &str) -> Result<Self> {
        let filename = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        info!("Connecting to database: {}", filename);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(filename).create_if_missing(true))
            .await
            .with_context(|| format!("failed to open database {}", filename))?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        let database = Self { pool };
        database.create_schema().await?;
        Ok(database)
    }

    async fn create_schema(&self) -> Result<()> {
        for table in [PriceTable::AlphaVantage, PriceTable::Iex, PriceTable::Index] {
            let name = table.table_name();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name} (
                    symbol TEXT NOT NULL,
                    date_stamp DATE NOT NULL,
                    open REAL,
                    high REAL,
                    low REAL,
                    close REAL,
                    adjusted_close REAL,
                    volume INTEGER,
                    dividend_amount REAL,
                    split_coefficient REAL,
                    capture_date DATE NOT NULL,
                    data_source TEXT NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_symbol_date ON {name}(symbol, date_stamp)"
            ))
            .execute(&self.pool)
            .await?;
        }

        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Worklist for the updaters: every ticker in the universe that is not
    /// excluded, with its last stored price date, the adjusted close on that date
    /// (latest capture wins) and its last reported earnings date.
    pub async fn tickers_to_update(&self, table: PriceTable) -> Result<Vec<TickerToUpdate>> {
        let name = table.table_name();
        let rows = sqlx::query(&format!(
            r#"
            SELECT t.symbol,
                (SELECT max(p.date_stamp) FROM {name} p WHERE p.symbol = t.symbol) AS last_date_in_db,
                (SELECT p.adjusted_close FROM {name} p WHERE p.symbol = t.symbol
                    ORDER BY p.date_stamp DESC, p.capture_date DESC, p.rowid DESC LIMIT 1) AS last_adj_close,
                (SELECT max(e.date_stamp) FROM av_earnings e WHERE e.symbol = t.symbol) AS last_eps_date
            FROM tickers t
            WHERE t.symbol NOT IN (SELECT symbol FROM ticker_excl)
            ORDER BY t.symbol
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(TickerToUpdate::from_nullable(
                    r.get::<String, _>("symbol"),
                    parse_db_date(r.get::<Option<String>, _>("last_date_in_db"))?,
                    r.get::<Option<f64>, _>("last_adj_close"),
                    parse_db_date(r.get::<Option<String>, _>("last_eps_date"))?,
                ))
            })
            .collect()
    }

    /// Append price rows in one transaction; returns the number inserted.
    pub async fn insert_price_rows(&self, table: PriceTable, rows: &[PriceRow]) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {} (symbol, date_stamp, open, high, low, close, adjusted_close, volume,
                            dividend_amount, split_coefficient, capture_date, data_source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            table.table_name()
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for row in rows {
            inserted += sqlx::query(&sql)
                .bind(&row.symbol)
                .bind(row.date_stamp)
                .bind(row.open)
                .bind(row.high)
                .bind(row.low)
                .bind(row.close)
                .bind(row.adjusted_close)
                .bind(row.volume)
                .bind(row.dividend_amount)
                .bind(row.split_coefficient)
                .bind(row.capture_date)
                .bind(row.data_source.tag())
                .execute(&mut tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!("Inserted {} rows into {}", inserted, table.table_name());
        Ok(inserted)
    }

    pub async fn max_price_date(&self, table: PriceTable, symbol: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query(&format!(
            "SELECT max(date_stamp) AS last_date FROM {} WHERE symbol = ?",
            table.table_name()
        ))
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;

        parse_db_date(row.get::<Option<String>, _>("last_date"))
    }

    /// Stored bars for `symbol`, newest first
    pub async fn get_price_rows(&self, table: PriceTable, symbol: &str) -> Result<Vec<PriceRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT symbol, date_stamp, open, high, low, close, adjusted_close, volume,
                   dividend_amount, split_coefficient, capture_date, data_source
            FROM {}
            WHERE symbol = ?
            ORDER BY date_stamp DESC, capture_date DESC
            "#,
            table.table_name()
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let data_source = match r.get::<String, _>("data_source").as_str() {
                    "AV" => DataSource::AlphaVantage,
                    "IEX" => DataSource::Iex,
                    _ => DataSource::Yahoo,
                };
                Ok(PriceRow {
                    symbol: r.get("symbol"),
                    date_stamp: required_date(r.get("date_stamp"))?,
                    open: r.get::<Option<f64>, _>("open").unwrap_or_default(),
                    high: r.get::<Option<f64>, _>("high").unwrap_or_default(),
                    low: r.get::<Option<f64>, _>("low").unwrap_or_default(),
                    close: r.get::<Option<f64>, _>("close").unwrap_or_default(),
                    adjusted_close: r.get::<Option<f64>, _>("adjusted_close").unwrap_or_default(),
                    volume: r.get::<Option<i64>, _>("volume").unwrap_or_default(),
                    dividend_amount: r.get::<Option<f64>, _>("dividend_amount").unwrap_or_default(),
                    split_coefficient: r.get::<Option<f64>, _>("split_coefficient").unwrap_or(1.0),
                    capture_date: required_date(r.get("capture_date"))?,
                    data_source,
                })
            })
            .collect()
    }

    pub async fn insert_earnings_rows(&self, rows: &[EarningsRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for row in rows {
            inserted += sqlx::query(
                r#"
                INSERT INTO av_earnings (symbol, date_stamp, report_date, reported_eps, estimated_eps,
                                         eps_surprise, eps_surprise_perc, capture_date)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.symbol)
            .bind(row.date_stamp)
            .bind(row.report_date)
            .bind(row.reported_eps)
            .bind(row.estimated_eps)
            .bind(row.eps_surprise)
            .bind(row.eps_surprise_perc)
            .bind(row.capture_date)
            .execute(&mut tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn earnings_count(&self, symbol: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM av_earnings WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // Universe maintenance

    /// Add tickers to the universe, ignoring ones already present
    pub async fn add_tickers(&self, tickers: &[(String, Option<String>)]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for (symbol, name) in tickers {
            inserted += sqlx::query("INSERT OR IGNORE INTO tickers (symbol, name) VALUES (?, ?)")
                .bind(symbol)
                .bind(name)
                .execute(&mut tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn exclude_ticker(&self, symbol: &str, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ticker_excl (symbol, reason) VALUES (?, ?)
            ON CONFLICT(symbol) DO UPDATE SET reason = excluded.reason
            "#,
        )
        .bind(symbol)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Listings and SEC reference data

    pub async fn listing_keys(&self) -> Result<HashSet<(String, String, String)>> {
        let rows = sqlx::query("SELECT DISTINCT symbol, exchange, status FROM active_delisted")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("symbol"), r.get("exchange"), r.get("status")))
            .collect())
    }

    pub async fn insert_listings(&self, rows: &[ListingRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for row in rows {
            inserted += sqlx::query(
                r#"
                INSERT INTO active_delisted (symbol, name, exchange, ipo_date, delist_date, status, capture_date)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.symbol)
            .bind(&row.name)
            .bind(&row.exchange)
            .bind(row.ipo_date)
            .bind(row.delist_date)
            .bind(&row.status)
            .bind(row.capture_date)
            .execute(&mut tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn company_ticker_keys(&self) -> Result<HashSet<(i64, String)>> {
        let rows = sqlx::query("SELECT DISTINCT cik_str, ticker FROM company_tickers")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.get("cik_str"), r.get("ticker"))).collect())
    }

    pub async fn insert_company_tickers(&self, rows: &[CompanyTicker]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for row in rows {
            inserted += sqlx::query(
                "INSERT INTO company_tickers (cik_str, ticker, title, capture_date) VALUES (?, ?, ?, ?)",
            )
            .bind(row.cik_str)
            .bind(&row.ticker)
            .bind(&row.title)
            .bind(row.capture_date)
            .execute(&mut tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    // S&P 500 constituents

    /// Replace the staging table contents with `changes`
    pub async fn replace_constituent_staging(&self, changes: &[ConstituentChange]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sp500_cons_temp").execute(&mut tx).await?;

        let mut inserted = 0;
        for change in changes {
            inserted += sqlx::query(
                r#"
                INSERT INTO sp500_cons_temp (date_stamp, added_ticker, added_name, removed_ticker,
                                             removed_name, reason, capture_date)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(change.date_stamp)
            .bind(&change.added_ticker)
            .bind(&change.added_name)
            .bind(&change.removed_ticker)
            .bind(&change.removed_name)
            .bind(&change.reason)
            .bind(change.capture_date)
            .execute(&mut tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Most recent membership change already applied: the greatest of each
    /// member's start and end date, with open-ended end dates ignored.
    pub async fn constituents_cutoff(&self) -> Result<NaiveDate> {
        let row = sqlx::query(
            r#"
            SELECT max(max(min_date, CASE WHEN max_date = ? THEN ? ELSE max_date END)) AS cutoff
            FROM sp500_cons
            "#,
        )
        .bind(open_ended_date())
        .bind(default_date())
        .fetch_one(&self.pool)
        .await?;

        Ok(parse_db_date(row.get::<Option<String>, _>("cutoff"))?.unwrap_or_else(default_date))
    }

    /// Apply staged changes dated after `cutoff`: additions open a membership,
    /// removals close the open membership that started on or before them.
    pub async fn merge_constituent_changes(&self, cutoff: NaiveDate, capture_date: NaiveDate) -> Result<ConstituentMerge> {
        let mut tx = self.pool.begin().await?;

        let added = sqlx::query(
            r#"
            INSERT INTO sp500_cons (ticker, name, min_date, max_date, capture_date)
            SELECT added_ticker, added_name, date_stamp, ?, capture_date
            FROM sp500_cons_temp
            WHERE date_stamp > ? AND added_ticker IS NOT NULL
            ORDER BY date_stamp
            "#,
        )
        .bind(open_ended_date())
        .bind(cutoff)
        .execute(&mut tx)
        .await?
        .rows_affected();

        let removed = sqlx::query(
            r#"
            UPDATE sp500_cons
            SET max_date = (
                    SELECT min(s.date_stamp) FROM sp500_cons_temp s
                    WHERE s.removed_ticker = sp500_cons.ticker
                      AND s.date_stamp > ?
                      AND s.date_stamp >= sp500_cons.min_date),
                capture_date = ?
            WHERE max_date = ?
              AND EXISTS (
                    SELECT 1 FROM sp500_cons_temp s
                    WHERE s.removed_ticker = sp500_cons.ticker
                      AND s.date_stamp > ?
                      AND s.date_stamp >= sp500_cons.min_date)
            "#,
        )
        .bind(cutoff)
        .bind(capture_date)
        .bind(open_ended_date())
        .bind(cutoff)
        .execute(&mut tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(ConstituentMerge { added, removed })
    }

    /// Tickers whose membership is still open
    pub async fn open_constituents(&self) -> Result<Vec<(String, Option<String>)>> {
        let rows = sqlx::query("SELECT ticker, name FROM sp500_cons WHERE max_date = ? ORDER BY ticker")
            .bind(open_ended_date())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.get("ticker"), r.get("name"))).collect())
    }

    pub async fn get_stats(&self) -> Result<HashMap<String, i64>> {
        let mut stats = HashMap::new();
        for table in SUMMARY_TABLES {
            let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
                .fetch_one(&self.pool)
                .await?;
            stats.insert(table.to_string(), row.get::<i64, _>("n"));
        }
        Ok(stats)
    }
}

fn required_date(value: Option<String>) -> Result<NaiveDate> {
    parse_db_date(value)?.ok_or_else(|| anyhow::anyhow!("missing date in price row"))
}
