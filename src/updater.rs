//! Per-ticker price and earnings update loops.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::api::{ApiError, EarningsSource, PriceSource};
use crate::database::{DatabaseManager, PriceTable};
use crate::models::{EarningsRow, PriceRow, TickerToUpdate};
use crate::reconcile::{
    check_compact, earnings_is_current, earnings_is_due, pull_mode_for, round2, rows_in_window, PullMode,
    ReconcilePolicy, Reconciliation, UpdateStatus,
};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// One line of the run log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateLogEntry {
    pub ticker: String,
    pub last_date_in_db: NaiveDate,
    pub last_date_retrieved: Option<NaiveDate>,
    pub records_retrieved: usize,
    pub records_updated: u64,
    pub status: UpdateStatus,
    /// Seconds spent on the ticker
    pub loop_time: f64,
    pub capture_date: NaiveDate,
}

/// Result of one updater run, entries in worklist order
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub entries: Vec<UpdateLogEntry>,
    pub iterations: usize,
    pub pushes: usize,
}

impl UpdateReport {
    pub fn count(&self, status: UpdateStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn records_updated(&self) -> u64 {
        self.entries.iter().map(|e| e.records_updated).sum()
    }

    pub fn log_summary(&self, job: &str) {
        info!(
            "✅ {} finished: {} tickers processed, {} pushes, {} rows written",
            job,
            self.iterations,
            self.pushes,
            self.records_updated()
        );
        for status in UpdateStatus::ALL {
            let n = self.count(status);
            if n > 0 {
                info!("   {}: {}", status, n);
            }
        }
    }
}

/// What happened to one ticker, before timing is attached
struct Outcome {
    status: UpdateStatus,
    last_date_retrieved: Option<NaiveDate>,
    records_retrieved: usize,
    records_updated: u64,
}

impl Outcome {
    fn status(status: UpdateStatus) -> Self {
        Self {
            status,
            last_date_retrieved: None,
            records_retrieved: 0,
            records_updated: 0,
        }
    }
}

/// Run `update` over `items` in order, timing each ticker and logging progress.
async fn run_items<'a, F, Fut>(
    items: &'a [TickerToUpdate],
    last_date: fn(&TickerToUpdate) -> NaiveDate,
    mut update: F,
) -> UpdateReport
where
    F: FnMut(&'a TickerToUpdate) -> Fut,
    Fut: Future<Output = Outcome>,
{
    let capture_date = Utc::now().date_naive();
    let mut report = UpdateReport::default();

    for item in items {
        let started = Instant::now();
        let outcome = update(item).await;
        let loop_time = started.elapsed().as_secs_f64();

        report.iterations += 1;
        if matches!(outcome.status, UpdateStatus::SuccessfulUpdate) {
            report.pushes += 1;
            info!("push no. {}", report.pushes);
        }
        info!(
            "loop no. {}: {} {}, {:.2} seconds",
            report.iterations, item.symbol, outcome.status, loop_time
        );

        report.entries.push(UpdateLogEntry {
            ticker: item.symbol.clone(),
            last_date_in_db: last_date(item),
            last_date_retrieved: outcome.last_date_retrieved,
            records_retrieved: outcome.records_retrieved,
            records_updated: outcome.records_updated,
            status: outcome.status,
            loop_time,
            capture_date,
        });
    }

    report
}

/// Call the vendor up to `attempts` times, pausing `delay` after each failure.
async fn with_retries<T, F, Fut>(symbol: &str, attempts: u32, delay: Duration, mut call: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Attempt {} for {} failed: {}, retrying", attempt, symbol, e);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Incremental daily price loader for one vendor
pub struct PriceUpdater<S> {
    source: S,
    database: DatabaseManager,
    table: PriceTable,
    policy: ReconcilePolicy,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl<S: PriceSource> PriceUpdater<S> {
    pub fn new(source: S, database: DatabaseManager, policy: ReconcilePolicy) -> Self {
        let table = PriceTable::for_source(source.data_source());
        Self {
            source,
            database,
            table,
            policy,
            retry_attempts: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Attempts per HTTP call (at least one) and the pause between them
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Update up to `batch_size` tickers whose prices stop before `update_to_date`.
    pub async fn run(&self, update_to_date: NaiveDate, batch_size: usize) -> Result<UpdateReport> {
        let worklist = self.database.tickers_to_update(self.table).await?;
        let total = worklist.len();
        let due: Vec<TickerToUpdate> = worklist
            .into_iter()
            .filter(|t| t.last_date_in_db < update_to_date)
            .take(batch_size)
            .collect();

        info!(
            "🚀 {} price update to {}: {} of {} tickers due, batch of {}",
            self.source.data_source(),
            update_to_date,
            due.len(),
            total,
            batch_size
        );
        Ok(self.process(&due, update_to_date).await)
    }

    /// Run the reconcile procedure over `items` in order.
    pub async fn process(&self, items: &[TickerToUpdate], update_to_date: NaiveDate) -> UpdateReport {
        run_items(items, |t| t.last_date_in_db, move |item| self.update_ticker(item, update_to_date)).await
    }

    async fn update_ticker(&self, item: &TickerToUpdate, update_to_date: NaiveDate) -> Outcome {
        let Some(mode) = pull_mode_for(item.last_date_in_db, update_to_date) else {
            return Outcome::status(UpdateStatus::DataUpToDate);
        };

        let fetched = match self.fetch(&item.symbol, mode).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                warn!("No rows returned for {}", item.symbol);
                return Outcome::status(UpdateStatus::FailedNoData);
            }
            Err(e) => {
                warn!("Failed to fetch {} ({} pull): {}", item.symbol, mode, e);
                return Outcome::status(UpdateStatus::FailedNoData);
            }
        };
        let mut last_date_retrieved = fetched.iter().map(|r| r.date_stamp).max();
        let mut records_retrieved = fetched.len();

        let to_append = match mode {
            PullMode::Full => rows_in_window(&fetched, NaiveDate::MIN, update_to_date),
            PullMode::Compact => {
                let check = check_compact(
                    &self.policy,
                    &fetched,
                    item.last_date_in_db,
                    item.last_adj_close,
                    update_to_date,
                );
                match check.reconciliation() {
                    Reconciliation::AppendNewRows => {
                        rows_in_window(&fetched, item.last_date_in_db, update_to_date)
                    }
                    Reconciliation::FullRefresh => {
                        info!(
                            "🔄 {} needs a full refresh (close {} vs stored {}, diverged: {}, corporate action: {})",
                            item.symbol,
                            round2(check.fetched_close),
                            round2(item.last_adj_close),
                            check.diverged,
                            check.corporate_action
                        );
                        match self.fetch(&item.symbol, PullMode::Full).await {
                            Ok(full) if !full.is_empty() => {
                                last_date_retrieved = full.iter().map(|r| r.date_stamp).max();
                                records_retrieved = full.len();
                                rows_in_window(&full, NaiveDate::MIN, update_to_date)
                            }
                            Ok(_) => {
                                warn!("Full refresh of {} returned no rows", item.symbol);
                                return Outcome::status(UpdateStatus::FailedNoData);
                            }
                            Err(e) => {
                                warn!("Full refresh of {} failed: {}", item.symbol, e);
                                return Outcome::status(UpdateStatus::FailedNoData);
                            }
                        }
                    }
                }
            }
        };

        let mut outcome = self.push(&item.symbol, &to_append).await;
        outcome.last_date_retrieved = last_date_retrieved;
        outcome.records_retrieved = records_retrieved;
        outcome
    }

    async fn push(&self, symbol: &str, rows: &[PriceRow]) -> Outcome {
        if rows.is_empty() {
            return Outcome::status(UpdateStatus::NilRecordsNoUpdate);
        }
        match self.database.insert_price_rows(self.table, rows).await {
            Ok(n) => Outcome {
                records_updated: n,
                ..Outcome::status(UpdateStatus::SuccessfulUpdate)
            },
            Err(e) => {
                error!("Failed to write {} rows for {}: {:#}", rows.len(), symbol, e);
                Outcome::status(UpdateStatus::FailedPushToDb)
            }
        }
    }

    async fn fetch(&self, symbol: &str, mode: PullMode) -> Result<Vec<PriceRow>, ApiError> {
        with_retries(symbol, self.retry_attempts, self.retry_delay, move || {
            self.source.fetch_daily(symbol, mode)
        })
        .await
    }
}

/// Quarterly earnings loader
pub struct EarningsUpdater<S> {
    source: S,
    database: DatabaseManager,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl<S: EarningsSource> EarningsUpdater<S> {
    pub fn new(source: S, database: DatabaseManager) -> Self {
        Self {
            source,
            database,
            retry_attempts: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Update up to `batch_size` tickers whose last reported earnings are stale.
    pub async fn run(&self, update_to_date: NaiveDate, batch_size: usize) -> Result<UpdateReport> {
        let worklist = self.database.tickers_to_update(PriceTable::AlphaVantage).await?;
        let total = worklist.len();
        let due: Vec<TickerToUpdate> = worklist
            .into_iter()
            .filter(|t| earnings_is_due(t.last_eps_date, update_to_date))
            .take(batch_size)
            .collect();

        info!(
            "🚀 Earnings update to {}: {} of {} tickers due, batch of {}",
            update_to_date,
            due.len(),
            total,
            batch_size
        );
        Ok(self.process(&due, update_to_date).await)
    }

    pub async fn process(&self, items: &[TickerToUpdate], update_to_date: NaiveDate) -> UpdateReport {
        run_items(items, |t| t.last_eps_date, move |item| self.update_ticker(item, update_to_date)).await
    }

    async fn update_ticker(&self, item: &TickerToUpdate, update_to_date: NaiveDate) -> Outcome {
        if earnings_is_current(item.last_eps_date, update_to_date) {
            return Outcome::status(UpdateStatus::DataUpToDate);
        }

        let fetched = match self.fetch(&item.symbol).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                warn!("No earnings returned for {}", item.symbol);
                return Outcome::status(UpdateStatus::FailedNoData);
            }
            Err(e) => {
                warn!("Failed to fetch earnings for {}: {}", item.symbol, e);
                return Outcome::status(UpdateStatus::FailedNoData);
            }
        };

        let new_rows: Vec<EarningsRow> = fetched
            .iter()
            .filter(|r| r.date_stamp > item.last_eps_date && r.date_stamp <= update_to_date)
            .cloned()
            .collect();

        let mut outcome = if new_rows.is_empty() {
            Outcome::status(UpdateStatus::NilRecordsNoUpdate)
        } else {
            match self.database.insert_earnings_rows(&new_rows).await {
                Ok(n) => Outcome {
                    records_updated: n,
                    ..Outcome::status(UpdateStatus::SuccessfulUpdate)
                },
                Err(e) => {
                    error!("Failed to write earnings for {}: {:#}", item.symbol, e);
                    Outcome::status(UpdateStatus::FailedPushToDb)
                }
            }
        };
        outcome.last_date_retrieved = fetched.iter().map(|r| r.date_stamp).max();
        outcome.records_retrieved = fetched.len();
        outcome
    }

    async fn fetch(&self, symbol: &str) -> Result<Vec<EarningsRow>, ApiError> {
        with_retries(symbol, self.retry_attempts, self.retry_delay, move || {
            self.source.fetch_earnings(symbol)
        })
        .await
    }
}
