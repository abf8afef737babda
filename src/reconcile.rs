//! Incremental-update rules shared by the price and earnings updaters.
//!
//! Per ticker the updater asks three questions: is the stored history already
//! current, does the freshly fetched adjusted close on the last stored date
//! still match what we stored, and does the new window carry a split or
//! dividend. The answers pick between appending the new rows and re-pulling
//! the full adjusted history. Everything here is pure so the decision table
//! can be tested without a network or a database.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::{default_date, PriceRow};

/// Earnings younger than this are considered current.
pub const EARNINGS_CURRENT_DAYS: i64 = 70;

/// Earnings older than this are put on the worklist.
pub const EARNINGS_DUE_DAYS: i64 = 80;

/// How much history to request from a vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// Recent window only
    Compact,
    /// Complete history
    Full,
}

impl std::fmt::Display for PullMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullMode::Compact => f.write_str("compact"),
            PullMode::Full => f.write_str("full"),
        }
    }
}

/// Terminal outcome of one worklist item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    DataUpToDate,
    FailedNoData,
    NilRecordsNoUpdate,
    SuccessfulUpdate,
    FailedPushToDb,
}

impl UpdateStatus {
    pub const ALL: [UpdateStatus; 5] = [
        UpdateStatus::DataUpToDate,
        UpdateStatus::FailedNoData,
        UpdateStatus::NilRecordsNoUpdate,
        UpdateStatus::SuccessfulUpdate,
        UpdateStatus::FailedPushToDb,
    ];

    /// Label written to the run log
    pub fn label(&self) -> &'static str {
        match self {
            UpdateStatus::DataUpToDate => "data_up_to_date",
            UpdateStatus::FailedNoData => "failed_no_data",
            UpdateStatus::NilRecordsNoUpdate => "nil_records_no_update",
            UpdateStatus::SuccessfulUpdate => "successful_update",
            UpdateStatus::FailedPushToDb => "failed_push_to_db",
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What to do with a compact pull once it has been checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Stored history is still valid, append the rows after the last stored date
    AppendNewRows,
    /// Stored history was adjusted retroactively, append the full history
    FullRefresh,
}

/// Per-vendor knobs for the reconciliation check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilePolicy {
    /// Minimum absolute difference (after rounding to cents) that counts as divergence
    pub tolerance: f64,
    /// Whether splits/dividends in the new window force a full refresh
    pub detect_corporate_actions: bool,
}

impl ReconcilePolicy {
    pub fn alpha_vantage(tolerance: f64) -> Self {
        Self {
            tolerance,
            detect_corporate_actions: false,
        }
    }

    pub fn iex(tolerance: f64) -> Self {
        Self {
            tolerance,
            detect_corporate_actions: true,
        }
    }
}

/// Result of checking a compact pull against stored state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactCheck {
    pub fetched_close: f64,
    pub diverged: bool,
    pub corporate_action: bool,
}

impl CompactCheck {
    pub fn reconciliation(&self) -> Reconciliation {
        reconcile(PullMode::Compact, self.diverged, self.corporate_action)
    }
}

/// Pick the pull mode for a ticker, or `None` when its stored prices are current.
pub fn pull_mode_for(last_date_in_db: NaiveDate, update_to_date: NaiveDate) -> Option<PullMode> {
    if last_date_in_db >= update_to_date {
        None
    } else if last_date_in_db == default_date() {
        Some(PullMode::Full)
    } else {
        Some(PullMode::Compact)
    }
}

pub fn earnings_is_current(last_eps_date: NaiveDate, update_to_date: NaiveDate) -> bool {
    (update_to_date - last_eps_date).num_days() < EARNINGS_CURRENT_DAYS
}

pub fn earnings_is_due(last_eps_date: NaiveDate, update_to_date: NaiveDate) -> bool {
    last_eps_date < update_to_date - Duration::days(EARNINGS_DUE_DAYS)
}

/// Round half away from zero to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Adjusted close of the fetched row on `date`, 0 when the window has no such row.
pub fn adjusted_close_on(rows: &[PriceRow], date: NaiveDate) -> f64 {
    rows.iter()
        .find(|row| row.date_stamp == date)
        .map(|row| row.adjusted_close)
        .unwrap_or(0.0)
}

/// Compared in whole cents so 0.03 means three cents and not 0.0299999.
pub fn close_diverges(fetched: f64, stored: f64, tolerance: f64) -> bool {
    let diff_cents = ((fetched * 100.0).round() - (stored * 100.0).round()).abs();
    diff_cents >= (tolerance * 100.0).round()
}

pub fn corporate_action_in(rows: &[PriceRow]) -> bool {
    rows.iter()
        .any(|row| row.split_coefficient != 1.0 || row.dividend_amount != 0.0)
}

pub fn reconcile(mode: PullMode, diverged: bool, corporate_action: bool) -> Reconciliation {
    match mode {
        PullMode::Compact if !diverged && !corporate_action => Reconciliation::AppendNewRows,
        _ => Reconciliation::FullRefresh,
    }
}

/// Rows dated in `(after, through]`, preserving order.
pub fn rows_in_window(rows: &[PriceRow], after: NaiveDate, through: NaiveDate) -> Vec<PriceRow> {
    rows.iter()
        .filter(|row| row.date_stamp > after && row.date_stamp <= through)
        .cloned()
        .collect()
}

/// Check a compact pull for a ticker whose last stored bar is (`last_date_in_db`, `stored_close`).
pub fn check_compact(
    policy: &ReconcilePolicy,
    rows: &[PriceRow],
    last_date_in_db: NaiveDate,
    stored_close: f64,
    update_to_date: NaiveDate,
) -> CompactCheck {
    let fetched_close = adjusted_close_on(rows, last_date_in_db);
    let diverged = close_diverges(fetched_close, stored_close, policy.tolerance);
    let corporate_action = policy.detect_corporate_actions
        && corporate_action_in(&rows_in_window(rows, last_date_in_db, update_to_date));

    CompactCheck {
        fetched_close,
        diverged,
        corporate_action,
    }
}
