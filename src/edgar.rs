//! Planning for the quarterly SEC financial statement data sets.
//!
//! Works out which quarterly archives follow the last one loaded and checks
//! which of them the SEC already publishes. Downloading and extracting the
//! archives is left to the loader that owns the EDGAR tables.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::api::SecClient;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9998;

/// A calendar quarter, written `2021q4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgarQuarter {
    year: i32,
    quarter: u32,
}

impl EdgarQuarter {
    pub fn new(year: i32, quarter: u32) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(anyhow!("quarter must be 1-4, got {}", quarter));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(anyhow!("year must be {}-{}, got {}", MIN_YEAR, MAX_YEAR, year));
        }
        Ok(Self { year, quarter })
    }

    pub fn next(&self) -> Self {
        if self.quarter == 4 {
            Self { year: self.year.saturating_add(1), quarter: 1 }
        } else {
            Self { year: self.year, quarter: self.quarter + 1 }
        }
    }

    /// Last calendar day of the quarter
    pub fn end_date(&self) -> NaiveDate {
        let (year, month) = if self.quarter == 4 {
            (self.year + 1, 1)
        } else {
            (self.year, self.quarter * 3 + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn archive_url(&self, base_url: &str) -> String {
        format!("{}{}.zip", base_url, self)
    }
}

impl fmt::Display for EdgarQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}q{}", self.year, self.quarter)
    }
}

impl FromStr for EdgarQuarter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (year, quarter) = s
            .trim()
            .to_lowercase()
            .split_once('q')
            .map(|(y, q)| (y.to_string(), q.to_string()))
            .ok_or_else(|| anyhow!("expected a quarter like 2021q4, got '{}'", s))?;
        Self::new(
            year.parse().map_err(|_| anyhow!("invalid year in '{}'", s))?,
            quarter.parse().map_err(|_| anyhow!("invalid quarter in '{}'", s))?,
        )
    }
}

/// Quarters after `last_loaded` that have ended on or before `today`.
pub fn quarters_due(last_loaded: EdgarQuarter, today: NaiveDate) -> Vec<EdgarQuarter> {
    let mut due = Vec::new();
    let mut quarter = last_loaded.next();
    while quarter.end_date() <= today {
        due.push(quarter);
        quarter = quarter.next();
    }
    due
}

/// Availability of one quarterly archive
#[derive(Debug, Clone, PartialEq)]
pub struct QuarterAvailability {
    pub quarter: EdgarQuarter,
    pub url: String,
    pub available: bool,
}

/// HEAD each quarter's archive URL. Network errors count as unavailable.
pub async fn probe_quarters(sec: &SecClient, quarters: &[EdgarQuarter]) -> Vec<QuarterAvailability> {
    let mut results = Vec::with_capacity(quarters.len());
    for quarter in quarters {
        let url = quarter.archive_url(sec.archive_base_url());
        let available = match sec.archive_available(&url).await {
            Ok(available) => available,
            Err(e) => {
                warn!("HEAD {} failed: {}", url, e);
                false
            }
        };

        if available {
            info!("✅ {} is available", url);
        } else {
            info!("URL ({}) is unavailable.", url);
        }
        results.push(QuarterAvailability {
            quarter: *quarter,
            url,
            available,
        });
    }
    results
}
