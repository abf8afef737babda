use chrono::{NaiveDate, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::{get_text, http_client, ApiError, ApiRateLimiter};
use crate::models::ConstituentChange;

const SP500_ARTICLE_URL: &str = "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";

/// A current index member from the constituents table
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMember {
    pub symbol: String,
    pub security: String,
}

/// Reads the S&P 500 article tables
pub struct WikipediaClient {
    client: Client,
    article_url: String,
    rate_limiter: ApiRateLimiter,
}

impl WikipediaClient {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_url(SP500_ARTICLE_URL, Duration::from_secs(1))
    }

    pub fn with_url(article_url: &str, wait: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: http_client("equity-loader/0.1 (https://github.com/equity-loader)")?,
            article_url: article_url.to_string(),
            rate_limiter: ApiRateLimiter::new(wait),
        })
    }

    async fn article(&self) -> Result<String, ApiError> {
        self.rate_limiter.wait().await;
        get_text(&self.client, Url::parse(&self.article_url)?).await
    }

    /// Membership changes, in the order the article lists them (newest first)
    pub async fn get_sp500_changes(&self) -> Result<Vec<ConstituentChange>, ApiError> {
        info!("🌐 Fetching S&P 500 change history from Wikipedia");
        let html = self.article().await?;
        parse_changes_table(&html, Utc::now().date_naive())
    }

    pub async fn get_sp500_members(&self) -> Result<Vec<IndexMember>, ApiError> {
        info!("🌐 Fetching current S&P 500 members from Wikipedia");
        let html = self.article().await?;
        parse_members_table(&html)
    }
}

fn selector(css: &str) -> Result<Selector, ApiError> {
    Selector::parse(css).map_err(|e| ApiError::Format(format!("bad selector '{}': {:?}", css, e)))
}

/// Collapse whitespace & trim
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the table by id, falling back to its position among the wikitables.
fn find_table<'a>(doc: &'a Html, id: &str, position: usize) -> Result<ElementRef<'a>, ApiError> {
    let by_id = selector(&format!("table#{}", id))?;
    if let Some(table) = doc.select(&by_id).next() {
        return Ok(table);
    }
    let wikitables = selector("table.wikitable")?;
    doc.select(&wikitables)
        .nth(position)
        .ok_or_else(|| ApiError::Format(format!("table '{}' not found", id)))
}

fn data_rows(table: ElementRef<'_>) -> Result<Vec<Vec<String>>, ApiError> {
    let sel_tr = selector("tr")?;
    let sel_td = selector("td")?;
    Ok(table
        .select(&sel_tr)
        .map(|tr| tr.select(&sel_td).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty())
        .collect())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse the "Selected changes" table: Date, Added (Ticker, Security),
/// Removed (Ticker, Security), Reason. Rows sharing a date omit the date
/// cell (rowspan), so they inherit it from the row above.
pub(crate) fn parse_changes_table(html: &str, capture_date: NaiveDate) -> Result<Vec<ConstituentChange>, ApiError> {
    let doc = Html::parse_document(html);
    let table = find_table(&doc, "changes", 1)?;

    let mut changes = Vec::new();
    let mut current_date: Option<NaiveDate> = None;
    for cells in data_rows(table)? {
        let rest = match cells.len() {
            6 => {
                current_date = Some(
                    NaiveDate::parse_from_str(&cells[0], "%B %d, %Y")
                        .map_err(|e| ApiError::Format(format!("invalid change date '{}': {}", cells[0], e)))?,
                );
                &cells[1..]
            }
            5 => &cells[..],
            n => {
                warn!("Skipping change row with {} cells", n);
                continue;
            }
        };

        let date_stamp = current_date
            .ok_or_else(|| ApiError::Format("change row without a date".to_string()))?;
        changes.push(ConstituentChange {
            date_stamp,
            added_ticker: non_empty(&rest[0]),
            added_name: non_empty(&rest[1]),
            removed_ticker: non_empty(&rest[2]),
            removed_name: non_empty(&rest[3]),
            reason: non_empty(&rest[4]),
            capture_date,
        });
    }

    if changes.is_empty() {
        return Err(ApiError::Format("changes table has no rows".to_string()));
    }
    Ok(changes)
}

pub(crate) fn parse_members_table(html: &str) -> Result<Vec<IndexMember>, ApiError> {
    let doc = Html::parse_document(html);
    let table = find_table(&doc, "constituents", 0)?;

    let members: Vec<IndexMember> = data_rows(table)?
        .into_iter()
        .filter(|cells| cells.len() >= 2 && !cells[0].is_empty())
        .map(|cells| IndexMember {
            symbol: cells[0].clone(),
            security: cells[1].clone(),
        })
        .collect();

    if members.is_empty() {
        return Err(ApiError::Format("constituents table has no rows".to_string()));
    }
    Ok(members)
}
