//! Reference data jobs: index history, S&P 500 membership, listings and SEC tickers.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::info;

use crate::api::{AlphaVantageClient, ListingState, SecClient, WikipediaClient, YahooClient};
use crate::database::{ConstituentMerge, DatabaseManager, PriceTable};
use crate::models::{default_date, CompanyTicker, ListingRow};
use crate::reconcile::rows_in_window;

pub const SP500_INDEX_SYMBOL: &str = "^GSPC";
pub const SP500_STORED_SYMBOL: &str = "GSPC";

/// Append S&P 500 index bars after the last stored date, up to `update_to_date`.
pub async fn update_index_prices(
    database: &DatabaseManager,
    yahoo: &YahooClient,
    update_to_date: NaiveDate,
) -> Result<u64> {
    let last_date = database
        .max_price_date(PriceTable::Index, SP500_STORED_SYMBOL)
        .await?
        .unwrap_or_else(default_date);

    if last_date >= update_to_date {
        info!("✅ {} prices already loaded to {}, nothing to do", SP500_STORED_SYMBOL, last_date);
        return Ok(0);
    }

    let fetched = yahoo
        .get_history(
            SP500_INDEX_SYMBOL,
            SP500_STORED_SYMBOL,
            last_date + Duration::days(1),
            update_to_date,
        )
        .await?;
    let rows = rows_in_window(&fetched, last_date, update_to_date);
    if rows.is_empty() {
        info!("No new {} bars after {}", SP500_STORED_SYMBOL, last_date);
        return Ok(0);
    }

    let inserted = database.insert_price_rows(PriceTable::Index, &rows).await?;
    info!("✅ Inserted {} {} bars ({} to {})", inserted, SP500_STORED_SYMBOL, last_date, update_to_date);
    Ok(inserted)
}

/// Summary of a constituents refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstituentsUpdate {
    pub staged: u64,
    pub cutoff: NaiveDate,
    pub merge: ConstituentMerge,
}

/// Stage the published change history and apply the changes newer than what is stored.
pub async fn update_sp500_constituents(
    database: &DatabaseManager,
    wikipedia: &WikipediaClient,
    today: NaiveDate,
) -> Result<ConstituentsUpdate> {
    let changes = wikipedia.get_sp500_changes().await?;
    let staged = database.replace_constituent_staging(&changes).await?;
    info!("📋 Staged {} S&P 500 membership changes", staged);

    let cutoff = database.constituents_cutoff().await?;
    let merge = database.merge_constituent_changes(cutoff, today).await?;
    info!(
        "✅ Applied changes after {}: {} additions, {} removals",
        cutoff, merge.added, merge.removed
    );

    Ok(ConstituentsUpdate {
        staged,
        cutoff,
        merge,
    })
}

/// Add the current S&P 500 members to the ticker universe.
pub async fn sync_universe_from_sp500(database: &DatabaseManager, wikipedia: &WikipediaClient) -> Result<u64> {
    let members = wikipedia.get_sp500_members().await?;
    let tickers: Vec<(String, Option<String>)> = members
        .into_iter()
        .map(|m| (m.symbol, Some(m.security)))
        .collect();

    let added = database.add_tickers(&tickers).await?;
    info!("✅ {} of {} S&P 500 members were new to the universe", added, tickers.len());
    Ok(added)
}

/// Load active and delisted stock listings as of `today`, keeping only
/// (symbol, exchange, status) combinations not already stored.
pub async fn update_active_delisted(
    database: &DatabaseManager,
    alpha_vantage: &AlphaVantageClient,
    today: NaiveDate,
) -> Result<u64> {
    let mut listings = alpha_vantage.get_listing_status(today, ListingState::Active).await?;
    listings.extend(alpha_vantage.get_listing_status(today, ListingState::Delisted).await?);

    let known = database.listing_keys().await?;
    let new_rows = new_listings(listings, &known);
    let inserted = database.insert_listings(&new_rows).await?;
    info!("✅ Inserted {} new listing rows", inserted);
    Ok(inserted)
}

fn new_listings(
    listings: Vec<ListingRow>,
    known: &std::collections::HashSet<(String, String, String)>,
) -> Vec<ListingRow> {
    let mut seen = known.clone();
    listings
        .into_iter()
        .filter(|row| seen.insert((row.symbol.clone(), row.exchange.clone(), row.status.clone())))
        .collect()
}

/// Load CIK/ticker pairs not already stored.
pub async fn update_sec_company_tickers(database: &DatabaseManager, sec: &SecClient) -> Result<u64> {
    let tickers = sec.get_company_tickers().await?;
    let mut known = database.company_ticker_keys().await?;

    let new_rows: Vec<CompanyTicker> = tickers
        .into_iter()
        .filter(|t| known.insert((t.cik_str, t.ticker.clone())))
        .collect();

    let inserted = database.insert_company_tickers(&new_rows).await?;
    info!("✅ Inserted {} new SEC company tickers", inserted);
    Ok(inserted)
}
