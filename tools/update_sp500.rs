use anyhow::Result;
use chrono::Utc;
use tracing::info;

use equity_loader::api::{WikipediaClient, YahooClient};
use equity_loader::database::DatabaseManager;
use equity_loader::models::Config;
use equity_loader::reference;
use equity_loader::utils::init_tracing;

/// S&P 500 refresh: membership changes, universe sync and index prices in one run.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("🔄 S&P 500 Updater");

    let config = Config::from_env()?;
    let database = DatabaseManager::new(&config.database_path).await?;
    let today = Utc::now().date_naive();

    let wikipedia = WikipediaClient::new()?;
    let constituents = reference::update_sp500_constituents(&database, &wikipedia, today).await?;
    info!(
        "📅 Membership: {} staged, {} added, {} removed since {}",
        constituents.staged, constituents.merge.added, constituents.merge.removed, constituents.cutoff
    );

    let new_members = reference::sync_universe_from_sp500(&database, &wikipedia).await?;
    info!("📋 {} new tickers in the universe", new_members);

    let inserted = reference::update_index_prices(&database, &YahooClient::new()?, today).await?;
    info!("📈 {} new index bars", inserted);

    let stats = database.get_stats().await?;
    let members = database.open_constituents().await?.len();
    info!(
        "📊 Database contains {} tickers, {} open S&P 500 memberships, {} index bars",
        stats.get("tickers").unwrap_or(&0),
        members,
        stats.get("shareprices_daily").unwrap_or(&0)
    );

    Ok(())
}
