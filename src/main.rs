use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use equity_loader::api::{AlphaVantageClient, IexClient, SecClient, WikipediaClient, YahooClient};
use equity_loader::database::DatabaseManager;
use equity_loader::edgar::{self, EdgarQuarter};
use equity_loader::models::Config;
use equity_loader::reconcile::ReconcilePolicy;
use equity_loader::reference;
use equity_loader::update_log;
use equity_loader::updater::{EarningsUpdater, PriceUpdater, UpdateReport};
use equity_loader::utils::init_tracing;

#[derive(Parser)]
#[command(
    name = "equity-loader",
    about = "📈 Equity market data loader",
    long_about = "Fetches daily prices, earnings, index membership and SEC reference data and appends them to the database."
)]
struct Cli {
    /// Database file (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Incremental daily price update
    Prices {
        #[arg(long, value_enum, default_value_t = PriceVendor::Av)]
        source: PriceVendor,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Quarterly earnings update (Alpha Vantage)
    Earnings {
        #[command(flatten)]
        run: RunArgs,
    },
    /// S&P 500 index history (Yahoo)
    Index {
        /// Last date to load, defaults to today
        #[arg(long)]
        update_to: Option<NaiveDate>,
    },
    /// S&P 500 membership changes (Wikipedia)
    Constituents,
    /// Active and delisted stock listings (Alpha Vantage)
    Listings,
    /// SEC CIK to ticker mapping
    SecTickers,
    /// Report which quarterly SEC financial statement archives are published
    EdgarQuarters {
        /// Last quarter already loaded, e.g. 2021q4
        #[arg(long)]
        last_loaded: EdgarQuarter,
    },
    /// Maintain the ticker universe
    Tickers {
        #[command(subcommand)]
        action: TickerAction,
    },
    /// Show table row counts
    Status,
}

#[derive(Subcommand)]
enum TickerAction {
    /// Add symbols to the universe
    Add { symbols: Vec<String> },
    /// Exclude symbols from the update worklists
    Exclude {
        symbols: Vec<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Add the current S&P 500 members
    SyncSp500,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriceVendor {
    Av,
    Iex,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Last date to load, defaults to today
    #[arg(long)]
    update_to: Option<NaiveDate>,

    /// Maximum tickers to process (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Append the per-ticker run log to this CSV file
    #[arg(long)]
    log_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }

    if let Err(e) = run(cli.command, &config).await {
        error!("❌ {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let database = DatabaseManager::new(&config.database_path).await?;
    let today = Utc::now().date_naive();
    let retry_delay = Duration::from_secs(2);

    match command {
        Command::Prices { source, run } => {
            let update_to = run.update_to.unwrap_or(today);
            let batch_size = run.batch_size.unwrap_or(config.batch_size);
            let report = match source {
                PriceVendor::Av => {
                    PriceUpdater::new(
                        AlphaVantageClient::new(config)?,
                        database.clone(),
                        ReconcilePolicy::alpha_vantage(config.av_close_tolerance),
                    )
                    .with_retry(config.retry_attempts, retry_delay)
                    .run(update_to, batch_size)
                    .await?
                }
                PriceVendor::Iex => {
                    PriceUpdater::new(
                        IexClient::new(config)?,
                        database.clone(),
                        ReconcilePolicy::iex(config.iex_close_tolerance),
                    )
                    .with_retry(config.retry_attempts, retry_delay)
                    .run(update_to, batch_size)
                    .await?
                }
            };
            finish_run("Price update", &report, run.log_path.as_deref())?;
        }
        Command::Earnings { run } => {
            let update_to = run.update_to.unwrap_or(today);
            let batch_size = run.batch_size.unwrap_or(config.batch_size);
            let report = EarningsUpdater::new(AlphaVantageClient::new(config)?, database.clone())
                .with_retry(config.retry_attempts, retry_delay)
                .run(update_to, batch_size)
                .await?;
            finish_run("Earnings update", &report, run.log_path.as_deref())?;
        }
        Command::Index { update_to } => {
            let update_to = update_to.unwrap_or(today);
            reference::update_index_prices(&database, &YahooClient::new()?, update_to).await?;
        }
        Command::Constituents => {
            reference::update_sp500_constituents(&database, &WikipediaClient::new()?, today).await?;
        }
        Command::Listings => {
            reference::update_active_delisted(&database, &AlphaVantageClient::new(config)?, today).await?;
        }
        Command::SecTickers => {
            reference::update_sec_company_tickers(&database, &SecClient::new(config)?).await?;
        }
        Command::EdgarQuarters { last_loaded } => {
            let due = edgar::quarters_due(last_loaded, today);
            if due.is_empty() {
                info!("✅ SEC data is up to date through {}", last_loaded);
            } else {
                let results = edgar::probe_quarters(&SecClient::new(config)?, &due).await;
                let available = results.iter().filter(|r| r.available).count();
                info!("📊 {} of {} quarters after {} are available", available, results.len(), last_loaded);
                for result in results.iter().filter(|r| r.available) {
                    println!("{}", result.url);
                }
            }
        }
        Command::Tickers { action } => match action {
            TickerAction::Add { symbols } => {
                let tickers: Vec<_> = symbols.into_iter().map(|s| (s.to_uppercase(), None)).collect();
                let added = database.add_tickers(&tickers).await?;
                info!("✅ Added {} tickers", added);
            }
            TickerAction::Exclude { symbols, reason } => {
                for symbol in &symbols {
                    database.exclude_ticker(&symbol.to_uppercase(), reason.as_deref()).await?;
                }
                info!("✅ Excluded {} tickers", symbols.len());
            }
            TickerAction::SyncSp500 => {
                reference::sync_universe_from_sp500(&database, &WikipediaClient::new()?).await?;
            }
        },
        Command::Status => {}
    }

    print_stats(&database).await
}

fn finish_run(job: &str, report: &UpdateReport, log_path: Option<&std::path::Path>) -> Result<()> {
    report.log_summary(job);
    if let Some(path) = log_path {
        update_log::write_csv(report, path)?;
    }
    Ok(())
}

async fn print_stats(database: &DatabaseManager) -> Result<()> {
    let stats = database.get_stats().await?;
    println!("📊 Database contents:");
    for table in equity_loader::database::SUMMARY_TABLES {
        println!("   {:24} {:>10}", table, stats.get(table).copied().unwrap_or(0));
    }
    Ok(())
}
