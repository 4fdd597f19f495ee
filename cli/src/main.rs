mod config;
mod dashboard;
mod scrape;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use job_scraper::location::display_location;
use job_scraper::Fetcher;
use persistence::{Filter, Store};

use crate::config::Settings;
use crate::scrape::{RunSummary, Tracker};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file listing the tracked companies
    #[clap(long, default_value = "role-radar.toml")]
    config: PathBuf,

    /// Database url, overrides DATABASE_URL and the configuration file
    #[clap(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch every company once and update the store
    Run {},
    /// Print stored postings matching the filter
    Query {
        #[clap(long)]
        keyword: Option<String>,
        /// Location key, may be repeated
        #[clap(long)]
        location: Vec<String>,
        #[clap(long)]
        new_only: bool,
        #[clap(long)]
        active_only: bool,
    },
    /// List companies known to the store
    Companies {},
    /// Latest run outcome per company
    Status {},
    /// Serve the dashboard
    Serve {
        #[clap(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
}

fn print_summary(summary: &RunSummary) {
    println!("Run of {}", summary.run_date);
    for record in &summary.records {
        println!(
            "  {:<28} {:<15} new {:>4}  still present {:>4}  disappeared {:>4}  {}",
            record.company,
            record.status.label(),
            record.new_count,
            record.still_present_count,
            record.disappeared_count,
            record.message.as_deref().unwrap_or_default()
        );
    }
    for rejection in &summary.unnamed_rejections {
        println!("  skipped: {}", rejection);
    }
}

async fn query(store: &Store, filter: Filter) -> anyhow::Result<()> {
    let postings = store.query(&filter).await?;
    for posting in &postings {
        let state = match posting.disappeared_on {
            Some(date) => format!("gone since {}", date),
            None => format!("last seen {}", posting.last_seen),
        };
        println!(
            "{} | {} | {} | {} | {}",
            posting.company,
            posting.title,
            display_location(posting.location.as_deref()),
            state,
            posting.link
        );
    }
    println!("{} postings", postings.len());
    Ok(())
}

async fn status(store: &Store) -> anyhow::Result<()> {
    for record in store.latest_runs().await? {
        println!(
            "{:<28} {} {:<15} {}",
            record.company,
            record.run_date,
            record.status.label(),
            record.message.unwrap_or_default()
        );
    }
    Ok(())
}

async fn tracker(settings: Settings) -> anyhow::Result<Tracker<Fetcher>> {
    let store = persistence::connect(&settings.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database_url))?;
    let fetcher = Fetcher::new(settings.request_timeout, settings.politeness_delay)
        .context("Failed to build http client")?;
    Ok(Tracker::new(fetcher, store, settings.companies)
        .with_rejected(settings.rejected)
        .with_retention(settings.retention)
        .with_concurrency(settings.concurrency))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Cli::parse();
    let settings = Settings::load(&args.config, args.database)?;
    let tracker = tracker(settings).await?;

    match args.command {
        Commands::Run {} => {
            let summary = tracker.run_today().await?;
            print_summary(&summary);
        }
        Commands::Query {
            keyword,
            location,
            new_only,
            active_only,
        } => {
            let filter = location
                .iter()
                .fold(Filter::new(), |filter, key| filter.location(key))
                .keyword(keyword.as_deref().unwrap_or_default())
                .new_only(new_only)
                .active_only(active_only);
            query(tracker.store(), filter).await?;
        }
        Commands::Companies {} => {
            for company in tracker.store().list_companies().await? {
                println!("{}", company);
            }
        }
        Commands::Status {} => status(tracker.store()).await?,
        Commands::Serve { addr } => {
            let tracker = Arc::new(tracker);
            dashboard::serve(tracker.clone(), addr).await?;
            tracker.store().close().await;
            return Ok(());
        }
    }
    tracker.store().close().await;
    Ok(())
}
