//! Listing Harvester CLI
//!
//! Local execution entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use harvester::{
    error::{AppError, Result},
    models::{Config, FetchStatus, SortKey},
    pipeline::{self, HarvestRequest, Harvester},
};

/// Listing Harvester - monthly rental listing crawler
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Incremental rental listing harvester"
)]
struct Cli {
    /// Path to storage directory holding config, snapshot and photo cache
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Filter and sort flags shared by `list` and `stats`.
#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Minimum floor area in m² (default: saved search)
    #[arg(long)]
    min_area: Option<f64>,

    /// Maximum monthly rent (default: saved search, 0 disables)
    #[arg(long)]
    max_rent: Option<u64>,

    /// Sort key: rent, area, price_per_m2, build_year, date_added
    #[arg(long)]
    sort: Option<SortKey>,

    /// Sort descending
    #[arg(long)]
    desc: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the search pages, enrich new listings and save
    Harvest {
        /// Layout category to search (repeatable, default: saved search)
        #[arg(short, long = "layout")]
        layouts: Vec<String>,

        /// Skip listings already in the snapshot
        #[arg(long)]
        skip_known: bool,

        /// Re-fetch details of known listings
        #[arg(long)]
        recheck_details: bool,
    },

    /// Re-fetch details for every listing
    Refresh,

    /// Re-fetch details for one listing
    Retry {
        /// Listing link
        link: String,
    },

    /// Print the filtered, sorted listing set
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// Only favorites, sorted by title
        #[arg(long)]
        favorites: bool,
    },

    /// Show statistics for the filtered listing set
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Toggle a listing's favorite flag
    Favorite {
        /// Listing link
        link: String,
    },

    /// Toggle a listing's viewed flag
    Viewed {
        /// Listing link
        link: String,
    },

    /// Delete every listing, the snapshot and the photo cache
    Clear,

    /// Validate configuration file
    Validate,

    /// Show current snapshot info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Stop the crawl and detail workers on Ctrl-C.
fn install_stop_handler(harvester: &Harvester) {
    let stop = harvester.stop_signal().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl-C received, stopping...");
            stop.stop();
        }
    });
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);
    log::debug!("Loaded configuration from {}", config_path.display());

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!("✓ Config OK");
        return Ok(());
    }

    let search = config.search.clone();
    let harvester = Harvester::with_http(config, &cli.storage_dir)?;

    match cli.command {
        Command::Harvest {
            layouts,
            skip_known,
            recheck_details,
        } => {
            let mut request = HarvestRequest::from_search(&search);
            if !layouts.is_empty() {
                request.layouts = layouts;
            }
            request.skip_known |= skip_known;
            request.recheck_details |= recheck_details;
            if let Some(unknown) = request
                .layouts
                .iter()
                .find(|l| harvester.config().site.layout_param(l).is_none())
            {
                return Err(AppError::validation(format!("unknown layout '{unknown}'")));
            }

            harvester.load().await?;
            install_stop_handler(&harvester);
            let summary = pipeline::run_harvest(&harvester, request).await?;

            log::info!(
                "Harvest complete: {} pages, {} listings ({} new, {} updated), {} detail fetches{}",
                summary.pages,
                summary.discovered,
                summary.added,
                summary.updated,
                summary.queued,
                if summary.stopped { " (stopped)" } else { "" }
            );
        }

        Command::Refresh => {
            harvester.load().await?;
            install_stop_handler(&harvester);
            let queued = pipeline::run_refresh(&harvester).await?;
            log::info!("Refreshed details for {} listings", queued);
        }

        Command::Retry { link } => {
            harvester.load().await?;
            install_stop_handler(&harvester);
            if !pipeline::run_retry(&harvester, &link).await? {
                return Err(AppError::validation(format!("unknown listing '{link}'")));
            }
            if let Some(listing) = harvester.store().get(&link) {
                log::info!("{}: {}", listing.fetch_status, listing);
            }
        }

        Command::List { filter, favorites } => {
            load_quietly(&harvester).await?;
            let listings = if favorites {
                harvester.store().favorites()
            } else {
                harvester.store().filter_and_sort(
                    filter.min_area.unwrap_or(search.min_area),
                    filter.max_rent.unwrap_or(search.max_rent),
                    filter.sort.unwrap_or(search.sort_key),
                    filter.desc || search.descending,
                )
            };
            for listing in &listings {
                println!("{}\n    {}", listing, listing.link);
            }
            log::info!("{} listings", listings.len());
        }

        Command::Stats { filter } => {
            load_quietly(&harvester).await?;
            let store = harvester.store();
            let filtered = store.filter_and_sort(
                filter.min_area.unwrap_or(search.min_area),
                filter.max_rent.unwrap_or(search.max_rent),
                filter.sort.unwrap_or(search.sort_key),
                filter.desc || search.descending,
            );
            let stats = store.compute_statistics(&filtered);

            log::info!("Total listings: {}", stats.total);
            log::info!("Displayed: {}", stats.displayed);
            log::info!("Favorites: {}", stats.favorites);
            log::info!(
                "Average rent: {}",
                stats
                    .average_rent
                    .map(|r| format!("¥{:.0}", r))
                    .unwrap_or_else(|| "N/A".to_string())
            );
            log::info!(
                "Average area: {}",
                stats
                    .average_area
                    .map(|a| format!("{:.1} m²", a))
                    .unwrap_or_else(|| "N/A".to_string())
            );
            let layouts: Vec<String> = stats
                .layout_counts
                .iter()
                .map(|(layout, count)| format!("{layout}: {count}"))
                .collect();
            log::info!(
                "Layouts: {}",
                if layouts.is_empty() {
                    "N/A".to_string()
                } else {
                    layouts.join(", ")
                }
            );
        }

        Command::Favorite { link } => {
            load_quietly(&harvester).await?;
            let value = harvester
                .store()
                .toggle_favorite(&link)
                .ok_or_else(|| AppError::validation(format!("unknown listing '{link}'")))?;
            harvester.save().await?;
            log::info!("Favorite {} for {}", if value { "set" } else { "cleared" }, link);
        }

        Command::Viewed { link } => {
            load_quietly(&harvester).await?;
            let value = harvester
                .store()
                .toggle_viewed(&link)
                .ok_or_else(|| AppError::validation(format!("unknown listing '{link}'")))?;
            harvester.save().await?;
            log::info!("Viewed {} for {}", if value { "set" } else { "cleared" }, link);
        }

        Command::Clear => {
            let photos = harvester.clear_all().await?;
            log::info!("Cleared all listings and {} cached photos", photos);
        }

        Command::Info => {
            load_quietly(&harvester).await?;
            let store = harvester.store();
            let all = store.get_all();
            log::info!("Storage directory: {}", harvester.storage_dir().display());
            log::info!("Listings: {}", all.len());
            for status in [
                FetchStatus::PendingDetails,
                FetchStatus::DetailsOk,
                FetchStatus::DetailFetchError,
                FetchStatus::DetailParseError,
            ] {
                let count = all.iter().filter(|l| l.fetch_status == status).count();
                log::info!("  {}: {}", status, count);
            }
            if let Some(newest) = all.last() {
                log::info!("Newest listing added: {}", newest.date_added);
            }
            log::info!("Photo cache: {}", harvester.assets().dir().display());
        }

        Command::Validate => {}
    }

    Ok(())
}

/// Load the snapshot for read-only commands without resuming detail fetches.
async fn load_quietly(harvester: &Harvester) -> Result<()> {
    let report = harvester.store().load().await?;
    if report.skipped > 0 {
        log::warn!("Skipped {} invalid records in the snapshot", report.skipped);
    }
    Ok(())
}
