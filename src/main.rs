//! Newscover main entry point
//!
//! This is the command-line interface for the newscover crawler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use newscover::config::{load_config_with_hash, Config};
use newscover::crawler::{CoverHooks, Persister, Scheduler, TokioExecutor};
use newscover::storage::{Backend, SqliteBackend};
use newscover::{Cover, CoverError, FilterOptions, ReporterKind, Schedule, UrlError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Newscover: keeps registered sites covered
///
/// Newscover periodically crawls every registered root URL, follows the
/// links worth visiting and stores what it finds.
#[derive(Parser, Debug)]
#[command(name = "newscover")]
#[command(version)]
#[command(about = "Periodic recursive crawler for registered sites", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted
    Serve,

    /// Run one cover for a schedule now
    Cover {
        /// Schedule id
        id: i64,

        /// Save every item as soon as it is fetched
        #[arg(long)]
        incremental: bool,
    },

    /// Register a new schedule
    Add {
        /// Root URL to cover
        url: String,

        /// Owner of the schedule
        #[arg(long)]
        owner: String,

        /// Seconds between covers
        #[arg(long, default_value_t = 3600)]
        cycle: u64,

        /// Treat the root URL as an RSS/Atom feed
        #[arg(long)]
        feed: bool,

        /// Follow links only from pages closer than this to the root
        #[arg(long)]
        max_dist: Option<u32>,

        /// Maximum path depth below the root
        #[arg(long)]
        max_depth: Option<usize>,

        /// Maximum number of URLs visited per cover
        #[arg(long)]
        max_visit: Option<usize>,

        /// File extension never visited (repeatable)
        #[arg(long = "blacklist", value_name = "EXT")]
        blacklist: Vec<String>,

        /// Alternate root sharing the crawl scope (repeatable)
        #[arg(long = "brother", value_name = "URL")]
        brothers: Vec<String>,
    },

    /// Delete a schedule and its items
    Remove {
        /// Schedule id
        id: i64,
    },

    /// List registered schedules
    List {
        /// Only show schedules of this owner
        #[arg(long)]
        owner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let backend: Arc<dyn Backend> =
        Arc::new(SqliteBackend::new(Path::new(&config.storage.database_path))?);

    match cli.command {
        Command::Serve => handle_serve(&config, backend).await,
        Command::Cover { id, incremental } => handle_cover(&config, backend, id, incremental).await,
        Command::Add {
            url,
            owner,
            cycle,
            feed,
            max_dist,
            max_depth,
            max_visit,
            blacklist,
            brothers,
        } => {
            let mut options = FilterOptions {
                max_dist,
                max_depth,
                max_visit,
                brothers,
                ..Default::default()
            };
            for ext in &blacklist {
                options.blacklist_extension(ext);
            }
            let kind = if feed {
                ReporterKind::Feed
            } else {
                ReporterKind::Page
            };
            handle_add(&config, backend, &url, &owner, cycle, kind, options).await
        }
        Command::Remove { id } => handle_remove(&config, backend, id).await,
        Command::List { owner } => handle_list(backend, owner.as_deref()),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("newscover=info,warn"),
            1 => EnvFilter::new("newscover=debug,info"),
            2 => EnvFilter::new("newscover=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs the scheduler and persister until Ctrl-C
async fn handle_serve(config: &Config, backend: Arc<dyn Backend>) -> anyhow::Result<()> {
    let executor = TokioExecutor::new(Arc::clone(&backend), config.crawler.clone())?;
    let hooks = CoverHooks::new()
        .on_success(|schedule, items| {
            tracing::info!(
                schedule_id = schedule.id,
                url = %schedule.url,
                items = items.len(),
                "Covered"
            );
        })
        .on_failure(|schedule, error| {
            tracing::error!(schedule_id = schedule.id, url = %schedule.url, "Cover failed: {}", error);
        });

    let persister = Persister::from_config(&config.pubsub, Arc::clone(&backend))?;
    let scheduler = Scheduler::new(backend, Arc::new(executor), &config.scheduler, hooks);
    scheduler.start(Some(persister)).await?;

    tracing::info!(jobs = scheduler.job_count(), "Serving, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    scheduler.stop().await;
    Ok(())
}

async fn handle_cover(
    config: &Config,
    backend: Arc<dyn Backend>,
    id: i64,
    incremental: bool,
) -> anyhow::Result<()> {
    let schedule = backend
        .get_schedule(id)?
        .ok_or(CoverError::ScheduleNotFound(id))?;

    let mut cover = Cover::from_config(schedule, backend, &config.crawler)?;
    let items = cover.run(config.crawler.bulk_report && !incremental).await?;

    println!("Covered schedule {}: {} items", id, items.len());
    Ok(())
}

async fn handle_add(
    config: &Config,
    backend: Arc<dyn Backend>,
    url: &str,
    owner: &str,
    cycle: u64,
    kind: ReporterKind,
    options: FilterOptions,
) -> anyhow::Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| UrlError::Parse(e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(UrlError::InvalidScheme(parsed.scheme().to_string()).into());
    }
    if parsed.host_str().is_none() {
        return Err(UrlError::MissingHost(url.to_string()).into());
    }
    if cycle == 0 {
        anyhow::bail!("--cycle must be at least 1 second");
    }

    let mut schedule = Schedule::new(owner, url, Duration::from_secs(cycle))
        .with_kind(kind)
        .with_options(options);
    let created = backend.save_schedule(&mut schedule)?;

    let persister = Persister::from_config(&config.pubsub, backend)?;
    persister.notify_saved(&schedule, created).await;

    let verb = if created { "Added" } else { "Updated" };
    println!("{} schedule {} for {}", verb, schedule.id, schedule.url);
    Ok(())
}

async fn handle_remove(config: &Config, backend: Arc<dyn Backend>, id: i64) -> anyhow::Result<()> {
    let schedule = backend
        .get_schedule(id)?
        .ok_or(CoverError::ScheduleNotFound(id))?;
    backend.delete_schedule(id)?;

    let persister = Persister::from_config(&config.pubsub, backend)?;
    persister.notify_deleted(&schedule).await;

    println!("Removed schedule {} ({})", id, schedule.url);
    Ok(())
}

fn handle_list(backend: Arc<dyn Backend>, owner: Option<&str>) -> anyhow::Result<()> {
    let schedules = backend.get_schedules(owner, None)?;
    if schedules.is_empty() {
        println!("No schedules");
        return Ok(());
    }

    println!(
        "{:>6}  {:<12}  {:<5}  {:>8}  {:<7}  URL",
        "ID", "OWNER", "KIND", "CYCLE", "ENABLED"
    );
    for schedule in schedules {
        println!(
            "{:>6}  {:<12}  {:<5}  {:>7}s  {:<7}  {}",
            schedule.id,
            schedule.owner,
            schedule.kind,
            schedule.cycle.as_secs(),
            schedule.enabled,
            schedule.url
        );
    }
    Ok(())
}
