mod anime;
mod cache;
mod config;
mod query;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use anime::client::JikanClient;
use anime::repository::AnimeRepository;
use anime::types::{AnimeDetail, AnimeSummary};
use cache::SqliteStorage;
use query::{results, Query, QueryState};

/// Environment variable holding the log filter
const LOG_ENV: &str = "ANICACHE_LOG";

#[derive(Parser, Debug)]
#[command(name = "anicache")]
#[command(about = "Browse top anime from an offline-first local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/anicache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the top anime list, refreshing it if the cache is empty
  Top {
    /// Seconds to wait for further updates after the last one
    #[arg(long, default_value_t = 5)]
    wait: u64,
  },
  /// Show details for one anime
  Show {
    id: i64,
    /// Seconds to wait for details before giving up
    #[arg(long, default_value_t = 10)]
    wait: u64,
  },
  /// Clear the cache and fetch the top list again
  Refresh,
  /// Drop cached anime not updated recently
  Prune {
    /// Age in days (default: cache.max_age_days from config)
    #[arg(long)]
    older_than_days: Option<i64>,
  },
  /// Delete everything from the cache
  Clear,
  /// Show cache statistics
  Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config, args.verbose)?;

  let storage = SqliteStorage::open(&config.cache_path()?)?;
  let client = JikanClient::new(&config)?;
  let repo = AnimeRepository::new(Arc::new(storage), Arc::new(client))
    .with_page_size(config.api.page_size);

  match args.command {
    Command::Top { wait } => show_top(&repo, Duration::from_secs(wait)).await,
    Command::Show { id, wait } => show_detail(&repo, id, Duration::from_secs(wait)).await,
    Command::Refresh => refresh(&repo).await,
    Command::Prune { older_than_days } => {
      let days = older_than_days.unwrap_or(config.cache.max_age_days);
      let removed = repo.prune_older_than(chrono::Duration::days(days))?;
      println!("Removed {} anime older than {} days", removed, days);
      Ok(())
    }
    Command::Clear => {
      repo.clear_cache()?;
      println!("Cache cleared");
      Ok(())
    }
    Command::Stats => {
      println!("{} anime cached", repo.cached_count()?);
      Ok(())
    }
  }
}

/// Send logs to a daily rolling file, or to stderr when verbose.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(config: &config::Config, verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  if verbose {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = config.log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "anicache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

/// Print every list update until `wait` passes without one.
async fn show_top(repo: &AnimeRepository<SqliteStorage>, wait: Duration) -> Result<()> {
  let repo = repo.clone();
  let mut query = Query::new(move || results(repo.get_top_anime()));
  query.fetch();
  render_top(query.state());

  while let Ok(true) = tokio::time::timeout(wait, query.changed()).await {
    render_top(query.state());
    if query.is_error() {
      break;
    }
  }

  Ok(())
}

fn render_top(state: &QueryState<Vec<AnimeSummary>>) {
  match state {
    QueryState::Idle => {}
    QueryState::Loading => println!("Loading top anime..."),
    QueryState::Success(list) if list.is_empty() => println!("No anime cached"),
    QueryState::Success(list) => {
      println!();
      for (rank, anime) in list.iter().enumerate() {
        println!(
          "{:>3}. {:<50} {:>6}  {}",
          rank + 1,
          anime.title,
          anime.formatted_score(),
          anime.formatted_episodes()
        );
      }
    }
    QueryState::Error(e) => eprintln!("Error: {}", e),
  }
}

/// Print the detail for `id` once available, giving up after `wait`.
async fn show_detail(repo: &AnimeRepository<SqliteStorage>, id: i64, wait: Duration) -> Result<()> {
  let repo = repo.clone();
  let mut query = Query::new(move || results(repo.get_anime_detail(id)));
  query.fetch();

  // The detail stream stays silent until details exist, so time out here
  let _ = tokio::time::timeout(wait, query.changed()).await;

  match query.state() {
    QueryState::Idle | QueryState::Loading => {
      println!("No details available for anime {} yet", id);
    }
    QueryState::Success(detail) => render_detail(detail),
    QueryState::Error(e) => eprintln!("Error: {}", e),
  }

  Ok(())
}

fn render_detail(detail: &AnimeDetail) {
  println!("{}", detail.title);
  println!("Score:    {}", detail.formatted_score());
  println!("Episodes: {}", detail.formatted_episodes());
  println!("Status:   {}", detail.status);
  if !detail.genres.is_empty() {
    println!("Genres:   {}", detail.genres_text());
  }
  if detail.has_trailer() {
    if let Some(url) = &detail.trailer_url {
      println!("Trailer:  {}", url);
    }
  }
  if !detail.image_url.is_empty() {
    println!("Image:    {}", detail.image_url);
  }
  println!();
  println!("{}", detail.synopsis);
}

async fn refresh(repo: &AnimeRepository<SqliteStorage>) -> Result<()> {
  let repo = repo.clone();
  let mut query = Query::new(move || {
    let repo = repo.clone();
    results(futures::stream::once(async move {
      repo.refresh_anime_list().await
    }))
  });
  query.fetch();
  query.changed().await;

  match query.state() {
    QueryState::Idle | QueryState::Loading => Ok(()),
    QueryState::Success(count) => {
      println!("Cached {} anime", count);
      Ok(())
    }
    QueryState::Error(e) => Err(eyre!("Refresh failed: {}", e)),
  }
}
