//! coursefeed — headless driver for the sync and file-cache core.
//!
//! Wires the library together the way a client shell would: load the
//! configuration, build a gateway and an orchestrator, run refreshes, keep
//! the annotation store up to date, and fetch attachments into the cache.
//!
//! * `refresh` — one refresh, then print the decorated feed.
//! * `watch`   — periodic bulk refresh until Ctrl-C.
//! * `flag`    — set or clear a flag on one or more items.
//! * `download`— make sure a file is cached and print its path.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use coursefeed::config::Config;
use coursefeed::download::HttpFetcher;
use coursefeed::poll::{self, PollMsg};
use coursefeed::source::HttpGateway;
use coursefeed::{
    AnnotatedItem, AnnotationStore, ContentType, EnsureOptions, Feed, FeedView,
    FileDownloadManager, FileRef, Flag, SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "coursefeed", version, about = "Course content sync and file cache")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, default_value = "coursefeed.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh once and print the feed.
    Refresh {
        /// Refresh only this course.
        #[arg(long)]
        course: Option<String>,
        /// Content kind to fetch.
        #[arg(long, default_value = "notification")]
        kind: ContentType,
        /// Leave archived items out.
        #[arg(long)]
        hide_archived: bool,
        /// List pinned items first.
        #[arg(long)]
        pinned_first: bool,
    },
    /// Refresh every configured course periodically.
    Watch {
        /// Seconds between refreshes.
        #[arg(long, default_value_t = 300)]
        interval: u64,
        #[arg(long, default_value = "notification")]
        kind: ContentType,
    },
    /// Set (or with --off, clear) a flag on items.
    Flag {
        /// Item ids.
        #[arg(required = true)]
        ids: Vec<String>,
        /// pinned, favorite, unread or archived.
        #[arg(long)]
        set: Flag,
        #[arg(long)]
        off: bool,
    },
    /// Ensure a remote file is cached locally.
    Download {
        url: String,
        name: String,
        ext: String,
        /// Download again even if cached.
        #[arg(long)]
        force: bool,
        /// Fall back to a cached copy if the download fails.
        #[arg(long)]
        allow_stale: bool,
    },
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "coursefeed=debug" } else { "coursefeed=info" };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_orchestrator(config: &Config, kind: ContentType) -> Result<SyncOrchestrator> {
    let gateway = HttpGateway::new(
        config.gateway.base_url.clone(),
        config.gateway.token.clone(),
        config.gateway_timeout(),
    )?;
    Ok(SyncOrchestrator::new(
        Arc::new(gateway),
        config.course_directory(),
        kind,
        config.gateway_timeout(),
    ))
}

fn load_store(config: &Config) -> Result<AnnotationStore> {
    AnnotationStore::load(&config.state.annotations).with_context(|| {
        format!(
            "loading annotations from {}",
            config.state.annotations.display()
        )
    })
}

fn print_feed(items: &[AnnotatedItem]) {
    for AnnotatedItem { item, flags } in items {
        let marks: String = [
            (flags.pinned, 'P'),
            (flags.favorite, '*'),
            (flags.unread, '•'),
            (flags.archived, 'A'),
        ]
        .iter()
        .map(|&(on, c)| if on { c } else { ' ' })
        .collect();
        let clip = if item.has_attachment() { " [file]" } else { "" };
        let date_str = item.publish_time.format("%Y-%m-%d %H:%M").to_string();
        println!(
            "{:<18} {} {}{}  [{}]",
            date_str,
            marks,
            item.title,
            clip,
            item.course_name
        );
    }
    println!("{} items", items.len());
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn refresh(
    config: &Config,
    course: Option<String>,
    kind: ContentType,
    view: FeedView,
) -> Result<()> {
    let store = load_store(config)?;
    let orchestrator = build_orchestrator(config, kind)?;

    let items = match course {
        Some(id) => orchestrator.refresh_course(&id).await,
        None => orchestrator.refresh_all(&config.course_ids()).await,
    }
    .context("refresh failed")?;

    let mut feed = Feed::new();
    feed.merge_items(items);
    store.register(feed.items().iter().map(|i| i.id.as_str()));

    print_feed(&feed.annotated(&store, view));
    store.flush().context("saving annotations")?;
    Ok(())
}

async fn watch(config: &Config, interval: Duration, kind: ContentType) -> Result<()> {
    let store = load_store(config)?;
    let orchestrator = Arc::new(build_orchestrator(config, kind)?);
    let course_ids = config.course_ids();
    let (mut rx, _poller) = poll::spawn(orchestrator, course_ids.clone(), interval);

    let mut feed = Feed::new();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(PollMsg::Items(items)) => {
                    feed.replace_courses(&course_ids, items);
                    let fresh = store.register(feed.items().iter().map(|i| i.id.as_str()));
                    println!("fetched {} items ({fresh} new)", feed.len());
                    if let Err(e) = store.flush() {
                        warn!(error = %e, "could not save annotations");
                    }
                }
                Some(PollMsg::Error(e)) => println!("refresh failed: {e}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    store.flush().context("saving annotations")?;
    Ok(())
}

fn set_flag(config: &Config, ids: &[String], flag: Flag, value: bool) -> Result<()> {
    let store = load_store(config)?;
    store.set_flag_bulk(ids, flag, value);
    store.flush().context("saving annotations")?;
    println!("{flag} = {value} on {} items", ids.len());
    Ok(())
}

async fn download(config: &Config, file: FileRef, opts: EnsureOptions) -> Result<()> {
    let fetcher = HttpFetcher::new(config.gateway.token.clone())?;
    let manager = FileDownloadManager::new(
        Arc::new(fetcher),
        &config.cache.dir,
        config.download_settings(),
    )
    .context("opening file cache")?;

    let path = manager
        .ensure(&file, opts, |p| {
            eprint!("\r{:>5.1}%", p * 100.0);
            let _ = std::io::stderr().flush();
        })
        .await
        .with_context(|| format!("downloading {file}"))?;
    eprintln!();
    println!("{}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Refresh {
            course,
            kind,
            hide_archived,
            pinned_first,
        } => {
            let view = FeedView {
                hide_archived,
                pinned_first,
            };
            refresh(&config, course, kind, view).await
        }
        Command::Watch { interval, kind } => {
            watch(&config, Duration::from_secs(interval), kind).await
        }
        Command::Flag { ids, set, off } => set_flag(&config, &ids, set, !off),
        Command::Download {
            url,
            name,
            ext,
            force,
            allow_stale,
        } => {
            let opts = EnsureOptions {
                force,
                allow_stale,
                ..EnsureOptions::default()
            };
            download(&config, FileRef::new(url, name, ext), opts).await
        }
    }
}
