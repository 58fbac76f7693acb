use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use radar_client::core::{CoreHandle, CoreSnapshot, CoreUpdate, OrganizeOutcome};
use radar_client::prompt::{AutoPrompter, Prompter, StdioPrompter};
use radar_client::settings_store::FileBackend;
use radar_client::transport::HttpJobClient;
use radar_proto::config::Config;
use radar_proto::platform;
use radar_proto::protocol::{AutomationConfig, DateWindow, RunDay, ScanPhase, ScanStatus};
use radar_proto::settings::{AlbumType, FilterSettings};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "radar")]
#[command(version)]
#[command(about = "Find new releases from the artists you follow and turn them into a playlist")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scan, curate the results and optionally export them
    Scan(ScanArgs),
    /// Show or change the stored filter settings
    Settings(SettingsArgs),
    /// Show or change the weekly automation schedule
    Automation(AutomationArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Release window in days, ending today
    #[arg(
        long,
        default_value_t = 7,
        value_parser = clap::value_parser!(u32).range(1..=3650),
        conflicts_with_all = ["from", "to"]
    )]
    days: u32,

    /// First release date (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// Last release date (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,

    /// Rebuild the followed-artist cache before scanning
    #[arg(long)]
    refresh: bool,

    /// Show and export only tracks whose title or artist matches
    #[arg(long)]
    search: Option<String>,

    /// Re-apply the filter settings to the results
    #[arg(long)]
    refine: bool,

    /// Drop clean versions of tracks that also come explicit
    #[arg(long)]
    prefer_explicit: bool,

    /// Move albums to the end of the list
    #[arg(long)]
    organize: bool,

    /// Answer yes to every question
    #[arg(long, short)]
    yes: bool,

    /// Export the selection as a playlist (name defaults to the scan window)
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    export: Option<String>,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// Start from the built-in defaults
    #[arg(long)]
    reset: bool,

    #[arg(long)]
    min_duration: Option<u32>,

    #[arg(long)]
    max_duration: Option<u32>,

    #[arg(long)]
    add_keyword: Vec<String>,

    #[arg(long)]
    remove_keyword: Vec<String>,

    #[arg(long)]
    exclude_artist: Vec<String>,

    /// Comma-separated: album,single,compilation,appears_on
    #[arg(long, value_delimiter = ',')]
    album_types: Option<Vec<AlbumType>>,

    #[arg(long)]
    followed: Option<bool>,

    #[arg(long)]
    liked: Option<bool>,

    #[arg(long)]
    min_liked: Option<u32>,
}

#[derive(Args, Debug)]
struct AutomationArgs {
    #[arg(long, conflicts_with = "disable")]
    enable: bool,

    #[arg(long)]
    disable: bool,

    /// Weekday to run on
    #[arg(long)]
    day: Option<RunDay>,

    /// Time of day, HH:MM UTC
    #[arg(long)]
    time: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = init_logging()?;
    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("radar log: {}", log_path.display());
    tracing::info!("radar starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Config unreadable, using defaults: {:#}", e);
            Config::default()
        }
    };

    // ── Build RadarCore ──────────────────────────────────────────────────────
    let assume_yes = matches!(&cli.command, Command::Scan(args) if args.yes);
    let prompter: Arc<dyn Prompter> = if assume_yes {
        Arc::new(AutoPrompter { answer: true })
    } else {
        Arc::new(StdioPrompter)
    };
    let api = Arc::new(HttpJobClient::new(&config.server)?);
    let backend = Box::new(FileBackend::new(config.settings.file.clone()));
    let (radar_core, handle, command_rx) =
        radar_client::core::channel(&config, api, backend, prompter.clone());
    let mut updates = handle.subscribe();

    let core_task = tokio::spawn(async move {
        if let Err(e) = radar_core.run(command_rx).await {
            tracing::error!("RadarCore exited with error: {}", e);
        }
    });

    let result = match cli.command {
        Command::Scan(args) => run_scan(&handle, &mut updates, prompter.as_ref(), args).await,
        Command::Settings(args) => run_settings(&handle, args).await,
        Command::Automation(args) => {
            run_automation(&handle, &mut updates, args, &config).await
        }
    };

    handle.shutdown().await;
    if let Err(e) = core_task.await {
        tracing::error!("RadarCore task failed: {}", e);
    }
    result
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let log_path = platform::log_file();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,radar_client=debug,reqwest=warn,hyper=warn"));
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();
    Ok(log_path)
}

// ── scan ──────────────────────────────────────────────────────────────────────

async fn run_scan(
    handle: &CoreHandle,
    updates: &mut broadcast::Receiver<CoreUpdate>,
    prompter: &dyn Prompter,
    args: ScanArgs,
) -> anyhow::Result<()> {
    let window = match (args.from, args.to) {
        (Some(start), Some(end)) => DateWindow::Custom { start, end },
        _ => DateWindow::LastDays(args.days),
    };
    handle.start_scan(window, args.refresh.then_some(true)).await?;

    let phase = wait_for_scan(handle, updates).await?;
    if phase != ScanPhase::Completed {
        bail!("scan ended in state {}", phase);
    }

    if let Some(term) = &args.search {
        let count = handle.search(term).await?;
        eprintln!("{count} tracks match {term:?}");
        let snapshot = handle.snapshot().await?;
        let shown: HashSet<&str> = snapshot.visible.iter().map(|t| t.uri.as_str()).collect();
        let hidden: Vec<String> = snapshot
            .tracks
            .iter()
            .filter(|t| !shown.contains(t.uri.as_str()))
            .map(|t| t.uri.clone())
            .collect();
        handle.set_visible(hidden, false).await?;
    }
    if args.refine {
        let count = handle.refine().await?;
        eprintln!("{count} tracks left after refining");
    }
    if args.prefer_explicit {
        let count = handle.prefer_explicit().await?;
        eprintln!("{count} tracks left after preferring explicit versions");
    }
    if args.organize {
        organize(handle, prompter, args.yes).await?;
    }

    print_tracks(&handle.snapshot().await?);

    if let Some(name) = args.export {
        let name = (!name.trim().is_empty()).then_some(name);
        match handle.export(name).await {
            Ok(playlist) => println!("Playlist: {}", playlist.url),
            // Already reported as a notice.
            Err(e) if e.is_precondition() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn wait_for_scan(
    handle: &CoreHandle,
    updates: &mut broadcast::Receiver<CoreUpdate>,
) -> anyhow::Result<ScanPhase> {
    let mut stop_sent = false;
    let mut last_line = String::new();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(CoreUpdate::Status(status)) => {
                    let line = progress_line(&status);
                    if line != last_line {
                        eprintln!("{line}");
                        last_line = line;
                    }
                }
                Ok(CoreUpdate::ScanFinished(phase)) => return Ok(phase),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} core updates", n),
                Err(RecvError::Closed) => bail!("core stopped before the scan finished"),
            },
            _ = tokio::signal::ctrl_c(), if !stop_sent => {
                stop_sent = true;
                eprintln!("Stopping scan…");
                if let Err(e) = handle.stop_scan().await {
                    eprintln!("{e}");
                }
            }
        }
    }
}

fn progress_line(status: &ScanStatus) -> String {
    let mut line = format!(
        "[{}] {}/{} ({:.0}%) {} found",
        status.phase,
        status.progress,
        status.total,
        status.percent(),
        status.result_count
    );
    if !status.current_artist.is_empty() {
        line.push_str(&format!(" - {}", status.current_artist));
    }
    if let Some(secs) = status.retry_after_secs {
        line.push_str(&format!(" (rate limited, retry in {secs}s)"));
    }
    line
}

async fn organize(handle: &CoreHandle, prompter: &dyn Prompter, assume_yes: bool) -> anyhow::Result<()> {
    let detection = handle.detect_albums().await?;
    let mut drop = Vec::new();
    if !assume_yes {
        for album in &detection.albums {
            let question = format!("Keep album {} ({} tracks)?", album.key, album.tracks.len());
            if !prompter.confirm(&question).await {
                drop.push(album.key.clone());
            }
        }
    }
    match handle.organize(drop).await? {
        OrganizeOutcome::Applied { albums, dropped } => {
            eprintln!("Moved {albums} albums to the end, dropped {dropped} tracks")
        }
        OrganizeOutcome::Declined => eprintln!("Organize cancelled"),
        OrganizeOutcome::NoAlbums => {}
    }
    Ok(())
}

fn print_tracks(snapshot: &CoreSnapshot) {
    let selected: HashSet<&str> = snapshot.selected.iter().map(String::as_str).collect();
    for track in &snapshot.visible {
        let mark = if selected.contains(track.uri.as_str()) { "x" } else { " " };
        println!(
            "[{}] {} - {} ({}) {}",
            mark,
            track.artist_names().collect::<Vec<_>>().join(", "),
            track.name,
            track.album.name,
            track.duration_label()
        );
    }
    if snapshot.visible.len() == snapshot.tracks.len() {
        println!(
            "{} tracks, {} selected",
            snapshot.tracks.len(),
            snapshot.selected.len()
        );
    } else {
        println!(
            "{} of {} tracks shown, {} selected",
            snapshot.visible.len(),
            snapshot.tracks.len(),
            snapshot.selected.len()
        );
    }
}

// ── settings ──────────────────────────────────────────────────────────────────

async fn run_settings(handle: &CoreHandle, args: SettingsArgs) -> anyhow::Result<()> {
    let stored = handle.snapshot().await?.settings;
    let mut settings = if args.reset {
        FilterSettings::default()
    } else {
        stored.clone()
    };

    if let Some(min) = args.min_duration {
        settings.min_duration_sec = min;
    }
    if let Some(max) = args.max_duration {
        settings.max_duration_sec = max;
    }
    for keyword in &args.add_keyword {
        settings.add_keyword(keyword);
    }
    for keyword in &args.remove_keyword {
        settings.remove_keyword(keyword);
    }
    for artist in &args.exclude_artist {
        settings.exclude_artist(artist);
    }
    if let Some(types) = args.album_types {
        settings.album_types = types.into_iter().collect();
    }
    if let Some(followed) = args.followed {
        settings.include_followed = followed;
    }
    if let Some(liked) = args.liked {
        settings.include_liked = liked;
    }
    if let Some(min_liked) = args.min_liked {
        settings.min_liked_songs = min_liked;
    }

    if settings != stored {
        settings.validate().map_err(|issue| anyhow!("{issue}"))?;
        if !settings.has_source() {
            eprintln!("Warning: neither followed artists nor liked songs are enabled");
        }
        handle.update_settings(settings.clone()).await?;
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

// ── automation ────────────────────────────────────────────────────────────────

async fn run_automation(
    handle: &CoreHandle,
    updates: &mut broadcast::Receiver<CoreUpdate>,
    args: AutomationArgs,
    config: &Config,
) -> anyhow::Result<()> {
    let current = wait_for_automation(updates, config).await;
    let changing = args.enable || args.disable || args.day.is_some() || args.time.is_some();

    let shown = if changing {
        let base = current.unwrap_or_default();
        let enabled = if args.enable {
            true
        } else if args.disable {
            false
        } else {
            base.enabled
        };
        let day = args.day.unwrap_or(base.run_day);
        let time = args.time.unwrap_or(base.run_time_utc);
        handle.save_automation(enabled, day, &time).await?
    } else {
        current.ok_or_else(|| anyhow!("automation config unavailable"))?
    };

    println!(
        "Automation {} - every {:?} at {} UTC",
        if shown.enabled { "enabled" } else { "disabled" },
        shown.run_day,
        shown.run_time_utc
    );
    if let Some(params) = &shown.settings {
        println!("{}", serde_json::to_string_pretty(params)?);
    }
    Ok(())
}

async fn wait_for_automation(
    updates: &mut broadcast::Receiver<CoreUpdate>,
    config: &Config,
) -> Option<AutomationConfig> {
    let wait = async {
        loop {
            match updates.recv().await {
                Ok(CoreUpdate::AutomationLoaded(loaded)) => return Some(loaded),
                Ok(CoreUpdate::AutomationUnavailable(reason)) => {
                    eprintln!("Automation config unavailable: {reason}");
                    return None;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(config.server.request_timeout(), wait)
        .await
        .ok()
        .flatten()
}
