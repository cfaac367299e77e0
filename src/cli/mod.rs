use crate::core::{
    api::ChatApi,
    coordinator::{DownloadCoordinator, DownloadSummary},
    ledger::CompletionLedger,
    models::{DEFAULT_VIDEOS_PER_CHANNEL, parse_channel_names, parse_video_ids},
    progress::{DEFAULT_RENDER_INTERVAL, ProgressRenderer, ProgressTracker},
    resolver::{WorkRequest, WorkResolver},
    settings::{DEFAULT_SETTINGS_PATH, SettingsService},
    twitch::TwitchClient,
};
use crate::terminal::StdTerminal;
use clap::{ArgGroup, Parser};
use log::{info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "chatlog")]
#[command(about = "Download chat logs of past broadcasts.", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["video", "channel"])))]
pub struct Cli {
    /// Path to the settings file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Comma-separated video ids (at most 100)
    #[arg(short, long, value_name = "IDS", conflicts_with_all = ["channel", "first"])]
    pub video: Option<String>,

    /// Comma-separated channel names
    #[arg(short, long, value_name = "NAMES")]
    pub channel: Option<String>,

    /// Number of most recent videos to fetch per channel
    #[arg(short, long, value_name = "N")]
    pub first: Option<i64>,
}

impl Cli {
    /// Validate the selection arguments and turn them into a request for the resolver.
    pub fn work_request(&self) -> io::Result<WorkRequest> {
        if let Some(video) = &self.video {
            return Ok(WorkRequest::Videos(parse_video_ids(video)?));
        }

        let Some(channel) = &self.channel else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Either --video or --channel is required",
            ));
        };

        let first = match self.first {
            None => DEFAULT_VIDEOS_PER_CHANNEL,
            Some(n) if n > 0 => n as usize,
            Some(n) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("--first must be greater than 0, got {n}"),
                ));
            }
        };

        Ok(WorkRequest::Channels {
            names: parse_channel_names(channel)?,
            first,
        })
    }
}

pub async fn handle_download(cli: &Cli) -> io::Result<()> {
    let request = cli.work_request()?;
    let started = Instant::now();

    let mut settings = SettingsService::load(&cli.settings)?;
    SettingsService::prepare_output(&settings)?;

    let mut client = TwitchClient::new(&settings)?;
    if client.ensure_access_token().await? {
        settings.access_token = client.access_token().to_string();
        SettingsService::save(&settings)?;
    }
    let api: Arc<dyn ChatApi> = Arc::new(client);

    let ledger = Arc::new(CompletionLedger::load(&settings.ledger_path())?);
    let items = WorkResolver::new(api.as_ref(), &ledger)
        .resolve(&request)
        .await?;

    if items.is_empty() {
        println!("Nothing to download.");
        return Ok(());
    }
    println!("Downloading {} video(s)...", items.len());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping downloads");
            eprintln!("Interrupted, stopping after the pages in flight...");
            interrupt.cancel();
        }
    });

    let tracker = Arc::new(ProgressTracker::new());
    let stop_rendering = CancellationToken::new();
    let renderer = ProgressRenderer::spawn(
        Arc::clone(&tracker),
        Box::new(StdTerminal::new()),
        DEFAULT_RENDER_INTERVAL,
        stop_rendering.clone(),
    );

    let result = DownloadCoordinator::new(
        api,
        Arc::clone(&ledger),
        tracker,
        settings.template.clone(),
        settings.output_path.clone(),
        settings.max_concurrent_downloads,
        cancel,
    )
    .run(items)
    .await;

    stop_rendering.cancel();
    if let Err(e) = renderer.await {
        warn!("Progress display stopped abnormally: {e}");
    }

    // Whatever completed is kept, even when the run itself failed.
    ledger.save()?;
    info!("Ledger holds {} video(s)", ledger.len());

    let summary = result?;
    print_summary(&summary, started.elapsed());

    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "{} video(s) failed to download",
            summary.failed.len()
        )))
    }
}

fn print_summary(summary: &DownloadSummary, elapsed: Duration) {
    println!();
    for line in summary_lines(summary, elapsed) {
        println!("{line}");
    }
}

fn summary_lines(summary: &DownloadSummary, elapsed: Duration) -> Vec<String> {
    let sink = &summary.sink;
    let mut lines = vec![
        format!("Finished in {}", format_elapsed(elapsed)),
        format!(
            "Completed: {}  Failed: {}  Cancelled: {}",
            summary.completed.len(),
            summary.failed.len(),
            summary.cancelled.len() + summary.not_started
        ),
        format!(
            "Wrote {} comment(s) in {} page(s) to {} file(s)",
            sink.comments_written,
            sink.pages_written,
            sink.closed.len()
        ),
    ];

    for (video_id, reason) in &summary.failed {
        lines.push(format!("  {video_id}: {reason}"));
    }
    // Failed videos already carry their write error.
    for (video_id, reason) in &sink.write_failures {
        if !summary.failed.iter().any(|(id, _)| id == video_id) {
            lines.push(format!("  {video_id}: write failed: {reason}"));
        }
    }
    if !sink.left_open.is_empty() {
        lines.push(format!(
            "Partial output kept for: {}",
            sink.left_open.join(", ")
        ));
    }
    lines
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, total % 3600 / 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{}.{:02}s", seconds, elapsed.subsec_millis() / 10)
    }
}
