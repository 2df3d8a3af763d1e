//! Command-line front end for the download session.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::config::{self, AppConfig};
use crate::downloader::models::{
    DownloadMode, DownloadRequest, ProgressEvent, QualitySpec, ServiceId, SessionEvent,
    StatusEvent,
};
use crate::downloader::{options, validation, ValidationError};
use crate::downloader::{ChannelSink, DownloadSession, FanoutSink, ToolManager, TracingSink};
use crate::ytdlp::YtDlpEngine;

#[derive(Debug, Parser)]
#[command(name = "video-downloader")]
#[command(version, about = "Video downloader for YouTube and TikTok links (yt-dlp based)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show what a URL is: service, single/playlist, mix/radio.
    Classify {
        url: String,

        /// Check against one service by name instead of all of them
        #[arg(long, value_name = "NAME")]
        service: Option<String>,
    },

    /// Download a video, audio track or playlist.
    Fetch(FetchArgs),

    /// Show detected yt-dlp / ffmpeg paths and versions.
    Tools,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// youtube | tiktok
    pub service: ServiceId,

    pub url: String,

    /// best | 1080p | 720p | 480p | 360p
    #[arg(long, default_value = "best")]
    pub quality: QualitySpec,

    /// Extract mp3 audio (needs ffmpeg).
    #[arg(long)]
    pub audio_only: bool,

    /// Fetch the whole playlist even if the URL also names one video.
    #[arg(long, conflicts_with = "single")]
    pub playlist: bool,

    /// Fetch only the referenced video.
    #[arg(long)]
    pub single: bool,

    /// Only the first N playlist items.
    #[arg(long, value_name = "N")]
    pub first_n: Option<u32>,

    /// Permit auto-generated Mix/Radio playlists.
    #[arg(long)]
    pub allow_mix: bool,

    /// Netscape cookies.txt file.
    #[arg(long, value_name = "PATH")]
    pub cookies: Option<PathBuf>,

    /// Destination directory (default from settings).
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Rate limit in KB/s, 0 = unlimited.
    #[arg(long, value_name = "K")]
    pub rate_limit_kbps: Option<u32>,

    /// Settings file instead of ~/.vd_settings.json.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the yt-dlp command instead of running it.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Classify { url, service } => run_classify(&url, service.as_deref()),
            CliCommand::Fetch(args) => run_fetch(args).await?,
            CliCommand::Tools => run_tools().await?,
        }

        Ok(())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn run_classify(url: &str, service: Option<&str>) {
    let c = validation::classify(url);
    println!("url:       {}", url.trim());
    println!("http:      {}", yes_no(c.is_http_url));
    println!(
        "service:   {}",
        c.service.map_or("unknown", |service| service.as_str())
    );
    println!("mode:      {}", c.mode);
    println!("mix/radio: {}", yes_no(c.is_mix_or_radio));
    for line in validity_lines(url, service) {
        println!("{}", line);
    }
}

/// One line per checked service; a named service goes through the string lookup
fn validity_lines(url: &str, service: Option<&str>) -> Vec<String> {
    let line = |name: &str, result: Result<(), ValidationError>| {
        let label = format!("{}:", name);
        match result {
            Ok(()) => format!("{:<10} valid", label),
            Err(e) => format!("{:<10} {} ({})", label, e.code(), e),
        }
    };
    match service {
        Some(name) => vec![line(
            name,
            validation::validate_for_service_name(url, name).map(|_| ()),
        )],
        None => ServiceId::ALL
            .into_iter()
            .map(|service| line(service.as_str(), validation::validate_for_service(url, service)))
            .collect(),
    }
}

/// Explicit --playlist/--single wins; otherwise the URL decides
fn build_request(cfg: &AppConfig, args: &FetchArgs) -> DownloadRequest {
    let playlist = if args.playlist {
        true
    } else if args.single {
        false
    } else {
        validation::detect_mode(&args.url) == DownloadMode::Playlist
    };

    let mut request = cfg
        .request_for(&args.url, args.service)
        .with_quality(args.quality)
        .with_audio_only(args.audio_only)
        .with_playlist(playlist)
        .with_first_n(args.first_n.unwrap_or(0))
        .with_allow_mix(args.allow_mix);

    if let Some(cookies) = &args.cookies {
        request = request.with_cookies_file(Some(cookies.clone()));
    }
    if let Some(dir) = &args.dir {
        request = request.with_destination_dir(Some(dir.clone()));
    }
    if let Some(kbps) = args.rate_limit_kbps {
        request = request.with_rate_limit_kbps(kbps);
    }
    request
}

async fn detect_engine() -> Result<(ToolManager, YtDlpEngine)> {
    tokio::task::spawn_blocking(|| {
        let tools = ToolManager::detect();
        let engine = YtDlpEngine::detect(&tools);
        (tools, engine)
    })
    .await
    .context("tool detection failed")
}

async fn run_fetch(args: FetchArgs) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    let request = build_request(&cfg, &args);
    let (tools, engine) = detect_engine().await?;

    if args.dry_run {
        request.validate()?;
        let options = options::build(&request);
        let line = engine.command_line(request.url(), &options)?;
        println!("{}", line.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" "));
        return Ok(());
    }

    if let Some(dir) = request.destination_dir() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let (channel, mut events) = ChannelSink::new();
    let sink = FanoutSink::new()
        .with(Arc::new(channel))
        .with(Arc::new(TracingSink::new(request.service().as_str())));
    let session = DownloadSession::new(
        Arc::new(engine),
        Arc::new(tools),
        Arc::new(sink),
        Handle::current(),
    );
    session.start(request)?;

    let status = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Progress(progress)) => {
                    eprint!("\r{:<72}", format_progress(&progress));
                }
                Some(SessionEvent::Status(StatusEvent::Finished(file))) => {
                    eprintln!();
                    if !file.is_empty() {
                        println!("saved: {}", file);
                    }
                }
                Some(SessionEvent::Status(status)) => break status,
                None => bail!("download session ended without a status"),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\ncanceling...");
                session.cancel();
            }
        }
    };

    eprintln!();
    match status {
        StatusEvent::Completed => println!("download completed"),
        StatusEvent::Canceled => println!("download canceled"),
        StatusEvent::Error(message) => bail!("download failed: {}", message),
        StatusEvent::Finished(_) => {}
    }
    Ok(())
}

async fn run_tools() -> Result<()> {
    let (tools, engine) = detect_engine().await?;
    for info in tools.get_all_tools() {
        match (&info.path, info.is_available) {
            (Some(path), true) => println!(
                "{:<8} {:<16} {}",
                info.name,
                info.version.as_deref().unwrap_or("?"),
                path
            ),
            _ => println!("{:<8} not found", info.name),
        }
    }
    match engine.launcher() {
        Some(launcher) => println!("engine   {}", launcher.command().join(" ")),
        None => println!("engine   unavailable"),
    }
    Ok(())
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_speed(speed: Option<f64>) -> String {
    match speed {
        Some(s) if s > 1024.0 * 1024.0 => format!("{:.1} MB/s", s / (1024.0 * 1024.0)),
        Some(s) if s > 1024.0 => format!("{:.1} KB/s", s / 1024.0),
        Some(s) => format!("{:.0} B/s", s),
        None => "0 B/s".to_string(),
    }
}

pub fn format_eta(eta: Option<u64>) -> String {
    match eta {
        Some(secs) if secs > 0 => format!("{:02}:{:02}", secs / 60, secs % 60),
        _ => "--:--".to_string(),
    }
}

pub fn format_progress(p: &ProgressEvent) -> String {
    let amount = match (p.percent, p.bytes_total) {
        (Some(percent), Some(total)) => format!("{:5.1}% of {}", percent, format_bytes(total)),
        _ => format!("{} downloaded", format_bytes(p.bytes_downloaded)),
    };
    format!(
        "{} | {} | ETA: {}",
        amount,
        format_speed(p.speed_bytes_per_sec),
        format_eta(p.eta_seconds)
    )
}
