// Option builder - DownloadRequest -> EngineOptions
//
// Deterministic: the only environment input is whether the cookie file exists.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::format_selector::{FormatSelector, PostProcessor};
use super::models::{DownloadRequest, ServiceId};

/// Retry count for whole items and for single fragments
pub const RETRIES: u32 = 5;

/// Substituted for metadata fields the engine cannot fill
pub const NA_PLACEHOLDER: &str = "NA";

/// How much of a playlist the engine may fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaylistScope {
    /// Only the referenced item, even if the URL names a playlist
    SingleItem,
    /// Playlist items, optionally capped
    Items { end: Option<u32> },
}

/// Delivery variants the engine can be told to skip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamingProtocol {
    Dash,
    Hls,
}

impl StreamingProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dash => "dash",
            Self::Hls => "hls",
        }
    }
}

/// Typed option set consumed by an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    pub format: String,
    pub postprocessors: Vec<PostProcessor>,
    pub continue_partial: bool,
    pub retries: u32,
    pub fragment_retries: u32,
    pub sanitize_filenames: bool,
    pub na_placeholder: String,
    pub ignore_errors: bool,
    pub concurrent_fragments: u32,
    /// Bytes per second; `None` means unlimited
    pub rate_limit: Option<u64>,
    pub cookie_file: Option<PathBuf>,
    /// Output template already joined with the destination directory
    pub output: PathBuf,
    pub playlist: PlaylistScope,
    /// YouTube-only; set when mixes are not allowed
    pub skip_protocols: Vec<StreamingProtocol>,
}

impl EngineOptions {
    pub fn extracts_audio(&self) -> bool {
        self.postprocessors
            .iter()
            .any(|p| matches!(p, PostProcessor::ExtractAudio { .. }))
    }
}

/// Join template and directory once; a template already rooted in `dir` is kept.
fn join_output(dir: Option<&PathBuf>, template: &str) -> PathBuf {
    let template_path = Path::new(template);
    match dir {
        Some(dir) if !dir.as_os_str().is_empty() && !template_path.starts_with(dir) => {
            dir.join(template_path)
        }
        _ => template_path.to_path_buf(),
    }
}

pub fn build(request: &DownloadRequest) -> EngineOptions {
    let (format, postprocessors) =
        FormatSelector::select(request.quality(), request.audio_only());

    let rate_limit = match request.rate_limit_kbps() {
        0 => None,
        kbps => Some(u64::from(kbps) * 1024),
    };

    // a stale cookie path means "no cookies"
    let cookie_file = request.cookies_file().filter(|p| p.exists()).cloned();

    let playlist = if !request.playlist() {
        PlaylistScope::SingleItem
    } else {
        match request.first_n() {
            0 => PlaylistScope::Items { end: None },
            n => PlaylistScope::Items { end: Some(n) },
        }
    };

    let skip_protocols = if request.service() == ServiceId::YouTube && !request.allow_mix() {
        vec![StreamingProtocol::Dash, StreamingProtocol::Hls]
    } else {
        Vec::new()
    };

    EngineOptions {
        format,
        postprocessors,
        continue_partial: true,
        retries: RETRIES,
        fragment_retries: RETRIES,
        sanitize_filenames: true,
        na_placeholder: NA_PLACEHOLDER.to_string(),
        ignore_errors: true,
        concurrent_fragments: request.concurrent_fragments(),
        rate_limit,
        cookie_file,
        output: join_output(request.destination_dir(), request.output_template()),
        playlist,
        skip_protocols,
    }
}
