// Common data models for the download session engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::errors::ValidationError;
use super::validation;

/// Target service; decides the host allow-list and the offered quality tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    /// Long-form video platform
    YouTube,
    /// Short-form video platform
    TikTok,
}

impl ServiceId {
    pub const ALL: [ServiceId; 2] = [ServiceId::YouTube, ServiceId::TikTok];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YouTube => "youtube",
            Self::TikTok => "tiktok",
        }
    }

    /// Normalized hosts accepted for this service
    pub fn allowed_hosts(&self) -> &'static [&'static str] {
        match self {
            Self::YouTube => &["youtube.com", "m.youtube.com", "youtu.be"],
            Self::TikTok => &["tiktok.com", "m.tiktok.com", "vt.tiktok.com"],
        }
    }

    /// Quality tiers offered for this service
    pub fn qualities(&self) -> &'static [QualitySpec] {
        match self {
            Self::YouTube => &[
                QualitySpec::Best,
                QualitySpec::P1080,
                QualitySpec::P720,
                QualitySpec::P480,
                QualitySpec::P360,
            ],
            Self::TikTok => &[QualitySpec::Best, QualitySpec::P720, QualitySpec::P480],
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::YouTube),
            "tiktok" => Ok(Self::TikTok),
            other => Err(ValidationError::UnknownService(other.to_string())),
        }
    }
}

/// Requested video quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualitySpec {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl QualitySpec {
    /// Vertical resolution cap, `None` for Best
    pub fn height(&self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::P360 => "360p",
        }
    }
}

impl fmt::Display for QualitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualitySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "1080p" => Ok(Self::P1080),
            "720p" => Ok(Self::P720),
            "480p" => Ok(Self::P480),
            "360p" => Ok(Self::P360),
            other => Err(format!("unknown quality: {}", other)),
        }
    }
}

/// Fetch scope inferred from a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    #[default]
    Single,
    Playlist,
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Playlist => write!(f, "playlist"),
        }
    }
}

/// Everything derived from a raw URL string; recomputed on every edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UrlClassification {
    pub is_http_url: bool,
    pub service: Option<ServiceId>,
    pub mode: DownloadMode,
    pub is_mix_or_radio: bool,
}

/// One user-initiated download. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    service: ServiceId,
    quality: QualitySpec,
    audio_only: bool,
    playlist: bool,
    first_n: u32,
    allow_mix: bool,
    cookies_file: Option<PathBuf>,
    rate_limit_kbps: u32,
    concurrent_fragments: u32,
    output_template: String,
    destination_dir: Option<PathBuf>,
}

pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
pub const DEFAULT_CONCURRENT_FRAGMENTS: u32 = 3;

impl DownloadRequest {
    pub fn new(url: impl Into<String>, service: ServiceId) -> Self {
        Self {
            url: url.into().trim().to_string(),
            service,
            quality: QualitySpec::Best,
            audio_only: false,
            playlist: false,
            first_n: 0,
            allow_mix: false,
            cookies_file: None,
            rate_limit_kbps: 0,
            concurrent_fragments: DEFAULT_CONCURRENT_FRAGMENTS,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            destination_dir: None,
        }
    }

    pub fn with_quality(mut self, quality: QualitySpec) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_audio_only(mut self, audio_only: bool) -> Self {
        self.audio_only = audio_only;
        self
    }

    pub fn with_playlist(mut self, playlist: bool) -> Self {
        self.playlist = playlist;
        self
    }

    /// Cap on playlist items; 0 means unlimited
    pub fn with_first_n(mut self, first_n: u32) -> Self {
        self.first_n = first_n;
        self
    }

    pub fn with_allow_mix(mut self, allow_mix: bool) -> Self {
        self.allow_mix = allow_mix;
        self
    }

    pub fn with_cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }

    /// 0 means unlimited
    pub fn with_rate_limit_kbps(mut self, kbps: u32) -> Self {
        self.rate_limit_kbps = kbps;
        self
    }

    pub fn with_concurrent_fragments(mut self, count: u32) -> Self {
        self.concurrent_fragments = count;
        self
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = template.into();
        self
    }

    pub fn with_destination_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.destination_dir = dir;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn quality(&self) -> QualitySpec {
        self.quality
    }

    pub fn audio_only(&self) -> bool {
        self.audio_only
    }

    pub fn playlist(&self) -> bool {
        self.playlist
    }

    pub fn first_n(&self) -> u32 {
        self.first_n
    }

    pub fn allow_mix(&self) -> bool {
        self.allow_mix
    }

    pub fn cookies_file(&self) -> Option<&PathBuf> {
        self.cookies_file.as_ref()
    }

    pub fn rate_limit_kbps(&self) -> u32 {
        self.rate_limit_kbps
    }

    pub fn concurrent_fragments(&self) -> u32 {
        self.concurrent_fragments
    }

    pub fn output_template(&self) -> &str {
        &self.output_template
    }

    pub fn destination_dir(&self) -> Option<&PathBuf> {
        self.destination_dir.as_ref()
    }

    /// Checks URL, quality tier and the Mix/Radio opt-in.
    ///
    /// Quality is not checked for audio-only requests since the tier is ignored there.
    pub fn validate(&self) -> Result<UrlClassification, ValidationError> {
        validation::validate_for_service(&self.url, self.service)?;

        if !self.audio_only && !self.service.qualities().contains(&self.quality) {
            return Err(ValidationError::UnsupportedQuality {
                service: self.service,
                quality: self.quality,
            });
        }

        let classification = validation::classify(&self.url);
        if classification.is_mix_or_radio && !self.allow_mix {
            return Err(ValidationError::MixNotAllowed);
        }

        Ok(classification)
    }
}

/// Download progress for one engine tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// `None` when the total size is unknown for this tick
    pub percent: Option<f64>,
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
}

/// Status notifications; all but `Finished` are terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum StatusEvent {
    /// One file finished downloading (may be empty if the engine gave no name)
    Finished(String),
    Completed,
    Error(String),
    Canceled,
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Finished(_))
    }
}

/// What sinks receive from a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    Status(StatusEvent),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status(status) if status.is_terminal())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Completed,
    Failed,
    Canceled,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    Canceling,
    Terminal(Outcome),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Canceling)
    }
}
