//! Read-only user settings from `~/.vd_settings.json`.
//!
//! A missing or unreadable file yields defaults. Keys absent from the file take
//! their default; unknown keys are ignored. Nothing is ever written back.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::downloader::models::{DownloadRequest, ServiceId, DEFAULT_CONCURRENT_FRAGMENTS};

pub const SETTINGS_FILE: &str = ".vd_settings.json";

/// Groups playlist items in a folder and numbers them
pub const DEFAULT_OUTTMPL: &str =
    "%(playlist_title,playlist)s/%(playlist_index>03d)s - %(title).95s.%(ext)s";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Destination directory joined with `outtmpl`
    pub download_dir: PathBuf,
    /// 0 = unlimited
    pub ratelimit_kbps: u32,
    pub concurrent_frags: u32,
    pub outtmpl: String,
    /// Netscape cookies file; empty = none
    pub cookies_txt: String,
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
        .join("VD_Logs")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            ratelimit_kbps: 0,
            concurrent_frags: DEFAULT_CONCURRENT_FRAGMENTS,
            outtmpl: DEFAULT_OUTTMPL.to_string(),
            cookies_txt: String::new(),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SETTINGS_FILE))
}

/// Load from the default location
pub fn load() -> AppConfig {
    match config_path() {
        Some(path) => load_from(&path),
        None => AppConfig::default(),
    }
}

pub fn load_from(path: &Path) -> AppConfig {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!("no settings at {} ({}), using defaults", path.display(), e);
            return AppConfig::default();
        }
    };

    match serde_json::from_str(&data) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("ignoring malformed settings {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub fn cookies_file(&self) -> Option<PathBuf> {
        let raw = self.cookies_txt.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
            None => Some(PathBuf::from(raw)),
        }
    }

    /// Request for `url` seeded with these settings; per-download choices are left at defaults
    pub fn request_for(&self, url: &str, service: ServiceId) -> DownloadRequest {
        DownloadRequest::new(url, service)
            .with_rate_limit_kbps(self.ratelimit_kbps)
            .with_concurrent_fragments(self.concurrent_frags.max(1))
            .with_output_template(self.outtmpl.clone())
            .with_destination_dir(Some(self.download_dir.clone()))
            .with_cookies_file(self.cookies_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.ratelimit_kbps, 0);
        assert_eq!(cfg.concurrent_frags, 3);
        assert_eq!(cfg.outtmpl, DEFAULT_OUTTMPL);
        assert!(cfg.download_dir.ends_with("VD_Logs"));
        assert_eq!(cfg.cookies_file(), None);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_from(&dir.path().join("absent.json")), AppConfig::default());
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_from(&path), AppConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"{"download_dir": "/srv/media", "ratelimit_kbps": 250, "theme": "dark"}"#,
        )
        .unwrap();

        let cfg = load_from(&path);
        assert_eq!(cfg.download_dir, PathBuf::from("/srv/media"));
        assert_eq!(cfg.ratelimit_kbps, 250);
        assert_eq!(cfg.concurrent_frags, 3);
        assert_eq!(cfg.outtmpl, DEFAULT_OUTTMPL);
    }

    #[test]
    fn test_request_for_seeds_request() {
        let cfg = AppConfig {
            download_dir: PathBuf::from("/srv/media"),
            ratelimit_kbps: 64,
            concurrent_frags: 0,
            outtmpl: "%(id)s.%(ext)s".to_string(),
            cookies_txt: "/etc/cookies.txt".to_string(),
        };
        let req = cfg.request_for(" https://youtu.be/abc ", ServiceId::YouTube);

        assert_eq!(req.url(), "https://youtu.be/abc");
        assert_eq!(req.rate_limit_kbps(), 64);
        assert_eq!(req.concurrent_fragments(), 1);
        assert_eq!(req.output_template(), "%(id)s.%(ext)s");
        assert_eq!(req.destination_dir(), Some(&PathBuf::from("/srv/media")));
        assert_eq!(req.cookies_file(), Some(&PathBuf::from("/etc/cookies.txt")));
        assert!(!req.audio_only());
        assert!(!req.playlist());
    }
}
