use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Command;

use super::traits::ToolProbe;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToolType {
    /// Extraction/download engine
    YtDlp,
    /// Transcoder needed for audio extraction
    Ffmpeg,
}

impl ToolType {
    pub const ALL: [ToolType; 2] = [ToolType::YtDlp, ToolType::Ffmpeg];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version", // ffmpeg uses a single dash
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Snapshot of installed tools, taken once by `detect()`
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    tools: HashMap<ToolType, ToolInfo>,
}

impl ToolManager {
    /// Probe every known tool. Spawns processes; call off the UI path.
    pub fn detect() -> Self {
        let tools = ToolType::ALL
            .into_iter()
            .map(|tool| (tool, Self::probe(tool)))
            .collect();
        Self { tools }
    }

    /// Build from known results, e.g. a cached or test snapshot
    pub fn from_infos(infos: impl IntoIterator<Item = ToolInfo>) -> Self {
        Self {
            tools: infos.into_iter().map(|info| (info.tool_type, info)).collect(),
        }
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> Option<&ToolInfo> {
        self.tools.get(&tool_type)
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        ToolType::ALL
            .iter()
            .filter_map(|tool| self.tools.get(tool).cloned())
            .collect()
    }

    fn probe(tool_type: ToolType) -> ToolInfo {
        let path = find_binary(tool_type.as_str());
        let version = path
            .as_deref()
            .and_then(|p| get_version(p, tool_type));
        tracing::debug!(
            tool = tool_type.as_str(),
            path = ?path,
            version = ?version,
            "tool probe"
        );

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            is_available: path.is_some(),
            version,
            path,
        }
    }
}

impl ToolProbe for ToolManager {
    fn is_available(&self, tool: ToolType) -> bool {
        self.tools.get(&tool).map_or(false, |info| info.is_available)
    }
}

/// Locate a binary in common install paths, then on PATH
pub fn find_binary(binary_name: &str) -> Option<String> {
    let common_paths = [
        format!("/opt/homebrew/bin/{}", binary_name), // Homebrew on Apple Silicon
        format!("/usr/local/bin/{}", binary_name),
        format!("/usr/bin/{}", binary_name),
    ];

    for path in common_paths {
        if std::path::Path::new(&path).exists() {
            return Some(path);
        }
    }

    let locator = if cfg!(windows) { "where" } else { "which" };
    match Command::new(locator).arg(binary_name).output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        }
        _ => None,
    }
}

fn get_version(path: &str, tool_type: ToolType) -> Option<String> {
    match Command::new(path).arg(tool_type.version_arg()).output() {
        Ok(output) if output.status.success() => {
            parse_version(tool_type, &String::from_utf8_lossy(&output.stdout))
        }
        _ => None,
    }
}

/// Pull the version token out of `--version` / `-version` output
pub fn parse_version(tool_type: ToolType, output: &str) -> Option<String> {
    lazy_static::lazy_static! {
        static ref FFMPEG_VERSION_RE: Regex = Regex::new(r"ffmpeg version (\S+)").unwrap();
    }

    match tool_type {
        ToolType::Ffmpeg => FFMPEG_VERSION_RE
            .captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()),
        ToolType::YtDlp => output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string),
    }
}
