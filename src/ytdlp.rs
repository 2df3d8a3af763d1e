use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::process::Command as StdCommand;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

use crate::downloader::control::CancelFlag;
use crate::downloader::errors::EngineError;
use crate::downloader::format_selector::PostProcessor;
use crate::downloader::options::{EngineOptions, PlaylistScope};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::traits::{Engine, EngineTick, TickSender};

/// Prefix of the machine-readable progress lines we ask yt-dlp to print
const PROGRESS_PREFIX: &str = "[progress]";

/// How often the cancel flag is checked while yt-dlp runs
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// stderr lines kept for the failure summary
const STDERR_TAIL: usize = 50;

fn python_cmd() -> String {
    // Allow overriding python interpreter (e.g. venv) to avoid Homebrew PEP 668 limitations.
    // Example: export YTDLP_PYTHON="/path/to/venv/bin/python"
    std::env::var("YTDLP_PYTHON").unwrap_or_else(|_| "python3".to_string())
}

fn python_has_module(python: &str, module: &str) -> bool {
    let code = format!("import {}", module);
    match StdCommand::new(python).args(["-c", &code]).output() {
        Ok(out) => out.status.success(),
        Err(_) => false,
    }
}

/// How to invoke yt-dlp: a native binary, or the Python module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    program: String,
    leading_args: Vec<String>,
}

impl Launcher {
    pub fn binary(path: impl Into<String>) -> Self {
        Self {
            program: path.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn python_module(python: impl Into<String>) -> Self {
        Self {
            program: python.into(),
            leading_args: vec!["-m".to_string(), "yt_dlp".to_string()],
        }
    }

    /// Native binary from the tool snapshot first, then `python -m yt_dlp`
    pub fn locate(tools: &ToolManager) -> Option<Self> {
        if let Some(path) = tools
            .get_tool_info(ToolType::YtDlp)
            .filter(|info| info.is_available)
            .and_then(|info| info.path.clone())
        {
            return Some(Self::binary(path));
        }

        let python = python_cmd();
        if python_has_module(&python, "yt_dlp") {
            tracing::debug!(python = %python, "using yt_dlp python module");
            return Some(Self::python_module(python));
        }

        tracing::warn!("yt-dlp not found (no binary, no python module)");
        None
    }

    /// Program followed by its leading arguments
    pub fn command(&self) -> Vec<String> {
        let mut command = vec![self.program.clone()];
        command.extend(self.leading_args.iter().cloned());
        command
    }
}

impl EngineOptions {
    /// yt-dlp command-line flags for these options (without URL)
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            args.push(flag.to_string());
            if let Some(value) = value {
                args.push(value);
            }
        };

        push(if self.continue_partial { "--continue" } else { "--no-continue" }, None);
        push("--retries", Some(self.retries.to_string()));
        push("--fragment-retries", Some(self.fragment_retries.to_string()));
        if self.sanitize_filenames {
            push("--windows-filenames", None);
        }
        push("--output-na-placeholder", Some(self.na_placeholder.clone()));
        if self.ignore_errors {
            push("--ignore-errors", None);
        }
        push("--concurrent-fragments", Some(self.concurrent_fragments.to_string()));
        if let Some(rate) = self.rate_limit {
            push("--limit-rate", Some(rate.to_string()));
        }
        if let Some(cookies) = &self.cookie_file {
            push("--cookies", Some(cookies.to_string_lossy().into_owned()));
        }
        push("-o", Some(self.output.to_string_lossy().into_owned()));
        push("-f", Some(self.format.clone()));

        for step in &self.postprocessors {
            match step {
                PostProcessor::ExtractAudio { codec, quality_kbps } => {
                    push("-x", None);
                    push("--audio-format", Some(codec.clone()));
                    push("--audio-quality", Some(format!("{}K", quality_kbps)));
                }
            }
        }

        match self.playlist {
            PlaylistScope::SingleItem => push("--no-playlist", None),
            PlaylistScope::Items { end } => {
                push("--yes-playlist", None);
                if let Some(end) = end {
                    push("--playlist-end", Some(end.to_string()));
                }
            }
        }

        if !self.skip_protocols.is_empty() {
            let skip: Vec<&str> = self.skip_protocols.iter().map(|p| p.as_str()).collect();
            push("--extractor-args", Some(format!("youtube:skip={}", skip.join(","))));
        }

        args
    }
}

/// Interpret one stdout line from yt-dlp
pub fn parse_line(line: &str) -> Option<EngineTick> {
    lazy_static::lazy_static! {
        static ref EXTRACT_AUDIO_RE: Regex =
            Regex::new(r"^\[ExtractAudio\] Destination: (.+)$").unwrap();
        static ref MERGER_RE: Regex =
            Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).unwrap();
        static ref ALREADY_RE: Regex =
            Regex::new(r"^\[download\] (.+) has already been downloaded").unwrap();
    }

    let line = line.trim_end();
    if let Some(json) = line.strip_prefix(PROGRESS_PREFIX) {
        return serde_json::from_str(json).ok();
    }

    [&*EXTRACT_AUDIO_RE, &*MERGER_RE, &*ALREADY_RE]
        .into_iter()
        .find_map(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| EngineTick::finished(m.as_str()))
}

/// Short failure message from yt-dlp's stderr
fn failure_summary(stderr: &VecDeque<String>, status: ExitStatus) -> String {
    let errors: Vec<&str> = stderr
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("ERROR:"))
        .collect();
    if !errors.is_empty() {
        let start = errors.len().saturating_sub(3);
        return errors[start..].join("\n");
    }

    stderr
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("yt-dlp exited with {}", status))
}

/// One output line with invalid UTF-8 replaced; file names may be in the locale encoding.
///
/// `buf` must outlive the call: a read dropped by `select!` leaves its bytes there.
async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 && buf.is_empty() {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(|c| c == '\n' || c == '\r')
        .to_string();
    buf.clear();
    Ok(Some(line))
}

async fn collect_stderr(stderr: ChildStderr) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf).await {
        tracing::trace!(target: "ytdlp", "stderr: {}", line);
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

/// Engine backed by the yt-dlp command-line program
pub struct YtDlpEngine {
    launcher: Option<Launcher>,
}

impl YtDlpEngine {
    pub fn new(launcher: Option<Launcher>) -> Self {
        Self { launcher }
    }

    pub fn detect(tools: &ToolManager) -> Self {
        Self::new(Launcher::locate(tools))
    }

    pub fn launcher(&self) -> Option<&Launcher> {
        self.launcher.as_ref()
    }

    fn download_args(&self, url: &str, options: &EngineOptions) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--progress-template".to_string(),
            format!("download:{}%(progress)j", PROGRESS_PREFIX),
        ];
        args.extend(options.to_args());
        args.push(url.to_string());
        args
    }

    /// Full command line that `download` would run
    pub fn command_line(&self, url: &str, options: &EngineOptions) -> Result<Vec<String>, EngineError> {
        let launcher = self
            .launcher
            .as_ref()
            .ok_or_else(|| EngineError::ToolNotFound(ToolType::YtDlp.as_str().to_string()))?;

        let mut line = launcher.command();
        line.extend(self.download_args(url, options));
        Ok(line)
    }
}

#[async_trait]
impl Engine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn is_available(&self) -> bool {
        self.launcher.is_some()
    }

    async fn download(
        &self,
        url: &str,
        options: &EngineOptions,
        ticks: TickSender,
        cancel: CancelFlag,
    ) -> Result<(), EngineError> {
        let launcher = self
            .launcher
            .as_ref()
            .ok_or_else(|| EngineError::ToolNotFound(ToolType::YtDlp.as_str().to_string()))?;
        let args = self.download_args(url, options);

        tracing::info!(program = %launcher.program, url, "starting yt-dlp");
        tracing::debug!(args = ?args, "yt-dlp arguments");

        let mut child = Command::new(&launcher.program)
            .args(&launcher.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: launcher.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Failed("failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Failed("failed to capture yt-dlp stderr".to_string()))?;
        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let mut stdout = BufReader::new(stdout);
        let mut line_buf = Vec::new();
        let mut poll = tokio::time::interval(CANCEL_POLL);

        let mut interrupted = loop {
            tokio::select! {
                line = read_line_lossy(&mut stdout, &mut line_buf) => match line? {
                    Some(line) => {
                        tracing::trace!(target: "ytdlp", "{}", line);
                        if let Some(tick) = parse_line(&line) {
                            let _ = ticks.send(tick);
                        }
                    }
                    None => break false,
                },
                _ = poll.tick() => {
                    if cancel.is_canceled() {
                        break true;
                    }
                }
            }
        };

        let mut status = None;
        while !interrupted {
            tokio::select! {
                exited = child.wait() => {
                    status = Some(exited?);
                    break;
                }
                _ = poll.tick() => interrupted = cancel.is_canceled(),
            }
        }

        let status = match status {
            Some(status) if !interrupted => status,
            _ => {
                // already-exited children make kill fail; nothing to do then
                let _ = child.kill().await;
                stderr_task.abort();
                tracing::info!("yt-dlp interrupted");
                return Err(EngineError::Interrupted);
            }
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();
        if status.success() {
            tracing::info!("yt-dlp finished");
            Ok(())
        } else {
            let summary = failure_summary(&stderr_tail, status);
            tracing::warn!(status = %status, error = %summary, "yt-dlp failed");
            Err(EngineError::Failed(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{DownloadRequest, QualitySpec, ServiceId};
    use crate::downloader::options;
    use crate::downloader::traits::TickStatus;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|a| a == flag)
    }

    fn youtube(url: &str) -> DownloadRequest {
        DownloadRequest::new(url, ServiceId::YouTube)
    }

    /// `sh -c SCRIPT` standing in for yt-dlp; the appended arguments are ignored
    fn shell(script: &str) -> YtDlpEngine {
        YtDlpEngine::new(Some(Launcher {
            program: "sh".to_string(),
            leading_args: vec!["-c".to_string(), script.to_string(), "yt-dlp".to_string()],
        }))
    }

    #[test]
    fn test_baseline_args() {
        let args = options::build(&youtube("https://youtu.be/abc")).to_args();
        assert!(has_flag(&args, "--continue"));
        assert!(has_pair(&args, "--retries", "5"));
        assert!(has_pair(&args, "--fragment-retries", "5"));
        assert!(has_flag(&args, "--windows-filenames"));
        assert!(has_pair(&args, "--output-na-placeholder", "NA"));
        assert!(has_flag(&args, "--ignore-errors"));
        assert!(has_pair(&args, "--concurrent-fragments", "3"));
        assert!(has_pair(&args, "-o", "%(title)s.%(ext)s"));
        assert!(has_pair(&args, "-f", "bv*+ba/b"));
        assert!(has_flag(&args, "--no-playlist"));
        assert!(has_pair(&args, "--extractor-args", "youtube:skip=dash,hls"));
        assert!(!has_flag(&args, "--limit-rate"));
        assert!(!has_flag(&args, "--cookies"));
        assert!(!has_flag(&args, "-x"));
    }

    #[test]
    fn test_audio_playlist_args() {
        let req = youtube("https://www.youtube.com/playlist?list=PL1")
            .with_quality(QualitySpec::P720)
            .with_audio_only(true)
            .with_playlist(true)
            .with_first_n(10)
            .with_rate_limit_kbps(100);
        let args = options::build(&req).to_args();

        assert!(has_pair(&args, "-f", "bestaudio/best"));
        assert!(has_flag(&args, "-x"));
        assert!(has_pair(&args, "--audio-format", "mp3"));
        assert!(has_pair(&args, "--audio-quality", "192K"));
        assert!(has_flag(&args, "--yes-playlist"));
        assert!(has_pair(&args, "--playlist-end", "10"));
        assert!(has_pair(&args, "--limit-rate", "102400"));
        assert!(!has_flag(&args, "--no-playlist"));
    }

    #[test]
    fn test_tiktok_has_no_extractor_args() {
        let req = DownloadRequest::new("https://www.tiktok.com/@u/video/1", ServiceId::TikTok)
            .with_destination_dir(Some(PathBuf::from("/tmp/out")));
        let args = options::build(&req).to_args();
        assert!(!has_flag(&args, "--extractor-args"));
        assert!(has_pair(&args, "-o", "/tmp/out/%(title)s.%(ext)s"));
    }

    #[test]
    fn test_command_line_python_module() {
        let engine = YtDlpEngine::new(Some(Launcher::python_module("python3")));
        let opts = options::build(&youtube("https://youtu.be/abc"));
        let line = engine.command_line("https://youtu.be/abc", &opts).unwrap();
        assert_eq!(&line[..3], &["python3", "-m", "yt_dlp"]);
        assert!(has_flag(&line, "--newline"));
        assert!(has_pair(&line, "--progress-template", "download:[progress]%(progress)j"));
        assert_eq!(line.last().map(String::as_str), Some("https://youtu.be/abc"));
    }

    #[test]
    fn test_parse_progress_line() {
        let tick = parse_line(
            r#"[progress]{"status":"downloading","downloaded_bytes":2048,"total_bytes":8192,"speed":1000.0,"eta":6}"#,
        )
        .unwrap();
        assert_eq!(tick.status, TickStatus::Downloading);
        assert_eq!(tick.downloaded_bytes, Some(2048));
        assert_eq!(tick.total_bytes, Some(8192));

        assert_eq!(parse_line("[progress]{not json"), None);
    }

    #[test]
    fn test_parse_postprocessor_destinations() {
        assert_eq!(
            parse_line("[ExtractAudio] Destination: /dl/Song.mp3"),
            Some(EngineTick::finished("/dl/Song.mp3"))
        );
        assert_eq!(
            parse_line(r#"[Merger] Merging formats into "/dl/Clip.mp4""#),
            Some(EngineTick::finished("/dl/Clip.mp4"))
        );
        assert_eq!(
            parse_line("[download] /dl/Clip.mp4 has already been downloaded"),
            Some(EngineTick::finished("/dl/Clip.mp4"))
        );
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn test_failure_summary_prefers_error_lines() {
        #[cfg(unix)]
        let status = {
            use std::os::unix::process::ExitStatusExt;
            ExitStatus::from_raw(1 << 8)
        };
        #[cfg(windows)]
        let status = {
            use std::os::windows::process::ExitStatusExt;
            ExitStatus::from_raw(1)
        };

        let stderr: VecDeque<String> = [
            "WARNING: falling back",
            "ERROR: [youtube] abc: Video unavailable",
            "",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            failure_summary(&stderr, status),
            "ERROR: [youtube] abc: Video unavailable"
        );

        let plain: VecDeque<String> = ["something odd", "  "].iter().map(|s| s.to_string()).collect();
        assert_eq!(failure_summary(&plain, status), "something odd");

        assert!(failure_summary(&VecDeque::new(), status).starts_with("yt-dlp exited"));
    }

    #[tokio::test]
    async fn test_missing_launcher() {
        let engine = YtDlpEngine::new(None);
        assert!(!engine.is_available());
        let (tx, _rx) = mpsc::unbounded_channel();
        let opts = options::build(&youtube("https://youtu.be/abc"));
        let result = engine
            .download("https://youtu.be/abc", &opts, tx, CancelFlag::new())
            .await;
        assert!(matches!(result, Err(EngineError::ToolNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_ticks_from_process() {
        let engine = shell(
            r#"echo '[progress]{"status":"downloading","downloaded_bytes":5,"total_bytes":10}'
echo '[youtube] abc: Downloading webpage'
echo '[Merger] Merging formats into "out.mp4"'"#,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let opts = options::build(&youtube("https://youtu.be/abc"));

        engine
            .download("https://youtu.be/abc", &opts, tx, CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(EngineTick::downloading(5, Some(10))));
        assert_eq!(rx.recv().await, Some(EngineTick::finished("out.mp4")));
        assert_eq!(rx.recv().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_output_does_not_abort() {
        let engine = shell(
            r#"printf '[Merger] Merging formats into "Caf\351.mp4"\n'
echo '[progress]{"status":"downloading","downloaded_bytes":5,"total_bytes":10}'"#,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let opts = options::build(&youtube("https://youtu.be/abc"));

        engine
            .download("https://youtu.be/abc", &opts, tx, CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(EngineTick::finished("Caf\u{FFFD}.mp4"))
        );
        assert_eq!(rx.recv().await, Some(EngineTick::downloading(5, Some(10))));
        assert_eq!(rx.recv().await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_error_summary_survives_non_utf8_stderr() {
        let engine = shell(
            r#"printf 'WARNING: bad name \351\n' >&2
echo 'ERROR: [youtube] abc: Video unavailable' >&2
exit 1"#,
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let opts = options::build(&youtube("https://youtu.be/abc"));

        match engine
            .download("https://youtu.be/abc", &opts, tx, CancelFlag::new())
            .await
        {
            Err(EngineError::Failed(message)) => {
                assert_eq!(message, "ERROR: [youtube] abc: Video unavailable")
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_line_lossy() {
        let mut reader = BufReader::new(&b"ok\r\nCaf\xe9\nlast"[..]);
        let mut buf = Vec::new();
        assert_eq!(
            read_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("ok")
        );
        assert_eq!(
            read_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("Caf\u{FFFD}")
        );
        assert_eq!(
            read_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("last")
        );
        assert_eq!(read_line_lossy(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let engine = shell("echo 'ERROR: [youtube] abc: Private video' >&2; exit 1");
        let (tx, _rx) = mpsc::unbounded_channel();
        let opts = options::build(&youtube("https://youtu.be/abc"));

        match engine
            .download("https://youtu.be/abc", &opts, tx, CancelFlag::new())
            .await
        {
            Err(EngineError::Failed(message)) => {
                assert_eq!(message, "ERROR: [youtube] abc: Private video")
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let engine = shell("exec sleep 30");
        let (tx, _rx) = mpsc::unbounded_channel();
        let opts = options::build(&youtube("https://youtu.be/abc"));
        let cancel = CancelFlag::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.download("https://youtu.be/abc", &opts, tx, cancel),
        )
        .await
        .expect("cancel did not stop the process");
        assert!(matches!(result, Err(EngineError::Interrupted)));
    }
}
