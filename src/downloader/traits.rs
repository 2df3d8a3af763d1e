// Seams between the session and its collaborators

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tokio::sync::mpsc::UnboundedSender;

use super::control::CancelFlag;
use super::errors::EngineError;
use super::models::SessionEvent;
use super::options::EngineOptions;
use super::tools::ToolType;

/// Engine-reported phase of a progress tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickStatus {
    #[default]
    Downloading,
    Finished,
    #[serde(other)]
    Other,
}

/// One raw progress report from an engine.
///
/// Field names follow yt-dlp's progress dictionary so its JSON can be read directly.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineTick {
    pub status: TickStatus,
    #[serde(deserialize_with = "lenient_bytes")]
    pub downloaded_bytes: Option<u64>,
    #[serde(deserialize_with = "lenient_bytes")]
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<f64>,
    /// Bytes per second
    pub speed: Option<f64>,
    /// Seconds
    pub eta: Option<f64>,
    pub filename: Option<String>,
}

/// Byte counters sometimes arrive as floats
fn lenient_bytes<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64))
}

impl EngineTick {
    pub fn downloading(downloaded: u64, total: Option<u64>) -> Self {
        Self {
            status: TickStatus::Downloading,
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            ..Self::default()
        }
    }

    pub fn finished(filename: impl Into<String>) -> Self {
        Self {
            status: TickStatus::Finished,
            filename: Some(filename.into()),
            ..Self::default()
        }
    }
}

pub type TickSender = UnboundedSender<EngineTick>;

/// The external extraction/download engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// Cheap check, must not block
    fn is_available(&self) -> bool;

    /// Fetch `url`, reporting ticks until it returns.
    ///
    /// Implementations should check `cancel` regularly and return once they see it set.
    async fn download(
        &self,
        url: &str,
        options: &EngineOptions,
        ticks: TickSender,
        cancel: CancelFlag,
    ) -> Result<(), EngineError>;
}

/// Answers "is this external tool installed", from cached state
pub trait ToolProbe: Send + Sync {
    fn is_available(&self, tool: ToolType) -> bool;
}

/// Receiver of session events. Called from the background task; must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_from_progress_json() {
        let json = r#"{"status":"downloading","downloaded_bytes":1024,"total_bytes":4096,
            "speed":2048.5,"eta":1,"filename":"a.mp4","tmpfilename":"a.mp4.part","elapsed":0.4}"#;
        let tick: EngineTick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.status, TickStatus::Downloading);
        assert_eq!(tick.downloaded_bytes, Some(1024));
        assert_eq!(tick.total_bytes, Some(4096));
        assert_eq!(tick.eta, Some(1.0));
        assert_eq!(tick.filename.as_deref(), Some("a.mp4"));
    }

    #[test]
    fn test_tick_nulls_and_unknown_status() {
        let json = r#"{"status":"error","downloaded_bytes":null,"total_bytes":null,"speed":null}"#;
        let tick: EngineTick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.status, TickStatus::Other);
        assert_eq!(tick.downloaded_bytes, None);
        assert_eq!(tick.speed, None);
    }

    #[test]
    fn test_tick_float_byte_counts() {
        let json = r#"{"status":"downloading","downloaded_bytes":1500.0,"total_bytes_estimate":9000.7}"#;
        let tick: EngineTick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.downloaded_bytes, Some(1500));
        assert_eq!(tick.total_bytes, None);
        assert_eq!(tick.total_bytes_estimate, Some(9000.7));
    }
}
