// Downloader module - URL classification, engine options and the download session

pub mod control;
pub mod errors;
pub mod events;
pub mod format_selector;
pub mod models;
pub mod options;
pub mod session;
pub mod tools;
pub mod traits;
pub mod validation;

pub use control::CancelFlag;
pub use errors::{EngineError, StartError, ValidationError};
pub use events::{ChannelSink, FanoutSink, TracingSink};
pub use models::{
    DownloadMode, DownloadRequest, Outcome, ProgressEvent, QualitySpec, ServiceId,
    SessionEvent, SessionState, StatusEvent, UrlClassification,
};
pub use options::{EngineOptions, PlaylistScope};
pub use session::DownloadSession;
pub use tools::{ToolManager, ToolType};
pub use traits::{Engine, EngineTick, EventSink, ToolProbe};
