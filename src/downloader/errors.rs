// Error types for URL validation, session start and engine runs

use thiserror::Error;

use super::models::{QualitySpec, ServiceId};

/// Why a URL or request was refused before any download started
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Empty or whitespace-only input
    #[error("URL is empty")]
    Empty,

    /// Not an http(s) URL with a host
    #[error("URL is not a valid http(s) address")]
    InvalidFormat,

    /// Well-formed URL whose host is not on the service allow-list
    #[error("URL host is not supported by this service")]
    InvalidDomain,

    /// Service name that does not map to a known service
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Quality tier the service does not offer
    #[error("{quality} is not available for {service}")]
    UnsupportedQuality {
        service: ServiceId,
        quality: QualitySpec,
    },

    /// Mix/Radio playlist without explicit opt-in
    #[error("mix/radio playlists require explicit opt-in")]
    MixNotAllowed,
}

impl ValidationError {
    /// Stable reason code, usable as a message key by front ends
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::InvalidFormat => "invalid_format",
            Self::InvalidDomain => "invalid_domain",
            Self::UnknownService(_) => "unknown_service",
            Self::UnsupportedQuality { .. } => "unsupported_quality",
            Self::MixNotAllowed => "mix_not_allowed",
        }
    }
}

/// Synchronous rejection from `DownloadSession::start`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The extraction engine is missing or not initialized
    #[error("download engine is not available")]
    EngineUnavailable,

    /// Audio extraction requested but the transcoding tool is missing
    #[error("ffmpeg is required for audio extraction but was not found")]
    AudioToolMissing,

    /// A download is already in flight on this session
    #[error("a download is already running")]
    AlreadyRunning,
}

/// Failure reported by an engine run
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine executable not found
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Engine process could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine ran and reported failure; message is passed through untouched
    #[error("{0}")]
    Failed(String),

    /// Engine stopped after observing the cancellation flag
    #[error("download interrupted")]
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(ValidationError::Empty.code(), "empty");
        assert_eq!(ValidationError::InvalidFormat.code(), "invalid_format");
        assert_eq!(ValidationError::InvalidDomain.code(), "invalid_domain");
        assert_eq!(
            ValidationError::UnknownService("vimeo".to_string()).code(),
            "unknown_service"
        );
        assert_eq!(ValidationError::MixNotAllowed.code(), "mix_not_allowed");
    }

    #[test]
    fn test_start_error_wraps_validation() {
        let err: StartError = ValidationError::InvalidDomain.into();
        assert_eq!(err, StartError::Validation(ValidationError::InvalidDomain));
        assert_eq!(err.to_string(), "URL host is not supported by this service");
    }

    #[test]
    fn test_engine_failure_message_is_opaque() {
        let err = EngineError::Failed("ERROR: [youtube] abc: Video unavailable".to_string());
        assert_eq!(err.to_string(), "ERROR: [youtube] abc: Video unavailable");
    }
}
