// FormatSelector - quality choice -> engine format selector
//
// Handles:
// - Best available video+audio merge
// - Resolution-capped split pair with a combined-stream fallback
// - Audio-only source plus the fixed extraction post-step

use serde::{Deserialize, Serialize};

use super::models::QualitySpec;

/// Codec the audio extraction step converts to
pub const AUDIO_CODEC: &str = "mp3";

/// Bitrate tier (kbps) for the extracted audio
pub const AUDIO_QUALITY_KBPS: u32 = 192;

/// Post-download processing steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key")]
pub enum PostProcessor {
    /// Convert the downloaded file to a compressed audio codec
    ExtractAudio { codec: String, quality_kbps: u32 },
}

impl PostProcessor {
    pub fn extract_audio() -> Self {
        Self::ExtractAudio {
            codec: AUDIO_CODEC.to_string(),
            quality_kbps: AUDIO_QUALITY_KBPS,
        }
    }
}

pub struct FormatSelector;

impl FormatSelector {
    /// Format spec for the given quality
    pub fn video_spec(quality: QualitySpec) -> String {
        match quality.height() {
            None => "bv*+ba/b".to_string(),
            Some(height) => format!(
                "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}]",
                h = height
            ),
        }
    }

    pub fn audio_spec() -> String {
        "bestaudio/best".to_string()
    }

    /// Selector and post-processing steps for a request
    pub fn select(quality: QualitySpec, audio_only: bool) -> (String, Vec<PostProcessor>) {
        if audio_only {
            (Self::audio_spec(), vec![PostProcessor::extract_audio()])
        } else {
            (Self::video_spec(quality), Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_is_uncapped() {
        let spec = FormatSelector::video_spec(QualitySpec::Best);
        assert_eq!(spec, "bv*+ba/b");
        assert!(!spec.contains("height"));
    }

    #[test]
    fn test_tiers_are_capped() {
        for (quality, height) in [
            (QualitySpec::P1080, 1080),
            (QualitySpec::P720, 720),
            (QualitySpec::P480, 480),
            (QualitySpec::P360, 360),
        ] {
            let spec = FormatSelector::video_spec(quality);
            assert!(spec.starts_with(&format!("bestvideo[height<={}]", height)));
            assert!(spec.ends_with(&format!("/best[height<={}]", height)));
        }
    }

    #[test]
    fn test_audio_only_ignores_quality() {
        for quality in [QualitySpec::Best, QualitySpec::P1080, QualitySpec::P360] {
            let (spec, post) = FormatSelector::select(quality, true);
            assert_eq!(spec, "bestaudio/best");
            assert_eq!(
                post,
                vec![PostProcessor::ExtractAudio {
                    codec: "mp3".to_string(),
                    quality_kbps: 192,
                }]
            );
        }
    }

    #[test]
    fn test_video_has_no_post_steps() {
        let (_, post) = FormatSelector::select(QualitySpec::P720, false);
        assert!(post.is_empty());
    }
}
