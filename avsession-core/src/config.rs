//! Session configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SessionError};
use crate::format::PixelFormat;
use crate::timestamp::StreamId;

/// Default number of decoded audio frames kept ahead of the sink.
pub const DEFAULT_AUDIO_FRAMES_AHEAD: usize = 8;

/// What to do when a resample/scale step is needed but the library is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConversionPolicy {
    /// Fail with `ConversionUnavailable`.
    #[default]
    Strict,
    /// Hand out the decoder's native format; the caller handles the mismatch.
    AcceptNative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub video_stream: StreamId,
    pub audio_stream: StreamId,
    pub subtitle_stream: StreamId,
    /// Preferred audio language (ISO 639-2) for automatic selection.
    pub audio_language: Option<String>,
    /// Preferred subtitle language (ISO 639-2) for automatic selection.
    pub subtitle_language: Option<String>,
    pub require_video: bool,
    pub require_audio: bool,
    /// Depth of the decoded audio ring.
    pub audio_frames_ahead: usize,
    pub conversion: ConversionPolicy,
    /// Pixel format the texture sink expects; `None` accepts any format with
    /// a known layout.
    pub video_sink_format: Option<PixelFormat>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            video_stream: StreamId::Auto,
            audio_stream: StreamId::Auto,
            subtitle_stream: StreamId::None,
            audio_language: None,
            subtitle_language: None,
            require_video: false,
            require_audio: false,
            audio_frames_ahead: DEFAULT_AUDIO_FRAMES_AHEAD,
            conversion: ConversionPolicy::Strict,
            video_sink_format: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| SessionError::InvalidConfig(format!("JSON parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SessionError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio_frames_ahead == 0 {
            return Err(SessionError::InvalidConfig(
                "audio_frames_ahead must be at least 1".into(),
            ));
        }
        if self.require_video && self.video_stream == StreamId::None {
            return Err(SessionError::InvalidConfig(
                "video is required but the video stream is muted".into(),
            ));
        }
        if self.require_audio && self.audio_stream == StreamId::None {
            return Err(SessionError::InvalidConfig(
                "audio is required but the audio stream is muted".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.audio_frames_ahead, 8);
        assert_eq!(config.video_stream, StreamId::Auto);
        assert_eq!(config.subtitle_stream, StreamId::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = SessionConfig::from_json_str(
            r#"{ "audio_language": "eng", "audio_stream": { "Index": 2 }, "conversion": "AcceptNative" }"#,
        )
        .unwrap();
        assert_eq!(config.audio_language.as_deref(), Some("eng"));
        assert_eq!(config.audio_stream, StreamId::Index(2));
        assert_eq!(config.conversion, ConversionPolicy::AcceptNative);
        assert_eq!(config.audio_frames_ahead, DEFAULT_AUDIO_FRAMES_AHEAD);
    }

    #[test]
    fn test_rejects_zero_ring() {
        let err = SessionConfig::from_json_str(r#"{ "audio_frames_ahead": 0 }"#).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_required_but_muted() {
        let config = SessionConfig {
            require_audio: true,
            audio_stream: StreamId::None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{ "video_sink_format": "Rgba", "require_video": true }"#).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.video_sink_format, Some(PixelFormat::Rgba));
        assert!(config.require_video);
    }
}
