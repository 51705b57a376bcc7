//! Session error taxonomy.

use thiserror::Error;

use crate::catalog::MediaType;

/// Errors reported by a [`MediaBackend`](crate::backend::MediaBackend) and the
/// objects it hands out.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Open failed: {0}")]
    Open(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Seek failed: {0}")]
    Seek(String),
    #[error("Not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Requested stream id is absent, or a required category is empty.
    #[error("No {category} stream found (requested {requested})")]
    StreamNotFound { category: MediaType, requested: String },

    /// No decoder matches the stream's codec.
    #[error("No {category} decoder for codec {codec_name} (id {codec_id})")]
    DecoderUnavailable {
        category: MediaType,
        codec_id: i32,
        codec_name: String,
    },

    /// A resample or scale step is required but the library is absent.
    #[error("{0} conversion required but not available")]
    ConversionUnavailable(MediaType),

    /// The audio ring is empty.
    #[error("Audio ring is empty")]
    BufferUnderrun,

    /// Non-fatal: the GL error query returned non-zero after an upload.
    #[error("GPU upload failed: GL error 0x{code:04X} on plane {plane}")]
    GpuUpload { code: u32, plane: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session is closed")]
    Closed,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SessionError {
    /// Per-frame errors leave the session usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::GpuUpload { .. } | SessionError::BufferUnderrun
        )
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
