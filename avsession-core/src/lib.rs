//! # avsession Core
//!
//! Playback session core: stream catalog, decode pipelines, timestamp
//! bookkeeping, audio/video format adaptation and GL texture upload around an
//! external codec library.

// ============================================================================
// Shared types
// ============================================================================
pub mod error;
pub mod timestamp;
pub mod format;
pub mod config;

// ============================================================================
// Codec library / GPU seams
// ============================================================================
pub mod backend;
pub mod gl;
pub mod probe;

// ============================================================================
// Session state
// ============================================================================
pub mod catalog;
pub mod timing;
pub mod session;

// ============================================================================
// Pipelines
// ============================================================================
pub mod video;
pub mod audio;
pub mod subtitle;
pub mod texture;

// ============================================================================
// Pure Rust audio backend
// ============================================================================
#[cfg(feature = "audio")]
pub mod resample;
#[cfg(feature = "audio")]
pub mod symphonia_backend;

#[cfg(test)]
mod testing;

pub use audio::{AudioSink, FixedFormatSink, NativeBufferMirror, SharedAudioRing};
pub use backend::{Container, MediaBackend, StreamDescriptor};
pub use catalog::{MediaType, StreamCatalog};
pub use config::{ConversionPolicy, SessionConfig};
pub use error::{BackendError, Result, SessionError};
pub use probe::{probe_shared_libraries, Capabilities};
pub use session::{Session, SessionMetrics, StepEvent};
pub use timestamp::{Pts, StreamId, END_OF_STREAM_PTS, INVALID_PTS};

#[cfg(feature = "audio")]
pub use symphonia_backend::SymphoniaBackend;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
