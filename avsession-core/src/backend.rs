//! # Codec Library Boundary
//!
//! Container demuxing, decoding, resampling and scaling are done by an
//! external library. This module is the seam: the session only talks to these
//! traits, and every context they hand out is an owned box released on drop.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::catalog::MediaType;
use crate::error::BackendError;
use crate::format::{AudioFormat, PixelFormat};
use crate::probe::LibraryVersions;
use crate::timestamp::Rational;

// ============================================================================
// Stream Descriptors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Average frame rate, zero when unknown.
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub format: AudioFormat,
    /// Samples per channel per decoded frame, zero when variable.
    pub frame_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamParams {
    Video(VideoParams),
    Audio(AudioParams),
    Subtitle,
    /// Data, attachment and other streams the session ignores.
    Other,
}

/// One elementary stream as reported by the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Container stream index.
    pub index: u32,
    pub codec_id: i32,
    pub codec_name: String,
    pub time_base: Rational,
    /// ISO 639-2 language code.
    pub language: Option<String>,
    /// Bits per second, zero when unknown.
    pub bit_rate: i64,
    /// Frame count from the container, zero when unknown.
    pub frame_count: i64,
    /// Duration in `time_base` ticks.
    pub duration: Option<i64>,
    /// Start time in `time_base` ticks.
    pub start_time: Option<i64>,
    pub params: StreamParams,
}

impl StreamDescriptor {
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn media_type(&self) -> Option<MediaType> {
        match self.params {
            StreamParams::Video(_) => Some(MediaType::Video),
            StreamParams::Audio(_) => Some(MediaType::Audio),
            StreamParams::Subtitle => Some(MediaType::Subtitle),
            StreamParams::Other => None,
        }
    }

    pub fn video(&self) -> Option<&VideoParams> {
        match &self.params {
            StreamParams::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioParams> {
        match &self.params {
            StreamParams::Audio(a) => Some(a),
            _ => None,
        }
    }
}

/// Chapter meta-data, positions in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub start_ms: i32,
    pub end_ms: i32,
    pub title: Option<String>,
}

// ============================================================================
// Packets and Frames
// ============================================================================

/// A compressed packet read from the container.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: u32,
    /// Presentation timestamp in stream time base ticks.
    pub pts: Option<i64>,
    /// Decode timestamp in stream time base ticks.
    pub dts: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Bytes,
}

/// One plane of a decoded picture.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes per row, including padding.
    pub stride: usize,
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Rows are stored bottom-up, matching GL texture orientation.
    pub bottom_up: bool,
    pub keyframe: bool,
}

#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub format: AudioFormat,
    pub samples_per_channel: usize,
    /// One buffer per channel for planar formats, a single one otherwise.
    pub planes: Vec<Vec<u8>>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubtitleRect {
    /// Palettised bitmap: one index byte per pixel, RGBA palette.
    Bitmap {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        stride: usize,
        indices: Vec<u8>,
        palette: Vec<[u8; 4]>,
    },
    Text(String),
    Ass(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subtitle {
    pub pts: Option<i64>,
    /// Display window relative to `pts`, in milliseconds.
    pub start_display_ms: u32,
    pub end_display_ms: u32,
    pub rects: Vec<SubtitleRect>,
}

/// Pixel format and dimensions of a scaler input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// Traits
// ============================================================================

/// Entry point into the codec library.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Versions of the linked libraries, `None` for the absent ones.
    fn library_versions(&self) -> LibraryVersions;

    fn open(&self, url: &str) -> Result<Box<dyn Container>, BackendError>;

    fn create_resampler(
        &self,
        input: AudioFormat,
        output: AudioFormat,
    ) -> Result<Box<dyn Resampler>, BackendError>;

    fn create_scaler(
        &self,
        src: FrameGeometry,
        dst: FrameGeometry,
    ) -> Result<Box<dyn Scaler>, BackendError>;
}

/// An opened container. Dropping it closes it.
pub trait Container: Send {
    fn streams(&self) -> &[StreamDescriptor];

    fn duration_us(&self) -> Option<i64>;

    fn start_time_us(&self) -> Option<i64>;

    /// Overall bits per second, zero when unknown.
    fn bit_rate(&self) -> i64;

    fn chapters(&self) -> Vec<Chapter> {
        Vec::new()
    }

    /// Next packet, `None` once the container is exhausted.
    fn read_packet(&mut self) -> Result<Option<Packet>, BackendError>;

    fn seek(&mut self, position_ms: i64) -> Result<(), BackendError>;

    /// `Ok(None)` when no decoder matches the stream's codec.
    fn open_video_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn VideoDecoder>>, BackendError>;

    fn open_audio_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn AudioDecoder>>, BackendError>;

    fn open_subtitle_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn SubtitleDecoder>>, BackendError>;
}

pub trait VideoDecoder: Send {
    /// Zero or one frame per packet; some codecs buffer internally.
    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>, BackendError>;

    fn flush(&mut self);
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>, BackendError>;

    fn flush(&mut self);

    /// Upper bound of samples per channel in one decoded frame.
    fn max_samples_per_channel(&self) -> usize;
}

pub trait SubtitleDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Subtitle>, BackendError>;

    fn flush(&mut self);
}

/// Converts audio between sample format, rate and channel count.
pub trait Resampler: Send {
    fn input_format(&self) -> AudioFormat;

    fn output_format(&self) -> AudioFormat;

    /// Append converted interleaved samples to `out`, returning the number of
    /// samples per channel written. May be zero while the resampler buffers.
    fn convert(&mut self, frame: &AudioFrame, out: &mut Vec<u8>) -> Result<usize, BackendError>;

    /// Flush buffered input at end of stream, appending the remaining
    /// samples to `out`. Leaves the resampler ready for a new stream.
    fn drain(&mut self, out: &mut Vec<u8>) -> Result<usize, BackendError>;

    /// Drop buffered input.
    fn reset(&mut self);
}

/// Converts pictures between pixel formats and dimensions.
pub trait Scaler: Send {
    fn source(&self) -> FrameGeometry;

    fn destination(&self) -> FrameGeometry;

    fn scale(&mut self, frame: &VideoFrame) -> Result<VideoFrame, BackendError>;
}
