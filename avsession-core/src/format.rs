//! Pixel and sample formats shared by the pipelines and backends.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    // YUV planar
    Yuv420p,
    Yuvj420p,
    Yuv422p,
    Yuvj422p,
    Yuv444p,
    // YUV semi-planar / packed
    Nv12,
    Yuyv422,
    // RGB packed
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Argb,
    Abgr,
    // Single channel
    Gray8,
    // 8-bit palette + RGBA palette (bitmap subtitles)
    Pal8,
    /// Backend-specific format this crate has no layout for.
    Other(i32),
}

impl PixelFormat {
    pub fn name(&self) -> String {
        match self {
            Self::Yuv420p => "yuv420p".into(),
            Self::Yuvj420p => "yuvj420p".into(),
            Self::Yuv422p => "yuv422p".into(),
            Self::Yuvj422p => "yuvj422p".into(),
            Self::Yuv444p => "yuv444p".into(),
            Self::Nv12 => "nv12".into(),
            Self::Yuyv422 => "yuyv422".into(),
            Self::Rgb24 => "rgb24".into(),
            Self::Bgr24 => "bgr24".into(),
            Self::Rgba => "rgba".into(),
            Self::Bgra => "bgra".into(),
            Self::Argb => "argb".into(),
            Self::Abgr => "abgr".into(),
            Self::Gray8 => "gray".into(),
            Self::Pal8 => "pal8".into(),
            Self::Other(id) => format!("other({})", id),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// ============================================================================
// Sample Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
    F64Planar,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::U8Planar => 1,
            Self::S16 | Self::S16Planar => 2,
            Self::S32 | Self::S32Planar | Self::F32 | Self::F32Planar => 4,
            Self::F64 | Self::F64Planar => 8,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8Planar | Self::S16Planar | Self::S32Planar | Self::F32Planar | Self::F64Planar
        )
    }

    /// The interleaved counterpart of a planar format.
    pub fn packed(&self) -> SampleFormat {
        match self {
            Self::U8Planar => Self::U8,
            Self::S16Planar => Self::S16,
            Self::S32Planar => Self::S32,
            Self::F32Planar => Self::F32,
            Self::F64Planar => Self::F64,
            other => *other,
        }
    }
}

/// Sample format, rate and channel count of an audio stream or sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, sample_rate: u32, channels: u16) -> Self {
        Self { sample_format, sample_rate, channels }
    }

    /// Bytes for `samples_per_channel` frames of every channel.
    pub fn frame_bytes(&self, samples_per_channel: usize) -> usize {
        samples_per_channel * self.channels as usize * self.sample_format.bytes_per_sample()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} Hz {} ch", self.sample_format, self.sample_rate, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        let fmt = AudioFormat::new(SampleFormat::S16, 48000, 2);
        assert_eq!(fmt.frame_bytes(1024), 4096);
        let fmt = AudioFormat::new(SampleFormat::F32Planar, 44100, 6);
        assert_eq!(fmt.frame_bytes(10), 240);
    }

    #[test]
    fn test_packed_counterpart() {
        assert_eq!(SampleFormat::F32Planar.packed(), SampleFormat::F32);
        assert_eq!(SampleFormat::S16.packed(), SampleFormat::S16);
        assert!(!SampleFormat::S16.is_planar());
    }
}
