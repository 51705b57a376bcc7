//! # Video Pipeline
//!
//! Owns the active video decoder and, when the texture sink needs a different
//! pixel format, a scaling context. Derives the texture layout of every frame
//! it hands out.

use serde::Serialize;

use crate::backend::{
    Container, FrameGeometry, MediaBackend, Packet, Scaler, StreamDescriptor, VideoDecoder,
    VideoFrame,
};
use crate::catalog::MediaType;
use crate::config::{ConversionPolicy, SessionConfig};
use crate::error::{Result, SessionError};
use crate::format::PixelFormat;
use crate::probe::Capabilities;
use crate::timestamp::Rational;

pub const MAX_PLANES: usize = 4;

// ============================================================================
// Frame Layout
// ============================================================================

/// Texture dimensions of one plane. `width` counts texels, which for packed
/// YUYV is half the pixel width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaneLayout {
    pub width: u32,
    pub height: u32,
    pub bytes_per_texel: u32,
}

impl PlaneLayout {
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_texel as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoFrameLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// 1 for packed RGB, 3 for planar YUV, 2 for NV12.
    pub planes: u32,
    pub bits_per_pixel: u32,
    pub bytes_per_pixel_per_plane: u32,
    plane_layouts: [PlaneLayout; MAX_PLANES],
}

fn half(v: u32) -> u32 {
    v.div_ceil(2)
}

impl VideoFrameLayout {
    /// Layout for `format` at the given pixel dimensions, `None` for formats
    /// without a texture mapping.
    pub fn for_format(format: PixelFormat, width: u32, height: u32) -> Option<Self> {
        let full = |bytes| PlaneLayout { width, height, bytes_per_texel: bytes };
        let mut planes = [PlaneLayout::default(); MAX_PLANES];

        let (count, bits_per_pixel, bytes_per_pixel_per_plane) = match format {
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => {
                let chroma = PlaneLayout { width: half(width), height: half(height), bytes_per_texel: 1 };
                planes[..3].copy_from_slice(&[full(1), chroma, chroma]);
                (3, 12, 1)
            }
            PixelFormat::Yuv422p | PixelFormat::Yuvj422p => {
                let chroma = PlaneLayout { width: half(width), height, bytes_per_texel: 1 };
                planes[..3].copy_from_slice(&[full(1), chroma, chroma]);
                (3, 16, 1)
            }
            PixelFormat::Yuv444p => {
                planes[..3].copy_from_slice(&[full(1), full(1), full(1)]);
                (3, 24, 1)
            }
            PixelFormat::Nv12 => {
                let chroma = PlaneLayout { width: half(width), height: half(height), bytes_per_texel: 2 };
                planes[..2].copy_from_slice(&[full(1), chroma]);
                (2, 12, 1)
            }
            PixelFormat::Yuyv422 => {
                // Two pixels per RGBA texel
                planes[0] = PlaneLayout { width: half(width), height, bytes_per_texel: 4 };
                (1, 16, 4)
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                planes[0] = full(3);
                (1, 24, 3)
            }
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Abgr => {
                planes[0] = full(4);
                (1, 32, 4)
            }
            PixelFormat::Gray8 => {
                planes[0] = full(1);
                (1, 8, 1)
            }
            PixelFormat::Pal8 | PixelFormat::Other(_) => return None,
        };

        Some(Self {
            format,
            width,
            height,
            planes: count,
            bits_per_pixel,
            bytes_per_pixel_per_plane,
            plane_layouts: planes,
        })
    }

    pub fn plane(&self, index: usize) -> Option<&PlaneLayout> {
        if index < self.planes as usize {
            Some(&self.plane_layouts[index])
        } else {
            None
        }
    }

    pub fn plane_layouts(&self) -> &[PlaneLayout] {
        &self.plane_layouts[..self.planes as usize]
    }
}

// ============================================================================
// Video Pipeline
// ============================================================================

pub struct VideoPipeline {
    stream: StreamDescriptor,
    decoder: Box<dyn VideoDecoder>,
    scaler: Option<Box<dyn Scaler>>,
    can_scale: bool,
    policy: ConversionPolicy,
    sink_format: Option<PixelFormat>,
    /// Geometry of the last decoded (pre-scaling) frame.
    native: Option<FrameGeometry>,
    layout: Option<VideoFrameLayout>,
    in_gl_orientation: bool,
    frames_decoded: u64,
    layout_changes: u64,
}

impl VideoPipeline {
    pub fn open(
        container: &dyn Container,
        stream: &StreamDescriptor,
        caps: &Capabilities,
        config: &SessionConfig,
    ) -> Result<Self> {
        let decoder = container.open_video_decoder(stream)?.ok_or_else(|| {
            SessionError::DecoderUnavailable {
                category: MediaType::Video,
                codec_id: stream.codec_id,
                codec_name: stream.codec_name.clone(),
            }
        })?;

        let (width, height) = stream.video().map_or((0, 0), |v| (v.width, v.height));
        tracing::info!(
            "Video decoder opened: stream {} {} {}x{}",
            stream.index,
            stream.codec_name,
            width,
            height
        );

        Ok(Self {
            stream: stream.clone(),
            decoder,
            scaler: None,
            can_scale: caps.can_scale(),
            policy: config.conversion,
            sink_format: config.video_sink_format,
            native: None,
            layout: None,
            in_gl_orientation: false,
            frames_decoded: 0,
            layout_changes: 0,
        })
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn stream_index(&self) -> u32 {
        self.stream.index
    }

    pub fn time_base(&self) -> Rational {
        self.stream.time_base
    }

    /// Native format from the stream header until the first frame arrives.
    pub fn native_format(&self) -> Option<PixelFormat> {
        self.native
            .map(|g| g.format)
            .or_else(|| self.stream.video().map(|v| v.pixel_format))
    }

    pub fn width(&self) -> u32 {
        self.layout
            .map(|l| l.width)
            .or_else(|| self.stream.video().map(|v| v.width))
            .unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.layout
            .map(|l| l.height)
            .or_else(|| self.stream.video().map(|v| v.height))
            .unwrap_or(0)
    }

    /// Layout of the frames handed out by [`decode`](Self::decode).
    pub fn layout(&self) -> Option<&VideoFrameLayout> {
        self.layout.as_ref()
    }

    /// Rows arrive bottom-up, i.e. already in GL orientation.
    pub fn in_gl_orientation(&self) -> bool {
        self.in_gl_orientation
    }

    pub fn is_scaling(&self) -> bool {
        self.scaler.is_some()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn layout_changes(&self) -> u64 {
        self.layout_changes
    }

    /// Format the sink should receive for a native format, `None` when the
    /// native one can be used as is.
    fn conversion_target(&self, native: PixelFormat) -> Option<PixelFormat> {
        match self.sink_format {
            Some(sink) if sink != native => Some(sink),
            Some(_) => None,
            None if VideoFrameLayout::for_format(native, 1, 1).is_none() => Some(PixelFormat::Rgba),
            None => None,
        }
    }

    fn reconfigure(&mut self, native: FrameGeometry, backend: &dyn MediaBackend) -> Result<()> {
        let output = match self.conversion_target(native.format) {
            None => {
                self.scaler = None;
                native
            }
            Some(target) if !self.can_scale => {
                self.scaler = None;
                match self.policy {
                    ConversionPolicy::Strict => {
                        return Err(SessionError::ConversionUnavailable(MediaType::Video));
                    }
                    ConversionPolicy::AcceptNative => {
                        tracing::warn!(
                            "Scaling {} -> {} unavailable, passing native frames",
                            native.format,
                            target
                        );
                        native
                    }
                }
            }
            Some(target) => {
                let dst = FrameGeometry { format: target, ..native };
                let reusable = self
                    .scaler
                    .as_ref()
                    .is_some_and(|s| s.source() == native && s.destination() == dst);
                if !reusable {
                    self.scaler = Some(backend.create_scaler(native, dst)?);
                    tracing::debug!(
                        "Scaler created: {} {}x{} -> {}",
                        native.format,
                        native.width,
                        native.height,
                        target
                    );
                }
                dst
            }
        };

        self.layout = VideoFrameLayout::for_format(output.format, output.width, output.height);
        self.native = Some(native);
        self.layout_changes += 1;
        tracing::debug!("Video layout: {:?}", self.layout);
        Ok(())
    }

    /// Decode one packet of the active video stream.
    pub fn decode(
        &mut self,
        packet: &Packet,
        backend: &dyn MediaBackend,
    ) -> Result<Option<VideoFrame>> {
        let Some(frame) = self.decoder.decode(packet)? else {
            return Ok(None);
        };

        let geometry = FrameGeometry {
            format: frame.format,
            width: frame.width,
            height: frame.height,
        };
        if self.native != Some(geometry) {
            self.reconfigure(geometry, backend)?;
        }

        let frame = match self.scaler.as_mut() {
            Some(scaler) => scaler.scale(&frame)?,
            None => frame,
        };

        self.in_gl_orientation = frame.bottom_up;
        self.frames_decoded += 1;
        Ok(Some(frame))
    }

    /// Drop frames buffered inside the decoder, e.g. after a seek.
    pub fn flush(&mut self) {
        self.decoder.flush();
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        tracing::debug!(
            "Video pipeline for stream {} closed after {} frames",
            self.stream.index,
            self.frames_decoded
        );
    }
}
