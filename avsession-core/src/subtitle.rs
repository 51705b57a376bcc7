//! # Subtitle Pipeline
//!
//! Decodes the active subtitle stream. Bitmap rectangles are composited into
//! one RGBA image in a scratch buffer that only ever grows; text and ASS
//! events are passed through.

use crate::backend::{Container, Packet, StreamDescriptor, SubtitleDecoder, SubtitleRect};
use crate::catalog::MediaType;
use crate::error::{Result, SessionError};
use crate::timestamp::{Pts, Rational};

/// Largest edge of the composited image; rects reaching further are clipped.
const MAX_CANVAS_EDGE: i64 = 8192;

/// Placement and timing of the last decoded subtitle.
#[derive(Debug, Clone, PartialEq, Default)]
struct Current {
    pts: Option<i64>,
    start_display_ms: u32,
    end_display_ms: u32,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    text: Vec<String>,
}

/// View of the last decoded subtitle, borrowing the scratch image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedSubtitle<'a> {
    pub pts: Pts,
    /// Display window in milliseconds, absolute when `pts` is valid.
    pub start_ms: i64,
    pub end_ms: i64,
    /// Top-left of the composited image in video coordinates.
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// `width * height * 4` bytes RGBA, empty for text-only events.
    pub rgba: &'a [u8],
    pub text: &'a [String],
}

/// Strip the ASS event fields in front of the dialogue text.
fn ass_dialogue_text(event: &str) -> &str {
    let body = event.strip_prefix("Dialogue:").unwrap_or(event);
    // ReadOrder, Layer, Style, Name, MarginL, MarginR, MarginV, Effect, Text
    body.splitn(9, ',').nth(8).unwrap_or(body).trim()
}

pub struct SubtitlePipeline {
    stream: StreamDescriptor,
    decoder: Box<dyn SubtitleDecoder>,
    scratch: Vec<u8>,
    current: Option<Current>,
    decoded: u64,
}

impl SubtitlePipeline {
    pub fn open(container: &dyn Container, stream: &StreamDescriptor) -> Result<Self> {
        let decoder = container.open_subtitle_decoder(stream)?.ok_or_else(|| {
            SessionError::DecoderUnavailable {
                category: MediaType::Subtitle,
                codec_id: stream.codec_id,
                codec_name: stream.codec_name.clone(),
            }
        })?;
        tracing::info!("Subtitle decoder opened: stream {} {}", stream.index, stream.codec_name);
        Ok(Self {
            stream: stream.clone(),
            decoder,
            scratch: Vec::new(),
            current: None,
            decoded: 0,
        })
    }

    pub fn stream_index(&self) -> u32 {
        self.stream.index
    }

    pub fn time_base(&self) -> Rational {
        self.stream.time_base
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Bytes allocated for the composited image.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }

    /// PTS (stream ticks) of the last decoded subtitle.
    pub fn last_pts(&self) -> Option<i64> {
        self.current.as_ref().and_then(|c| c.pts)
    }

    /// Decode one packet. Returns true when a subtitle was produced.
    pub fn decode(&mut self, packet: &Packet) -> Result<bool> {
        let Some(subtitle) = self.decoder.decode(packet)? else {
            return Ok(false);
        };
        self.decoded += 1;

        let bitmaps: Vec<_> = subtitle
            .rects
            .iter()
            .filter_map(|r| match r {
                SubtitleRect::Bitmap { x, y, width, height, .. } => Some((*x, *y, *width, *height)),
                _ => None,
            })
            .collect();

        let mut current = Current {
            pts: subtitle.pts,
            start_display_ms: subtitle.start_display_ms,
            end_display_ms: subtitle.end_display_ms,
            ..Default::default()
        };

        if !bitmaps.is_empty() {
            let left = bitmaps.iter().map(|b| b.0).min().unwrap_or(0);
            let top = bitmaps.iter().map(|b| b.1).min().unwrap_or(0);
            let right = bitmaps.iter().map(|b| b.0 as i64 + b.2 as i64).max().unwrap_or(0);
            let bottom = bitmaps.iter().map(|b| b.1 as i64 + b.3 as i64).max().unwrap_or(0);
            current.x = left;
            current.y = top;
            current.width = (right - left as i64).clamp(0, MAX_CANVAS_EDGE) as u32;
            current.height = (bottom - top as i64).clamp(0, MAX_CANVAS_EDGE) as u32;

            let needed = current.width as usize * current.height as usize * 4;
            if needed > self.scratch.len() {
                tracing::trace!("Subtitle scratch grown to {} bytes", needed);
                self.scratch.resize(needed, 0);
            }
            self.scratch[..needed].fill(0);
        }

        for rect in &subtitle.rects {
            match rect {
                SubtitleRect::Bitmap { x, y, width, height, stride, indices, palette } => {
                    let (canvas_w, canvas_h) = (current.width as usize, current.height as usize);
                    let ox = (*x as i64 - current.x as i64) as usize;
                    let oy = (*y as i64 - current.y as i64) as usize;
                    for row in 0..*height as usize {
                        let cy = oy.saturating_add(row);
                        if cy >= canvas_h {
                            break;
                        }
                        for col in 0..*width as usize {
                            let cx = ox.saturating_add(col);
                            if cx >= canvas_w {
                                break;
                            }
                            let Some(&index) = indices.get(row.saturating_mul(*stride).saturating_add(col))
                            else {
                                continue;
                            };
                            let color = palette.get(index as usize).copied().unwrap_or([0; 4]);
                            let at = (cy * canvas_w + cx) * 4;
                            self.scratch[at..at + 4].copy_from_slice(&color);
                        }
                    }
                }
                SubtitleRect::Text(text) => current.text.push(text.clone()),
                SubtitleRect::Ass(event) => current.text.push(ass_dialogue_text(event).to_string()),
            }
        }

        self.current = Some(current);
        Ok(true)
    }

    /// The last decoded subtitle, if any.
    pub fn rendered(&self) -> Option<RenderedSubtitle<'_>> {
        let current = self.current.as_ref()?;
        let pts = current.pts.map_or(Pts::Invalid, |ticks| {
            Pts::from_millis(self.stream.time_base.ticks_to_millis(ticks))
        });
        let base = pts.millis().unwrap_or(0) as i64;
        let bytes = current.width as usize * current.height as usize * 4;
        Some(RenderedSubtitle {
            pts,
            start_ms: base + current.start_display_ms as i64,
            end_ms: base + current.end_display_ms as i64,
            x: current.x,
            y: current.y,
            width: current.width,
            height: current.height,
            rgba: &self.scratch[..bytes],
            text: &current.text,
        })
    }

    /// Forget the current subtitle and decoder state, e.g. after a seek.
    pub fn flush(&mut self) {
        self.decoder.flush();
        self.current = None;
    }
}
