//! # Audio Pipeline
//!
//! Decodes the active audio stream, adapts it to the sink's format and
//! queues the result in a fixed-depth ring of native buffer mirrors. The ring
//! is the one structure shared with another thread: the sink consumes from it
//! through [`AudioPipeline::ring`].

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{
    AudioDecoder, AudioFrame, Container, MediaBackend, Packet, Resampler, StreamDescriptor,
};
use crate::catalog::MediaType;
use crate::config::{ConversionPolicy, SessionConfig};
use crate::error::{Result, SessionError};
use crate::format::AudioFormat;
use crate::probe::Capabilities;
use crate::timestamp::{Pts, Rational};

/// Input frames a software resampler gathers before converting.
pub(crate) const RESAMPLE_CHUNK_FRAMES: usize = 1024;

// ============================================================================
// Native Buffer Mirror
// ============================================================================

/// Externally visible id of a mirror, stable for the mirror's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferHandle(u64);

impl BufferHandle {
    fn next() -> Self {
        static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
        BufferHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A block of decoded audio as handed to the sink. Memory, handle and size
/// travel together and are released together on drop.
#[derive(Debug)]
pub struct NativeBufferMirror {
    handle: BufferHandle,
    data: Vec<u8>,
    format: AudioFormat,
    samples_per_channel: usize,
    pts: Pts,
}

impl NativeBufferMirror {
    pub fn new(capacity: usize, format: AudioFormat) -> Self {
        Self {
            handle: BufferHandle::next(),
            data: Vec::with_capacity(capacity),
            format,
            samples_per_channel: 0,
            pts: Pts::Invalid,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Valid bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Allocated bytes.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn pts(&self) -> Pts {
        self.pts
    }

    /// Playback length in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.format.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel as u64 * 1000 / self.format.sample_rate as u64) as u32
    }

    fn reset(&mut self, format: AudioFormat) {
        self.data.clear();
        self.format = format;
        self.samples_per_channel = 0;
        self.pts = Pts::Invalid;
    }
}

// ============================================================================
// Audio Ring
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingStats {
    pub queued: usize,
    pub free: usize,
    pub pushed: u64,
    pub consumed: u64,
    /// Oldest slots dropped because the sink fell behind.
    pub overruns: u64,
    pub underruns: u64,
}

struct RingState {
    queued: VecDeque<NativeBufferMirror>,
    free: Vec<NativeBufferMirror>,
}

/// Fixed-depth FIFO of decoded audio, shared between the decode thread and
/// the sink.
pub struct AudioRing {
    state: Mutex<RingState>,
    capacity: usize,
    mirror_bytes: usize,
    pushed: AtomicU64,
    consumed: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

pub type SharedAudioRing = Arc<AudioRing>;

impl AudioRing {
    /// `capacity` slots, each mirror preallocated with `mirror_bytes`.
    pub fn new(capacity: usize, mirror_bytes: usize, format: AudioFormat) -> Self {
        let capacity = capacity.max(1);
        let free = (0..capacity)
            .map(|_| NativeBufferMirror::new(mirror_bytes, format))
            .collect();
        Self {
            state: Mutex::new(RingState {
                queued: VecDeque::with_capacity(capacity),
                free,
            }),
            capacity,
            mirror_bytes,
            pushed: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queued.is_empty()
    }

    /// The decode side should pause until the sink consumes a slot.
    pub fn is_full(&self) -> bool {
        self.state.lock().queued.len() >= self.capacity
    }

    /// A mirror to fill. Reuses a free one, else the oldest queued slot
    /// (counted as an overrun), else allocates while the sink holds them all.
    fn acquire(&self, format: AudioFormat) -> NativeBufferMirror {
        let mut state = self.state.lock();
        let mut mirror = match state.free.pop() {
            Some(mirror) => mirror,
            None if state.queued.len() >= self.capacity => {
                let oldest = state.queued.pop_front();
                drop(state);
                self.overruns.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Audio ring full, dropping oldest slot");
                match oldest {
                    Some(mirror) => mirror,
                    None => NativeBufferMirror::new(self.mirror_bytes, format),
                }
            }
            None => {
                drop(state);
                NativeBufferMirror::new(self.mirror_bytes, format)
            }
        };
        mirror.reset(format);
        mirror
    }

    fn push(&self, mirror: NativeBufferMirror) {
        let mut state = self.state.lock();
        if state.queued.len() >= self.capacity {
            if let Some(oldest) = state.queued.pop_front() {
                state.free.push(oldest);
            }
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        state.queued.push_back(mirror);
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Oldest queued mirror. Hand it back with [`recycle`](Self::recycle)
    /// once played.
    pub fn pop(&self) -> Option<NativeBufferMirror> {
        let mirror = self.state.lock().queued.pop_front();
        match mirror {
            Some(_) => self.consumed.fetch_add(1, Ordering::Relaxed),
            None => self.underruns.fetch_add(1, Ordering::Relaxed),
        };
        mirror
    }

    /// Return a consumed mirror. Mirrors beyond the ring depth are released.
    pub fn recycle(&self, mirror: NativeBufferMirror) {
        let mut state = self.state.lock();
        if state.free.len() + state.queued.len() < self.capacity {
            state.free.push(mirror);
        }
    }

    /// Drop every queued slot, keeping the allocations.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let RingState { queued, free } = &mut *state;
        free.extend(queued.drain(..));
        free.truncate(self.capacity);
    }

    pub fn stats(&self) -> RingStats {
        let state = self.state.lock();
        RingStats {
            queued: state.queued.len(),
            free: state.free.len(),
            pushed: self.pushed.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Audio Sink
// ============================================================================

/// The consumer of decoded audio.
pub trait AudioSink {
    /// Format the sink plays when it cannot take the native one.
    fn required_format(&self) -> AudioFormat;

    fn is_supported(&self, format: &AudioFormat) -> bool {
        *format == self.required_format()
    }
}

/// Sink that accepts exactly one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFormatSink(pub AudioFormat);

impl AudioSink for FixedFormatSink {
    fn required_format(&self) -> AudioFormat {
        self.0
    }
}

// ============================================================================
// Audio Pipeline
// ============================================================================

/// Result of decoding one audio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAudio {
    /// Timestamps in stream ticks.
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub samples_per_channel: usize,
    /// A slot was queued; false while the resampler buffers input.
    pub queued: bool,
}

fn packed(format: AudioFormat) -> AudioFormat {
    AudioFormat {
        sample_format: format.sample_format.packed(),
        ..format
    }
}

/// Format queued for frames in `native` format.
fn target_format(sink: Option<AudioFormat>, sink_supported: bool, native: AudioFormat) -> AudioFormat {
    match sink {
        Some(sink) if !sink_supported => sink,
        _ => packed(native),
    }
}

/// Bytes per mirror: the largest decoded frame in `output`, scaled by the
/// rate change plus one resampler chunk of headroom when converting.
fn mirror_bytes(max_samples: usize, native: AudioFormat, output: AudioFormat) -> usize {
    let max_samples = max_samples.max(1);
    if output == packed(native) || native.sample_rate == 0 {
        return output.frame_bytes(max_samples);
    }
    let scaled = (max_samples as u64 * output.sample_rate as u64)
        .div_ceil(native.sample_rate as u64) as usize;
    output.frame_bytes(scaled + RESAMPLE_CHUNK_FRAMES)
}

/// Copy planar samples into one interleaved buffer.
fn interleave(frame: &AudioFrame, out: &mut Vec<u8>) {
    let bytes = frame.format.sample_format.bytes_per_sample();
    if !frame.format.sample_format.is_planar() {
        if let Some(plane) = frame.planes.first() {
            let len = frame.format.frame_bytes(frame.samples_per_channel).min(plane.len());
            out.extend_from_slice(&plane[..len]);
        }
        return;
    }
    for sample in 0..frame.samples_per_channel {
        let offset = sample * bytes;
        for plane in &frame.planes {
            match plane.get(offset..offset + bytes) {
                Some(s) => out.extend_from_slice(s),
                None => out.extend(std::iter::repeat(0).take(bytes)),
            }
        }
    }
}

pub struct AudioPipeline {
    stream: StreamDescriptor,
    decoder: Box<dyn AudioDecoder>,
    resampler: Option<Box<dyn Resampler>>,
    native: AudioFormat,
    /// Format queued in the ring.
    output: AudioFormat,
    sink_format: Option<AudioFormat>,
    sink_supported: bool,
    can_resample: bool,
    policy: ConversionPolicy,
    ring: SharedAudioRing,
    /// Timestamp of the first sample fed to the current resampler, in ms.
    resample_origin_ms: Option<i64>,
    /// Output frames queued since `resample_origin_ms`.
    resampled_frames: u64,
    resamplers_created: u64,
    frames_decoded: u64,
}

impl AudioPipeline {
    pub fn open(
        container: &dyn Container,
        stream: &StreamDescriptor,
        caps: &Capabilities,
        config: &SessionConfig,
        sink: Option<&dyn AudioSink>,
    ) -> Result<Self> {
        let decoder = container.open_audio_decoder(stream)?.ok_or_else(|| {
            SessionError::DecoderUnavailable {
                category: MediaType::Audio,
                codec_id: stream.codec_id,
                codec_name: stream.codec_name.clone(),
            }
        })?;

        let native = stream.audio().map(|a| a.format).ok_or_else(|| {
            SessionError::DecoderUnavailable {
                category: MediaType::Audio,
                codec_id: stream.codec_id,
                codec_name: stream.codec_name.clone(),
            }
        })?;

        let sink_supported = sink.map_or(true, |s| s.is_supported(&native));
        let sink_format = sink.map(|s| s.required_format());
        let output = target_format(sink_format, sink_supported, native);

        let mirror_bytes = mirror_bytes(decoder.max_samples_per_channel(), native, output);
        let ring = Arc::new(AudioRing::new(config.audio_frames_ahead, mirror_bytes, output));

        tracing::info!(
            "Audio decoder opened: stream {} {} ({}), sink {}, ring {} x {} bytes",
            stream.index,
            stream.codec_name,
            native,
            if sink_supported { "native" } else { "resampled" },
            config.audio_frames_ahead,
            mirror_bytes
        );

        Ok(Self {
            stream: stream.clone(),
            decoder,
            resampler: None,
            native,
            output,
            sink_format,
            sink_supported,
            can_resample: caps.can_resample(),
            policy: config.conversion,
            ring,
            resample_origin_ms: None,
            resampled_frames: 0,
            resamplers_created: 0,
            frames_decoded: 0,
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

    pub fn native_format(&self) -> AudioFormat {
        self.native
    }

    /// Format of the mirrors in the ring.
    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    /// The sink plays the stream's native format without resampling.
    pub fn sink_supported(&self) -> bool {
        self.sink_supported
    }

    pub fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    pub fn resamplers_created(&self) -> u64 {
        self.resamplers_created
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Shared handle for the sink thread.
    pub fn ring(&self) -> SharedAudioRing {
        self.ring.clone()
    }

    /// Bring the resampler in line with `frame_format`. Returns false when
    /// frames pass through without one.
    fn prepare_conversion(
        &mut self,
        frame_format: AudioFormat,
        backend: &dyn MediaBackend,
    ) -> Result<bool> {
        if frame_format != self.native {
            tracing::info!("Audio format changed: {} -> {}", self.native, frame_format);
            self.native = frame_format;
            self.sink_supported = self.sink_format.map_or(true, |s| s == frame_format);
        }
        let target = target_format(self.sink_format, self.sink_supported, frame_format);
        let native_packed = packed(frame_format);

        // Planar to packed of the same layout is a plain copy
        if target == native_packed {
            self.drop_resampler();
            self.output = target;
            return Ok(false);
        }

        if !self.can_resample {
            return match self.policy {
                ConversionPolicy::Strict => {
                    Err(SessionError::ConversionUnavailable(MediaType::Audio))
                }
                ConversionPolicy::AcceptNative => {
                    if self.output != native_packed {
                        tracing::warn!(
                            "Resampling {} -> {} unavailable, passing native audio",
                            frame_format,
                            target
                        );
                    }
                    self.drop_resampler();
                    self.output = native_packed;
                    Ok(false)
                }
            };
        }

        let reusable = self
            .resampler
            .as_ref()
            .is_some_and(|r| r.input_format() == frame_format && r.output_format() == target);
        if !reusable {
            self.drop_resampler();
            self.resampler = Some(backend.create_resampler(frame_format, target)?);
            self.resamplers_created += 1;
            tracing::debug!("Resampler created: {} -> {}", frame_format, target);
        }
        self.output = target;
        Ok(true)
    }

    fn drop_resampler(&mut self) {
        if self.resampler.take().is_some() {
            self.resample_origin_ms = None;
            self.resampled_frames = 0;
        }
    }

    fn ticks_to_millis(&self, ticks: i64) -> i64 {
        self.stream.time_base.ticks_to_millis(ticks)
    }

    /// Timestamp of the next resampled mirror. Resampled output lags its
    /// input, so it is counted from the first sample fed rather than taken
    /// from the current frame.
    fn next_resampled_pts(&self) -> Pts {
        let rate = self.output.sample_rate.max(1) as u64;
        self.resample_origin_ms.map_or(Pts::Invalid, |origin| {
            Pts::from_millis(origin + (self.resampled_frames * 1000 / rate) as i64)
        })
    }

    /// Decode one packet of the active audio stream into the ring.
    pub fn decode(
        &mut self,
        packet: &Packet,
        backend: &dyn MediaBackend,
    ) -> Result<Option<DecodedAudio>> {
        let Some(frame) = self.decoder.decode(packet)? else {
            return Ok(None);
        };
        self.frames_decoded += 1;

        let resample = self.prepare_conversion(frame.format, backend)?;
        let mut mirror = self.ring.acquire(self.output);

        let frame_pts = frame.pts.map(|ticks| self.ticks_to_millis(ticks));
        let (samples_per_channel, pts) = match self.resampler.as_mut() {
            Some(resampler) if resample => {
                let samples = resampler.convert(&frame, &mut mirror.data)?;
                if self.resample_origin_ms.is_none() {
                    self.resample_origin_ms = frame_pts;
                }
                let pts = self.next_resampled_pts();
                self.resampled_frames += samples as u64;
                (samples, pts)
            }
            _ => {
                interleave(&frame, &mut mirror.data);
                (frame.samples_per_channel, frame_pts.map_or(Pts::Invalid, Pts::from_millis))
            }
        };

        let decoded = DecodedAudio {
            pts: frame.pts,
            dts: frame.dts,
            samples_per_channel,
            queued: samples_per_channel > 0,
        };

        if samples_per_channel == 0 {
            self.ring.recycle(mirror);
            return Ok(Some(decoded));
        }

        mirror.samples_per_channel = samples_per_channel;
        mirror.pts = pts;
        self.ring.push(mirror);
        Ok(Some(decoded))
    }

    /// Queue whatever the resampler still holds. Called once the container
    /// is exhausted; returns the number of samples per channel queued.
    pub fn finish(&mut self) -> Result<usize> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(0);
        };
        let mut tail = Vec::new();
        let samples = resampler.drain(&mut tail)?;
        if samples == 0 {
            return Ok(0);
        }
        let mut mirror = self.ring.acquire(self.output);
        mirror.data.extend_from_slice(&tail);
        mirror.samples_per_channel = samples;
        mirror.pts = self.next_resampled_pts();
        self.ring.push(mirror);
        tracing::debug!("Audio tail of {} samples queued at end of stream", samples);
        self.resample_origin_ms = None;
        self.resampled_frames = 0;
        Ok(samples)
    }

    /// Oldest queued slot, FIFO.
    pub fn consume_next(&self) -> Result<NativeBufferMirror> {
        self.ring.pop().ok_or(SessionError::BufferUnderrun)
    }

    pub fn recycle(&self, mirror: NativeBufferMirror) {
        self.ring.recycle(mirror);
    }

    /// Drop decoder state, resampler input and queued audio, e.g. after a seek.
    pub fn flush(&mut self) {
        self.decoder.flush();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.resample_origin_ms = None;
        self.resampled_frames = 0;
        self.ring.clear();
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.ring.clear();
        tracing::debug!(
            "Audio pipeline for stream {} closed after {} frames, {:?}",
            self.stream.index,
            self.frames_decoded,
            self.ring.stats()
        );
    }
}
