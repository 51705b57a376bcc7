//! Test doubles: a scripted backend that counts open contexts and a GL
//! binding that records every call.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{
    AudioDecoder, AudioFrame, AudioParams, Chapter, Container, FrameGeometry, MediaBackend,
    Packet, Plane, Resampler, Scaler, StreamDescriptor, StreamParams, Subtitle, SubtitleDecoder,
    SubtitleRect, VideoDecoder, VideoFrame, VideoParams,
};
use crate::error::BackendError;
use crate::format::{AudioFormat, PixelFormat, SampleFormat};
use crate::gl::{GlBinding, GlEntryPoints, GL_NO_ERROR};
use crate::probe::{LibraryVersion, LibraryVersions};
use crate::timestamp::Rational;
use crate::video::VideoFrameLayout;

// ============================================================================
// Stream / frame helpers
// ============================================================================

pub fn video_stream(index: u32, width: u32, height: u32) -> StreamDescriptor {
    StreamDescriptor {
        index,
        codec_id: 27,
        codec_name: "h264".into(),
        time_base: Rational::new(1, 90_000),
        language: None,
        bit_rate: 2_000_000,
        frame_count: 250,
        duration: Some(900_000),
        start_time: Some(0),
        params: StreamParams::Video(VideoParams {
            width,
            height,
            pixel_format: PixelFormat::Yuv420p,
            frame_rate: Rational::new(25, 1),
        }),
    }
}

pub fn audio_stream(index: u32, sample_rate: u32, channels: u16) -> StreamDescriptor {
    StreamDescriptor {
        index,
        codec_id: 65536,
        codec_name: "pcm_s16le".into(),
        time_base: Rational::new(1, sample_rate as i32),
        language: None,
        bit_rate: sample_rate as i64 * channels as i64 * 16,
        frame_count: 0,
        duration: Some(sample_rate as i64 * 10),
        start_time: Some(0),
        params: StreamParams::Audio(AudioParams {
            format: AudioFormat::new(SampleFormat::S16, sample_rate, channels),
            frame_size: 1024,
        }),
    }
}

pub fn subtitle_stream(index: u32) -> StreamDescriptor {
    StreamDescriptor {
        index,
        codec_id: 94209,
        codec_name: "dvd_subtitle".into(),
        time_base: Rational::MILLIS,
        language: None,
        bit_rate: 0,
        frame_count: 0,
        duration: None,
        start_time: None,
        params: StreamParams::Subtitle,
    }
}

pub fn packet(stream_index: u32, pts: i64) -> Packet {
    Packet {
        stream_index,
        pts: Some(pts),
        dts: Some(pts),
        duration: 1,
        keyframe: true,
        data: Bytes::from_static(b"payload"),
    }
}

/// Frame with tightly packed planes filled with a per-plane byte value.
pub fn video_frame(format: PixelFormat, width: u32, height: u32, pts: Option<i64>) -> VideoFrame {
    let planes = match VideoFrameLayout::for_format(format, width, height) {
        Some(layout) => layout
            .plane_layouts()
            .iter()
            .enumerate()
            .map(|(i, p)| Plane {
                data: vec![i as u8 + 1; p.row_bytes() * p.height as usize],
                stride: p.row_bytes(),
            })
            .collect(),
        None => vec![Plane {
            data: vec![0; (width * height) as usize],
            stride: width as usize,
        }],
    };
    VideoFrame {
        format,
        width,
        height,
        planes,
        pts,
        dts: pts,
        bottom_up: false,
        keyframe: true,
    }
}

/// Interleaved (or planar) frame whose samples count up from zero.
pub fn audio_frame(format: AudioFormat, samples_per_channel: usize, pts: Option<i64>) -> AudioFrame {
    let bytes = format.sample_format.bytes_per_sample();
    let planes = if format.sample_format.is_planar() {
        (0..format.channels)
            .map(|_| (0..samples_per_channel * bytes).map(|b| b as u8).collect())
            .collect()
    } else {
        vec![(0..format.frame_bytes(samples_per_channel)).map(|b| b as u8).collect()]
    };
    AudioFrame {
        format,
        samples_per_channel,
        planes,
        pts,
        dts: pts,
    }
}

// ============================================================================
// Context accounting
// ============================================================================

#[derive(Debug, Default)]
pub struct MockCounters {
    containers_open: AtomicUsize,
    decoders_open: AtomicUsize,
    resamplers_open: AtomicUsize,
    scalers_open: AtomicUsize,
    resamplers_created: AtomicUsize,
    scalers_created: AtomicUsize,
}

impl MockCounters {
    pub fn containers_open(&self) -> usize {
        self.containers_open.load(Ordering::SeqCst)
    }

    pub fn decoders_open(&self) -> usize {
        self.decoders_open.load(Ordering::SeqCst)
    }

    pub fn resamplers_open(&self) -> usize {
        self.resamplers_open.load(Ordering::SeqCst)
    }

    pub fn scalers_open(&self) -> usize {
        self.scalers_open.load(Ordering::SeqCst)
    }

    pub fn resamplers_created(&self) -> usize {
        self.resamplers_created.load(Ordering::SeqCst)
    }

    pub fn scalers_created(&self) -> usize {
        self.scalers_created.load(Ordering::SeqCst)
    }

    pub fn contexts_open(&self) -> usize {
        self.containers_open() + self.decoders_open() + self.resamplers_open() + self.scalers_open()
    }
}

#[derive(Clone, Copy)]
enum ContextKind {
    Container,
    Decoder,
    Resampler,
    Scaler,
}

/// Counts one open context until dropped.
struct OpenToken {
    counters: Arc<MockCounters>,
    kind: ContextKind,
}

impl OpenToken {
    fn new(counters: &Arc<MockCounters>, kind: ContextKind) -> Self {
        counters.slot(kind).fetch_add(1, Ordering::SeqCst);
        Self { counters: counters.clone(), kind }
    }
}

impl Drop for OpenToken {
    fn drop(&mut self) {
        self.counters.slot(self.kind).fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockCounters {
    fn slot(&self, kind: ContextKind) -> &AtomicUsize {
        match kind {
            ContextKind::Container => &self.containers_open,
            ContextKind::Decoder => &self.decoders_open,
            ContextKind::Resampler => &self.resamplers_open,
            ContextKind::Scaler => &self.scalers_open,
        }
    }
}

// ============================================================================
// Scripted output
// ============================================================================

/// Frames the mock decoders return next, per stream index. When a queue is
/// empty the decoders synthesize a frame from the stream parameters.
#[derive(Default)]
pub struct FrameScript {
    video: HashMap<u32, VecDeque<VideoFrame>>,
    audio: HashMap<u32, VecDeque<AudioFrame>>,
    subtitle: HashMap<u32, VecDeque<Subtitle>>,
}

type SharedScript = Arc<Mutex<FrameScript>>;

// ============================================================================
// MockBackend
// ============================================================================

pub struct MockBackend {
    versions: LibraryVersions,
    streams: Vec<StreamDescriptor>,
    packets: Vec<Packet>,
    chapters: Vec<Chapter>,
    missing_decoders: HashSet<u32>,
    duration_us: Option<i64>,
    counters: Arc<MockCounters>,
    script: SharedScript,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockBackend {
    pub fn new(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            versions: LibraryVersions {
                codec: Some(LibraryVersion::new(60, 31, 102)),
                format: Some(LibraryVersion::new(60, 16, 100)),
                util: Some(LibraryVersion::new(58, 29, 100)),
                device: Some(LibraryVersion::new(60, 3, 100)),
                resample: Some(LibraryVersion::new(4, 12, 100)),
                scale: Some(LibraryVersion::new(7, 5, 100)),
            },
            streams,
            packets: Vec::new(),
            chapters: Vec::new(),
            missing_decoders: HashSet::new(),
            duration_us: Some(10_000_000),
            counters: Arc::new(MockCounters::default()),
            script: SharedScript::default(),
        }
    }

    pub fn with_packets(mut self, packets: Vec<Packet>) -> Self {
        self.packets = packets;
        self
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn without_decoder(mut self, index: u32) -> Self {
        self.missing_decoders.insert(index);
        self
    }

    pub fn counters(&self) -> &MockCounters {
        &self.counters
    }

    pub fn queue_video_format(&self, index: u32, format: PixelFormat, width: u32, height: u32) {
        self.queue_video_frame(index, video_frame(format, width, height, None));
    }

    pub fn queue_video_frame(&self, index: u32, frame: VideoFrame) {
        self.script.lock().video.entry(index).or_default().push_back(frame);
    }

    pub fn queue_audio_frame(&self, index: u32, frame: AudioFrame) {
        self.script.lock().audio.entry(index).or_default().push_back(frame);
    }
}

impl MediaBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn library_versions(&self) -> LibraryVersions {
        self.versions
    }

    fn open(&self, url: &str) -> Result<Box<dyn Container>, BackendError> {
        if url.starts_with("missing") {
            return Err(BackendError::Open(format!("{}: no such file", url)));
        }
        Ok(Box::new(MockContainer {
            streams: self.streams.clone(),
            packets: self.packets.clone(),
            cursor: 0,
            chapters: self.chapters.clone(),
            missing_decoders: self.missing_decoders.clone(),
            duration_us: self.duration_us,
            counters: self.counters.clone(),
            script: self.script.clone(),
            _token: OpenToken::new(&self.counters, ContextKind::Container),
        }))
    }

    fn create_resampler(
        &self,
        input: AudioFormat,
        output: AudioFormat,
    ) -> Result<Box<dyn Resampler>, BackendError> {
        self.counters.resamplers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockResampler {
            input,
            output,
            _token: OpenToken::new(&self.counters, ContextKind::Resampler),
        }))
    }

    fn create_scaler(
        &self,
        src: FrameGeometry,
        dst: FrameGeometry,
    ) -> Result<Box<dyn Scaler>, BackendError> {
        self.counters.scalers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockScaler {
            src,
            dst,
            _token: OpenToken::new(&self.counters, ContextKind::Scaler),
        }))
    }
}

// ============================================================================
// MockContainer
// ============================================================================

pub struct MockContainer {
    streams: Vec<StreamDescriptor>,
    packets: Vec<Packet>,
    cursor: usize,
    chapters: Vec<Chapter>,
    missing_decoders: HashSet<u32>,
    duration_us: Option<i64>,
    counters: Arc<MockCounters>,
    script: SharedScript,
    _token: OpenToken,
}

impl MockContainer {
    /// Stand-alone container with its own counters and script.
    pub fn new(streams: Vec<StreamDescriptor>) -> Self {
        let counters = Arc::new(MockCounters::default());
        Self {
            streams,
            packets: Vec::new(),
            cursor: 0,
            chapters: Vec::new(),
            missing_decoders: HashSet::new(),
            duration_us: None,
            _token: OpenToken::new(&counters, ContextKind::Container),
            counters,
            script: SharedScript::default(),
        }
    }

    pub fn without_decoder(mut self, index: u32) -> Self {
        self.missing_decoders.insert(index);
        self
    }

    pub fn counters(&self) -> &MockCounters {
        &self.counters
    }

    pub fn queue_video_format(&self, index: u32, format: PixelFormat, width: u32, height: u32) {
        self.queue_video_frame(index, video_frame(format, width, height, None));
    }

    pub fn queue_video_frame(&self, index: u32, frame: VideoFrame) {
        self.script.lock().video.entry(index).or_default().push_back(frame);
    }

    pub fn queue_audio_frame(&self, index: u32, frame: AudioFrame) {
        self.script.lock().audio.entry(index).or_default().push_back(frame);
    }

    pub fn queue_subtitle(&self, index: u32, subtitle: Subtitle) {
        self.script.lock().subtitle.entry(index).or_default().push_back(subtitle);
    }

    fn decoder_token(&self, stream: &StreamDescriptor) -> Option<OpenToken> {
        if self.missing_decoders.contains(&stream.index) {
            None
        } else {
            Some(OpenToken::new(&self.counters, ContextKind::Decoder))
        }
    }
}

impl Container for MockContainer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    fn start_time_us(&self) -> Option<i64> {
        Some(0)
    }

    fn bit_rate(&self) -> i64 {
        self.streams.iter().map(|s| s.bit_rate).sum()
    }

    fn chapters(&self) -> Vec<Chapter> {
        self.chapters.clone()
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, BackendError> {
        let packet = self.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, position_ms: i64) -> Result<(), BackendError> {
        if position_ms < 0 {
            return Err(BackendError::Seek(format!("negative position {}", position_ms)));
        }
        let streams = &self.streams;
        self.cursor = self
            .packets
            .iter()
            .position(|p| {
                let time_base = streams
                    .iter()
                    .find(|s| s.index == p.stream_index)
                    .map_or(Rational::MILLIS, |s| s.time_base);
                p.pts.is_some_and(|pts| time_base.ticks_to_millis(pts) >= position_ms)
            })
            .unwrap_or(self.packets.len());
        Ok(())
    }

    fn open_video_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn VideoDecoder>>, BackendError> {
        let Some(token) = self.decoder_token(stream) else {
            return Ok(None);
        };
        Ok(Some(Box::new(MockVideoDecoder {
            stream: stream.clone(),
            script: self.script.clone(),
            _token: token,
        })))
    }

    fn open_audio_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn AudioDecoder>>, BackendError> {
        let Some(token) = self.decoder_token(stream) else {
            return Ok(None);
        };
        Ok(Some(Box::new(MockAudioDecoder {
            stream: stream.clone(),
            script: self.script.clone(),
            _token: token,
        })))
    }

    fn open_subtitle_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn SubtitleDecoder>>, BackendError> {
        let Some(token) = self.decoder_token(stream) else {
            return Ok(None);
        };
        Ok(Some(Box::new(MockSubtitleDecoder {
            stream: stream.clone(),
            script: self.script.clone(),
            _token: token,
        })))
    }
}

// ============================================================================
// Mock decoders
// ============================================================================

struct MockVideoDecoder {
    stream: StreamDescriptor,
    script: SharedScript,
    _token: OpenToken,
}

impl VideoDecoder for MockVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>, BackendError> {
        // An empty packet stands for one the codec buffers
        if packet.data.is_empty() {
            return Ok(None);
        }
        let queued = self
            .script
            .lock()
            .video
            .get_mut(&self.stream.index)
            .and_then(|q| q.pop_front());
        let mut frame = match queued {
            Some(frame) => frame,
            None => {
                let params = self
                    .stream
                    .video()
                    .ok_or_else(|| BackendError::Decode("not a video stream".into()))?;
                video_frame(params.pixel_format, params.width, params.height, None)
            }
        };
        if frame.pts.is_none() {
            frame.pts = packet.pts;
            frame.dts = packet.dts;
        }
        Ok(Some(frame))
    }

    fn flush(&mut self) {}
}

struct MockAudioDecoder {
    stream: StreamDescriptor,
    script: SharedScript,
    _token: OpenToken,
}

impl AudioDecoder for MockAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>, BackendError> {
        if packet.data.is_empty() {
            return Ok(None);
        }
        let queued = self
            .script
            .lock()
            .audio
            .get_mut(&self.stream.index)
            .and_then(|q| q.pop_front());
        let mut frame = match queued {
            Some(frame) => frame,
            None => {
                let params = self
                    .stream
                    .audio()
                    .ok_or_else(|| BackendError::Decode("not an audio stream".into()))?;
                audio_frame(params.format, params.frame_size as usize, None)
            }
        };
        if frame.pts.is_none() {
            frame.pts = packet.pts;
            frame.dts = packet.dts;
        }
        Ok(Some(frame))
    }

    fn flush(&mut self) {}

    fn max_samples_per_channel(&self) -> usize {
        self.stream.audio().map_or(1024, |a| a.frame_size.max(1) as usize)
    }
}

struct MockSubtitleDecoder {
    stream: StreamDescriptor,
    script: SharedScript,
    _token: OpenToken,
}

impl SubtitleDecoder for MockSubtitleDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Subtitle>, BackendError> {
        let queued = self
            .script
            .lock()
            .subtitle
            .get_mut(&self.stream.index)
            .and_then(|q| q.pop_front());
        Ok(Some(queued.unwrap_or_else(|| Subtitle {
            pts: packet.pts,
            start_display_ms: 0,
            end_display_ms: 2000,
            rects: vec![SubtitleRect::Bitmap {
                x: 10,
                y: 20,
                width: 4,
                height: 2,
                stride: 4,
                indices: vec![0, 1, 1, 0, 1, 0, 0, 1],
                palette: vec![[0, 0, 0, 0], [255, 255, 255, 255]],
            }],
        })))
    }

    fn flush(&mut self) {}
}

// ============================================================================
// Mock conversion contexts
// ============================================================================

struct MockResampler {
    input: AudioFormat,
    output: AudioFormat,
    _token: OpenToken,
}

impl Resampler for MockResampler {
    fn input_format(&self) -> AudioFormat {
        self.input
    }

    fn output_format(&self) -> AudioFormat {
        self.output
    }

    fn convert(&mut self, frame: &AudioFrame, out: &mut Vec<u8>) -> Result<usize, BackendError> {
        let samples = frame.samples_per_channel * self.output.sample_rate as usize
            / self.input.sample_rate.max(1) as usize;
        out.resize(out.len() + self.output.frame_bytes(samples), 0);
        Ok(samples)
    }

    fn drain(&mut self, _out: &mut Vec<u8>) -> Result<usize, BackendError> {
        Ok(0)
    }

    fn reset(&mut self) {}
}

struct MockScaler {
    src: FrameGeometry,
    dst: FrameGeometry,
    _token: OpenToken,
}

impl Scaler for MockScaler {
    fn source(&self) -> FrameGeometry {
        self.src
    }

    fn destination(&self) -> FrameGeometry {
        self.dst
    }

    fn scale(&mut self, frame: &VideoFrame) -> Result<VideoFrame, BackendError> {
        let mut scaled = video_frame(self.dst.format, self.dst.width, self.dst.height, frame.pts);
        scaled.dts = frame.dts;
        scaled.bottom_up = frame.bottom_up;
        Ok(scaled)
    }
}

// ============================================================================
// RecordingGl
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlCall {
    TexImage {
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        with_data: bool,
    },
    TexSubImage {
        width: i32,
        height: i32,
        format: u32,
        bytes: usize,
    },
    BindTexture(u32),
    ActiveTexture(u32),
    Enable(u32),
    GetError,
    Flush,
    Finish,
}

pub struct RecordingGl {
    entry_points: GlEntryPoints,
    has_npot: bool,
    pending_error: Cell<u32>,
    calls: RefCell<Vec<GlCall>>,
}

impl RecordingGl {
    pub fn new(has_npot: bool) -> Self {
        Self {
            entry_points: GlEntryPoints::ALL,
            has_npot,
            pending_error: Cell::new(GL_NO_ERROR),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_entry_points(mut self, entry_points: GlEntryPoints) -> Self {
        self.entry_points = entry_points;
        self
    }

    /// Error returned by the next `get_error`, then cleared like GL does.
    pub fn fail_next(&self, code: u32) {
        self.pending_error.set(code);
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.borrow().clone()
    }

    pub fn tex_images(&self) -> Vec<(i32, i32)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                GlCall::TexImage { width, height, .. } => Some((*width, *height)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn record(&self, call: GlCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl GlBinding for RecordingGl {
    fn entry_points(&self) -> GlEntryPoints {
        self.entry_points
    }

    fn has_npot(&self) -> bool {
        self.has_npot
    }

    fn tex_image_2d(
        &self,
        _target: u32,
        _level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        _ty: u32,
        pixels: Option<&[u8]>,
    ) {
        self.record(GlCall::TexImage {
            internal_format,
            width,
            height,
            format,
            with_data: pixels.is_some(),
        });
    }

    fn tex_sub_image_2d(
        &self,
        _target: u32,
        _level: i32,
        _x_offset: i32,
        _y_offset: i32,
        width: i32,
        height: i32,
        format: u32,
        _ty: u32,
        pixels: &[u8],
    ) {
        self.record(GlCall::TexSubImage {
            width,
            height,
            format,
            bytes: pixels.len(),
        });
    }

    fn get_error(&self) -> u32 {
        self.record(GlCall::GetError);
        self.pending_error.replace(GL_NO_ERROR)
    }

    fn flush(&self) {
        self.record(GlCall::Flush);
    }

    fn finish(&self) {
        self.record(GlCall::Finish);
    }

    fn enable(&self, cap: u32) {
        self.record(GlCall::Enable(cap));
    }

    fn bind_texture(&self, _target: u32, texture: u32) {
        self.record(GlCall::BindTexture(texture));
    }

    fn active_texture(&self, unit: u32) {
        self.record(GlCall::ActiveTexture(unit));
    }
}
