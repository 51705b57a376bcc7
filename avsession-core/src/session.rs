//! # Playback Session
//!
//! Owns the container, the stream catalog, the timing tracker and the three
//! decode pipelines. Opening is all-or-nothing: any failure drops whatever
//! was opened so far before the error is returned.
//!
//! Decoding is pull-driven. Each [`Session::step`] reads one packet, routes
//! it to the pipeline of its stream and reports what came out. The audio ring
//! is the only state shared with another thread.

use serde::Serialize;
use std::sync::Arc;

use crate::audio::{AudioPipeline, AudioSink, DecodedAudio, NativeBufferMirror, SharedAudioRing};
use crate::backend::{Chapter, Container, MediaBackend, StreamDescriptor, VideoFrame};
use crate::catalog::{MediaType, StreamCatalog};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::gl::GlBinding;
use crate::probe::Capabilities;
use crate::subtitle::SubtitlePipeline;
use crate::texture::{TextureUploader, UploadReport};
use crate::timestamp::{Pts, StreamId};
use crate::timing::TimingTracker;
use crate::video::{VideoFrameLayout, VideoPipeline};

/// Outcome of one decode step.
#[derive(Debug)]
pub enum StepEvent {
    Video(VideoFrame),
    /// A decoded audio frame, queued in the ring unless the resampler is
    /// still buffering.
    Audio(DecodedAudio),
    Subtitle { pts: Pts },
    /// The decoder took the packet without producing output yet.
    Pending(MediaType),
    /// Packet of a stream that is not active.
    Skipped { stream_index: u32 },
    EndOfStream,
}

/// Aggregate numbers for display and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    pub fps: f32,
    pub bit_rate: i64,
    pub video_bit_rate: i64,
    pub audio_bit_rate: i64,
    pub video_frame_count: i64,
    pub audio_frame_count: i64,
    pub duration_ms: Option<i32>,
    pub start_time_ms: i32,
    pub width: u32,
    pub height: u32,
    pub in_gl_orientation: bool,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    /// Rate and channels handed to the sink.
    pub sink_sample_rate: u32,
    pub sink_channels: u16,
    pub sink_supported: bool,
    pub packets_read: u64,
    pub video_frames_decoded: u64,
    pub audio_frames_decoded: u64,
    pub subtitles_decoded: u64,
}

fn us_to_ms(us: i64) -> i32 {
    (us / 1000).clamp(0, i32::MAX as i64 - 1) as i32
}

fn descriptor(streams: &[StreamDescriptor], index: u32) -> Option<&StreamDescriptor> {
    streams.iter().find(|s| s.index == index)
}

pub struct Session {
    // Pipelines are declared before the container so they drop first
    video: Option<VideoPipeline>,
    audio: Option<AudioPipeline>,
    subtitle: Option<SubtitlePipeline>,
    container: Option<Box<dyn Container>>,
    backend: Arc<dyn MediaBackend>,
    url: String,
    config: SessionConfig,
    capabilities: Capabilities,
    catalog: StreamCatalog,
    timing: TimingTracker,
    chapters: Vec<Chapter>,
    metrics: SessionMetrics,
    ready: bool,
}

impl Session {
    /// Open `url` and every selected pipeline.
    ///
    /// At least one of video or audio must end up active. `gl` is only
    /// queried for capabilities; uploads take the binding again so they can
    /// run on the GL thread.
    pub fn open(
        backend: Arc<dyn MediaBackend>,
        url: &str,
        config: SessionConfig,
        gl: Option<&dyn GlBinding>,
        sink: Option<&dyn AudioSink>,
    ) -> Result<Self> {
        config.validate()?;
        let capabilities = Capabilities::probe(backend.library_versions(), gl);

        let container = backend.open(url)?;
        let streams = container.streams().to_vec();
        let mut catalog = StreamCatalog::enumerate(&streams);

        let video_index = catalog.select_active(
            MediaType::Video,
            config.video_stream,
            None,
            config.require_video,
            &streams,
        )?;
        let audio_index = catalog.select_active(
            MediaType::Audio,
            config.audio_stream,
            config.audio_language.as_deref(),
            config.require_audio,
            &streams,
        )?;
        let subtitle_index = catalog.select_active(
            MediaType::Subtitle,
            config.subtitle_stream,
            config.subtitle_language.as_deref(),
            false,
            &streams,
        )?;

        if video_index.is_none() && audio_index.is_none() {
            return Err(SessionError::StreamNotFound {
                category: MediaType::Video,
                requested: format!("{} or audio {}", config.video_stream, config.audio_stream),
            });
        }

        let video = match video_index.and_then(|i| descriptor(&streams, i)) {
            Some(stream) => Some(VideoPipeline::open(container.as_ref(), stream, &capabilities, &config)?),
            None => None,
        };
        let audio = match audio_index.and_then(|i| descriptor(&streams, i)) {
            Some(stream) => Some(AudioPipeline::open(
                container.as_ref(),
                stream,
                &capabilities,
                &config,
                sink,
            )?),
            None => None,
        };
        let subtitle = match subtitle_index.and_then(|i| descriptor(&streams, i)) {
            Some(stream) => Some(SubtitlePipeline::open(container.as_ref(), stream)?),
            None => None,
        };

        let mut timing = TimingTracker::new();
        if let Some(v) = &video {
            timing.set_time_base(MediaType::Video, v.time_base());
        }
        if let Some(a) = &audio {
            timing.set_time_base(MediaType::Audio, a.time_base());
        }
        if let Some(s) = &subtitle {
            timing.set_time_base(MediaType::Subtitle, s.time_base());
        }
        timing.set_duration_ms(container.duration_us().map(us_to_ms));
        timing.set_start_time_ms(container.start_time_us().map_or(0, us_to_ms));

        let video_stream = video.as_ref().map(|v| v.stream());
        let audio_stream = audio.as_ref().map(|a| a.stream());
        let metrics = SessionMetrics {
            fps: video_stream
                .and_then(|s| s.video())
                .map_or(0.0, |v| v.frame_rate.as_f32()),
            bit_rate: container.bit_rate(),
            video_bit_rate: video_stream.map_or(0, |s| s.bit_rate),
            audio_bit_rate: audio_stream.map_or(0, |s| s.bit_rate),
            video_frame_count: video_stream.map_or(0, |s| s.frame_count),
            audio_frame_count: audio_stream.map_or(0, |s| s.frame_count),
            duration_ms: timing.duration_ms(),
            start_time_ms: timing.start_time_ms(),
            ..Default::default()
        };

        let chapters = container.chapters();
        tracing::info!(
            "Session open: {} via {} (video {}, audio {}, subtitle {}, {} chapters, duration {:?} ms)",
            url,
            backend.name(),
            catalog.active(MediaType::Video),
            catalog.active(MediaType::Audio),
            catalog.active(MediaType::Subtitle),
            chapters.len(),
            metrics.duration_ms
        );

        Ok(Self {
            video,
            audio,
            subtitle,
            container: Some(container),
            backend,
            url: url.to_string(),
            config,
            capabilities,
            catalog,
            timing,
            chapters,
            metrics,
            ready: true,
        })
    }

    /// True from a successful open until [`close`](Self::close).
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn catalog(&self) -> &StreamCatalog {
        &self.catalog
    }

    pub fn timing(&self) -> &TimingTracker {
        &self.timing
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn video(&self) -> Option<&VideoPipeline> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&AudioPipeline> {
        self.audio.as_ref()
    }

    pub fn subtitle(&self) -> Option<&SubtitlePipeline> {
        self.subtitle.as_ref()
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// First chapter whose `[start_ms, end_ms]` range contains `msec`. Both
    /// ends are inclusive, so a shared boundary belongs to the earlier one.
    pub fn chapter_at(&self, msec: i32) -> Option<&Chapter> {
        self.chapters
            .iter()
            .find(|c| c.start_ms <= msec && msec <= c.end_ms)
    }

    pub fn metrics(&self) -> SessionMetrics {
        let mut metrics = self.metrics.clone();
        if let Some(video) = &self.video {
            metrics.width = video.width();
            metrics.height = video.height();
            metrics.in_gl_orientation = video.in_gl_orientation();
            metrics.video_frames_decoded = video.frames_decoded();
        }
        if let Some(audio) = &self.audio {
            let native = audio.native_format();
            let output = audio.output_format();
            metrics.audio_sample_rate = native.sample_rate;
            metrics.audio_channels = native.channels;
            metrics.sink_sample_rate = output.sample_rate;
            metrics.sink_channels = output.channels;
            metrics.sink_supported = audio.sink_supported();
            metrics.audio_frames_decoded = audio.frames_decoded();
        }
        if let Some(subtitle) = &self.subtitle {
            metrics.subtitles_decoded = subtitle.decoded();
        }
        metrics
    }

    /// Last position of `category` in milliseconds, or one of the sentinels.
    pub fn position_msec(&self, category: MediaType) -> Pts {
        self.timing.current_position_msec(category)
    }

    /// Read and decode one packet.
    pub fn step(&mut self) -> Result<StepEvent> {
        let container = self.container.as_mut().ok_or(SessionError::Closed)?;
        let Some(packet) = container.read_packet()? else {
            if !self.timing.is_end_of_stream() {
                if let Some(audio) = self.audio.as_mut() {
                    audio.finish()?;
                }
            }
            self.timing.mark_end_of_stream();
            return Ok(StepEvent::EndOfStream);
        };
        self.metrics.packets_read += 1;
        let index = packet.stream_index;
        let backend = self.backend.as_ref();

        if let Some(video) = self.video.as_mut().filter(|v| v.stream_index() == index) {
            return Ok(match video.decode(&packet, backend)? {
                Some(frame) => {
                    self.timing.observe(MediaType::Video, frame.pts, frame.dts);
                    StepEvent::Video(frame)
                }
                None => StepEvent::Pending(MediaType::Video),
            });
        }

        if let Some(audio) = self.audio.as_mut().filter(|a| a.stream_index() == index) {
            return Ok(match audio.decode(&packet, backend)? {
                Some(decoded) => {
                    self.timing.observe(MediaType::Audio, decoded.pts, decoded.dts);
                    StepEvent::Audio(decoded)
                }
                None => StepEvent::Pending(MediaType::Audio),
            });
        }

        if let Some(subtitle) = self.subtitle.as_mut().filter(|s| s.stream_index() == index) {
            if !subtitle.decode(&packet)? {
                return Ok(StepEvent::Pending(MediaType::Subtitle));
            }
            self.timing.observe(MediaType::Subtitle, subtitle.last_pts(), None);
            let pts = subtitle.rendered().map_or(Pts::Invalid, |r| r.pts);
            return Ok(StepEvent::Subtitle { pts });
        }

        tracing::trace!("Skipping packet of inactive stream {}", index);
        Ok(StepEvent::Skipped { stream_index: index })
    }

    /// Upload a decoded frame into the uploader's textures.
    ///
    /// Uses the layout of the last reconfiguration when it matches the frame,
    /// so a pixel format change is always reflected before the upload.
    pub fn upload(
        &self,
        uploader: &mut TextureUploader,
        gl: &dyn GlBinding,
        frame: &VideoFrame,
    ) -> Result<UploadReport> {
        if !self.ready {
            return Err(SessionError::Closed);
        }
        let current = self.video.as_ref().and_then(|v| v.layout()).copied();
        let layout = match current {
            Some(l) if l.format == frame.format && l.width == frame.width && l.height == frame.height => l,
            _ => VideoFrameLayout::for_format(frame.format, frame.width, frame.height)
                .ok_or(SessionError::ConversionUnavailable(MediaType::Video))?,
        };
        uploader.upload(gl, frame, &layout)
    }

    /// Oldest queued audio slot.
    pub fn consume_audio(&self) -> Result<NativeBufferMirror> {
        if !self.ready {
            return Err(SessionError::Closed);
        }
        match &self.audio {
            Some(audio) => audio.consume_next(),
            None => Err(SessionError::StreamNotFound {
                category: MediaType::Audio,
                requested: StreamId::None.to_string(),
            }),
        }
    }

    pub fn recycle_audio(&self, mirror: NativeBufferMirror) {
        if let Some(audio) = &self.audio {
            audio.recycle(mirror);
        }
    }

    /// Shared ring handle for the sink thread.
    pub fn audio_ring(&self) -> Option<SharedAudioRing> {
        self.audio.as_ref().map(|a| a.ring())
    }

    /// Seek to `msec`, dropping everything decoded before the jump.
    pub fn seek(&mut self, msec: i32) -> Result<()> {
        let container = self.container.as_mut().ok_or(SessionError::Closed)?;
        container.seek(msec as i64)?;

        if let Some(video) = self.video.as_mut() {
            video.flush();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.flush();
        }
        if let Some(subtitle) = self.subtitle.as_mut() {
            subtitle.flush();
        }
        self.timing.reset_positions();
        tracing::debug!("Seeked to {} ms", msec);
        Ok(())
    }

    /// Release every context. Safe to call more than once.
    pub fn close(&mut self) {
        if self.container.is_none() {
            return;
        }
        self.ready = false;
        self.subtitle = None;
        self.audio = None;
        self.video = None;
        self.container = None;
        tracing::info!(
            "Session closed: {} after {} packets",
            self.url,
            self.metrics.packets_read
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FixedFormatSink;
    use crate::format::{AudioFormat, SampleFormat};
    use crate::testing::{
        audio_stream, packet, subtitle_stream, video_stream, MockBackend, RecordingGl,
    };
    use crate::timestamp::END_OF_STREAM_PTS;

    fn open(backend: &Arc<MockBackend>, config: SessionConfig) -> Result<Session> {
        Session::open(backend.clone(), "movie.mkv", config, None, None)
    }

    fn av_backend(packets: Vec<crate::backend::Packet>) -> Arc<MockBackend> {
        Arc::new(
            MockBackend::new(vec![
                video_stream(0, 640, 480),
                audio_stream(1, 44100, 2),
                subtitle_stream(2),
            ])
            .with_packets(packets),
        )
    }

    #[test]
    fn test_open_selects_defaults() {
        let backend = av_backend(Vec::new());
        let session = open(&backend, SessionConfig::default()).unwrap();

        assert!(session.is_ready());
        assert_eq!(session.catalog().active(MediaType::Video), StreamId::Index(0));
        assert_eq!(session.catalog().active(MediaType::Audio), StreamId::Index(1));
        assert_eq!(session.catalog().active(MediaType::Subtitle), StreamId::None);

        let metrics = session.metrics();
        assert_eq!(metrics.fps, 25.0);
        assert_eq!(metrics.duration_ms, Some(10_000));
        assert_eq!(metrics.audio_sample_rate, 44100);
        assert!(metrics.sink_supported);
        // container + two decoders
        assert_eq!(backend.counters().contexts_open(), 3);
    }

    #[test]
    fn test_missing_required_category() {
        let backend = Arc::new(MockBackend::new(vec![audio_stream(0, 48000, 2)]));
        let config = SessionConfig { require_video: true, ..Default::default() };
        let result = open(&backend, config);

        assert!(matches!(
            result,
            Err(SessionError::StreamNotFound { category: MediaType::Video, .. })
        ));
        assert_eq!(backend.counters().contexts_open(), 0);
    }

    #[test]
    fn test_requested_stream_absent() {
        let backend = Arc::new(MockBackend::new(vec![
            video_stream(0, 320, 240),
            video_stream(1, 640, 480),
        ]));
        let config = SessionConfig { video_stream: StreamId::Index(5), ..Default::default() };

        assert!(matches!(
            open(&backend, config),
            Err(SessionError::StreamNotFound { category: MediaType::Video, .. })
        ));
        assert_eq!(backend.counters().contexts_open(), 0);
    }

    #[test]
    fn test_decoder_failure_closes_everything() {
        let backend = Arc::new(
            MockBackend::new(vec![video_stream(0, 640, 480), audio_stream(1, 44100, 2)])
                .without_decoder(1),
        );
        let result = open(&backend, SessionConfig::default());

        assert!(matches!(
            result,
            Err(SessionError::DecoderUnavailable { category: MediaType::Audio, .. })
        ));
        assert_eq!(backend.counters().decoders_open(), 0);
        assert_eq!(backend.counters().contexts_open(), 0);
    }

    #[test]
    fn test_needs_video_or_audio() {
        let backend = Arc::new(MockBackend::new(vec![subtitle_stream(0)]));
        assert!(matches!(
            open(&backend, SessionConfig::default()),
            Err(SessionError::StreamNotFound { .. })
        ));
        assert_eq!(backend.counters().contexts_open(), 0);
    }

    #[test]
    fn test_invalid_config_opens_nothing() {
        let backend = av_backend(Vec::new());
        let config = SessionConfig { audio_frames_ahead: 0, ..Default::default() };
        assert!(matches!(open(&backend, config), Err(SessionError::InvalidConfig(_))));
        assert_eq!(backend.counters().containers_open(), 0);
    }

    #[test]
    fn test_open_failure_from_backend() {
        let backend = av_backend(Vec::new());
        let result = Session::open(backend.clone(), "missing.mkv", SessionConfig::default(), None, None);
        assert!(matches!(result, Err(SessionError::Backend(_))));
    }

    #[test]
    fn test_step_routes_packets() {
        let backend = av_backend(vec![packet(0, 0), packet(1, 0), packet(2, 0), packet(0, 3600)]);
        let mut session = open(&backend, SessionConfig::default()).unwrap();

        assert!(matches!(session.step().unwrap(), StepEvent::Video(_)));
        match session.step().unwrap() {
            StepEvent::Audio(decoded) => {
                assert!(decoded.queued);
                assert_eq!(decoded.samples_per_channel, 1024);
            }
            other => panic!("expected audio, got {:?}", other),
        }
        // Subtitles are muted by default
        assert!(matches!(session.step().unwrap(), StepEvent::Skipped { stream_index: 2 }));
        assert!(matches!(session.step().unwrap(), StepEvent::Video(_)));
        assert_eq!(session.position_msec(MediaType::Video), Pts::Millis(40));

        let mirror = session.consume_audio().unwrap();
        assert_eq!(mirror.samples_per_channel(), 1024);
        session.recycle_audio(mirror);
        assert!(matches!(session.consume_audio(), Err(SessionError::BufferUnderrun)));

        assert!(matches!(session.step().unwrap(), StepEvent::EndOfStream));
        assert_eq!(session.position_msec(MediaType::Video).to_wire(), END_OF_STREAM_PTS);
        assert!(matches!(session.step().unwrap(), StepEvent::EndOfStream));
        assert_eq!(session.metrics().packets_read, 4);
        assert_eq!(session.metrics().video_frames_decoded, 2);
    }

    #[test]
    fn test_subtitle_step() {
        let backend = av_backend(vec![packet(2, 1500)]);
        let config = SessionConfig { subtitle_stream: StreamId::Auto, ..Default::default() };
        let mut session = open(&backend, config).unwrap();

        match session.step().unwrap() {
            StepEvent::Subtitle { pts } => assert_eq!(pts, Pts::Millis(1500)),
            other => panic!("expected subtitle, got {:?}", other),
        }
        assert_eq!(session.position_msec(MediaType::Subtitle), Pts::Millis(1500));
    }

    #[test]
    fn test_backward_pts_counted() {
        let backend = av_backend(vec![packet(0, 1000), packet(0, 900), packet(0, 1100)]);
        let mut session = open(&backend, SessionConfig::default()).unwrap();
        for _ in 0..3 {
            session.step().unwrap();
        }
        let stats = session.timing().stats(MediaType::Video);
        assert_eq!(stats.pts_error, 1);
        assert_eq!(stats.pts_last, Some(1100));
    }

    #[test]
    fn test_seek_flushes_and_resets() {
        let backend = av_backend(vec![
            packet(1, 0),
            packet(0, 0),
            packet(0, 90_000),
            packet(0, 180_000),
        ]);
        let mut session = open(&backend, SessionConfig::default()).unwrap();
        session.step().unwrap();
        session.step().unwrap();
        let ring = session.audio_ring().unwrap();
        assert_eq!(ring.len(), 1);

        session.seek(1500).unwrap();
        assert!(ring.is_empty());
        assert_eq!(session.position_msec(MediaType::Video), Pts::Invalid);

        match session.step().unwrap() {
            StepEvent::Video(frame) => assert_eq!(frame.pts, Some(180_000)),
            other => panic!("expected video, got {:?}", other),
        }
        assert_eq!(session.position_msec(MediaType::Video), Pts::Millis(2000));
        assert_eq!(session.timing().stats(MediaType::Video).pts_error, 0);
    }

    #[test]
    fn test_chapters() {
        let backend = Arc::new(
            MockBackend::new(vec![video_stream(0, 640, 480)]).with_chapters(vec![
                Chapter { id: 1, start_ms: 0, end_ms: 5000, title: Some("Intro".into()) },
                Chapter { id: 2, start_ms: 5000, end_ms: 10_000, title: Some("Main".into()) },
            ]),
        );
        let session = open(&backend, SessionConfig::default()).unwrap();
        assert_eq!(session.chapters().len(), 2);
        assert_eq!(session.chapter_at(0).map(|c| c.id), Some(1));
        assert_eq!(session.chapter_at(6000).map(|c| c.id), Some(2));
        assert_eq!(session.chapter_at(5000).map(|c| c.id), Some(1));
        assert_eq!(session.chapter_at(10_000).map(|c| c.id), Some(2));
        assert!(session.chapter_at(10_001).is_none());
        assert!(session.chapter_at(-1).is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = av_backend(vec![packet(0, 0)]);
        let mut session = open(&backend, SessionConfig::default()).unwrap();
        session.close();
        session.close();

        assert!(!session.is_ready());
        assert_eq!(backend.counters().contexts_open(), 0);
        assert!(matches!(session.step(), Err(SessionError::Closed)));
        assert!(matches!(session.seek(0), Err(SessionError::Closed)));
        drop(session);
        assert_eq!(backend.counters().contexts_open(), 0);
    }

    #[test]
    fn test_drop_releases_contexts() {
        let backend = av_backend(vec![packet(1, 0)]);
        {
            let mut session = open(&backend, SessionConfig::default()).unwrap();
            session.step().unwrap();
            assert!(backend.counters().contexts_open() > 0);
        }
        assert_eq!(backend.counters().contexts_open(), 0);
    }

    #[test]
    fn test_upload_decoded_frame() {
        let backend = av_backend(vec![packet(0, 0)]);
        let gl = RecordingGl::new(false);
        let session_gl: &dyn GlBinding = &gl;
        let mut session =
            Session::open(backend.clone(), "movie.mkv", SessionConfig::default(), Some(session_gl), None)
                .unwrap();
        assert!(session.capabilities().can_upload());

        let StepEvent::Video(frame) = session.step().unwrap() else {
            panic!("expected a video frame");
        };
        let mut uploader = TextureUploader::new(&[1, 2, 3], session.capabilities());
        let report = session.upload(&mut uploader, &gl, &frame).unwrap();
        assert_eq!(report.texture_sizes[0], (1024, 512));
        assert!(report.reallocated);
    }

    #[test]
    fn test_resampler_shared_across_steps() {
        let backend = Arc::new(
            MockBackend::new(vec![audio_stream(0, 44100, 2)])
                .with_packets((0..5).map(|i| packet(0, i * 1024)).collect()),
        );
        let sink = FixedFormatSink(AudioFormat::new(SampleFormat::S16, 48000, 1));
        let mut session =
            Session::open(backend.clone(), "song.flac", SessionConfig::default(), None, Some(&sink))
                .unwrap();
        while !matches!(session.step().unwrap(), StepEvent::EndOfStream) {}

        assert_eq!(backend.counters().resamplers_created(), 1);
        let metrics = session.metrics();
        assert!(!metrics.sink_supported);
        assert_eq!((metrics.sink_sample_rate, metrics.sink_channels), (48000, 1));
        assert_eq!(metrics.audio_frames_decoded, 5);
    }
}
