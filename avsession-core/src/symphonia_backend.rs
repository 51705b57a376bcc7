// symphonia (demux + decode) + SoftwareResampler
//
// Audio-only MediaBackend. Decoders hand out interleaved f32; there is no
// scaler, so video and subtitle streams are reported but never decoded.

use bytes::Bytes;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::backend::{
    AudioDecoder, AudioFrame, AudioParams, Container, FrameGeometry, MediaBackend, Packet,
    Resampler, Scaler, StreamDescriptor, StreamParams, SubtitleDecoder, VideoDecoder,
};
use crate::error::BackendError;
use crate::format::{AudioFormat, SampleFormat};
use crate::probe::{LibraryVersion, LibraryVersions};
use crate::resample::SoftwareResampler;
use crate::timestamp::{Rational, TIME_BASE_US};

/// Samples per channel assumed when the codec does not bound packet size.
const DEFAULT_MAX_FRAMES: usize = 8192;

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for SymphoniaBackend {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn library_versions(&self) -> LibraryVersions {
        let symphonia = Some(LibraryVersion::new(0, 5, 4));
        LibraryVersions {
            codec: symphonia,
            format: symphonia,
            util: None,
            device: None,
            resample: Some(LibraryVersion::new(0, 15, 0)),
            scale: None,
        }
    }

    fn open(&self, url: &str) -> Result<Box<dyn Container>, BackendError> {
        let path = Path::new(url);
        let file = File::open(path)
            .map_err(|e| BackendError::Open(format!("Failed to open {}: {}", url, e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| BackendError::Open(format!("Failed to probe {}: {}", url, e)))?;

        let reader = probed.format;
        let streams: Vec<StreamDescriptor> = reader
            .tracks()
            .iter()
            .enumerate()
            .map(|(index, track)| describe_track(index as u32, track))
            .collect();
        let track_ids = reader.tracks().iter().map(|t| t.id).collect();

        tracing::info!("Opened {} with symphonia: {} track(s)", url, streams.len());
        Ok(Box::new(SymphoniaContainer { reader, streams, track_ids }))
    }

    fn create_resampler(
        &self,
        input: AudioFormat,
        output: AudioFormat,
    ) -> Result<Box<dyn Resampler>, BackendError> {
        Ok(Box::new(SoftwareResampler::new(input, output)?))
    }

    fn create_scaler(
        &self,
        _src: FrameGeometry,
        _dst: FrameGeometry,
    ) -> Result<Box<dyn Scaler>, BackendError> {
        Err(BackendError::Unsupported("symphonia has no video scaler".into()))
    }
}

fn describe_track(index: u32, track: &Track) -> StreamDescriptor {
    let params = &track.codec_params;
    let sample_rate = params.sample_rate.unwrap_or(0);
    let codec_name = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|c| c.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let stream_params = if params.codec == CODEC_TYPE_NULL || sample_rate == 0 {
        StreamParams::Other
    } else {
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        StreamParams::Audio(AudioParams {
            format: AudioFormat::new(SampleFormat::F32, sample_rate, channels),
            frame_size: params.max_frames_per_packet.unwrap_or(0) as u32,
        })
    };

    let time_base = match params.time_base {
        Some(tb) => Rational::new(tb.numer as i32, tb.denom as i32),
        None if sample_rate > 0 => Rational::new(1, sample_rate as i32),
        None => Rational::MILLIS,
    };

    // Exact for PCM, zero for compressed codecs
    let channels = params.channels.map_or(0, |c| c.count()) as i64;
    let bit_rate = params
        .bits_per_sample
        .map_or(0, |bits| bits as i64 * sample_rate as i64 * channels);

    StreamDescriptor {
        index,
        // Symphonia codec types have no stable integer ids
        codec_id: 0,
        codec_name,
        time_base,
        language: track.language.clone(),
        bit_rate,
        frame_count: 0,
        duration: params.n_frames.map(|n| n as i64),
        start_time: Some(params.start_ts as i64),
        params: stream_params,
    }
}

// ============================================================================
// Container
// ============================================================================

struct SymphoniaContainer {
    reader: Box<dyn FormatReader>,
    streams: Vec<StreamDescriptor>,
    track_ids: Vec<u32>,
}

impl SymphoniaContainer {
    fn track(&self, stream: &StreamDescriptor) -> Option<&Track> {
        let id = *self.track_ids.get(stream.index as usize)?;
        self.reader.tracks().iter().find(|t| t.id == id)
    }
}

impl Container for SymphoniaContainer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn duration_us(&self) -> Option<i64> {
        self.streams
            .iter()
            .filter_map(|s| {
                let ticks = s.duration?;
                Some(s.time_base.scale(ticks.saturating_mul(TIME_BASE_US)))
            })
            .max()
    }

    fn start_time_us(&self) -> Option<i64> {
        Some(0)
    }

    fn bit_rate(&self) -> i64 {
        self.streams.iter().map(|s| s.bit_rate).sum()
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, BackendError> {
        let packet = match self.reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::debug!("Track list changed, ending stream");
                return Ok(None);
            }
            Err(e) => return Err(BackendError::Read(e.to_string())),
        };

        let stream_index = self
            .track_ids
            .iter()
            .position(|&id| id == packet.track_id())
            .unwrap_or(self.track_ids.len()) as u32;

        Ok(Some(Packet {
            stream_index,
            pts: Some(packet.ts() as i64),
            dts: Some(packet.ts() as i64),
            duration: packet.dur() as i64,
            keyframe: true,
            data: Bytes::copy_from_slice(packet.buf()),
        }))
    }

    fn seek(&mut self, position_ms: i64) -> Result<(), BackendError> {
        let seconds = position_ms.max(0) as f64 / 1000.0;
        let seek_to = SeekTo::Time {
            time: Time::from(seconds),
            track_id: None,
        };
        self.reader
            .seek(SeekMode::Coarse, seek_to)
            .map_err(|e| BackendError::Seek(e.to_string()))?;
        Ok(())
    }

    fn open_video_decoder(
        &self,
        _stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn VideoDecoder>>, BackendError> {
        Ok(None)
    }

    fn open_audio_decoder(
        &self,
        stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn AudioDecoder>>, BackendError> {
        let Some(track) = self.track(stream) else {
            return Ok(None);
        };
        let decoder = match symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
        {
            Ok(d) => d,
            Err(SymphoniaError::Unsupported(what)) => {
                tracing::warn!("No symphonia decoder for stream {}: {}", stream.index, what);
                return Ok(None);
            }
            Err(e) => return Err(BackendError::Open(format!("Failed to create decoder: {}", e))),
        };

        let max_frames = track
            .codec_params
            .max_frames_per_packet
            .map_or(DEFAULT_MAX_FRAMES, |n| n as usize);
        Ok(Some(Box::new(SymphoniaAudioDecoder {
            decoder,
            track_id: track.id,
            sample_buf: None,
            spec: None,
            max_frames,
        })))
    }

    fn open_subtitle_decoder(
        &self,
        _stream: &StreamDescriptor,
    ) -> Result<Option<Box<dyn SubtitleDecoder>>, BackendError> {
        Ok(None)
    }
}

// ============================================================================
// Audio decoder
// ============================================================================

struct SymphoniaAudioDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    spec: Option<SignalSpec>,
    max_frames: usize,
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>, BackendError> {
        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let sym_packet = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            ts,
            packet.duration.max(0) as u64,
            &packet.data,
        );

        let decoded = match self.decoder.decode(&sym_packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("Decode error: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(BackendError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(None);
        }

        // SampleBuffer capacity counts samples across all channels
        let needed = decoded.capacity() * spec.channels.count();
        let reusable = self.spec == Some(spec)
            && self.sample_buf.as_ref().is_some_and(|b| b.capacity() >= needed);
        if !reusable {
            self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            self.spec = Some(spec);
            self.max_frames = self.max_frames.max(decoded.capacity());
        }
        let Some(buf) = self.sample_buf.as_mut() else {
            return Ok(None);
        };
        buf.copy_interleaved_ref(decoded);

        let data: Vec<u8> = buf.samples().iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(Some(AudioFrame {
            format: AudioFormat::new(SampleFormat::F32, spec.rate, spec.channels.count() as u16),
            samples_per_channel: frames,
            planes: vec![data],
            pts: packet.pts,
            dts: packet.dts,
        }))
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }

    fn max_samples_per_channel(&self) -> usize {
        self.max_frames
    }
}
