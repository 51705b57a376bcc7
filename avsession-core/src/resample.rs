//! Software resampler: sample format conversion, channel mixing and rate
//! conversion with rubato.

use rubato::{FftFixedIn, Resampler as _};

use crate::backend::{AudioFrame, Resampler};
use crate::error::BackendError;
use crate::format::{AudioFormat, SampleFormat};

use crate::audio::RESAMPLE_CHUNK_FRAMES as CHUNK_FRAMES;

/// Zero-padded chunks fed at most while draining.
const MAX_DRAIN_CHUNKS: usize = 8;

fn read_sample(format: SampleFormat, bytes: &[u8]) -> f32 {
    match format.packed() {
        SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
        SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
        SampleFormat::S32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
        }
        SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleFormat::F64 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[..8]);
            f64::from_le_bytes(b) as f32
        }
        _ => 0.0,
    }
}

fn write_sample(format: SampleFormat, value: f32, out: &mut Vec<u8>) {
    let v = value.clamp(-1.0, 1.0);
    match format {
        SampleFormat::U8 => out.push((v * 127.0 + 128.0).round() as u8),
        SampleFormat::S16 => out.extend_from_slice(&((v * 32767.0).round() as i16).to_le_bytes()),
        SampleFormat::S32 => {
            out.extend_from_slice(&((v as f64 * 2_147_483_647.0).round() as i32).to_le_bytes())
        }
        SampleFormat::F32 => out.extend_from_slice(&value.to_le_bytes()),
        SampleFormat::F64 => out.extend_from_slice(&(value as f64).to_le_bytes()),
        _ => {}
    }
}

/// Split a frame into one `f32` vector per channel.
fn deinterleave(frame: &AudioFrame) -> Vec<Vec<f32>> {
    let format = frame.format;
    let channels = format.channels.max(1) as usize;
    let bytes = format.sample_format.bytes_per_sample();
    let mut out = vec![Vec::with_capacity(frame.samples_per_channel); channels];

    if format.sample_format.is_planar() {
        for (channel, plane) in out.iter_mut().zip(&frame.planes) {
            channel.extend(
                plane
                    .chunks_exact(bytes)
                    .take(frame.samples_per_channel)
                    .map(|s| read_sample(format.sample_format, s)),
            );
        }
    } else if let Some(plane) = frame.planes.first() {
        for (i, sample) in plane
            .chunks_exact(bytes)
            .take(frame.samples_per_channel * channels)
            .enumerate()
        {
            out[i % channels].push(read_sample(format.sample_format, sample));
        }
    }
    out
}

/// Map `input` channels onto `channels` outputs: down-mix to mono averages,
/// mono is duplicated, otherwise channels are matched by position.
fn mix_channels(input: Vec<Vec<f32>>, channels: usize) -> Vec<Vec<f32>> {
    let in_channels = input.len();
    if in_channels == channels {
        return input;
    }
    let frames = input.first().map_or(0, |c| c.len());
    if channels == 1 {
        let mut mono = vec![0.0; frames];
        for channel in &input {
            for (m, s) in mono.iter_mut().zip(channel) {
                *m += s / in_channels as f32;
            }
        }
        return vec![mono];
    }
    (0..channels)
        .map(|c| match input.get(c) {
            Some(channel) => channel.clone(),
            None if in_channels == 1 => input[0].clone(),
            None => vec![0.0; frames],
        })
        .collect()
}

/// Output frames a rate conversion owes for `input_frames`, rounded.
fn expected_output(input_frames: u64, input_rate: u32, output_rate: u32) -> u64 {
    (input_frames * output_rate as u64 + input_rate as u64 / 2) / input_rate.max(1) as u64
}

/// Rate-converted output bookkeeping since the last reset.
#[derive(Debug, Default)]
struct RateState {
    /// Input frames accepted.
    fed: u64,
    /// Output frames emitted.
    produced: u64,
    /// Leading filter delay still to drop, in output frames.
    skip: usize,
}

impl RateState {
    fn new(delay: usize) -> Self {
        Self {
            skip: delay,
            ..Default::default()
        }
    }

    /// Move `resampled` into `acc`, dropping the filter delay and anything
    /// past `limit` total output frames.
    fn take(&mut self, resampled: Vec<Vec<f32>>, limit: Option<u64>, acc: &mut [Vec<f32>]) {
        let frames = resampled.first().map_or(0, |c| c.len());
        let start = self.skip.min(frames);
        self.skip -= start;
        let end = match limit {
            Some(limit) => frames.min(start + limit.saturating_sub(self.produced) as usize),
            None => frames,
        };
        for (acc, channel) in acc.iter_mut().zip(resampled) {
            acc.extend_from_slice(&channel[start..end]);
        }
        self.produced += (end - start) as u64;
    }
}

pub struct SoftwareResampler {
    input: AudioFormat,
    output: AudioFormat,
    rate: Option<FftFixedIn<f32>>,
    state: RateState,
    /// Input waiting for a full rubato chunk, per output channel.
    pending: Vec<Vec<f32>>,
}

impl SoftwareResampler {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self, BackendError> {
        if output.sample_format.is_planar() {
            return Err(BackendError::Unsupported(format!(
                "planar resampler output {:?}",
                output.sample_format
            )));
        }
        if input.sample_rate == 0 || output.sample_rate == 0 || output.channels == 0 {
            return Err(BackendError::Unsupported(format!("{} -> {}", input, output)));
        }

        let channels = output.channels as usize;
        let rate = if input.sample_rate != output.sample_rate {
            let resampler = FftFixedIn::<f32>::new(
                input.sample_rate as usize,
                output.sample_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )
            .map_err(|e| BackendError::Unsupported(format!("rate conversion: {}", e)))?;
            Some(resampler)
        } else {
            None
        };

        let state = RateState::new(rate.as_ref().map_or(0, |r| r.output_delay()));
        tracing::debug!("Software resampler {} -> {}", input, output);
        Ok(Self {
            input,
            output,
            rate,
            state,
            pending: vec![Vec::new(); channels],
        })
    }


    fn write_interleaved(&self, channels: &[Vec<f32>], out: &mut Vec<u8>) -> usize {
        let frames = channels.first().map_or(0, |c| c.len());
        out.reserve(self.output.frame_bytes(frames));
        for i in 0..frames {
            for channel in channels {
                write_sample(self.output.sample_format, channel[i], out);
            }
        }
        frames
    }
}

impl Resampler for SoftwareResampler {
    fn input_format(&self) -> AudioFormat {
        self.input
    }

    fn output_format(&self) -> AudioFormat {
        self.output
    }

    fn convert(&mut self, frame: &AudioFrame, out: &mut Vec<u8>) -> Result<usize, BackendError> {
        let channels = mix_channels(deinterleave(frame), self.output.channels as usize);

        let Some(rate) = self.rate.as_mut() else {
            return Ok(self.write_interleaved(&channels, out));
        };

        self.state.fed += channels.first().map_or(0, |c| c.len()) as u64;
        for (pending, channel) in self.pending.iter_mut().zip(channels) {
            pending.extend(channel);
        }

        let mut converted: Vec<Vec<f32>> = vec![Vec::new(); self.pending.len()];
        loop {
            let needed = rate.input_frames_next();
            if self.pending.first().map_or(0, |p| p.len()) < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..needed).collect())
                .collect();
            let resampled = rate
                .process(&chunk, None)
                .map_err(|e| BackendError::Decode(format!("resample: {}", e)))?;
            self.state.take(resampled, None, &mut converted);
        }

        Ok(self.write_interleaved(&converted, out))
    }

    fn drain(&mut self, out: &mut Vec<u8>) -> Result<usize, BackendError> {
        let Some(rate) = self.rate.as_mut() else {
            return Ok(0);
        };
        let expected = expected_output(self.state.fed, self.input.sample_rate, self.output.sample_rate);
        let tail: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let mut converted: Vec<Vec<f32>> = vec![Vec::new(); self.pending.len()];

        let mut input = tail.first().is_some_and(|c| !c.is_empty()).then_some(tail);
        let mut rounds = 0;
        while self.state.produced < expected && rounds < MAX_DRAIN_CHUNKS {
            let resampled = rate
                .process_partial(input.take().as_deref(), None)
                .map_err(|e| BackendError::Decode(format!("resample drain: {}", e)))?;
            self.state.take(resampled, Some(expected), &mut converted);
            rounds += 1;
        }
        if self.state.produced < expected {
            tracing::warn!(
                "Resampler drained {} of {} frames",
                self.state.produced,
                expected
            );
        }

        self.reset();
        Ok(self.write_interleaved(&converted, out))
    }

    fn reset(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        let delay = match self.rate.as_mut() {
            Some(rate) => {
                rate.reset();
                rate.output_delay()
            }
            None => 0,
        };
        self.state = RateState::new(delay);
    }
}
