//! # Timing Tracker
//!
//! Per-category PTS/DTS health and the derived session clock.
//!
//! Out-of-order timestamps are counted, never rejected; the driving player
//! decides what a growing error count means.

use serde::Serialize;

use crate::catalog::MediaType;
use crate::timestamp::{Pts, Rational};

/// Raw "no timestamp" value used by FFmpeg-style backends (`AV_NOPTS_VALUE`).
pub const NO_TIMESTAMP: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PtsStats {
    /// Backward PTS steps seen so far.
    pub pts_error: u64,
    /// Backward DTS steps seen so far.
    pub dts_error: u64,
    pub pts_last: Option<i64>,
    pub dts_last: Option<i64>,
}

impl PtsStats {
    pub fn observe(&mut self, pts: Option<i64>, dts: Option<i64>) {
        if let Some(pts) = pts {
            if self.pts_last.is_some_and(|last| pts < last) {
                self.pts_error += 1;
            }
            self.pts_last = Some(pts);
        }
        if let Some(dts) = dts {
            if self.dts_last.is_some_and(|last| dts < last) {
                self.dts_error += 1;
            }
            self.dts_last = Some(dts);
        }
    }

    /// Forget the last values, keeping the counters.
    pub fn reset_last(&mut self) {
        self.pts_last = None;
        self.dts_last = None;
    }
}

fn slot(category: MediaType) -> usize {
    match category {
        MediaType::Video => 0,
        MediaType::Audio => 1,
        MediaType::Subtitle => 2,
    }
}

fn raw_to_option(raw: i64) -> Option<i64> {
    if raw == NO_TIMESTAMP {
        None
    } else {
        Some(raw)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingTracker {
    stats: [PtsStats; 3],
    time_bases: [Rational; 3],
    end_of_stream: bool,
    duration_ms: Option<i32>,
    start_time_ms: i32,
}

impl Default for TimingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingTracker {
    pub fn new() -> Self {
        Self {
            stats: [PtsStats::default(); 3],
            time_bases: [Rational::MILLIS; 3],
            end_of_stream: false,
            duration_ms: None,
            start_time_ms: 0,
        }
    }

    pub fn set_time_base(&mut self, category: MediaType, time_base: Rational) {
        if !time_base.is_valid() {
            tracing::warn!("Ignoring invalid {} time base {}", category, time_base);
            return;
        }
        self.time_bases[slot(category)] = time_base;
    }

    pub fn time_base(&self, category: MediaType) -> Rational {
        self.time_bases[slot(category)]
    }

    pub fn set_duration_ms(&mut self, duration_ms: Option<i32>) {
        self.duration_ms = duration_ms;
    }

    pub fn duration_ms(&self) -> Option<i32> {
        self.duration_ms
    }

    pub fn set_start_time_ms(&mut self, start_time_ms: i32) {
        self.start_time_ms = start_time_ms;
    }

    pub fn start_time_ms(&self) -> i32 {
        self.start_time_ms
    }

    /// Record timestamps (stream ticks) of a decoded unit.
    pub fn observe(&mut self, category: MediaType, pts: Option<i64>, dts: Option<i64>) {
        let stats = &mut self.stats[slot(category)];
        let before = (stats.pts_error, stats.dts_error);
        stats.observe(pts, dts);
        if (stats.pts_error, stats.dts_error) != before {
            tracing::trace!(
                "{} timestamp went backwards: pts {:?} dts {:?} (errors {}/{})",
                category,
                pts,
                dts,
                stats.pts_error,
                stats.dts_error
            );
        }
        if pts.is_some() {
            self.end_of_stream = false;
        }
    }

    /// Same as [`observe`](Self::observe) with [`NO_TIMESTAMP`] as the
    /// "no timestamp" value.
    pub fn observe_raw(&mut self, category: MediaType, pts: i64, dts: i64) {
        self.observe(category, raw_to_option(pts), raw_to_option(dts));
    }

    pub fn stats(&self, category: MediaType) -> &PtsStats {
        &self.stats[slot(category)]
    }

    /// Last PTS of `category` in milliseconds. Every category uses the same
    /// truncating conversion so the player can compute A/V drift.
    pub fn current_position_msec(&self, category: MediaType) -> Pts {
        if self.end_of_stream {
            return Pts::EndOfStream;
        }
        match self.stats[slot(category)].pts_last {
            Some(ticks) => Pts::from_millis(self.time_bases[slot(category)].ticks_to_millis(ticks)),
            None => Pts::Invalid,
        }
    }

    /// Video position minus audio position, when both are known.
    pub fn av_drift_ms(&self) -> Option<i64> {
        let video = self.current_position_msec(MediaType::Video).millis()?;
        let audio = self.current_position_msec(MediaType::Audio).millis()?;
        Some(video as i64 - audio as i64)
    }

    pub fn mark_end_of_stream(&mut self) {
        if !self.end_of_stream {
            tracing::debug!("End of stream");
        }
        self.end_of_stream = true;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// After a seek: forget last timestamps, keep error counters.
    pub fn reset_positions(&mut self) {
        for stats in &mut self.stats {
            stats.reset_last();
        }
        self.end_of_stream = false;
    }
}
