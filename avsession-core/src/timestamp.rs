//! Timestamps, time bases and stream ids.
//!
//! Inside the crate "no timestamp", "end of stream", "no stream" and "auto"
//! are enum variants. The integer encodings below are what crosses the
//! boundary to the driving player.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire value for "no timestamp" (`i32::MIN`).
pub const INVALID_PTS: i32 = i32::MIN;

/// Wire value for "stream exhausted" (`i32::MAX`).
pub const END_OF_STREAM_PTS: i32 = i32::MAX;

/// Wire value for "no stream selected".
pub const STREAM_ID_NONE: i32 = -2;

/// Wire value for "select automatically".
pub const STREAM_ID_AUTO: i32 = -1;

/// Microseconds per second, the container-level time base.
pub const TIME_BASE_US: i64 = 1_000_000;

// ============================================================================
// Rational
// ============================================================================

/// A time base or frame rate as numerator/denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const MILLIS: Rational = Rational { num: 1, den: 1000 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    pub fn as_f32(&self) -> f32 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f32 / self.den as f32
        }
    }

    /// Scale `value` by this rational: `value * num / den`, truncating.
    pub fn scale(&self, value: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        let scaled = value as i128 * self.num as i128 / self.den as i128;
        scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Convert ticks in this time base to whole milliseconds, truncating.
    pub fn ticks_to_millis(&self, ticks: i64) -> i64 {
        self.scale(ticks.saturating_mul(1000))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::MILLIS
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Presentation timestamps (session millisecond timescale)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Pts {
    #[default]
    Invalid,
    EndOfStream,
    Millis(i32),
}

impl Pts {
    /// Build from milliseconds, clamping into the range that does not collide
    /// with the two sentinel encodings.
    pub fn from_millis(ms: i64) -> Self {
        let clamped = ms.clamp(INVALID_PTS as i64 + 1, END_OF_STREAM_PTS as i64 - 1);
        Pts::Millis(clamped as i32)
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Pts::Invalid => INVALID_PTS,
            Pts::EndOfStream => END_OF_STREAM_PTS,
            Pts::Millis(ms) => ms,
        }
    }

    pub fn from_wire(raw: i32) -> Self {
        match raw {
            INVALID_PTS => Pts::Invalid,
            END_OF_STREAM_PTS => Pts::EndOfStream,
            ms => Pts::Millis(ms),
        }
    }

    pub fn millis(self) -> Option<i32> {
        match self {
            Pts::Millis(ms) => Some(ms),
            _ => None,
        }
    }

    pub fn is_valid(self) -> bool {
        matches!(self, Pts::Millis(_))
    }
}

impl fmt::Display for Pts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pts::Invalid => write!(f, "n/a"),
            Pts::EndOfStream => write!(f, "EOS"),
            Pts::Millis(ms) => write!(f, "{} ms", ms),
        }
    }
}

// ============================================================================
// Stream ids
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamId {
    /// Category is muted / not selected.
    None,
    /// Let the catalog pick.
    #[default]
    Auto,
    /// A concrete container stream index.
    Index(u32),
}

impl StreamId {
    /// Indices past `i32::MAX` saturate so they never encode as a sentinel.
    pub fn to_wire(self) -> i32 {
        match self {
            StreamId::None => STREAM_ID_NONE,
            StreamId::Auto => STREAM_ID_AUTO,
            StreamId::Index(i) => i32::try_from(i).unwrap_or(i32::MAX),
        }
    }

    /// Any negative value other than the two sentinels is treated as `None`.
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            STREAM_ID_AUTO => StreamId::Auto,
            i if i >= 0 => StreamId::Index(i as u32),
            _ => StreamId::None,
        }
    }

    pub fn index(self) -> Option<u32> {
        match self {
            StreamId::Index(i) => Some(i),
            _ => None,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::None => write!(f, "none"),
            StreamId::Auto => write!(f, "auto"),
            StreamId::Index(i) => write!(f, "{}", i),
        }
    }
}
