//! # Capability Probe
//!
//! Runs once per session: records the codec library versions, which GL entry
//! points were resolved and whether NPOT textures are available. Nothing here
//! fails; a missing capability switches the dependent feature off.

use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};
use std::ffi::c_uint;
use std::fmt;

use crate::gl::{GlBinding, GlEntryPoints};

// ============================================================================
// Library versions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl LibraryVersion {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self { major, minor, micro }
    }

    /// Decode the packed `major << 16 | minor << 8 | micro` form.
    pub fn from_packed(packed: u32) -> Self {
        Self {
            major: (packed >> 16) & 0xFF,
            minor: (packed >> 8) & 0xFF,
            micro: packed & 0xFF,
        }
    }

    pub fn packed(&self) -> u32 {
        ((self.major & 0xFF) << 16) | ((self.minor & 0xFF) << 8) | (self.micro & 0xFF)
    }
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Versions of the codec library components, `None` when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryVersions {
    pub codec: Option<LibraryVersion>,
    pub format: Option<LibraryVersion>,
    pub util: Option<LibraryVersion>,
    pub device: Option<LibraryVersion>,
    pub resample: Option<LibraryVersion>,
    pub scale: Option<LibraryVersion>,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Availability of an optional conversion library, fixed at probe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available(LibraryVersion),
    Unavailable,
}

impl Availability {
    fn from_version(version: Option<LibraryVersion>) -> Self {
        match version {
            Some(v) if v.packed() != 0 => Availability::Available(v),
            _ => Availability::Unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub versions: LibraryVersions,
    pub resampler: Availability,
    pub scaler: Availability,
    pub gl_entry_points: GlEntryPoints,
    /// NPOT textures reported by the binding. Without a binding this is false,
    /// so uploads round to powers of two.
    pub has_npot: bool,
}

impl Capabilities {
    pub fn probe(versions: LibraryVersions, gl: Option<&dyn GlBinding>) -> Self {
        let (gl_entry_points, has_npot) = match gl {
            Some(binding) => (binding.entry_points(), binding.has_npot()),
            None => (GlEntryPoints::default(), false),
        };

        let caps = Self {
            versions,
            resampler: Availability::from_version(versions.resample),
            scaler: Availability::from_version(versions.scale),
            gl_entry_points,
            has_npot,
        };

        tracing::info!(
            "Capabilities: codec {:?}, format {:?}, resample {:?}, scale {:?}, npot {}",
            versions.codec.map(|v| v.to_string()),
            versions.format.map(|v| v.to_string()),
            caps.resampler,
            caps.scaler,
            has_npot
        );
        let missing = gl_entry_points.missing();
        if gl.is_some() && !missing.is_empty() {
            tracing::warn!("GL entry points missing: {:?}", missing);
        }

        caps
    }

    pub fn can_resample(&self) -> bool {
        self.resampler.is_available()
    }

    pub fn can_scale(&self) -> bool {
        self.scaler.is_available()
    }

    pub fn can_upload(&self) -> bool {
        self.gl_entry_points.can_upload()
    }
}

// ============================================================================
// Shared library probe
// ============================================================================

struct LibrarySpec {
    stem: &'static str,
    symbol: &'static [u8],
    majors: &'static [u32],
}

const PROBED_LIBRARIES: [LibrarySpec; 6] = [
    LibrarySpec { stem: "avcodec", symbol: b"avcodec_version\0", majors: &[61, 60, 59, 58] },
    LibrarySpec { stem: "avformat", symbol: b"avformat_version\0", majors: &[61, 60, 59, 58] },
    LibrarySpec { stem: "avutil", symbol: b"avutil_version\0", majors: &[59, 58, 57, 56] },
    LibrarySpec { stem: "avdevice", symbol: b"avdevice_version\0", majors: &[61, 60, 59, 58] },
    LibrarySpec { stem: "swresample", symbol: b"swresample_version\0", majors: &[5, 4, 3] },
    LibrarySpec { stem: "swscale", symbol: b"swscale_version\0", majors: &[8, 7, 6, 5] },
];

fn candidate_names(spec: &LibrarySpec) -> Vec<String> {
    let mut names = Vec::new();
    for major in spec.majors {
        if cfg!(target_os = "windows") {
            names.push(format!("{}-{}.dll", spec.stem, major));
        } else if cfg!(target_os = "macos") {
            names.push(format!("lib{}.{}.dylib", spec.stem, major));
        } else {
            names.push(format!("lib{}.so.{}", spec.stem, major));
        }
    }
    if !cfg!(target_os = "windows") && !cfg!(target_os = "macos") {
        names.push(format!("lib{}.so", spec.stem));
    }
    names
}

fn probe_library(spec: &LibrarySpec) -> Option<LibraryVersion> {
    for name in candidate_names(spec) {
        // SAFETY: FFmpeg libraries have no load-time side effects beyond
        // their own static initialisation.
        let library = match unsafe { Library::new(&name) } {
            Ok(lib) => lib,
            Err(_) => continue,
        };

        // SAFETY: the `*_version` functions take no arguments and return the
        // packed version as an unsigned int.
        let packed = unsafe {
            let func: Symbol<unsafe extern "C" fn() -> c_uint> = match library.get(spec.symbol) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!("{} loaded but version symbol missing: {}", name, e);
                    continue;
                }
            };
            func()
        };

        let version = LibraryVersion::from_packed(packed as u32);
        tracing::debug!("{} loaded, version {}", name, version);
        return Some(version);
    }
    None
}

/// Load the FFmpeg shared libraries present on this system and read their
/// versions. Libraries are unloaded again once the version is read.
pub fn probe_shared_libraries() -> LibraryVersions {
    let [codec, format, util, device, resample, scale] = &PROBED_LIBRARIES;
    LibraryVersions {
        codec: probe_library(codec),
        format: probe_library(format),
        util: probe_library(util),
        device: probe_library(device),
        resample: probe_library(resample),
        scale: probe_library(scale),
    }
}
