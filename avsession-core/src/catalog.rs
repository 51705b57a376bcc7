//! # Stream Catalog
//!
//! Classifies the container's elementary streams into video, audio and
//! subtitle sets and tracks the active stream of each.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::StreamDescriptor;
use crate::error::{Result, SessionError};
use crate::timestamp::StreamId;

/// Streams kept per category. Further streams of that type are ignored.
pub const MAX_STREAM_COUNT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Video, MediaType::Audio, MediaType::Subtitle];
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
            MediaType::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// Codec of the active stream, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecIdentity {
    pub id: i32,
    pub name: String,
}

// ============================================================================
// StreamSet
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StreamSet {
    category: MediaType,
    streams: Vec<u32>,
    languages: Vec<Option<String>>,
    active: StreamId,
    /// Streams ignored because the set was full.
    dropped: usize,
    codec: Option<CodecIdentity>,
}

impl StreamSet {
    pub fn new(category: MediaType) -> Self {
        Self {
            category,
            streams: Vec::with_capacity(4),
            languages: Vec::with_capacity(4),
            active: StreamId::None,
            dropped: 0,
            codec: None,
        }
    }

    /// Returns false, and counts the stream as dropped, once the set is full.
    pub fn push(&mut self, index: u32, language: Option<String>) -> bool {
        if self.streams.len() >= MAX_STREAM_COUNT {
            self.dropped += 1;
            return false;
        }
        self.streams.push(index);
        self.languages.push(language);
        true
    }

    pub fn category(&self) -> MediaType {
        self.category
    }

    pub fn streams(&self) -> &[u32] {
        &self.streams
    }

    pub fn languages(&self) -> &[Option<String>] {
        &self.languages
    }

    pub fn contains(&self, index: u32) -> bool {
        self.streams.contains(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn active(&self) -> StreamId {
        self.active
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn codec(&self) -> Option<&CodecIdentity> {
        self.codec.as_ref()
    }

    fn pick_auto(&self, language: Option<&str>) -> Option<u32> {
        if let Some(lang) = language {
            let matched = self
                .streams
                .iter()
                .zip(&self.languages)
                .find(|(_, l)| l.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(lang)))
                .map(|(&s, _)| s);
            if matched.is_some() {
                return matched;
            }
            tracing::debug!("No {} stream in language {}, using first", self.category, lang);
        }
        self.streams.first().copied()
    }

    fn clear_active(&mut self) {
        self.active = StreamId::None;
        self.codec = None;
    }
}

// ============================================================================
// StreamCatalog
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StreamCatalog {
    video: StreamSet,
    audio: StreamSet,
    subtitle: StreamSet,
}

impl Default for StreamCatalog {
    fn default() -> Self {
        Self {
            video: StreamSet::new(MediaType::Video),
            audio: StreamSet::new(MediaType::Audio),
            subtitle: StreamSet::new(MediaType::Subtitle),
        }
    }
}

impl StreamCatalog {
    /// Classify every stream by media type, in container order.
    pub fn enumerate(streams: &[StreamDescriptor]) -> Self {
        let mut catalog = Self::default();
        for stream in streams {
            let Some(category) = stream.media_type() else {
                continue;
            };
            let set = catalog.set_mut(category);
            if !set.push(stream.index, stream.language.clone()) {
                tracing::warn!(
                    "Ignoring {} stream {}: more than {} streams",
                    category,
                    stream.index,
                    MAX_STREAM_COUNT
                );
            }
        }
        tracing::debug!(
            "Catalog: video {:?}, audio {:?}, subtitle {:?}",
            catalog.video.streams,
            catalog.audio.streams,
            catalog.subtitle.streams
        );
        catalog
    }

    pub fn set(&self, category: MediaType) -> &StreamSet {
        match category {
            MediaType::Video => &self.video,
            MediaType::Audio => &self.audio,
            MediaType::Subtitle => &self.subtitle,
        }
    }

    fn set_mut(&mut self, category: MediaType) -> &mut StreamSet {
        match category {
            MediaType::Video => &mut self.video,
            MediaType::Audio => &mut self.audio,
            MediaType::Subtitle => &mut self.subtitle,
        }
    }

    pub fn active(&self, category: MediaType) -> StreamId {
        self.set(category).active
    }

    /// Category the given container stream was classified into, if kept.
    pub fn category_of(&self, index: u32) -> Option<MediaType> {
        MediaType::ALL.into_iter().find(|&c| self.set(c).contains(index))
    }

    /// Resolve `requested` to an active stream of `category`.
    ///
    /// Returns the selected container index, or `None` when the category ends
    /// up muted. `StreamNotFound` is returned for a concrete id that is not in
    /// the set, and for an empty or muted category that is `required`.
    pub fn select_active(
        &mut self,
        category: MediaType,
        requested: StreamId,
        language: Option<&str>,
        required: bool,
        streams: &[StreamDescriptor],
    ) -> Result<Option<u32>> {
        let set = self.set_mut(category);
        let chosen = match requested {
            StreamId::None => None,
            StreamId::Auto => set.pick_auto(language),
            StreamId::Index(index) => {
                if !set.contains(index) {
                    set.clear_active();
                    return Err(SessionError::StreamNotFound {
                        category,
                        requested: requested.to_string(),
                    });
                }
                Some(index)
            }
        };

        let Some(index) = chosen else {
            set.clear_active();
            if required {
                return Err(SessionError::StreamNotFound {
                    category,
                    requested: requested.to_string(),
                });
            }
            tracing::debug!("No {} stream selected", category);
            return Ok(None);
        };

        set.active = StreamId::Index(index);
        set.codec = streams.iter().find(|s| s.index == index).map(|s| CodecIdentity {
            id: s.codec_id,
            name: s.codec_name.clone(),
        });
        tracing::info!(
            "Selected {} stream {} ({})",
            category,
            index,
            set.codec.as_ref().map_or("unknown", |c| c.name.as_str())
        );
        Ok(Some(index))
    }
}
