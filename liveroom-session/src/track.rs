//! Media tracks, local media handles and simulcast settings
//!
//! Remote tracks are plain values delivered by the transport. Local media is a
//! shared handle supplied by the device layer; this crate only flips its mute
//! flags and hands it to the transport through the policy.

use crate::types::TrackId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Audio,
    Video,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// A track published by a remote participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub stream_type: StreamType,
    #[serde(default)]
    pub muted: bool,
    /// False once the underlying media has ended
    #[serde(default = "default_live")]
    pub live: bool,
}

const fn default_live() -> bool {
    true
}

impl Track {
    pub fn new(id: impl Into<TrackId>, stream_type: StreamType) -> Self {
        Self {
            id: id.into(),
            stream_type,
            muted: false,
            live: true,
        }
    }

    #[must_use]
    pub fn audio(id: impl Into<TrackId>) -> Self {
        Self::new(id, StreamType::Audio)
    }

    #[must_use]
    pub fn video(id: impl Into<TrackId>) -> Self {
        Self::new(id, StreamType::Video)
    }

    #[must_use]
    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    #[must_use]
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }
}

/// One captured track inside a [`LocalMedia`] handle
#[derive(Debug)]
pub struct LocalTrack {
    id: TrackId,
    stream_type: StreamType,
    muted: AtomicBool,
}

impl LocalTrack {
    pub fn new(id: impl Into<TrackId>, stream_type: StreamType) -> Self {
        Self {
            id: id.into(),
            stream_type,
            muted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> &TrackId {
        &self.id
    }

    #[must_use]
    pub const fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }
}

/// Local capture handle (microphone, camera or screen) owned by the device layer.
///
/// Cloning is cheap and clones share mute state. Equality is identity: two
/// handles are equal only if they point at the same capture.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    inner: Arc<LocalMediaInner>,
}

#[derive(Debug)]
struct LocalMediaInner {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            inner: Arc::new(LocalMediaInner {
                id: id.into(),
                tracks,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.inner.tracks
    }

    pub fn tracks_of(&self, stream_type: StreamType) -> impl Iterator<Item = &LocalTrack> {
        self.inner
            .tracks
            .iter()
            .filter(move |track| track.stream_type == stream_type)
    }

    #[must_use]
    pub fn has(&self, stream_type: StreamType) -> bool {
        self.tracks_of(stream_type).next().is_some()
    }
}

impl PartialEq for LocalMedia {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for LocalMedia {}

/// Simulcast quality layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLayer {
    High,
    Medium,
    Low,
}

impl QualityLayer {
    /// Restriction identifier announced for this layer
    #[must_use]
    pub const fn rid(&self) -> &'static str {
        match self {
            Self::High => "h",
            Self::Medium => "m",
            Self::Low => "l",
        }
    }

    /// Default bitrate ceiling for this layer (kbps)
    #[must_use]
    pub const fn expected_bitrate(&self) -> u32 {
        match self {
            Self::High => 2500,
            Self::Medium => 1200,
            Self::Low => 500,
        }
    }

    /// Default downscale factor relative to the captured resolution
    #[must_use]
    pub const fn scale_down_by(&self) -> u32 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 4,
        }
    }
}

/// Encoding parameters for one simulcast layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulcastLayer {
    pub quality: QualityLayer,
    pub max_bitrate_kbps: u32,
    pub scale_down_by: u32,
    #[serde(default)]
    pub max_framerate: Option<u32>,
}

impl From<QualityLayer> for SimulcastLayer {
    fn from(quality: QualityLayer) -> Self {
        Self {
            quality,
            max_bitrate_kbps: quality.expected_bitrate(),
            scale_down_by: quality.scale_down_by(),
            max_framerate: None,
        }
    }
}

/// Simulcast configuration applied to published video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulcastConfig {
    pub layers: Vec<SimulcastLayer>,
}

impl SimulcastConfig {
    /// Build a config from quality layers using their default encodings
    pub fn from_layers(layers: impl IntoIterator<Item = QualityLayer>) -> Self {
        Self {
            layers: layers.into_iter().map(SimulcastLayer::from).collect(),
        }
    }
}

impl Default for SimulcastConfig {
    fn default() -> Self {
        Self::from_layers([QualityLayer::High, QualityLayer::Medium, QualityLayer::Low])
    }
}
