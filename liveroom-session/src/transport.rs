//! Boundary with the real-time transport engine
//!
//! The transport is a capability this crate drives but does not implement:
//! it connects, negotiates media and asks a [`Strategy`] what to publish and
//! subscribe to on every admission pass. Everything it reports comes back as a
//! [`TransportEvent`], dispatched synchronously to listeners in registration
//! order.

use crate::participant::Participant;
use crate::policy::SubscribeMode;
use crate::track::{LocalMedia, SimulcastConfig, Track};
use crate::types::{ListenerId, ParticipantGroup, ParticipantId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

/// Publish state of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    #[default]
    NotPublished,
    Published,
}

/// Broad class of a transport failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Join,
    Publish,
    Other(String),
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join => f.write_str("join"),
            Self::Publish => f.write_str("publish"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Error reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category} error: {message}")]
pub struct TransportError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TransportError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn join(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Join, message)
    }

    pub fn publish(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Publish, message)
    }
}

/// Everything a transport can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged(ConnectionState),
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    ParticipantStreamsAdded {
        participant: Participant,
        tracks: Vec<Track>,
    },
    ParticipantStreamsRemoved {
        participant: Participant,
        tracks: Vec<Track>,
    },
    ParticipantPublishStateChanged {
        participant: Participant,
        state: PublishState,
    },
    StreamMuteChanged {
        participant: Participant,
        track: Track,
    },
    Error(TransportError),
    /// The transport has left the session
    Left { reason: String },
    /// The remote side revoked the local participant's right to publish
    ShouldUnpublish,
}

impl TransportEvent {
    /// Short name used in log fields
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStateChanged(_) => "connection_state_changed",
            Self::ParticipantJoined(_) => "participant_joined",
            Self::ParticipantLeft(_) => "participant_left",
            Self::ParticipantStreamsAdded { .. } => "participant_streams_added",
            Self::ParticipantStreamsRemoved { .. } => "participant_streams_removed",
            Self::ParticipantPublishStateChanged { .. } => "participant_publish_state_changed",
            Self::StreamMuteChanged { .. } => "stream_mute_changed",
            Self::Error(_) => "error",
            Self::Left { .. } => "left",
            Self::ShouldUnpublish => "should_unpublish",
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Decisions the transport queries on every admission pass
pub trait Strategy: Send + Sync {
    fn should_publish(&self) -> bool;

    fn media_to_publish(&self) -> Option<LocalMedia>;

    fn simulcast(&self) -> Option<SimulcastConfig>;

    fn subscribe_mode_for(&self, participant: &Participant) -> SubscribeMode;
}

/// One real-time connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn join(&self) -> Result<(), TransportError>;

    async fn leave(&self) -> Result<(), TransportError>;

    /// Ask the transport to re-evaluate the current strategy on its own schedule
    fn refresh_strategy(&self);

    fn replace_strategy(&self, strategy: Arc<dyn Strategy>);

    fn on(&self, handler: EventHandler) -> ListenerId;

    fn off(&self, id: ListenerId);

    fn remove_all_listeners(&self);
}

/// Builds a transport for a local identity
pub trait TransportFactory: Send + Sync {
    fn create(&self, identity: &ParticipantId, group: &ParticipantGroup) -> Arc<dyn Transport>;
}

/// Ordered listener table that transport implementations can embed
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, EventHandler)>>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, handler));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver an event to every listener registered at the time of the call.
    ///
    /// The table is snapshotted first, so handlers may add or remove listeners.
    pub fn emit(&self, event: &TransportEvent) {
        let snapshot: Vec<EventHandler> = self
            .listeners
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            handler(event);
        }
    }
}
