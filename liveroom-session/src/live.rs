//! Consumer-facing live session
//!
//! [`LiveSession`] is what the application drives and observes. It gets (or
//! creates) the [`Session`] for its identity from the registry, listens to
//! every transport event, and routes them:
//! - participant events into a group-scoped [`ParticipantStore`]
//! - track events into a [`StreamReconciler`]
//! - connection, publish and error events into a [`SessionStatus`] published
//!   on a watch channel
//!
//! Several live sessions for different groups may share one registry; each
//! only ever touches its own store and reconciler.

use crate::error::{Error, Result};
use crate::participant::Participant;
use crate::policy::{Policy, SubscribeMode};
use crate::reconciler::{MediaContainer, StreamMeta, StreamReconciler};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::store::ParticipantStore;
use crate::track::{LocalMedia, LocalTrack, SimulcastConfig, StreamType};
use crate::transport::{
    ConnectionState, ErrorCategory, PublishState, Strategy, TransportError, TransportEvent,
};
use crate::types::{ListenerId, ParticipantGroup, ParticipantId};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Observable state of a live session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub connect_state: ConnectionState,
    /// Last join error; cleared on the next connected/disconnected transition
    pub connect_error: Option<TransportError>,
    pub publish_state: PublishState,
    /// Last publish error; cleared on the next publish state transition
    pub publish_error: Option<TransportError>,
    pub republishing: bool,
}

impl SessionStatus {
    /// Connected but not publishing
    #[must_use]
    pub fn subscribe_only(&self) -> bool {
        self.connect_state == ConnectionState::Connected
            && self.publish_state != PublishState::Published
    }
}

/// Options applied when a live session is opened
#[derive(Debug, Clone, Default)]
pub struct LiveSessionOptions {
    pub identity: ParticipantId,
    pub group: ParticipantGroup,
    pub simulcast: Option<SimulcastConfig>,
    pub audio_only: bool,
}

impl LiveSessionOptions {
    pub fn new(identity: impl Into<ParticipantId>, group: impl Into<ParticipantGroup>) -> Self {
        Self {
            identity: identity.into(),
            group: group.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_simulcast(mut self, simulcast: SimulcastConfig) -> Self {
        self.simulcast = Some(simulcast);
        self
    }

    #[must_use]
    pub fn audio_only(mut self, audio_only: bool) -> Self {
        self.audio_only = audio_only;
        self
    }
}

/// Participant query; unset fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantFilter {
    pub is_publishing: Option<bool>,
    pub can_subscribe_to: Option<bool>,
    pub is_local: Option<bool>,
}

impl ParticipantFilter {
    #[must_use]
    pub const fn publishing(mut self, publishing: bool) -> Self {
        self.is_publishing = Some(publishing);
        self
    }

    #[must_use]
    pub const fn subscribable(mut self, subscribable: bool) -> Self {
        self.can_subscribe_to = Some(subscribable);
        self
    }

    #[must_use]
    pub const fn local(mut self, local: bool) -> Self {
        self.is_local = Some(local);
        self
    }

    fn matches(&self, participant: &Participant) -> bool {
        self.is_publishing.map_or(true, |v| participant.publishing == v)
            && self
                .can_subscribe_to
                .map_or(true, |v| participant.capabilities.subscribable == v)
            && self.is_local.map_or(true, |v| participant.is_local == v)
    }
}

/// A participant together with its current media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantView {
    pub participant: Participant,
    pub container: Option<MediaContainer>,
    pub meta: Option<Arc<StreamMeta>>,
}

impl ParticipantView {
    /// Whether the participant is currently streaming anything
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.container.is_some()
    }
}

struct Shared {
    store: RwLock<ParticipantStore>,
    reconciler: RwLock<StreamReconciler>,
    status: watch::Sender<SessionStatus>,
}

impl Shared {
    fn handle_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged(state) => {
                self.status.send_if_modified(|status| {
                    let before = status.clone();
                    status.connect_state = *state;
                    if *state != ConnectionState::Connecting {
                        status.connect_error = None;
                    }
                    *status != before
                });
            }
            TransportEvent::Error(err) => match err.category {
                ErrorCategory::Join => {
                    warn!(error = %err, "Join error");
                    self.status.send_modify(|status| status.connect_error = Some(err.clone()));
                }
                ErrorCategory::Publish => {
                    warn!(error = %err, "Publish error");
                    self.status.send_modify(|status| status.publish_error = Some(err.clone()));
                }
                ErrorCategory::Other(_) => {
                    warn!(error = %err, "Unhandled transport error");
                }
            },
            TransportEvent::ParticipantJoined(participant) => {
                self.store.write().upsert(participant);
            }
            TransportEvent::ParticipantLeft(participant) => {
                self.store.write().remove(participant);
                self.reconciler.write().participant_left(participant);
            }
            TransportEvent::ParticipantPublishStateChanged { participant, state } => {
                self.store.write().upsert(participant);
                if participant.is_local {
                    self.status.send_if_modified(|status| {
                        let before = status.clone();
                        status.publish_state = *state;
                        status.publish_error = None;
                        *status != before
                    });
                }
            }
            TransportEvent::ParticipantStreamsAdded {
                participant,
                tracks,
            } => {
                self.store.write().upsert(participant);
                if !participant.is_local {
                    self.reconciler.write().tracks_added(participant, tracks);
                }
            }
            TransportEvent::ParticipantStreamsRemoved {
                participant,
                tracks,
            } => {
                if !participant.is_local {
                    self.reconciler.write().tracks_removed(participant, tracks);
                }
            }
            TransportEvent::StreamMuteChanged { participant, track } => {
                if !participant.is_local {
                    self.reconciler.write().track_updated(participant, track);
                }
            }
            TransportEvent::Left { .. } => {
                self.store.write().clear();
                self.reconciler.write().clear();
                self.status.send_if_modified(|status| {
                    let before = status.clone();
                    status.connect_state = ConnectionState::Disconnected;
                    status.publish_state = PublishState::NotPublished;
                    status.republishing = false;
                    *status != before
                });
            }
            TransportEvent::ShouldUnpublish => {}
        }
    }
}

pub struct LiveSession {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    shared: Arc<Shared>,
    listener: ListenerId,
}

impl LiveSession {
    /// Open a live session on the registry's session for `options.identity`
    pub async fn open(registry: &Arc<SessionRegistry>, options: LiveSessionOptions) -> Result<Self> {
        let session = registry.get_or_create(&options.identity, &options.group);

        let initial = SessionStatus {
            connect_state: if session.is_connected() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
            publish_state: if registry.is_publishing(&options.identity) {
                PublishState::Published
            } else {
                PublishState::NotPublished
            },
            ..SessionStatus::default()
        };
        let (status, _) = watch::channel(initial);

        let shared = Arc::new(Shared {
            store: RwLock::new(ParticipantStore::new(session.group().clone())),
            reconciler: RwLock::new(StreamReconciler::new(session.group().clone())),
            status,
        });

        let listener = {
            let shared = Arc::clone(&shared);
            session.on(Arc::new(move |event: &TransportEvent| {
                shared.handle_event(event);
            }))
        };

        let live = Self {
            registry: Arc::clone(registry),
            session,
            shared,
            listener,
        };

        live.policy().set_subscribe_mode(if options.audio_only {
            SubscribeMode::AudioOnly
        } else {
            SubscribeMode::AudioVideo
        });
        if let Some(simulcast) = options.simulcast {
            live.set_simulcast_config(Some(simulcast)).await?;
        }

        info!(
            participant_id = %live.session.local_participant_id(),
            group = %live.session.group(),
            audio_only = options.audio_only,
            "Live session opened"
        );
        Ok(live)
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<Policy> {
        self.session.policy()
    }

    #[must_use]
    pub fn group(&self) -> &ParticipantGroup {
        self.session.group()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    #[must_use]
    pub fn connect_state(&self) -> ConnectionState {
        self.shared.status.borrow().connect_state
    }

    #[must_use]
    pub fn connect_error(&self) -> Option<TransportError> {
        self.shared.status.borrow().connect_error.clone()
    }

    #[must_use]
    pub fn publish_state(&self) -> PublishState {
        self.shared.status.borrow().publish_state
    }

    #[must_use]
    pub fn publish_error(&self) -> Option<TransportError> {
        self.shared.status.borrow().publish_error.clone()
    }

    #[must_use]
    pub fn republishing(&self) -> bool {
        self.shared.status.borrow().republishing
    }

    #[must_use]
    pub fn subscribe_only(&self) -> bool {
        self.shared.status.borrow().subscribe_only()
    }

    /// Participants matching `filter`, local participant last
    #[must_use]
    pub fn participants(&self, filter: ParticipantFilter) -> Vec<ParticipantView> {
        let store = self.shared.store.read();
        let reconciler = self.shared.reconciler.read();
        store
            .all()
            .filter(|participant| filter.matches(participant))
            .map(|participant| ParticipantView {
                participant: participant.clone(),
                container: reconciler.container(&participant.id).cloned(),
                meta: reconciler.meta(&participant.id),
            })
            .collect()
    }

    /// Join the session; a join failure is also surfaced as `connect_error`
    pub async fn join(&self, media: Option<LocalMedia>) -> Result<()> {
        let result = self.session.join(media).await;
        if let Err(Error::Join(err)) = &result {
            self.shared.status.send_if_modified(|status| {
                if status.connect_error.as_ref() == Some(err) {
                    return false;
                }
                status.connect_error = Some(err.clone());
                true
            });
        }
        result
    }

    pub async fn leave(&self) -> Result<()> {
        self.session.leave().await
    }

    /// Start publishing or swap the published media.
    ///
    /// With capacity enforcement on, refuses when the registry is full and the
    /// local participant is not already one of the publishers.
    pub fn publish(&self, media: Option<LocalMedia>) -> Result<()> {
        if self.registry.config().enforce_publisher_capacity
            && !self
                .registry
                .is_publishing(self.session.local_participant_id())
            && !self.registry.has_capacity()
        {
            warn!(
                participant_id = %self.session.local_participant_id(),
                publishers = self.registry.publisher_count(),
                "Publisher capacity reached"
            );
            return Err(Error::CapacityReached);
        }
        self.policy().publish(media);
        Ok(())
    }

    pub fn unpublish(&self) {
        self.policy().unpublish();
    }

    pub fn set_subscribe_mode(&self, mode: SubscribeMode) {
        self.policy().set_subscribe_mode(mode);
    }

    pub fn resubscribe(&self) {
        self.policy().resubscribe();
    }

    /// Apply a simulcast config; republishes when publishing
    pub async fn set_simulcast_config(&self, config: Option<SimulcastConfig>) -> Result<()> {
        let republishing =
            self.policy().should_publish() && self.policy().simulcast_config() != config;
        if republishing {
            self.shared
                .status
                .send_modify(|status| status.republishing = true);
        }

        let result = self.policy().set_simulcast_config(config).await;

        if republishing {
            self.shared
                .status
                .send_modify(|status| status.republishing = false);
        }
        result
    }

    /// Mute, unmute or toggle (`muted = None`) the local tracks of one type.
    ///
    /// Returns the new muted state.
    pub fn toggle_local_muted(&self, stream_type: StreamType, muted: Option<bool>) -> Result<bool> {
        let media = self
            .policy()
            .media_to_publish()
            .ok_or(Error::NoLocalTrack(stream_type))?;
        let current = media
            .tracks_of(stream_type)
            .next()
            .map(LocalTrack::is_muted)
            .ok_or(Error::NoLocalTrack(stream_type))?;

        let muted = muted.unwrap_or(!current);
        for track in media.tracks_of(stream_type) {
            track.set_muted(muted);
        }
        debug!(stream_type = %stream_type, muted, "Local mute changed");
        Ok(muted)
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.session.off(self.listener);
        debug!(
            participant_id = %self.session.local_participant_id(),
            "Live session closed"
        );
    }
}
