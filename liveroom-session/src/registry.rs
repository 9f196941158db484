//! Session Registry - process-wide table of sessions
//!
//! This module provides:
//! - One session per local identity, created lazily
//! - A registry-wide set of publishing participants for capacity queries
//! - Bulk leave/teardown
//! - A shutdown token that drives every session's teardown hook
//!
//! The registry is an explicit context object: callers share an
//! `Arc<SessionRegistry>` instead of reaching for a global.

use crate::config::SessionConfig;
use crate::participant::Participant;
use crate::policy::Policy;
use crate::session::Session;
use crate::transport::{TransportEvent, TransportFactory};
use crate::types::{ParticipantGroup, ParticipantId};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SessionRegistry {
    config: Arc<SessionConfig>,
    factory: Arc<dyn TransportFactory>,
    sessions: DashMap<ParticipantId, Arc<Session>>,
    /// Participants currently publishing, across all sessions
    publishers: Arc<DashSet<ParticipantId>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, factory: Arc<dyn TransportFactory>) -> Arc<Self> {
        info!(
            publisher_capacity = config.publisher_capacity,
            republish_delay_ms = config.republish_delay_ms,
            enforce_publisher_capacity = config.enforce_publisher_capacity,
            "Session registry initialized"
        );

        Arc::new(Self {
            config: Arc::new(config),
            factory,
            sessions: DashMap::new(),
            publishers: Arc::new(DashSet::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Return the session for `identity`, creating it on first access.
    ///
    /// `group` only applies when the session is created.
    pub fn get_or_create(&self, identity: &ParticipantId, group: &ParticipantGroup) -> Arc<Session> {
        let session = Arc::clone(
            self.sessions
                .entry(identity.clone())
                .or_insert_with(|| self.create_session(identity, group))
                .value(),
        );

        if session.group() != group {
            debug!(
                participant_id = %identity,
                existing_group = %session.group(),
                requested_group = %group,
                "Session already exists with another group"
            );
        }
        session
    }

    fn create_session(&self, identity: &ParticipantId, group: &ParticipantGroup) -> Arc<Session> {
        let transport = self.factory.create(identity, group);
        let policy = Arc::new(Policy::new(group.clone(), self.config.republish_delay()));
        let session = Session::new(
            identity.clone(),
            transport,
            policy,
            self.shutdown.child_token(),
        );
        self.track_publishers(&session);
        session
    }

    fn track_publishers(&self, session: &Session) {
        let publishers = Arc::clone(&self.publishers);
        session.on(Arc::new(move |event: &TransportEvent| {
            if let TransportEvent::ParticipantJoined(participant) = event {
                record_publishing(&publishers, participant);
            }
        }));

        let publishers = Arc::clone(&self.publishers);
        session.on(Arc::new(move |event: &TransportEvent| {
            if let TransportEvent::ParticipantLeft(participant) = event {
                publishers.remove(&participant.id);
            }
        }));

        let publishers = Arc::clone(&self.publishers);
        session.on(Arc::new(move |event: &TransportEvent| {
            if let TransportEvent::ParticipantPublishStateChanged { participant, .. } = event {
                record_publishing(&publishers, participant);
            }
        }));
    }

    #[must_use]
    pub fn get(&self, identity: &ParticipantId) -> Option<Arc<Session>> {
        self.sessions.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    /// Advisory: whether another publisher fits under the configured capacity
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.publishers.len() < self.config.publisher_capacity
    }

    #[must_use]
    pub fn is_publishing(&self, participant: &ParticipantId) -> bool {
        self.publishers.contains(participant)
    }

    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Leave, drop all listeners and forget the session.
    ///
    /// Once the last session is gone the publisher set is cleared.
    pub async fn destroy(&self, session: &Arc<Session>) {
        if let Err(e) = session.leave().await {
            warn!(
                participant_id = %session.local_participant_id(),
                error = %e,
                "Leave failed during destroy"
            );
        }
        session.remove_all_listeners();
        session.policy().unbind();

        // only remove the entry if it is still this session
        self.sessions.remove_if(session.local_participant_id(), |_, current| {
            Arc::ptr_eq(current, session)
        });

        if self.sessions.is_empty() {
            self.publishers.clear();
        }

        info!(
            participant_id = %session.local_participant_id(),
            remaining_sessions = self.sessions.len(),
            "Destroyed session"
        );
    }

    pub async fn destroy_all(&self) {
        for session in self.snapshot() {
            self.destroy(&session).await;
        }
    }

    pub async fn leave_all(&self) {
        for session in self.snapshot() {
            if let Err(e) = session.leave().await {
                warn!(
                    participant_id = %session.local_participant_id(),
                    error = %e,
                    "Leave failed"
                );
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Fire every session's teardown hook
    pub fn shutdown(&self) {
        info!(sessions = self.sessions.len(), "Session registry shutting down");
        self.shutdown.cancel();
    }

    /// Shut down when the process receives Ctrl-C
    pub fn teardown_on_ctrl_c(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            if let Some(registry) = weak.upgrade() {
                registry.shutdown();
            }
        });
    }
}

fn record_publishing(publishers: &DashSet<ParticipantId>, participant: &Participant) {
    if participant.publishing {
        publishers.insert(participant.id.clone());
    } else {
        publishers.remove(&participant.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::LoopbackFactory;
    use crate::transport::PublishState;

    fn registry() -> (Arc<SessionRegistry>, Arc<LoopbackFactory>) {
        let factory = LoopbackFactory::new();
        let registry = SessionRegistry::new(
            SessionConfig::default(),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
        );
        (registry, factory)
    }

    fn publishing(id: &str) -> TransportEvent {
        TransportEvent::ParticipantPublishStateChanged {
            participant: Participant::new(id).with_publishing(true),
            state: PublishState::Published,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let (registry, factory) = registry();
        let me = ParticipantId::from("me");
        let group = ParticipantGroup::from("stage");

        let first = registry.get_or_create(&me, &group);
        let second = registry.get_or_create(&me, &group);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_then_create_builds_new_session() {
        let (registry, factory) = registry();
        let me = ParticipantId::from("me");
        let group = ParticipantGroup::default();

        let first = registry.get_or_create(&me, &group);
        registry.destroy(&first).await;
        assert!(registry.is_empty());
        assert_eq!(factory.transport_for("me").unwrap().listener_count(), 0);

        let second = registry.get_or_create(&me, &group);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.instance_id(), second.instance_id());
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test]
    async fn test_publisher_set_follows_events() {
        let (registry, factory) = registry();
        registry.get_or_create(&ParticipantId::from("me"), &ParticipantGroup::default());
        let transport = factory.transport_for("me").unwrap();

        transport.emit(TransportEvent::ParticipantJoined(
            Participant::new("a").with_publishing(true),
        ));
        transport.emit(publishing("b"));
        transport.emit(TransportEvent::ParticipantJoined(Participant::new("c")));
        assert_eq!(registry.publisher_count(), 2);

        transport.emit(TransportEvent::ParticipantPublishStateChanged {
            participant: Participant::new("b"),
            state: PublishState::NotPublished,
        });
        transport.emit(TransportEvent::ParticipantLeft(
            Participant::new("a").with_publishing(true),
        ));
        assert_eq!(registry.publisher_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_resets_after_destroy_all() {
        let (registry, factory) = registry();
        registry.get_or_create(&ParticipantId::from("me"), &ParticipantGroup::from("stage"));
        registry.get_or_create(&ParticipantId::from("me-2"), &ParticipantGroup::from("audience"));

        let stage = factory.transport_for("me").unwrap();
        let audience = factory.transport_for("me-2").unwrap();
        for i in 0..12 {
            let transport = if i % 2 == 0 { &stage } else { &audience };
            transport.emit(publishing(&format!("p{i}")));
        }
        assert!(!registry.has_capacity());

        registry.destroy_all().await;
        assert!(registry.is_empty());
        assert!(registry.has_capacity());
        assert_eq!(registry.publisher_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_keeps_publishers_while_sessions_remain() {
        let (registry, factory) = registry();
        let stage = registry.get_or_create(&ParticipantId::from("me"), &ParticipantGroup::from("stage"));
        registry.get_or_create(&ParticipantId::from("me-2"), &ParticipantGroup::from("audience"));

        factory.transport_for("me-2").unwrap().emit(publishing("p1"));
        registry.destroy(&stage).await;
        assert_eq!(registry.publisher_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_all_keeps_sessions() {
        let (registry, factory) = registry();
        for id in ["a", "b"] {
            registry
                .get_or_create(&ParticipantId::from(id), &ParticipantGroup::default())
                .join(None)
                .await
                .unwrap();
        }

        registry.leave_all().await;
        assert_eq!(registry.len(), 2);
        assert_eq!(factory.transport_for("a").unwrap().leave_count(), 1);
        assert_eq!(factory.transport_for("b").unwrap().leave_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_joined_sessions() {
        let (registry, factory) = registry();
        let session = registry.get_or_create(&ParticipantId::from("me"), &ParticipantGroup::default());
        session.join(None).await.unwrap();

        registry.shutdown();
        let transport = factory.transport_for("me").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while transport.leave_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(session.has_left());
    }
}
