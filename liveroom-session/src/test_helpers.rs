//! Test helpers and fixtures for liveroom-session tests
//!
//! [`LoopbackTransport`] is an in-memory transport that records what the
//! session layer asks of it and lets tests play transport events back.

use crate::participant::Participant;
use crate::transport::{
    ConnectionState, EventHandler, EventHub, PublishState, Strategy, Transport, TransportError,
    TransportEvent, TransportFactory,
};
use crate::types::{ListenerId, ParticipantGroup, ParticipantId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Publish-state event for the local participant
pub fn local_publish_state(state: PublishState) -> TransportEvent {
    TransportEvent::ParticipantPublishStateChanged {
        participant: Participant::local("local").with_publishing(state == PublishState::Published),
        state,
    }
}

/// In-memory transport driven by the test
#[derive(Default)]
pub struct LoopbackTransport {
    hub: EventHub,
    strategy: RwLock<Option<Arc<dyn Strategy>>>,
    join_error: Mutex<Option<TransportError>>,
    /// Fail without reporting the failure as events
    quiet_failure: AtomicBool,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    refreshes: AtomicUsize,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an event as if the engine had reported it
    pub fn emit(&self, event: TransportEvent) {
        self.hub.emit(&event);
    }

    /// Make the next `join` fail with `error`, reported as events too
    pub fn fail_next_join(&self, error: TransportError) {
        self.quiet_failure.store(false, Ordering::SeqCst);
        *self.join_error.lock() = Some(error);
    }

    /// Make the next `join` return `error` without emitting anything
    pub fn fail_next_join_quietly(&self, error: TransportError) {
        self.quiet_failure.store(true, Ordering::SeqCst);
        *self.join_error.lock() = Some(error);
    }

    #[must_use]
    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.hub.len()
    }

    #[must_use]
    pub fn has_strategy(&self) -> bool {
        self.strategy.read().is_some()
    }

    /// Current strategy's publish decision, as an admission pass would see it
    #[must_use]
    pub fn strategy_should_publish(&self) -> Option<bool> {
        self.strategy.read().as_ref().map(|s| s.should_publish())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn join(&self) -> Result<(), TransportError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        let failure = self.join_error.lock().take();
        let quiet = self.quiet_failure.swap(false, Ordering::SeqCst);
        if let (Some(err), true) = (&failure, quiet) {
            return Err(err.clone());
        }

        self.hub.emit(&TransportEvent::ConnectionStateChanged(
            ConnectionState::Connecting,
        ));
        if let Some(err) = failure {
            self.hub.emit(&TransportEvent::ConnectionStateChanged(
                ConnectionState::Disconnected,
            ));
            self.hub.emit(&TransportEvent::Error(err.clone()));
            return Err(err);
        }

        self.hub.emit(&TransportEvent::ConnectionStateChanged(
            ConnectionState::Connected,
        ));
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        self.hub.emit(&TransportEvent::ConnectionStateChanged(
            ConnectionState::Disconnected,
        ));
        self.hub.emit(&TransportEvent::Left {
            reason: "leave".to_string(),
        });
        Ok(())
    }

    fn refresh_strategy(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn replace_strategy(&self, strategy: Arc<dyn Strategy>) {
        *self.strategy.write() = Some(strategy);
    }

    fn on(&self, handler: EventHandler) -> ListenerId {
        self.hub.on(handler)
    }

    fn off(&self, id: ListenerId) {
        self.hub.off(id);
    }

    fn remove_all_listeners(&self) {
        self.hub.clear();
    }
}

/// Factory handing out loopback transports and remembering them
#[derive(Default)]
pub struct LoopbackFactory {
    created: Mutex<Vec<(ParticipantId, Arc<LoopbackTransport>)>>,
}

impl LoopbackFactory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recent transport created for `identity`
    #[must_use]
    pub fn transport_for(&self, identity: &str) -> Option<Arc<LoopbackTransport>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id.as_str() == identity)
            .map(|(_, transport)| Arc::clone(transport))
    }

    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl TransportFactory for LoopbackFactory {
    fn create(&self, identity: &ParticipantId, _group: &ParticipantGroup) -> Arc<dyn Transport> {
        let transport = LoopbackTransport::new();
        self.created
            .lock()
            .push((identity.clone(), Arc::clone(&transport)));
        transport
    }
}
