//! One live connection bound to one policy
//!
//! A [`Session`] owns its transport, installs the strategy, and keeps a few
//! lifecycle flags in sync with transport events:
//! - `connected` follows the connection state
//! - `ever_published` latches once the local participant is published
//! - a publish error before the first successful publish unpublishes, so a
//!   participant who was never admitted does not retry forever
//!
//! While joined, a teardown hook waits on the registry's shutdown token and
//! leaves the transport when it fires.

use crate::error::{Error, Result};
use crate::policy::Policy;
use crate::track::LocalMedia;
use crate::transport::{
    ConnectionState, ErrorCategory, EventHandler, PublishState, Strategy, Transport,
    TransportEvent,
};
use crate::types::{ListenerId, ParticipantGroup, ParticipantId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct SessionFlags {
    connected: AtomicBool,
    ever_published: AtomicBool,
    left: AtomicBool,
}

pub struct Session {
    instance_id: Uuid,
    local_participant_id: ParticipantId,
    group: ParticipantGroup,
    transport: Arc<dyn Transport>,
    policy: Arc<Policy>,
    flags: SessionFlags,
    teardown: CancellationToken,
    teardown_hook: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Wrap a transport, bind the policy to it and start tracking its events.
    ///
    /// `teardown` is the shutdown token the teardown hook waits on.
    pub fn new(
        local_participant_id: ParticipantId,
        transport: Arc<dyn Transport>,
        policy: Arc<Policy>,
        teardown: CancellationToken,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            instance_id: Uuid::new_v4(),
            group: policy.group().clone(),
            local_participant_id,
            transport,
            policy,
            flags: SessionFlags::default(),
            teardown,
            teardown_hook: Mutex::new(None),
        });

        session.policy.bind(&session.transport);
        session
            .transport
            .replace_strategy(Arc::clone(&session.policy) as Arc<dyn Strategy>);

        let weak = Arc::downgrade(&session);
        session.transport.on(Arc::new(move |event: &TransportEvent| {
            if let Some(session) = weak.upgrade() {
                session.handle_event(event);
            }
        }));

        session.arm_teardown_hook();

        info!(
            session = %session.instance_id,
            participant_id = %session.local_participant_id,
            group = %session.group,
            "Session created"
        );

        session
    }

    fn handle_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Left { reason } => {
                info!(session = %self.instance_id, reason = %reason, "Session left");
                self.flags.connected.store(false, Ordering::Release);
                self.flags.ever_published.store(false, Ordering::Release);
                self.flags.left.store(true, Ordering::Release);
                self.detach_teardown_hook();
            }
            TransportEvent::Error(err) if err.category == ErrorCategory::Publish => {
                if !self.ever_published() {
                    warn!(
                        session = %self.instance_id,
                        error = %err,
                        "Publish failed before first publish, unpublishing"
                    );
                    self.policy.unpublish();
                }
            }
            TransportEvent::ConnectionStateChanged(state) => {
                debug!(session = %self.instance_id, state = ?state, "Connection state changed");
                self.flags
                    .connected
                    .store(*state == ConnectionState::Connected, Ordering::Release);
            }
            TransportEvent::ParticipantPublishStateChanged { participant, state }
                if participant.is_local =>
            {
                if *state == PublishState::Published {
                    self.flags.ever_published.store(true, Ordering::Release);
                }
            }
            TransportEvent::ShouldUnpublish => {
                info!(session = %self.instance_id, "Transport requested unpublish");
                self.policy.unpublish();
            }
            _ => {}
        }
    }

    fn arm_teardown_hook(self: &Arc<Self>) {
        let mut hook = self.teardown_hook.lock();
        if hook.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(session = %self.instance_id, "No runtime, teardown hook not installed");
            return;
        };

        let weak = Arc::downgrade(self);
        let token = self.teardown.clone();
        *hook = Some(runtime.spawn(async move {
            token.cancelled().await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            debug!(session = %session.instance_id, "Shutdown requested, leaving");
            if let Err(e) = session.leave().await {
                warn!(session = %session.instance_id, error = %e, "Leave on shutdown failed");
            }
        }));
    }

    fn detach_teardown_hook(&self) {
        let Some(handle) = self.teardown_hook.lock().take() else {
            return;
        };
        // a fired hook is the one driving the leave; let it finish
        if !self.teardown.is_cancelled() {
            handle.abort();
        }
    }

    /// Join the session, publishing `media` right away when given
    pub async fn join(self: &Arc<Self>, media: Option<LocalMedia>) -> Result<()> {
        self.arm_teardown_hook();
        self.flags.left.store(false, Ordering::Release);

        info!(
            session = %self.instance_id,
            participant_id = %self.local_participant_id,
            publish = media.is_some(),
            "Joining"
        );
        self.transport.join().await.map_err(Error::Join)?;

        if let Some(media) = media {
            self.policy.publish(Some(media));
        }
        Ok(())
    }

    pub async fn leave(&self) -> Result<()> {
        info!(session = %self.instance_id, "Leaving");
        self.transport.leave().await.map_err(Error::Transport)
    }

    pub fn on(&self, handler: EventHandler) -> ListenerId {
        self.transport.on(handler)
    }

    pub fn off(&self, id: ListenerId) {
        self.transport.off(id);
    }

    pub(crate) fn remove_all_listeners(&self) {
        self.transport.remove_all_listeners();
    }

    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub fn local_participant_id(&self) -> &ParticipantId {
        &self.local_participant_id
    }

    #[must_use]
    pub fn group(&self) -> &ParticipantGroup {
        &self.group
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.flags.connected.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn ever_published(&self) -> bool {
        self.flags.ever_published.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_left(&self) -> bool {
        self.flags.left.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.teardown_hook.get_mut().take() {
            handle.abort();
        }
        debug!(session = %self.instance_id, participant_id = %self.local_participant_id, "Session dropped");
    }
}
