//! Publish/subscribe policy
//!
//! A [`Policy`] is the strategy a transport consults on every admission pass:
//! whether the local participant should publish, which media and simulcast
//! layers to use, and what to subscribe to for each remote participant. Every
//! mutator updates the decision state and then asks the bound transport to
//! refresh; the transport re-evaluates on its own schedule.
//!
//! ## Republish
//!
//! Changes that cannot be hot-swapped (simulcast layers) go through
//! [`Policy::republish`]: unpublish, wait for the transport to confirm, wait a
//! settle delay, publish again, wait for confirmation. Each external
//! `publish`/`unpublish`/`republish` call bumps a generation counter, and an
//! in-flight republish that sees a newer generation gives up with
//! [`Error::RepublishSuperseded`] instead of racing the newer request.

use crate::error::{Error, Result};
use crate::participant::Participant;
use crate::track::{LocalMedia, SimulcastConfig};
use crate::transport::{
    ErrorCategory, PublishState, Strategy, Transport, TransportError, TransportEvent,
};
use crate::types::{ListenerId, ParticipantGroup};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default settle delay between a confirmed unpublish and the next publish
pub const DEFAULT_REPUBLISH_DELAY: Duration = Duration::from_millis(400);

/// What to receive from remote participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeMode {
    None,
    AudioOnly,
    #[default]
    AudioVideo,
}

#[derive(Debug, Default)]
struct PolicyState {
    should_publish: bool,
    media_to_publish: Option<LocalMedia>,
    subscribe_mode: SubscribeMode,
    simulcast: Option<SimulcastConfig>,
}

/// Signals a republish waits on
enum RepublishSignal {
    State(PublishState),
    Failed(TransportError),
}

/// Publish/subscribe decision state bound to at most one transport
pub struct Policy {
    group: ParticipantGroup,
    state: RwLock<PolicyState>,
    transport: RwLock<Option<Weak<dyn Transport>>>,
    /// Bumped by every external publish request; republishes watch it
    generation: watch::Sender<u64>,
    republish_delay: Duration,
}

impl Policy {
    #[must_use]
    pub fn new(group: ParticipantGroup, republish_delay: Duration) -> Self {
        Self {
            group,
            state: RwLock::new(PolicyState::default()),
            transport: RwLock::new(None),
            generation: watch::Sender::new(0),
            republish_delay,
        }
    }

    #[must_use]
    pub fn group(&self) -> &ParticipantGroup {
        &self.group
    }

    /// Bind to a transport, detaching from any previous one
    pub fn bind(&self, transport: &Arc<dyn Transport>) {
        let previous = self.transport.write().replace(Arc::downgrade(transport));
        if previous.is_some_and(|weak| weak.strong_count() > 0) {
            debug!(group = %self.group, "Policy rebound to a new transport");
        }
    }

    pub fn unbind(&self) {
        self.transport.write().take();
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound_transport().is_some()
    }

    fn bound_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().as_ref().and_then(Weak::upgrade)
    }

    fn refresh(&self) {
        if let Some(transport) = self.bound_transport() {
            transport.refresh_strategy();
        }
    }

    fn bump_generation(&self) -> u64 {
        let mut bumped = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            bumped = *generation;
        });
        bumped
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    /// Start publishing, or hot-swap the published media when `media` is given
    pub fn publish(&self, media: Option<LocalMedia>) {
        self.bump_generation();
        self.apply_publish(media);
    }

    /// Stop publishing; the media is kept so a bare `publish(None)` resumes it
    pub fn unpublish(&self) {
        self.bump_generation();
        self.apply_unpublish();
    }

    fn apply_publish(&self, media: Option<LocalMedia>) {
        {
            let mut state = self.state.write();
            state.should_publish = true;
            if let Some(media) = media {
                debug!(group = %self.group, media = media.id(), "Publishing media");
                state.media_to_publish = Some(media);
            }
        }
        self.refresh();
    }

    fn apply_unpublish(&self) {
        self.state.write().should_publish = false;
        self.refresh();
    }

    #[must_use]
    pub fn subscribe_mode(&self) -> SubscribeMode {
        self.state.read().subscribe_mode
    }

    pub fn set_subscribe_mode(&self, mode: SubscribeMode) {
        {
            let mut state = self.state.write();
            if state.subscribe_mode == mode {
                return;
            }
            state.subscribe_mode = mode;
        }
        self.refresh();
    }

    /// Force the transport to recompute subscriptions
    pub fn resubscribe(&self) {
        let mode = self.subscribe_mode();
        if mode == SubscribeMode::None {
            return;
        }
        self.state.write().subscribe_mode = SubscribeMode::None;
        self.refresh();
        self.state.write().subscribe_mode = mode;
        self.refresh();
    }

    #[must_use]
    pub fn simulcast_config(&self) -> Option<SimulcastConfig> {
        self.state.read().simulcast.clone()
    }

    /// Apply a simulcast config, republishing if currently publishing.
    ///
    /// A failed republish restores the previous config unless another call
    /// replaced it in the meantime. A superseded one never does.
    pub async fn set_simulcast_config(&self, config: Option<SimulcastConfig>) -> Result<()> {
        let (previous, publishing) = {
            let mut state = self.state.write();
            if state.simulcast == config {
                return Ok(());
            }
            let previous = std::mem::replace(&mut state.simulcast, config.clone());
            (previous, state.should_publish)
        };

        if !publishing {
            debug!(group = %self.group, "Simulcast config stored for next publish");
            return Ok(());
        }

        match self.republish().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_superseded() => Err(err),
            Err(err) => {
                let restored = {
                    let mut state = self.state.write();
                    // a later call may have stored its own config meanwhile
                    let untouched = state.simulcast == config;
                    if untouched {
                        state.simulcast = previous;
                    }
                    untouched
                };
                if restored {
                    warn!(group = %self.group, error = %err, "Republish failed, restored simulcast config");
                    self.refresh();
                } else {
                    warn!(group = %self.group, error = %err, "Republish failed, keeping newer simulcast config");
                }
                Err(err)
            }
        }
    }

    /// Unpublish, wait for confirmation and the settle delay, then publish again.
    ///
    /// Resolves immediately when not publishing. Resolves once the transport
    /// reports the local participant published again.
    pub async fn republish(&self) -> Result<()> {
        if !self.state.read().should_publish {
            return Ok(());
        }
        let transport = self.bound_transport().ok_or(Error::Detached)?;
        let generation = self.bump_generation();
        let mut superseded = self.generation.subscribe();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = transport.on(Arc::new(move |event: &TransportEvent| {
            let signal = match event {
                TransportEvent::ParticipantPublishStateChanged { participant, state }
                    if participant.is_local =>
                {
                    RepublishSignal::State(*state)
                }
                TransportEvent::Error(err) if err.category == ErrorCategory::Publish => {
                    RepublishSignal::Failed(err.clone())
                }
                _ => return,
            };
            let _ = tx.send(signal);
        }));
        let listener = ListenerGuard { transport, id };

        info!(group = %self.group, generation, "Republishing");
        let outcome = self
            .drive_republish(generation, &mut superseded, &mut rx)
            .await;
        drop(listener);

        match &outcome {
            Ok(()) => info!(group = %self.group, generation, "Republished"),
            Err(err) => debug!(group = %self.group, generation, error = %err, "Republish settled without publishing"),
        }
        outcome
    }

    async fn drive_republish(
        &self,
        generation: u64,
        superseded: &mut watch::Receiver<u64>,
        rx: &mut mpsc::UnboundedReceiver<RepublishSignal>,
    ) -> Result<()> {
        self.apply_unpublish();

        let mut publish_at: Option<Instant> = None;
        let mut publish_requested = false;

        loop {
            let deadline = publish_at.unwrap_or_else(Instant::now);
            let signal = tokio::select! {
                _ = superseded.changed() => return Err(Error::RepublishSuperseded),
                () = tokio::time::sleep_until(deadline), if publish_at.is_some() => {
                    publish_at = None;
                    if !self.is_current(generation) {
                        return Err(Error::RepublishSuperseded);
                    }
                    self.apply_publish(None);
                    publish_requested = true;
                    continue;
                }
                signal = rx.recv() => signal,
            };

            match signal {
                // the transport dropped our listener
                None => return Err(Error::SessionClosed),
                Some(RepublishSignal::Failed(err)) => return Err(Error::Republish(err)),
                Some(RepublishSignal::State(PublishState::NotPublished))
                    if !publish_requested && publish_at.is_none() =>
                {
                    publish_at = Some(Instant::now() + self.republish_delay);
                }
                Some(RepublishSignal::State(PublishState::Published)) if publish_requested => {
                    if !self.is_current(generation) {
                        return Err(Error::RepublishSuperseded);
                    }
                    return Ok(());
                }
                Some(RepublishSignal::State(_)) => {}
            }

            if !self.is_current(generation) {
                return Err(Error::RepublishSuperseded);
            }
        }
    }
}

/// Removes a temporary listener however the owning future ends
struct ListenerGuard {
    transport: Arc<dyn Transport>,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.transport.off(self.id);
    }
}

impl Strategy for Policy {
    fn should_publish(&self) -> bool {
        self.state.read().should_publish
    }

    fn media_to_publish(&self) -> Option<LocalMedia> {
        self.state.read().media_to_publish.clone()
    }

    fn simulcast(&self) -> Option<SimulcastConfig> {
        self.simulcast_config()
    }

    fn subscribe_mode_for(&self, participant: &Participant) -> SubscribeMode {
        if !participant.is_in(&self.group) {
            return SubscribeMode::None;
        }
        self.state.read().subscribe_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{local_publish_state, LoopbackTransport};
    use crate::track::{LocalTrack, QualityLayer, StreamType};

    fn bound_policy() -> (Arc<Policy>, Arc<LoopbackTransport>) {
        let transport = LoopbackTransport::new();
        let policy = Arc::new(Policy::new(
            ParticipantGroup::from("stage"),
            DEFAULT_REPUBLISH_DELAY,
        ));
        policy.bind(&(Arc::clone(&transport) as Arc<dyn Transport>));
        (policy, transport)
    }

    fn camera() -> LocalMedia {
        LocalMedia::new("camera", vec![LocalTrack::new("v1", StreamType::Video)])
    }

    #[test]
    fn test_other_group_never_subscribed() {
        let (policy, _transport) = bound_policy();
        let outsider = Participant::new("x").in_group("backstage");
        let ungrouped = Participant::new("y");
        let member = Participant::new("z").in_group("stage");

        for mode in [
            SubscribeMode::None,
            SubscribeMode::AudioOnly,
            SubscribeMode::AudioVideo,
        ] {
            policy.set_subscribe_mode(mode);
            assert_eq!(policy.subscribe_mode_for(&outsider), SubscribeMode::None);
            assert_eq!(policy.subscribe_mode_for(&ungrouped), SubscribeMode::None);
            assert_eq!(policy.subscribe_mode_for(&member), mode);
        }
    }

    #[test]
    fn test_unpublish_keeps_media() {
        let (policy, transport) = bound_policy();
        let media = camera();

        policy.publish(Some(media.clone()));
        policy.unpublish();
        assert!(!policy.should_publish());
        assert_eq!(policy.media_to_publish(), Some(media.clone()));

        policy.publish(None);
        assert!(policy.should_publish());
        assert_eq!(policy.media_to_publish(), Some(media));
        assert_eq!(transport.refresh_count(), 3);
    }

    #[test]
    fn test_publish_hot_swaps_media() {
        let (policy, _transport) = bound_policy();
        let screen = LocalMedia::new("screen", vec![LocalTrack::new("s1", StreamType::Video)]);

        policy.publish(Some(camera()));
        policy.publish(Some(screen.clone()));
        assert_eq!(policy.media_to_publish(), Some(screen));
    }

    #[test]
    fn test_set_subscribe_mode_noop_when_unchanged() {
        let (policy, transport) = bound_policy();
        policy.set_subscribe_mode(SubscribeMode::AudioVideo);
        assert_eq!(transport.refresh_count(), 0);
        policy.set_subscribe_mode(SubscribeMode::AudioOnly);
        assert_eq!(transport.refresh_count(), 1);
    }

    #[test]
    fn test_resubscribe_toggles_through_none() {
        let (policy, transport) = bound_policy();
        policy.resubscribe();
        assert_eq!(transport.refresh_count(), 2);
        assert_eq!(policy.subscribe_mode(), SubscribeMode::AudioVideo);

        policy.set_subscribe_mode(SubscribeMode::None);
        let before = transport.refresh_count();
        policy.resubscribe();
        assert_eq!(transport.refresh_count(), before);
    }

    #[test]
    fn test_rebinding_detaches_previous_transport() {
        let (policy, first) = bound_policy();
        let second = LoopbackTransport::new();
        policy.bind(&(Arc::clone(&second) as Arc<dyn Transport>));

        policy.publish(None);
        assert_eq!(first.refresh_count(), 0);
        assert_eq!(second.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_republish_when_not_publishing_is_immediate() {
        let (policy, transport) = bound_policy();
        policy.republish().await.unwrap();
        assert_eq!(transport.refresh_count(), 0);
        assert_eq!(transport.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_republish_detached() {
        let policy = Policy::new(ParticipantGroup::default(), DEFAULT_REPUBLISH_DELAY);
        policy.publish(None);
        assert!(matches!(policy.republish().await, Err(Error::Detached)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_publishes_only_after_unpublish_and_delay() {
        let (policy, transport) = bound_policy();
        policy.publish(Some(camera()));

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            async move { policy.republish().await }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!policy.should_publish(), "must wait for NOT_PUBLISHED");

        // a stale PUBLISHED before the unpublish is confirmed is ignored
        transport.emit(local_publish_state(PublishState::Published));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        transport.emit(local_publish_state(PublishState::NotPublished));
        tokio::time::sleep(Duration::from_millis(399)).await;
        assert!(!policy.should_publish());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(policy.should_publish());
        assert!(!task.is_finished(), "must wait for PUBLISHED");

        transport.emit(local_publish_state(PublishState::Published));
        task.await.unwrap().unwrap();
        assert_eq!(transport.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_rejects_on_publish_error() {
        let (policy, transport) = bound_policy();
        policy.publish(None);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            async move { policy.republish().await }
        });
        tokio::task::yield_now().await;

        transport.emit(local_publish_state(PublishState::NotPublished));
        tokio::time::sleep(Duration::from_millis(500)).await;
        transport.emit(TransportEvent::Error(TransportError::publish("rejected")));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(&err, Error::Republish(cause) if cause.message == "rejected"));
        assert_eq!(transport.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_superseded_by_unpublish() {
        let (policy, transport) = bound_policy();
        policy.publish(None);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            async move { policy.republish().await }
        });
        tokio::task::yield_now().await;

        transport.emit(local_publish_state(PublishState::NotPublished));
        tokio::task::yield_now().await;
        policy.unpublish();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            task.await.unwrap(),
            Err(Error::RepublishSuperseded)
        ));
        assert!(!policy.should_publish());
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_superseded_before_transport_reports() {
        let (policy, transport) = bound_policy();
        policy.publish(None);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            async move { policy.republish().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(transport.listener_count(), 1);

        // no transport event at all: the newer request alone settles it
        policy.publish(None);
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(Error::RepublishSuperseded)));
        assert_eq!(transport.listener_count(), 0);
        assert!(policy.should_publish());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_republish_removes_listener() {
        let (policy, transport) = bound_policy();
        policy.publish(None);

        let outcome = tokio::time::timeout(Duration::from_secs(1), policy.republish()).await;
        assert!(outcome.is_err());
        assert_eq!(transport.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_ends_when_listeners_removed() {
        let (policy, transport) = bound_policy();
        policy.publish(None);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            async move { policy.republish().await }
        });
        tokio::task::yield_now().await;

        transport.remove_all_listeners();
        assert!(matches!(task.await.unwrap(), Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_simulcast_stored_when_not_publishing() {
        let (policy, transport) = bound_policy();
        let config = SimulcastConfig::default();

        policy
            .set_simulcast_config(Some(config.clone()))
            .await
            .unwrap();
        assert_eq!(policy.simulcast_config(), Some(config.clone()));
        assert_eq!(transport.refresh_count(), 0);

        // equal config is a no-op
        policy.set_simulcast_config(Some(config)).await.unwrap();
        assert_eq!(transport.refresh_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulcast_rolls_back_on_failed_republish() {
        let (policy, transport) = bound_policy();
        let original = SimulcastConfig::default();
        let low_only = SimulcastConfig::from_layers([QualityLayer::Low]);

        policy
            .set_simulcast_config(Some(original.clone()))
            .await
            .unwrap();
        policy.publish(None);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            let low_only = low_only.clone();
            async move { policy.set_simulcast_config(Some(low_only)).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(policy.simulcast_config(), Some(low_only));

        transport.emit(local_publish_state(PublishState::NotPublished));
        tokio::time::sleep(Duration::from_millis(450)).await;
        let refreshes = transport.refresh_count();
        transport.emit(TransportEvent::Error(TransportError::publish("encoder")));

        assert!(matches!(task.await.unwrap(), Err(Error::Republish(_))));
        assert_eq!(policy.simulcast_config(), Some(original));
        assert!(transport.refresh_count() > refreshes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_republish_keeps_newer_simulcast_config() {
        let (policy, transport) = bound_policy();
        let low_only = SimulcastConfig::from_layers([QualityLayer::Low]);
        let high_only = SimulcastConfig::from_layers([QualityLayer::High]);
        policy.publish(None);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            async move { policy.set_simulcast_config(Some(low_only)).await }
        });
        tokio::task::yield_now().await;
        assert!(!policy.should_publish());

        // stored without republishing, since the first call has unpublished
        policy
            .set_simulcast_config(Some(high_only.clone()))
            .await
            .unwrap();
        transport.emit(TransportEvent::Error(TransportError::publish("encoder")));

        assert!(matches!(task.await.unwrap(), Err(Error::Republish(_))));
        assert_eq!(policy.simulcast_config(), Some(high_only));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulcast_applied_after_successful_republish() {
        let (policy, transport) = bound_policy();
        policy.publish(None);
        let config = SimulcastConfig::from_layers([QualityLayer::High, QualityLayer::Low]);

        let task = tokio::spawn({
            let policy = Arc::clone(&policy);
            let config = config.clone();
            async move { policy.set_simulcast_config(Some(config)).await }
        });
        tokio::task::yield_now().await;

        transport.emit(local_publish_state(PublishState::NotPublished));
        tokio::time::sleep(Duration::from_millis(450)).await;
        transport.emit(local_publish_state(PublishState::Published));

        task.await.unwrap().unwrap();
        assert_eq!(policy.simulcast_config(), Some(config));
        assert!(policy.should_publish());
    }
}
