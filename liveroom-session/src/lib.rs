//! liveroom session manager
//!
//! Coordinates concurrent live sessions in which a local client publishes
//! audio/video and subscribes to other participants, on top of a real-time
//! transport it does not implement.
//!
//! ## Architecture
//!
//! - **`Policy`**: publish/subscribe decisions consulted by the transport
//! - **`Session`**: one transport connection bound to one policy
//! - **`SessionRegistry`**: one session per local identity, publisher capacity
//! - **`ParticipantStore`**: group-scoped participants, local participant last
//! - **`StreamReconciler`**: per-participant live track containers
//! - **`LiveSession`**: the facade the application drives and observes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use liveroom_session::{LiveSession, LiveSessionOptions, SessionConfig, SessionRegistry};
//!
//! let registry = SessionRegistry::new(SessionConfig::load(Some("liveroom.toml"))?, factory);
//! registry.teardown_on_ctrl_c();
//!
//! let live = LiveSession::open(&registry, LiveSessionOptions::new("me", "stage")).await?;
//! live.join(Some(camera)).await?;
//! for view in live.participants(ParticipantFilter::default().publishing(true)) {
//!     render(&view);
//! }
//! ```

mod config;
mod error;
mod live;
pub mod logging;
mod participant;
mod policy;
mod reconciler;
mod registry;
mod session;
mod store;
mod track;
mod transport;
mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{LoggingConfig, SessionConfig};
pub use error::{Error, Result};
pub use live::{LiveSession, LiveSessionOptions, ParticipantFilter, ParticipantView, SessionStatus};
pub use participant::{Capabilities, Participant, GROUP_ATTRIBUTE};
pub use policy::{Policy, SubscribeMode, DEFAULT_REPUBLISH_DELAY};
pub use reconciler::{MediaContainer, StreamMeta, StreamReconciler};
pub use registry::SessionRegistry;
pub use session::Session;
pub use store::ParticipantStore;
pub use track::{
    LocalMedia, LocalTrack, QualityLayer, SimulcastConfig, SimulcastLayer, StreamType, Track,
};
pub use transport::{
    ConnectionState, ErrorCategory, EventHandler, EventHub, PublishState, Strategy, Transport,
    TransportError, TransportEvent, TransportFactory,
};
pub use types::{ListenerId, ParticipantGroup, ParticipantId, TrackId};
