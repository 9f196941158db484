//! Participants as reported by the transport

use crate::types::{ParticipantGroup, ParticipantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute key holding a participant's group
pub const GROUP_ATTRIBUTE: &str = "participantGroup";

/// What a participant allows others to do with its media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub subscribable: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { subscribable: true }
    }
}

/// A local or remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub publishing: bool,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
            is_local: false,
            capabilities: Capabilities::default(),
            publishing: false,
        }
    }

    #[must_use]
    pub fn local(id: impl Into<ParticipantId>) -> Self {
        Self {
            is_local: true,
            ..Self::new(id)
        }
    }

    #[must_use]
    pub fn in_group(mut self, group: impl Into<ParticipantGroup>) -> Self {
        let group: ParticipantGroup = group.into();
        self.attributes
            .insert(GROUP_ATTRIBUTE.to_string(), group.as_str().to_string());
        self
    }

    #[must_use]
    pub fn with_publishing(mut self, publishing: bool) -> Self {
        self.publishing = publishing;
        self
    }

    #[must_use]
    pub fn with_subscribable(mut self, subscribable: bool) -> Self {
        self.capabilities.subscribable = subscribable;
        self
    }

    /// Group this participant belongs to; the default group when unset
    #[must_use]
    pub fn group(&self) -> ParticipantGroup {
        self.attributes
            .get(GROUP_ATTRIBUTE)
            .map(|g| ParticipantGroup::new(g.as_str()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_in(&self, group: &ParticipantGroup) -> bool {
        self.attributes
            .get(GROUP_ATTRIBUTE)
            .map_or(group.as_str().is_empty(), |g| g == group.as_str())
    }

    /// Shallow merge: scalar fields take the incoming value, attributes are
    /// merged key by key with the incoming value winning.
    pub fn merge(&mut self, incoming: &Self) {
        self.is_local = incoming.is_local;
        self.capabilities = incoming.capabilities;
        self.publishing = incoming.publishing;
        self.attributes.extend(
            incoming
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}
