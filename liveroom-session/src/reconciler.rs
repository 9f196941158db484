//! Per-participant track reconciliation
//!
//! For every remote participant the reconciler keeps:
//! - the published tracks as reported by the transport (one per stream type)
//! - an aggregated [`MediaContainer`] holding the live subset of those tracks
//! - derived [`StreamMeta`]
//!
//! Each update diffs the published list into the container. A container left
//! without live tracks is deleted together with the other two entries, so
//! absence means "not streaming".

use crate::participant::Participant;
use crate::track::{StreamType, Track};
use crate::types::{ParticipantGroup, ParticipantId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Aggregated playable media for one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaContainer {
    pub participant_id: ParticipantId,
    pub tracks: Vec<Track>,
    /// Bumped whenever the container's composition changes
    pub version: u64,
}

impl MediaContainer {
    fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            tracks: Vec::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn track(&self, stream_type: StreamType) -> Option<&Track> {
        self.tracks.iter().find(|t| t.stream_type == stream_type)
    }

    fn has_live_tracks(&self) -> bool {
        self.tracks.iter().any(|t| t.live)
    }
}

/// Metadata derived from a participant's container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamMeta {
    /// No live video, or the video is muted
    pub audio_only: bool,
}

impl StreamMeta {
    fn derive(container: &MediaContainer) -> Self {
        let audio_only = container
            .track(StreamType::Video)
            .map_or(true, |video| video.muted || !video.live);
        Self { audio_only }
    }
}

pub struct StreamReconciler {
    group: ParticipantGroup,
    published: HashMap<ParticipantId, Vec<Track>>,
    containers: HashMap<ParticipantId, MediaContainer>,
    meta: HashMap<ParticipantId, Arc<StreamMeta>>,
}

impl StreamReconciler {
    #[must_use]
    pub fn new(group: ParticipantGroup) -> Self {
        Self {
            group,
            published: HashMap::new(),
            containers: HashMap::new(),
            meta: HashMap::new(),
        }
    }

    pub fn tracks_added(&mut self, participant: &Participant, tracks: &[Track]) {
        if !participant.is_in(&self.group) {
            return;
        }
        let published = self.published.entry(participant.id.clone()).or_default();
        for track in tracks {
            upsert_by_type(published, track.clone());
        }
        self.reconcile(&participant.id);
    }

    pub fn tracks_removed(&mut self, participant: &Participant, tracks: &[Track]) {
        if !participant.is_in(&self.group) {
            return;
        }
        if let Some(published) = self.published.get_mut(&participant.id) {
            published.retain(|p| !tracks.iter().any(|t| t.stream_type == p.stream_type));
        }
        self.reconcile(&participant.id);
    }

    /// Apply a mute or liveness change for one of the participant's tracks
    pub fn track_updated(&mut self, participant: &Participant, track: &Track) {
        if !participant.is_in(&self.group) {
            return;
        }
        let Some(published) = self.published.get_mut(&participant.id) else {
            return;
        };
        upsert_by_type(published, track.clone());
        self.reconcile(&participant.id);
    }

    pub fn participant_left(&mut self, participant: &Participant) {
        if !participant.is_in(&self.group) {
            return;
        }
        self.forget(&participant.id);
    }

    fn forget(&mut self, id: &ParticipantId) {
        self.published.remove(id);
        self.containers.remove(id);
        self.meta.remove(id);
    }

    fn reconcile(&mut self, id: &ParticipantId) {
        let published = self.published.get(id).map(Vec::as_slice).unwrap_or_default();
        let container = self
            .containers
            .entry(id.clone())
            .or_insert_with(|| MediaContainer::new(id.clone()));

        let before = container.tracks.len();
        container
            .tracks
            .retain(|held| published.iter().any(|p| p.id == held.id && p.live));
        let mut changed = container.tracks.len() != before;

        for track in published.iter().filter(|t| t.live) {
            match container.tracks.iter_mut().find(|held| held.id == track.id) {
                Some(held) if held != track => {
                    *held = track.clone();
                    changed = true;
                }
                Some(_) => {}
                None => {
                    container.tracks.push(track.clone());
                    changed = true;
                }
            }
        }

        if !container.has_live_tracks() {
            debug!(participant_id = %id, "No live tracks left, dropping container");
            self.forget(id);
            return;
        }

        if changed {
            container.version += 1;
        }

        let derived = StreamMeta::derive(container);
        let replace = self
            .meta
            .get(id)
            .map_or(true, |current| **current != derived);
        if replace {
            self.meta.insert(id.clone(), Arc::new(derived));
        }
    }

    #[must_use]
    pub fn container(&self, id: &ParticipantId) -> Option<&MediaContainer> {
        self.containers.get(id)
    }

    #[must_use]
    pub fn meta(&self, id: &ParticipantId) -> Option<Arc<StreamMeta>> {
        self.meta.get(id).cloned()
    }

    #[must_use]
    pub fn published(&self, id: &ParticipantId) -> Option<&[Track]> {
        self.published.get(id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn clear(&mut self) {
        self.published.clear();
        self.containers.clear();
        self.meta.clear();
    }
}

fn upsert_by_type(tracks: &mut Vec<Track>, track: Track) {
    match tracks.iter_mut().find(|t| t.stream_type == track.stream_type) {
        Some(existing) => *existing = track,
        None => tracks.push(track),
    }
}
