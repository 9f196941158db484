//! Participant bookkeeping for one group
//!
//! Participants outside the store's group are ignored. Iteration order is
//! insertion order with one exception: the local participant is always last,
//! so consumers that draw "self" on top of everyone else can rely on it.

use crate::participant::Participant;
use crate::types::{ParticipantGroup, ParticipantId};
use indexmap::IndexMap;

pub struct ParticipantStore {
    group: ParticipantGroup,
    participants: IndexMap<ParticipantId, Participant>,
}

impl ParticipantStore {
    #[must_use]
    pub fn new(group: ParticipantGroup) -> Self {
        Self {
            group,
            participants: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn group(&self) -> &ParticipantGroup {
        &self.group
    }

    /// Insert or merge a participant; returns false if it belongs to another group
    pub fn upsert(&mut self, participant: &Participant) -> bool {
        if !participant.is_in(&self.group) {
            return false;
        }

        match self.participants.get_mut(&participant.id) {
            Some(existing) => existing.merge(participant),
            None => {
                self.participants
                    .insert(participant.id.clone(), participant.clone());
            }
        }
        self.keep_local_last();
        true
    }

    /// Remove a participant; returns false if it was unknown or of another group
    pub fn remove(&mut self, participant: &Participant) -> bool {
        if !participant.is_in(&self.group) {
            return false;
        }
        self.participants.shift_remove(&participant.id).is_some()
    }

    fn keep_local_last(&mut self) {
        let Some(index) = self.participants.values().position(|p| p.is_local) else {
            return;
        };
        if index + 1 == self.participants.len() {
            return;
        }
        if let Some((id, local)) = self.participants.shift_remove_index(index) {
            self.participants.insert(id, local);
        }
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// All participants, local participant last
    pub fn all(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    #[must_use]
    pub fn local(&self) -> Option<&Participant> {
        self.participants.values().rev().find(|p| p.is_local)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParticipantStore {
        ParticipantStore::new(ParticipantGroup::from("stage"))
    }

    fn ids(store: &ParticipantStore) -> Vec<&str> {
        store.all().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_other_groups_ignored() {
        let mut store = store();
        assert!(!store.upsert(&Participant::new("x").in_group("backstage")));
        assert!(!store.upsert(&Participant::new("y")));
        assert!(store.is_empty());

        assert!(store.upsert(&Participant::new("a").in_group("stage")));
        assert!(!store.remove(&Participant::new("a").in_group("backstage")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_local_always_last() {
        let mut store = store();
        store.upsert(&Participant::new("a").in_group("stage"));
        store.upsert(&Participant::local("me").in_group("stage"));
        assert_eq!(ids(&store), ["a", "me"]);

        store.upsert(&Participant::new("b").in_group("stage"));
        store.upsert(&Participant::new("c").in_group("stage"));
        assert_eq!(ids(&store), ["a", "b", "c", "me"]);

        store.remove(&Participant::new("b").in_group("stage"));
        store.upsert(&Participant::new("a").in_group("stage").with_publishing(true));
        assert_eq!(ids(&store), ["a", "c", "me"]);

        store.upsert(&Participant::local("me").in_group("stage").with_publishing(true));
        store.upsert(&Participant::new("d").in_group("stage"));
        assert_eq!(ids(&store), ["a", "c", "d", "me"]);
        assert!(store.local().is_some_and(|p| p.publishing));
    }

    #[test]
    fn test_upsert_merges_fields() {
        let mut store = store();
        let mut first = Participant::new("a").in_group("stage");
        first
            .attributes
            .insert("name".to_string(), "Ada".to_string());
        store.upsert(&first);
        store.upsert(
            &Participant::new("a")
                .in_group("stage")
                .with_publishing(true)
                .with_subscribable(false),
        );

        let merged = store.get(&ParticipantId::from("a")).unwrap();
        assert!(merged.publishing);
        assert!(!merged.capabilities.subscribable);
        assert_eq!(merged.attributes["name"], "Ada");
    }
}
