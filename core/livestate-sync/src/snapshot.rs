//! Immutable published views of the model.

use crate::protocol::ResetState;
use livestate_types::{EntityRef, Link, Schema, Timestamp};
use serde::Serialize;
use std::collections::HashMap;

/// A committed state of the model.
///
/// Snapshots own their data; nothing in the store aliases them, so a
/// subscriber may keep one for as long as it likes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Snapshot<S: Schema> {
    /// Incremented on every publication.
    pub version: u64,
    /// When the snapshot was committed.
    pub timestamp: Timestamp,
    /// Entities in insertion order.
    pub entities: Vec<S::Entity>,
    /// Relations in insertion order.
    pub relations: Vec<Link<S::Key>>,
}

impl<S: Schema> Snapshot<S> {
    /// The state before anything was committed.
    pub fn empty() -> Self {
        Self {
            version: 0,
            timestamp: Timestamp::ZERO,
            entities: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn entity(&self, key: &S::Key) -> Option<&S::Entity> {
        self.entities.iter().find(|e| &S::key_of(e) == key)
    }

    pub fn contains_entity(&self, key: &S::Key) -> bool {
        self.entity(key).is_some()
    }

    pub fn relation(&self, source: &S::Key, target: &S::Key) -> Option<&Link<S::Key>> {
        self.relations
            .iter()
            .find(|l| &l.source == source && &l.target == target)
    }

    /// Position of an entity in insertion order.
    pub fn slot_of(&self, key: &S::Key) -> Option<usize> {
        self.entities.iter().position(|e| &S::key_of(e) == key)
    }

    pub fn keys(&self) -> Vec<S::Key> {
        self.entities.iter().map(S::key_of).collect()
    }

    /// Relations with endpoints rewritten as positions into `entities`, for
    /// consumers that address nodes by index.
    pub fn indexed_relations(&self) -> Vec<Link<usize>> {
        let slots: HashMap<S::Key, usize> = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (S::key_of(e), i))
            .collect();
        self.relations
            .iter()
            .filter_map(|link| link.clone().try_map_endpoints(|key| slots.get(key).copied()))
            .collect()
    }
}

impl<S: Schema> Default for Snapshot<S> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: Schema> From<&Snapshot<S>> for ResetState<S> {
    fn from(snapshot: &Snapshot<S>) -> Self {
        ResetState::new(
            snapshot.entities.clone(),
            snapshot
                .relations
                .iter()
                .map(|link| Link {
                    source: EntityRef::Key(link.source.clone()),
                    target: EntityRef::Key(link.target.clone()),
                    value: link.value,
                    attributes: link.attributes.clone(),
                })
                .collect(),
        )
    }
}
