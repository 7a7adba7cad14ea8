//! The authoritative in-memory model.
//!
//! Entities and relations are keyed. Insertion order is tracked with a
//! monotonically increasing sequence number, which gives snapshots a stable
//! order and lets positional (slot) references from the wire resolve
//! against the current order without any reindexing. An adjacency index
//! maps each entity to the relations touching it so removals cascade in
//! time proportional to the entity's degree.

use crate::protocol::{BatchUpdate, ResetState, WireLink, WireRef};
use crate::snapshot::Snapshot;
use livestate_types::{EntityRef, Link, Schema, Timestamp};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Endpoint pair identifying a relation.
pub type RelationKey<K> = (K, K);

#[derive(Debug, Clone)]
struct EntityRecord<E> {
    entity: E,
    last_seen: Timestamp,
    seq: u64,
}

#[derive(Debug, Clone)]
struct RelationRecord<K> {
    link: Link<K>,
    seq: u64,
}

/// What a call to [`StateStore::apply`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Anything observable changed.
    pub changed: bool,
    /// Something was inserted, so caps may now be exceeded.
    pub grew: bool,
    /// Relations dropped because an endpoint could not be resolved.
    pub rejected_relations: usize,
}

#[derive(Debug)]
pub struct StateStore<S: Schema> {
    entities: HashMap<S::Key, EntityRecord<S::Entity>>,
    entity_order: BTreeMap<u64, S::Key>,
    relations: HashMap<RelationKey<S::Key>, RelationRecord<S::Key>>,
    relation_order: BTreeMap<u64, RelationKey<S::Key>>,
    adjacency: HashMap<S::Key, HashSet<RelationKey<S::Key>>>,
    next_seq: u64,
}

impl<S: Schema> Default for StateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Schema> StateStore<S> {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            entity_order: BTreeMap::new(),
            relations: HashMap::new(),
            relation_order: BTreeMap::new(),
            adjacency: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn contains_entity(&self, key: &S::Key) -> bool {
        self.entities.contains_key(key)
    }

    pub fn entity(&self, key: &S::Key) -> Option<&S::Entity> {
        self.entities.get(key).map(|r| &r.entity)
    }

    pub fn last_seen(&self, key: &S::Key) -> Option<Timestamp> {
        self.entities.get(key).map(|r| r.last_seen)
    }

    pub fn relation(&self, source: &S::Key, target: &S::Key) -> Option<&Link<S::Key>> {
        self.relations
            .get(&(source.clone(), target.clone()))
            .map(|r| &r.link)
    }

    /// Resolves a wire reference to a key of a present entity. Slots index
    /// the current insertion order.
    pub fn resolve(&self, reference: &WireRef<S>) -> Option<S::Key> {
        match reference {
            EntityRef::Key(key) => self.entities.contains_key(key).then(|| key.clone()),
            EntityRef::Slot(slot) => self.entity_order.values().nth(*slot).cloned(),
        }
    }

    /// Applies a batch in the fixed order: reset, entity adds, updates and
    /// removes, then relation adds, updates and removes.
    pub fn apply(&mut self, batch: &BatchUpdate<S>, now: Timestamp) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        if let Some(state) = &batch.reset {
            outcome.rejected_relations += self.reset(state, now);
            outcome.changed = true;
            outcome.grew = true;
        }

        for entity in &batch.add_entities {
            if self.insert_entity(entity.clone(), now) {
                outcome.changed = true;
                outcome.grew = true;
            }
        }

        for patch in &batch.update_entities {
            if let Some(record) = self.entities.get_mut(&patch.key) {
                S::apply_patch(&mut record.entity, &patch.updates);
                record.last_seen = now;
                outcome.changed = true;
            }
        }

        for key in &batch.remove_entities {
            if self.remove_entity(key).is_some() {
                outcome.changed = true;
            }
        }

        for link in &batch.add_relations {
            match self.resolve_link(link) {
                Some(resolved) => {
                    if self.insert_relation(resolved) {
                        outcome.changed = true;
                        outcome.grew = true;
                    }
                }
                None => {
                    debug!(
                        "[{}] dropping relation with unknown endpoint {:?} -> {:?}",
                        S::NAME,
                        link.source,
                        link.target
                    );
                    outcome.rejected_relations += 1;
                }
            }
        }

        for patch in &batch.update_relations {
            let Some(pair) = self.resolve_pair(&patch.source, &patch.target) else {
                continue;
            };
            if let Some(record) = self.relations.get_mut(&pair) {
                if record.link.apply_patch(&patch.updates) {
                    outcome.changed = true;
                }
            }
        }

        for selector in &batch.remove_relations {
            let Some(pair) = self.resolve_pair(&selector.source, &selector.target) else {
                continue;
            };
            if self.remove_relation(&pair) {
                outcome.changed = true;
            }
        }

        outcome
    }

    /// Replaces the whole model. Returns the number of relations rejected
    /// for unresolvable endpoints.
    pub fn reset(&mut self, state: &ResetState<S>, now: Timestamp) -> usize {
        self.clear();
        for entity in &state.entities {
            self.insert_entity(entity.clone(), now);
        }
        let mut rejected = 0;
        for link in &state.relations {
            match self.resolve_link(link) {
                Some(resolved) => {
                    self.insert_relation(resolved);
                }
                None => rejected += 1,
            }
        }
        rejected
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.entity_order.clear();
        self.relations.clear();
        self.relation_order.clear();
        self.adjacency.clear();
    }

    /// Removes an entity and every relation touching it. Returns the number
    /// of cascaded relation removals, or `None` if the entity was absent.
    pub fn remove_entity(&mut self, key: &S::Key) -> Option<usize> {
        let record = self.entities.remove(key)?;
        self.entity_order.remove(&record.seq);
        let touching = self.adjacency.remove(key).unwrap_or_default();
        let mut cascaded = 0;
        for pair in touching {
            if self.remove_relation(&pair) {
                cascaded += 1;
            }
        }
        Some(cascaded)
    }

    pub fn remove_relation(&mut self, pair: &RelationKey<S::Key>) -> bool {
        let Some(record) = self.relations.remove(pair) else {
            return false;
        };
        self.relation_order.remove(&record.seq);
        for endpoint in [&pair.0, &pair.1] {
            if let Some(set) = self.adjacency.get_mut(endpoint) {
                set.remove(pair);
                if set.is_empty() {
                    self.adjacency.remove(endpoint);
                }
            }
        }
        true
    }

    /// Entities with their `lastSeen` and insertion sequence.
    pub fn entity_ages(&self) -> impl Iterator<Item = (&S::Key, Timestamp, u64)> + '_ {
        self.entities
            .iter()
            .map(|(key, r)| (key, r.last_seen, r.seq))
    }

    /// Relations with their value and insertion sequence.
    pub fn relation_weights(
        &self,
    ) -> impl Iterator<Item = (&RelationKey<S::Key>, f64, u64)> + '_ {
        self.relations
            .iter()
            .map(|(pair, r)| (pair, r.link.value, r.seq))
    }

    /// Copies the model out in insertion order.
    pub fn snapshot(&self, version: u64, timestamp: Timestamp) -> Snapshot<S> {
        let entities = self
            .entity_order
            .values()
            .filter_map(|key| self.entities.get(key))
            .map(|r| r.entity.clone())
            .collect();
        let relations = self
            .relation_order
            .values()
            .filter_map(|pair| self.relations.get(pair))
            .map(|r| r.link.clone())
            .collect();
        Snapshot {
            version,
            timestamp,
            entities,
            relations,
        }
    }

    /// Verifies endpoint presence and index consistency.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.entity_order.len() != self.entities.len() {
            return Err(format!(
                "entity order tracks {} keys for {} entities",
                self.entity_order.len(),
                self.entities.len()
            ));
        }
        for (seq, key) in &self.entity_order {
            match self.entities.get(key) {
                Some(record) if record.seq == *seq => {}
                _ => return Err(format!("entity order entry {seq} -> {key} is stale")),
            }
        }
        if self.relation_order.len() != self.relations.len() {
            return Err(format!(
                "relation order tracks {} pairs for {} relations",
                self.relation_order.len(),
                self.relations.len()
            ));
        }
        for (pair, record) in &self.relations {
            for endpoint in [&pair.0, &pair.1] {
                if !self.entities.contains_key(endpoint) {
                    return Err(format!(
                        "relation {} -> {} references missing entity {endpoint}",
                        pair.0, pair.1
                    ));
                }
                let indexed = self
                    .adjacency
                    .get(endpoint)
                    .is_some_and(|set| set.contains(pair));
                if !indexed {
                    return Err(format!(
                        "relation {} -> {} missing from adjacency of {endpoint}",
                        pair.0, pair.1
                    ));
                }
            }
            if self.relation_order.get(&record.seq) != Some(pair) {
                return Err(format!("relation {} -> {} has a stale sequence", pair.0, pair.1));
            }
        }
        for (key, set) in &self.adjacency {
            if let Some(pair) = set.iter().find(|p| !self.relations.contains_key(*p)) {
                return Err(format!(
                    "adjacency of {key} lists removed relation {} -> {}",
                    pair.0, pair.1
                ));
            }
        }
        Ok(())
    }

    fn insert_entity(&mut self, entity: S::Entity, now: Timestamp) -> bool {
        let key = S::key_of(&entity);
        if self.entities.contains_key(&key) {
            return false;
        }
        let seq = self.bump_seq();
        self.entity_order.insert(seq, key.clone());
        self.entities.insert(
            key,
            EntityRecord {
                entity,
                last_seen: now,
                seq,
            },
        );
        true
    }

    fn insert_relation(&mut self, link: Link<S::Key>) -> bool {
        let pair = (link.source.clone(), link.target.clone());
        if self.relations.contains_key(&pair) {
            return false;
        }
        let seq = self.bump_seq();
        self.relation_order.insert(seq, pair.clone());
        for endpoint in [&pair.0, &pair.1] {
            self.adjacency
                .entry(endpoint.clone())
                .or_default()
                .insert(pair.clone());
        }
        self.relations.insert(pair, RelationRecord { link, seq });
        true
    }

    fn resolve_link(&self, link: &WireLink<S>) -> Option<Link<S::Key>> {
        link.clone().try_map_endpoints(|r| self.resolve(r))
    }

    fn resolve_pair(
        &self,
        source: &WireRef<S>,
        target: &WireRef<S>,
    ) -> Option<RelationKey<S::Key>> {
        Some((self.resolve(source)?, self.resolve(target)?))
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
