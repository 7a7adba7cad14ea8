//! Folds one flush worth of envelopes into a single [`BatchUpdate`].

use crate::protocol::{BatchUpdate, EntityPatch, Envelope, Update, WireLink, WireRef};
use livestate_types::{LinkPatch, LinkSelector, Schema, Timestamp};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Merges envelopes in arrival order.
///
/// A reset anywhere in the flush wins: the last one is kept and every other
/// envelope is dropped. A batch that carries that reset keeps its own
/// operations, which apply on top of it. Otherwise nested batches are
/// flattened, the first add of a key is kept, updates to the same key are
/// folded field by field with later values winning, and repeated removes
/// collapse into one. Relation operations are deduplicated on their
/// `(source, target)` pair.
pub fn merge<S: Schema>(mut envelopes: Vec<Envelope<S>>) -> BatchUpdate<S> {
    let timestamp = envelopes
        .iter()
        .map(|e| e.timestamp)
        .max()
        .unwrap_or(Timestamp::ZERO);

    let mut merger = Merger::<S>::new(timestamp);
    if let Some(index) = envelopes.iter().rposition(|e| carries_reset(&e.update)) {
        let reset = match envelopes.swap_remove(index).update {
            Update::Reset(state) => Some(state),
            Update::Batch(mut batch) => {
                let state = batch.reset.take();
                merger.push(Update::Batch(batch));
                state
            }
            _ => None,
        };
        merger.batch.reset = reset;
        return merger.batch;
    }

    for envelope in envelopes {
        merger.push(envelope.update);
    }
    merger.batch
}

fn carries_reset<S: Schema>(update: &Update<S>) -> bool {
    match update {
        Update::Reset(_) => true,
        Update::Batch(batch) => batch.reset.is_some(),
        _ => false,
    }
}

type RefPair<S> = (WireRef<S>, WireRef<S>);

struct Merger<S: Schema> {
    batch: BatchUpdate<S>,
    added: HashSet<S::Key>,
    updated: HashMap<S::Key, usize>,
    removed: HashSet<S::Key>,
    links_added: HashSet<RefPair<S>>,
    links_updated: HashMap<RefPair<S>, usize>,
    links_removed: HashSet<RefPair<S>>,
}

impl<S: Schema> Merger<S> {
    fn new(timestamp: Timestamp) -> Self {
        Self {
            batch: BatchUpdate::new(timestamp),
            added: HashSet::new(),
            updated: HashMap::new(),
            removed: HashSet::new(),
            links_added: HashSet::new(),
            links_updated: HashMap::new(),
            links_removed: HashSet::new(),
        }
    }

    fn push(&mut self, update: Update<S>) {
        match update {
            Update::AddEntity(entity) => self.add_entity(entity),
            Update::UpdateEntity(patch) => self.update_entity(patch),
            Update::RemoveEntity(key) => self.remove_entity(key),
            Update::AddRelation(link) => self.add_relation(link),
            Update::UpdateRelation(patch) => self.update_relation(patch),
            Update::RemoveRelation(selector) => self.remove_relation(selector),
            Update::Batch(nested) => {
                let BatchUpdate {
                    add_entities,
                    update_entities,
                    remove_entities,
                    add_relations,
                    update_relations,
                    remove_relations,
                    ..
                } = nested;
                add_entities.into_iter().for_each(|e| self.add_entity(e));
                update_entities.into_iter().for_each(|p| self.update_entity(p));
                remove_entities.into_iter().for_each(|k| self.remove_entity(k));
                add_relations.into_iter().for_each(|l| self.add_relation(l));
                update_relations.into_iter().for_each(|p| self.update_relation(p));
                remove_relations.into_iter().for_each(|s| self.remove_relation(s));
            }
            Update::ServerError(message) => {
                warn!("[{}] server reported error: {}", S::NAME, message);
            }
            // resets are resolved before merging
            Update::Reset(_) => {}
        }
    }

    fn add_entity(&mut self, entity: S::Entity) {
        if self.added.insert(S::key_of(&entity)) {
            self.batch.add_entities.push(entity);
        }
    }

    fn update_entity(&mut self, patch: EntityPatch<S::Key>) {
        match self.updated.get(&patch.key) {
            Some(&i) => {
                let folded = &mut self.batch.update_entities[i].updates;
                for (field, value) in patch.updates {
                    folded.insert(field, value);
                }
            }
            None => {
                self.updated
                    .insert(patch.key.clone(), self.batch.update_entities.len());
                self.batch.update_entities.push(patch);
            }
        }
    }

    fn remove_entity(&mut self, key: S::Key) {
        if self.removed.insert(key.clone()) {
            self.batch.remove_entities.push(key);
        }
    }

    fn add_relation(&mut self, link: WireLink<S>) {
        let pair = (link.source.clone(), link.target.clone());
        if self.links_added.insert(pair) {
            self.batch.add_relations.push(link);
        }
    }

    fn update_relation(&mut self, patch: LinkPatch<WireRef<S>>) {
        let pair = (patch.source.clone(), patch.target.clone());
        match self.links_updated.get(&pair) {
            Some(&i) => {
                let folded = &mut self.batch.update_relations[i].updates;
                for (field, value) in patch.updates {
                    folded.insert(field, value);
                }
            }
            None => {
                self.links_updated
                    .insert(pair, self.batch.update_relations.len());
                self.batch.update_relations.push(patch);
            }
        }
    }

    fn remove_relation(&mut self, selector: LinkSelector<WireRef<S>>) {
        let pair = (selector.source.clone(), selector.target.clone());
        if self.links_removed.insert(pair) {
            self.batch.remove_relations.push(selector);
        }
    }
}
