//! Bounded-size and time-to-live pruning.

use crate::config::EngineConfig;
use crate::store::StateStore;
use livestate_types::{RelationEviction, Schema, Timestamp};
use std::time::Duration;
use tracing::debug;

/// Limits enforced after every apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    pub max_entities: usize,
    pub max_relations: usize,
    pub ttl: Option<Duration>,
    pub relation_order: RelationEviction,
}

/// What one enforcement pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entities pruned for exceeding the TTL.
    pub expired: usize,
    /// Entities evicted by the entity cap.
    pub entities_evicted: usize,
    /// Relations evicted by the relation cap.
    pub relations_evicted: usize,
    /// Relations removed because an endpoint was pruned or evicted.
    pub cascaded: usize,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl EvictionPolicy {
    pub fn for_schema<S: Schema>(config: &EngineConfig) -> Self {
        Self {
            max_entities: config.max_entities,
            max_relations: config.max_relations,
            ttl: config.ttl,
            relation_order: S::RELATION_EVICTION,
        }
    }

    /// Runs TTL pruning, then the entity cap, then the relation cap.
    pub fn enforce<S: Schema>(&self, store: &mut StateStore<S>, now: Timestamp) -> EvictionReport {
        let mut report = EvictionReport::default();

        if let Some(ttl) = self.ttl {
            let expired: Vec<S::Key> = store
                .entity_ages()
                .filter(|(_, last_seen, _)| now.duration_since(*last_seen) > ttl)
                .map(|(key, _, _)| key.clone())
                .collect();
            for key in expired {
                if let Some(cascaded) = store.remove_entity(&key) {
                    report.expired += 1;
                    report.cascaded += cascaded;
                }
            }
        }

        let excess = store.entity_count().saturating_sub(self.max_entities);
        if excess > 0 {
            let mut ages: Vec<_> = store
                .entity_ages()
                .map(|(key, last_seen, seq)| (last_seen, seq, key.clone()))
                .collect();
            ages.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            for (_, _, key) in ages.into_iter().take(excess) {
                if let Some(cascaded) = store.remove_entity(&key) {
                    report.entities_evicted += 1;
                    report.cascaded += cascaded;
                }
            }
        }

        let excess = store.relation_count().saturating_sub(self.max_relations);
        if excess > 0 {
            let mut weights: Vec<_> = store
                .relation_weights()
                .map(|(pair, value, seq)| (value, seq, pair.clone()))
                .collect();
            match self.relation_order {
                RelationEviction::LowestValue => weights.sort_by(|a, b| {
                    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
                }),
                RelationEviction::OldestInserted => weights.sort_by(|a, b| a.1.cmp(&b.1)),
            }
            for (_, _, pair) in weights.into_iter().take(excess) {
                if store.remove_relation(&pair) {
                    report.relations_evicted += 1;
                }
            }
        }

        if !report.is_empty() {
            debug!(
                "[{}] evicted: {} expired, {} over entity cap, {} over relation cap, {} cascaded",
                S::NAME,
                report.expired,
                report.entities_evicted,
                report.relations_evicted,
                report.cascaded
            );
        }
        report
    }
}

