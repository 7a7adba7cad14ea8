use livestate_sync::{BatchUpdate, EngineConfig, EvictionPolicy, EvictionReport, StateStore};
use livestate_types::{
    EntityRef, Graph, GraphNode, Link, RelationEviction, Surface, SurfacePoint, Timestamp,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn at(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn policy(max_entities: usize, max_relations: usize, ttl: Option<Duration>) -> EvictionPolicy {
    EvictionPolicy {
        max_entities,
        max_relations,
        ttl,
        relation_order: RelationEviction::LowestValue,
    }
}

fn add_nodes(store: &mut StateStore<Graph>, ids: &[&str], now: Timestamp) {
    let mut batch = BatchUpdate::new(now);
    batch.add_entities = ids.iter().map(|id| GraphNode::new(*id)).collect();
    store.apply(&batch, now);
}

fn add_links(store: &mut StateStore<Graph>, links: &[(&str, &str, f64)]) {
    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.add_relations = links
        .iter()
        .map(|(s, t, v)| Link::new(EntityRef::Key(s.to_string()), EntityRef::Key(t.to_string()), *v))
        .collect();
    store.apply(&batch, Timestamp::ZERO);
}

#[test]
fn entity_cap_evicts_oldest_last_seen() {
    let policy = policy(2, 100, None);
    let mut store = StateStore::<Graph>::new();
    for (i, id) in ["A", "B", "C"].into_iter().enumerate() {
        add_nodes(&mut store, &[id], at(i as u64));
        policy.enforce(&mut store, at(i as u64));
    }
    let keys = store.snapshot(0, at(2)).keys();
    assert_eq!(keys, vec!["B".to_string(), "C".to_string()]);
}

#[test]
fn entity_cap_ties_break_on_insertion_order() {
    let policy = policy(1, 100, None);
    let mut store = StateStore::<Graph>::new();
    add_nodes(&mut store, &["X", "Y", "Z"], at(0));
    let report = policy.enforce(&mut store, at(0));
    assert_eq!(report.entities_evicted, 2);
    assert_eq!(store.snapshot(0, at(0)).keys(), vec!["Z".to_string()]);
}

#[test]
fn evicted_entity_cascades_relations() {
    let policy = policy(2, 100, None);
    let mut store = StateStore::<Graph>::new();
    add_nodes(&mut store, &["A"], at(0));
    add_nodes(&mut store, &["B", "C"], at(1));
    add_links(&mut store, &[("A", "B", 1.0), ("B", "C", 1.0)]);
    let report = policy.enforce(&mut store, at(1));
    assert_eq!(
        report,
        EvictionReport {
            entities_evicted: 1,
            cascaded: 1,
            ..EvictionReport::default()
        }
    );
    store.check_invariants().unwrap();
}

#[test]
fn ttl_prunes_stale_entities() {
    let policy = policy(100, 100, Some(Duration::from_secs(300)));
    let mut store = StateStore::<Graph>::new();
    add_nodes(&mut store, &["old"], at(0));
    add_nodes(&mut store, &["fresh"], at(200_000));

    assert!(policy.enforce(&mut store, at(300_000)).is_empty());
    let report = policy.enforce(&mut store, at(300_001));
    assert_eq!(report.expired, 1);
    assert!(!store.contains_entity(&"old".to_string()));
    assert!(store.contains_entity(&"fresh".to_string()));
}

#[test]
fn relation_cap_drops_lowest_values_first() {
    let policy = policy(100, 2, None);
    let mut store = StateStore::<Graph>::new();
    add_nodes(&mut store, &["A", "B", "C"], at(0));
    add_links(&mut store, &[("A", "B", 5.0), ("B", "C", 1.0), ("C", "A", 1.0), ("A", "C", 9.0)]);
    let report = policy.enforce(&mut store, at(0));
    assert_eq!(report.relations_evicted, 2);
    assert!(store.relation(&"A".into(), &"B".into()).is_some());
    assert!(store.relation(&"A".into(), &"C".into()).is_some());
    assert_eq!(store.entity_count(), 3);
}

#[test]
fn relation_cap_oldest_first_for_point_clouds() {
    let config = EngineConfig {
        max_relations: 1,
        ..EngineConfig::for_schema::<Surface>("")
    };
    let policy = EvictionPolicy::for_schema::<Surface>(&config);
    assert_eq!(policy.relation_order, RelationEviction::OldestInserted);

    let mut store = StateStore::<Surface>::new();
    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.add_entities = vec![
        SurfacePoint::new(0.0, 0.0, 0.0),
        SurfacePoint::new(1.0, 0.0, 0.0),
        SurfacePoint::new(2.0, 0.0, 0.0),
    ];
    batch.add_relations = vec![
        Link::new(EntityRef::Slot(0), EntityRef::Slot(1), 100.0),
        Link::new(EntityRef::Slot(1), EntityRef::Slot(2), 0.0),
    ];
    store.apply(&batch, at(0));
    policy.enforce(&mut store, at(0));

    let snapshot = store.snapshot(0, at(0));
    assert_eq!(snapshot.relation_count(), 1);
    assert_eq!(snapshot.relations[0].value, 0.0);
}

#[test]
fn policy_from_config() {
    let config = EngineConfig::for_schema::<Graph>("ws://x");
    let policy = EvictionPolicy::for_schema::<Graph>(&config);
    assert_eq!(policy.max_entities, 1000);
    assert_eq!(policy.max_relations, 2000);
    assert_eq!(policy.ttl, Some(Duration::from_secs(300)));
}
