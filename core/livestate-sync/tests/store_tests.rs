use livestate_sync::{BatchUpdate, EntityPatch, ResetState, StateStore};
use livestate_types::{
    Attributes, EntityRef, Graph, GraphNode, Link, LinkPatch, LinkSelector, Sankey, SankeyNode,
    Timestamp,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn key(id: &str) -> EntityRef<String> {
    EntityRef::Key(id.to_string())
}

fn link(source: &str, target: &str, value: f64) -> Link<EntityRef<String>> {
    Link::new(key(source), key(target), value)
}

fn at(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn graph_batch(nodes: &[&str], links: &[(&str, &str, f64)]) -> BatchUpdate<Graph> {
    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.add_entities = nodes.iter().map(|id| GraphNode::new(*id)).collect();
    batch.add_relations = links.iter().map(|(s, t, v)| link(s, t, *v)).collect();
    batch
}

// ── Entities ─────────────────────────────────────────────────────

#[test]
fn nodes_then_link_scenario() {
    let mut store = StateStore::<Graph>::new();
    let outcome = store.apply(&graph_batch(&["A", "B"], &[("A", "B", 5.0)]), at(0));
    assert!(outcome.changed && outcome.grew);

    let snapshot = store.snapshot(1, at(0));
    assert_eq!(snapshot.entities, vec![GraphNode::new("A"), GraphNode::new("B")]);
    assert_eq!(snapshot.relations, vec![Link::new("A".to_string(), "B".to_string(), 5.0)]);
    store.check_invariants().unwrap();
}

#[test]
fn add_is_idempotent_within_and_across_batches() {
    let mut store = StateStore::<Graph>::new();
    store.apply(&graph_batch(&["A", "A"], &[]), at(0));
    let once = store.snapshot(1, at(0));
    let outcome = store.apply(&graph_batch(&["A"], &[]), at(5));
    assert!(!outcome.changed);
    assert_eq!(store.snapshot(1, at(0)), once);
    assert_eq!(store.last_seen(&"A".to_string()), Some(at(0)));
}

#[test]
fn update_merges_and_refreshes_last_seen() {
    let mut store = StateStore::<Graph>::new();
    store.apply(&graph_batch(&["A"], &[]), at(0));

    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.update_entities.push(EntityPatch::new(
        "A".to_string(),
        serde_json::from_value::<Attributes>(json!({"color": "red"})).unwrap(),
    ));
    batch.update_entities.push(EntityPatch::new("missing".to_string(), Attributes::new()));
    let outcome = store.apply(&batch, at(50));

    assert!(outcome.changed);
    assert!(!outcome.grew);
    assert_eq!(
        store.entity(&"A".to_string()),
        Some(&GraphNode::new("A").with_attribute("color", "red"))
    );
    assert_eq!(store.last_seen(&"A".to_string()), Some(at(50)));
    assert!(!store.contains_entity(&"missing".to_string()));
}

#[test]
fn removing_absent_entity_is_a_noop() {
    let mut store = StateStore::<Graph>::new();
    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.remove_entities.push("ghost".into());
    assert!(!store.apply(&batch, at(0)).changed);
}

// ── Relations ────────────────────────────────────────────────────

#[test]
fn remove_cascades_exactly_the_touching_relations() {
    let mut store = StateStore::<Graph>::new();
    store.apply(
        &graph_batch(
            &["A", "B", "C", "D"],
            &[("A", "B", 1.0), ("B", "C", 1.0), ("C", "A", 1.0), ("C", "D", 1.0), ("B", "B", 1.0)],
        ),
        at(0),
    );
    assert_eq!(store.remove_entity(&"B".to_string()), Some(3));

    let snapshot = store.snapshot(2, at(0));
    let pairs: Vec<_> = snapshot
        .relations
        .iter()
        .map(|l| (l.source.as_str(), l.target.as_str()))
        .collect();
    assert_eq!(pairs, vec![("C", "A"), ("C", "D")]);
    store.check_invariants().unwrap();
}

#[test]
fn relation_to_missing_entity_is_rejected() {
    let mut store = StateStore::<Graph>::new();
    let outcome = store.apply(&graph_batch(&["A"], &[("A", "Z", 1.0)]), at(0));
    assert_eq!(outcome.rejected_relations, 1);
    assert_eq!(store.relation_count(), 0);
}

#[test]
fn duplicate_relation_add_is_a_noop() {
    let mut store = StateStore::<Graph>::new();
    store.apply(&graph_batch(&["A", "B"], &[("A", "B", 1.0)]), at(0));
    let outcome = store.apply(&graph_batch(&[], &[("A", "B", 9.0)]), at(1));
    assert!(!outcome.changed);
    assert_eq!(store.relation(&"A".into(), &"B".into()).map(|l| l.value), Some(1.0));
}

#[test]
fn relation_update_and_remove() {
    let mut store = StateStore::<Graph>::new();
    store.apply(&graph_batch(&["A", "B"], &[("A", "B", 1.0), ("B", "A", 2.0)]), at(0));

    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.update_relations.push(LinkPatch {
        source: key("A"),
        target: key("B"),
        updates: serde_json::from_value(json!({"value": 7, "label": "x"})).unwrap(),
    });
    batch.remove_relations.push(LinkSelector::new(key("B"), key("A")));
    assert!(store.apply(&batch, at(1)).changed);

    let updated = store.relation(&"A".into(), &"B".into()).unwrap();
    assert_eq!(updated.value, 7.0);
    assert_eq!(updated.attributes.get("label"), Some(&json!("x")));
    assert!(store.relation(&"B".into(), &"A".into()).is_none());
    store.check_invariants().unwrap();
}

// ── Slots ────────────────────────────────────────────────────────

fn ten_sankey_nodes() -> StateStore<Sankey> {
    let mut store = StateStore::<Sankey>::new();
    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.add_entities = (0..10).map(|i| SankeyNode::new(format!("n{i}"))).collect();
    batch.add_relations = vec![
        Link::new(EntityRef::Slot(0), EntityRef::Slot(4), 1.0),
        Link::new(EntityRef::Slot(5), EntityRef::Slot(9), 1.0),
        Link::new(EntityRef::Slot(2), EntityRef::Slot(3), 1.0),
        Link::new(EntityRef::Slot(1), EntityRef::Slot(7), 1.0),
    ];
    store.apply(&batch, at(0));
    store
}

#[test]
fn slots_resolve_against_insertion_order() {
    let store = ten_sankey_nodes();
    assert_eq!(store.resolve(&EntityRef::Slot(4)), Some("n4".to_string()));
    assert_eq!(store.resolve(&EntityRef::Slot(10)), None);
    assert_eq!(store.relation_count(), 4);
}

#[test]
fn removing_slot_three_shifts_later_slots_down() {
    let mut store = ten_sankey_nodes();
    let before = store.snapshot(1, at(0)).indexed_relations();
    let before: Vec<_> = before.iter().map(|l| (l.source, l.target)).collect();
    assert_eq!(before, vec![(0, 4), (5, 9), (2, 3), (1, 7)]);

    let mut batch = BatchUpdate::new(Timestamp::ZERO);
    batch.remove_entities.push("n3".to_string());
    store.apply(&batch, at(1));

    let after = store.snapshot(2, at(1));
    let indexed: Vec<_> = after
        .indexed_relations()
        .iter()
        .map(|l| (l.source, l.target))
        .collect();
    assert_eq!(indexed, vec![(0, 3), (4, 8), (1, 6)]);
    assert!(indexed.iter().all(|(s, t)| *s < 9 && *t < 9));

    // the wire slot 3 now names what used to be slot 4
    assert_eq!(store.resolve(&EntityRef::Slot(3)), Some("n4".to_string()));
    store.check_invariants().unwrap();
}

// ── Reset ────────────────────────────────────────────────────────

#[test]
fn reset_round_trip() {
    let mut store = StateStore::<Graph>::new();
    store.apply(&graph_batch(&["A", "B", "C"], &[("A", "B", 2.0), ("C", "A", 3.0)]), at(0));
    let original = store.snapshot(1, at(0));

    let mut other = StateStore::<Graph>::new();
    other.apply(&graph_batch(&["X"], &[]), at(0));
    let rejected = other.reset(&ResetState::from(&original), at(10));

    assert_eq!(rejected, 0);
    assert_eq!(other.snapshot(1, at(0)), original);
    other.check_invariants().unwrap();
}

#[test]
fn reset_resolves_slots_against_new_entities() {
    let mut store = StateStore::<Sankey>::new();
    let state = ResetState::new(
        vec![SankeyNode::new("a"), SankeyNode::new("b")],
        vec![
            Link::new(EntityRef::Slot(0), EntityRef::Slot(1), 4.0),
            Link::new(EntityRef::Slot(0), EntityRef::Slot(5), 1.0),
        ],
    );
    assert_eq!(store.reset(&state, at(0)), 1);
    assert!(store.relation(&"a".into(), &"b".into()).is_some());
}

#[test]
fn reset_inside_batch_applies_first() {
    let mut store = StateStore::<Graph>::new();
    store.apply(&graph_batch(&["old"], &[]), at(0));

    let mut batch = graph_batch(&["B"], &[("A", "B", 1.0)]);
    batch.reset = Some(ResetState::new(vec![GraphNode::new("A")], Vec::new()));
    store.apply(&batch, at(1));

    let snapshot = store.snapshot(1, at(1));
    assert_eq!(snapshot.keys(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(snapshot.relation_count(), 1);
}
