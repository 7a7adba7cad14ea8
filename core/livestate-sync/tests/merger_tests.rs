use livestate_sync::merger::merge;
use livestate_sync::{BatchUpdate, EntityPatch, Envelope, ResetState, Update};
use livestate_types::{Attributes, EntityRef, Graph, GraphNode, Link, LinkPatch, LinkSelector, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;

fn env(update: Update<Graph>, ms: u64) -> Envelope<Graph> {
    Envelope::new(update, Timestamp::from_millis(ms))
}

fn attrs(value: serde_json::Value) -> Attributes {
    serde_json::from_value(value).unwrap()
}

fn key(id: &str) -> EntityRef<String> {
    EntityRef::Key(id.to_string())
}

#[test]
fn ops_are_grouped_in_arrival_order() {
    let batch = merge(vec![
        env(Update::AddEntity(GraphNode::new("A")), 1),
        env(Update::AddRelation(Link::new(key("A"), key("B"), 1.0)), 2),
        env(Update::AddEntity(GraphNode::new("B")), 3),
        env(Update::RemoveEntity("C".into()), 4),
    ]);
    assert_eq!(batch.add_entities, vec![GraphNode::new("A"), GraphNode::new("B")]);
    assert_eq!(batch.add_relations.len(), 1);
    assert_eq!(batch.remove_entities, vec!["C".to_string()]);
    assert_eq!(batch.timestamp, Timestamp::from_millis(4));
    assert!(batch.reset.is_none());
}

#[test]
fn first_add_of_a_key_wins() {
    let batch = merge(vec![
        env(Update::AddEntity(GraphNode::new("A").with_attribute("v", 1)), 0),
        env(Update::AddEntity(GraphNode::new("A").with_attribute("v", 2)), 0),
    ]);
    assert_eq!(batch.add_entities, vec![GraphNode::new("A").with_attribute("v", 1)]);
}

#[test]
fn updates_to_one_key_fold_with_later_fields_winning() {
    let batch = merge(vec![
        env(Update::UpdateEntity(EntityPatch::new("A".into(), attrs(json!({"color": "red", "size": 1})))), 0),
        env(Update::UpdateEntity(EntityPatch::new("B".into(), attrs(json!({"size": 9})))), 0),
        env(Update::UpdateEntity(EntityPatch::new("A".into(), attrs(json!({"color": "blue"})))), 0),
    ]);
    assert_eq!(batch.update_entities.len(), 2);
    assert_eq!(batch.update_entities[0].key, "A");
    assert_eq!(batch.update_entities[0].updates, attrs(json!({"color": "blue", "size": 1})));
    assert_eq!(batch.update_entities[1].key, "B");
}

#[test]
fn repeated_removes_collapse() {
    let batch = merge(vec![
        env(Update::RemoveEntity("A".into()), 0),
        env(Update::RemoveEntity("A".into()), 0),
        env(Update::RemoveRelation(LinkSelector::new(key("A"), key("B"))), 0),
        env(Update::RemoveRelation(LinkSelector::new(key("A"), key("B"))), 0),
    ]);
    assert_eq!(batch.remove_entities.len(), 1);
    assert_eq!(batch.remove_relations.len(), 1);
}

#[test]
fn relation_updates_fold_per_pair() {
    let batch = merge(vec![
        env(Update::UpdateRelation(LinkPatch { source: key("A"), target: key("B"), updates: attrs(json!({"value": 1})) }), 0),
        env(Update::UpdateRelation(LinkPatch { source: key("A"), target: key("B"), updates: attrs(json!({"value": 3, "w": 1})) }), 0),
    ]);
    assert_eq!(batch.update_relations.len(), 1);
    assert_eq!(batch.update_relations[0].updates, attrs(json!({"value": 3, "w": 1})));
}

#[test]
fn nested_batches_are_flattened() {
    let mut nested = BatchUpdate::<Graph>::new(Timestamp::from_millis(5));
    nested.add_entities.push(GraphNode::new("A"));
    nested.add_entities.push(GraphNode::new("B"));
    nested.remove_entities.push("Z".into());

    let batch = merge(vec![
        env(Update::AddEntity(GraphNode::new("A")), 1),
        env(Update::Batch(nested), 2),
    ]);
    assert_eq!(batch.add_entities, vec![GraphNode::new("A"), GraphNode::new("B")]);
    assert_eq!(batch.remove_entities, vec!["Z".to_string()]);
}

#[test]
fn last_reset_wins_and_discards_everything_else() {
    let first = ResetState::<Graph>::new(vec![GraphNode::new("B")], Vec::new());
    let last = ResetState::<Graph>::new(vec![GraphNode::new("D")], Vec::new());
    let batch = merge(vec![
        env(Update::AddEntity(GraphNode::new("A")), 1),
        env(Update::Reset(first), 2),
        env(Update::AddEntity(GraphNode::new("C")), 3),
        env(Update::Reset(last.clone()), 4),
        env(Update::RemoveEntity("D".into()), 5),
    ]);
    assert_eq!(batch.reset, Some(last));
    assert_eq!(batch.op_count(), 0);
}

#[test]
fn batch_carrying_a_reset_keeps_its_own_ops() {
    let mut nested = BatchUpdate::<Graph>::new(Timestamp::from_millis(3));
    nested.reset = Some(ResetState::new(vec![GraphNode::new("X")], Vec::new()));
    nested.add_entities.push(GraphNode::new("Y"));

    let batch = merge(vec![
        env(Update::AddEntity(GraphNode::new("A")), 1),
        env(Update::Reset(ResetState::new(vec![GraphNode::new("B")], Vec::new())), 2),
        env(Update::Batch(nested), 3),
    ]);
    assert_eq!(
        batch.reset,
        Some(ResetState::new(vec![GraphNode::new("X")], Vec::new()))
    );
    assert_eq!(batch.add_entities, vec![GraphNode::new("Y")]);
    assert_eq!(batch.timestamp, Timestamp::from_millis(3));
}

#[test]
fn server_errors_are_skipped() {
    let batch = merge(vec![
        env(Update::ServerError("boom".into()), 0),
        env(Update::AddEntity(GraphNode::new("A")), 0),
    ]);
    assert_eq!(batch.op_count(), 1);
}

#[test]
fn empty_flush() {
    let batch = merge::<Graph>(Vec::new());
    assert!(batch.is_empty());
    assert_eq!(batch.timestamp, Timestamp::ZERO);
}
