use livestate_types::{EngineId, SubscriptionId};
use std::collections::HashSet;
use std::str::FromStr;

// ── SubscriptionId ────────────────────────────────────────────────

#[test]
fn subscription_id_new_is_unique() {
    let a = SubscriptionId::new();
    let b = SubscriptionId::new();
    assert_ne!(a, b);
}

#[test]
fn subscription_id_display_matches_uuid() {
    let id = SubscriptionId::default();
    assert_eq!(id.to_string(), id.as_uuid().to_string());
}

#[test]
fn subscription_id_serializes_transparently() {
    let id = SubscriptionId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", id.as_uuid()));
}

// ── EngineId ──────────────────────────────────────────────────────

#[test]
fn engine_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    let id = EngineId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn engine_id_display_and_parse() {
    let id = EngineId::new();
    let parsed = EngineId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn engine_id_from_str_invalid() {
    assert!(EngineId::from_str("garbage").is_err());
    assert!(EngineId::parse("not-a-uuid").is_err());
}

#[test]
fn engine_id_hash_and_eq() {
    let id = EngineId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    set.insert(EngineId::default());
    assert_eq!(set.len(), 2);
}
