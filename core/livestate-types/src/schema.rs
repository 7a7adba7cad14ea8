//! The per-visualization adapter the engine is generic over.

use crate::{Attributes, Error};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

/// How the relation cap chooses which relations to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationEviction {
    /// Lowest `value` first; insertion order breaks ties.
    LowestValue,
    /// Oldest-inserted first, for schemas without a meaningful weight.
    OldestInserted,
}

/// Describes one kind of live visualization.
///
/// A schema supplies the entity record type, how to extract its key, how to
/// read a key out of the selector carried by update/remove messages, and how
/// to shallow-merge a patch. Implementors are zero-sized markers.
pub trait Schema:
    Clone + Copy + Default + PartialEq + Eq + fmt::Debug + Send + Sync + 'static
{
    /// Unique key of an entity.
    type Key: Clone
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// The entity record.
    type Entity: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Short name used in log output.
    const NAME: &'static str;

    /// Relation-cap victim order.
    const RELATION_EVICTION: RelationEviction = RelationEviction::LowestValue;

    /// Envelopes buffered before a forced flush.
    const DEFAULT_BATCH_SIZE: usize = 10;

    /// Entity cap.
    const DEFAULT_MAX_ENTITIES: usize = 1000;

    /// Relation cap.
    const DEFAULT_MAX_RELATIONS: usize = 2000;

    /// Time-to-live for entities not seen in updates. `None` disables pruning.
    const DEFAULT_TTL: Option<Duration> = None;

    /// Extracts the key of an entity.
    fn key_of(entity: &Self::Entity) -> Self::Key;

    /// Reads the key from an update/remove selector. Selectors are either a
    /// bare key or an object carrying the key fields.
    fn selector_key(selector: &Value) -> crate::Result<Self::Key>;

    /// Shallow-merges `patch` into `entity` without touching its key.
    /// Returns true if anything changed.
    fn apply_patch(entity: &mut Self::Entity, patch: &Attributes) -> bool;
}

/// Reads a string key that is either the selector itself or its `field`.
/// Numeric keys are accepted and rendered as decimal strings.
pub fn string_selector(selector: &Value, field: &str) -> crate::Result<String> {
    let raw = match selector {
        Value::Object(map) => map.get(field),
        other => Some(other),
    };
    match raw {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::InvalidPayload(format!(
            "expected a string `{field}` selector"
        ))),
    }
}

/// Deserializes an entity's own key field with the same rules as
/// [`string_selector`], so a node added as `{"id": 5}` can be removed by `5`.
pub fn deserialize_key<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(key) => Ok(key),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number key, got {other}"
        ))),
    }
}
