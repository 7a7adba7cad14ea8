//! Wire protocol for inbound update frames.
//!
//! Every frame is a JSON object `{ "type", "data", "timestamp" }`. The
//! decoder turns it into a typed [`Envelope`] for schema `S`; anything that
//! does not fit is reported as a [`DecodeError`] and the frame is dropped.
//!
//! Batch payloads use camelCase list names (`addNodes`, `updateLinks`, ...);
//! surface servers send `addPoints`/`updatePoints`/`removePoints` instead,
//! which are accepted as aliases.

use crate::error::DecodeError;
use livestate_types::{Attributes, EntityRef, Link, LinkPatch, LinkSelector, Schema, Timestamp};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Entity reference as carried on the wire for schema `S`.
pub type WireRef<S> = EntityRef<<S as Schema>::Key>;

/// Relation as carried on the wire for schema `S`.
pub type WireLink<S> = Link<WireRef<S>>;

/// The kind of an update frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    AddEntity,
    UpdateEntity,
    RemoveEntity,
    AddRelation,
    UpdateRelation,
    RemoveRelation,
    Batch,
    Reset,
    Error,
}

impl UpdateKind {
    /// Parses the `type` field of a frame.
    pub fn from_wire(kind: &str) -> Option<Self> {
        Some(match kind {
            "add_node" | "add_point" => Self::AddEntity,
            "update_node" | "update_point" => Self::UpdateEntity,
            "remove_node" | "remove_point" => Self::RemoveEntity,
            "add_link" => Self::AddRelation,
            "update_link" => Self::UpdateRelation,
            "remove_link" => Self::RemoveRelation,
            "batch_update" => Self::Batch,
            "reset" => Self::Reset,
            "error" => Self::Error,
            _ => return None,
        })
    }

    /// The canonical wire name.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::AddEntity => "add_node",
            Self::UpdateEntity => "update_node",
            Self::RemoveEntity => "remove_node",
            Self::AddRelation => "add_link",
            Self::UpdateRelation => "update_link",
            Self::RemoveRelation => "remove_link",
            Self::Batch => "batch_update",
            Self::Reset => "reset",
            Self::Error => "error",
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<S: Schema> {
    pub update: Update<S>,
    /// Server timestamp; 0 when the frame carried none.
    pub timestamp: Timestamp,
}

impl<S: Schema> Envelope<S> {
    pub fn new(update: Update<S>, timestamp: Timestamp) -> Self {
        Self { update, timestamp }
    }
}

/// A single mutation or control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<S: Schema> {
    AddEntity(S::Entity),
    UpdateEntity(EntityPatch<S::Key>),
    RemoveEntity(S::Key),
    AddRelation(WireLink<S>),
    UpdateRelation(LinkPatch<WireRef<S>>),
    RemoveRelation(LinkSelector<WireRef<S>>),
    Batch(BatchUpdate<S>),
    Reset(ResetState<S>),
    /// Server-reported error; logged and skipped.
    ServerError(String),
}

impl<S: Schema> Update<S> {
    pub fn kind(&self) -> UpdateKind {
        match self {
            Self::AddEntity(_) => UpdateKind::AddEntity,
            Self::UpdateEntity(_) => UpdateKind::UpdateEntity,
            Self::RemoveEntity(_) => UpdateKind::RemoveEntity,
            Self::AddRelation(_) => UpdateKind::AddRelation,
            Self::UpdateRelation(_) => UpdateKind::UpdateRelation,
            Self::RemoveRelation(_) => UpdateKind::RemoveRelation,
            Self::Batch(_) => UpdateKind::Batch,
            Self::Reset(_) => UpdateKind::Reset,
            Self::ServerError(_) => UpdateKind::Error,
        }
    }
}

/// A field patch addressed to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPatch<K> {
    pub key: K,
    pub updates: Attributes,
}

impl<K> EntityPatch<K> {
    pub fn new(key: K, updates: Attributes) -> Self {
        Self { key, updates }
    }
}

/// Full replacement of the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetState<S: Schema> {
    pub entities: Vec<S::Entity>,
    pub relations: Vec<WireLink<S>>,
}

impl<S: Schema> Default for ResetState<S> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            relations: Vec::new(),
        }
    }
}

impl<S: Schema> ResetState<S> {
    pub fn new(entities: Vec<S::Entity>, relations: Vec<WireLink<S>>) -> Self {
        Self {
            entities,
            relations,
        }
    }

    /// Accepts `null`, a bare entity array, or an object carrying
    /// `nodes|points|entities` and `links|relations`.
    fn from_payload(data: Value) -> Result<Self, DecodeError> {
        const KIND: &str = "reset";
        match data {
            Value::Null => Ok(Self::default()),
            Value::Array(items) => Ok(Self {
                entities: decode_list(KIND, items)?,
                relations: Vec::new(),
            }),
            Value::Object(mut map) => {
                let entities = ["nodes", "points", "entities"]
                    .iter()
                    .find_map(|field| map.remove(*field))
                    .map(|v| decode_value::<Vec<S::Entity>>(KIND, v))
                    .transpose()?
                    .unwrap_or_default();
                let relations = ["links", "relations"]
                    .iter()
                    .find_map(|field| map.remove(*field))
                    .map(|v| decode_value::<Vec<WireLink<S>>>(KIND, v))
                    .transpose()?
                    .unwrap_or_default();
                Ok(Self {
                    entities,
                    relations,
                })
            }
            other => Err(invalid(KIND, format!("unexpected payload {other}"))),
        }
    }
}

/// Mutations grouped by kind. Produced by the server as a `batch_update`
/// frame and by the merger once per flush.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdate<S: Schema> {
    /// When set, replaces the whole model before the lists below apply.
    pub reset: Option<ResetState<S>>,
    pub add_entities: Vec<S::Entity>,
    pub update_entities: Vec<EntityPatch<S::Key>>,
    pub remove_entities: Vec<S::Key>,
    pub add_relations: Vec<WireLink<S>>,
    pub update_relations: Vec<LinkPatch<WireRef<S>>>,
    pub remove_relations: Vec<LinkSelector<WireRef<S>>>,
    pub timestamp: Timestamp,
}

impl<S: Schema> Default for BatchUpdate<S> {
    fn default() -> Self {
        Self::new(Timestamp::ZERO)
    }
}

impl<S: Schema> BatchUpdate<S> {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            reset: None,
            add_entities: Vec::new(),
            update_entities: Vec::new(),
            remove_entities: Vec::new(),
            add_relations: Vec::new(),
            update_relations: Vec::new(),
            remove_relations: Vec::new(),
            timestamp,
        }
    }

    /// Number of individual operations, not counting a reset.
    pub fn op_count(&self) -> usize {
        self.add_entities.len()
            + self.update_entities.len()
            + self.remove_entities.len()
            + self.add_relations.len()
            + self.update_relations.len()
            + self.remove_relations.len()
    }

    /// True if applying this batch cannot change anything.
    pub fn is_empty(&self) -> bool {
        self.reset.is_none() && self.op_count() == 0
    }

    fn from_payload(data: Value) -> Result<Self, DecodeError> {
        const KIND: &str = "batch_update";
        let raw: RawBatch = decode_value(KIND, data)?;
        Ok(Self {
            reset: raw.reset.map(ResetState::from_payload).transpose()?,
            add_entities: decode_list(KIND, raw.add_nodes)?,
            update_entities: raw
                .update_nodes
                .into_iter()
                .map(|v| entity_patch::<S>(KIND, v))
                .collect::<Result<_, _>>()?,
            remove_entities: raw
                .remove_nodes
                .iter()
                .map(|v| entity_key::<S>(KIND, v))
                .collect::<Result<_, _>>()?,
            add_relations: decode_list(KIND, raw.add_links)?,
            update_relations: decode_list(KIND, raw.update_links)?,
            remove_relations: decode_list(KIND, raw.remove_links)?,
            timestamp: raw.timestamp.map(millis).unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatch {
    #[serde(default, alias = "addPoints")]
    add_nodes: Vec<Value>,
    #[serde(default, alias = "updatePoints")]
    update_nodes: Vec<Value>,
    #[serde(default, alias = "removePoints")]
    remove_nodes: Vec<Value>,
    #[serde(default)]
    add_links: Vec<Value>,
    #[serde(default)]
    update_links: Vec<Value>,
    #[serde(default)]
    remove_links: Vec<Value>,
    /// Replaces the whole state before the operations apply. `null` means
    /// no reset.
    #[serde(default)]
    reset: Option<Value>,
    #[serde(default)]
    timestamp: Option<f64>,
}

/// Decodes one inbound frame for schema `S`.
pub fn decode<S: Schema>(raw: &str) -> Result<Envelope<S>, DecodeError> {
    let frame: RawEnvelope = serde_json::from_str(raw)?;
    let kind =
        UpdateKind::from_wire(&frame.kind).ok_or(DecodeError::UnknownKind(frame.kind))?;
    let update = decode_update::<S>(kind, frame.data)?;
    Ok(Envelope {
        update,
        timestamp: frame.timestamp.map(millis).unwrap_or_default(),
    })
}

fn decode_update<S: Schema>(kind: UpdateKind, data: Value) -> Result<Update<S>, DecodeError> {
    let name = kind.as_wire();
    Ok(match kind {
        UpdateKind::AddEntity => Update::AddEntity(decode_value(name, data)?),
        UpdateKind::UpdateEntity => Update::UpdateEntity(entity_patch::<S>(name, data)?),
        UpdateKind::RemoveEntity => Update::RemoveEntity(entity_key::<S>(name, &data)?),
        UpdateKind::AddRelation => Update::AddRelation(decode_value(name, data)?),
        UpdateKind::UpdateRelation => Update::UpdateRelation(decode_value(name, data)?),
        UpdateKind::RemoveRelation => Update::RemoveRelation(decode_value(name, data)?),
        UpdateKind::Batch => Update::Batch(BatchUpdate::from_payload(data)?),
        UpdateKind::Reset => Update::Reset(ResetState::from_payload(data)?),
        UpdateKind::Error => Update::ServerError(error_message(data)),
    })
}

fn entity_key<S: Schema>(kind: &'static str, selector: &Value) -> Result<S::Key, DecodeError> {
    S::selector_key(selector).map_err(|e| invalid(kind, e.to_string()))
}

fn entity_patch<S: Schema>(
    kind: &'static str,
    data: Value,
) -> Result<EntityPatch<S::Key>, DecodeError> {
    let key = entity_key::<S>(kind, &data)?;
    let updates = match data {
        Value::Object(mut map) => match map.remove("updates") {
            Some(Value::Object(updates)) => updates,
            Some(Value::Null) | None => Attributes::new(),
            Some(other) => return Err(invalid(kind, format!("updates is not an object: {other}"))),
        },
        _ => Attributes::new(),
    };
    Ok(EntityPatch { key, updates })
}

fn error_message(data: Value) -> String {
    match data {
        Value::String(message) => message,
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => Value::Object(map).to_string(),
        },
        other => other.to_string(),
    }
}

fn decode_value<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| invalid(kind, e.to_string()))
}

fn decode_list<T: DeserializeOwned>(
    kind: &'static str,
    items: Vec<Value>,
) -> Result<Vec<T>, DecodeError> {
    items.into_iter().map(|v| decode_value(kind, v)).collect()
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidPayload {
        kind,
        reason: reason.into(),
    }
}

fn millis(raw: f64) -> Timestamp {
    if raw.is_finite() && raw > 0.0 {
        Timestamp::from_millis(raw as u64)
    } else {
        Timestamp::ZERO
    }
}
