//! Network graph: nodes keyed by id, weighted links.

use crate::record::{merge_attributes, Attributes};
use crate::schema::{deserialize_key, string_selector, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Schema marker for live network graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Graph;

/// A graph node. Anything besides `id` is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(deserialize_with = "deserialize_key")]
    pub id: String,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }
}

impl Schema for Graph {
    type Key = String;
    type Entity = GraphNode;

    const NAME: &'static str = "graph";
    const DEFAULT_BATCH_SIZE: usize = 10;
    const DEFAULT_MAX_ENTITIES: usize = 1000;
    const DEFAULT_MAX_RELATIONS: usize = 2000;
    const DEFAULT_TTL: Option<Duration> = Some(Duration::from_secs(300));

    fn key_of(entity: &GraphNode) -> String {
        entity.id.clone()
    }

    fn selector_key(selector: &Value) -> crate::Result<String> {
        string_selector(selector, "id")
    }

    fn apply_patch(entity: &mut GraphNode, patch: &Attributes) -> bool {
        merge_attributes(&mut entity.attributes, patch, &["id"])
    }
}
