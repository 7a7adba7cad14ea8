//! Sankey flow diagram: nodes keyed by name, flows addressed by name or by
//! node position.

use crate::record::{merge_attributes, Attributes};
use crate::schema::{deserialize_key, string_selector, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema marker for live Sankey diagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sankey;

/// A Sankey node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SankeyNode {
    #[serde(deserialize_with = "deserialize_key")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl SankeyNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            value: None,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

impl Schema for Sankey {
    type Key = String;
    type Entity = SankeyNode;

    const NAME: &'static str = "sankey";
    const DEFAULT_BATCH_SIZE: usize = 10;
    const DEFAULT_MAX_ENTITIES: usize = 100;
    const DEFAULT_MAX_RELATIONS: usize = 200;

    fn key_of(entity: &SankeyNode) -> String {
        entity.name.clone()
    }

    fn selector_key(selector: &Value) -> crate::Result<String> {
        string_selector(selector, "name")
    }

    fn apply_patch(entity: &mut SankeyNode, patch: &Attributes) -> bool {
        let mut changed = false;
        let mut rest = Attributes::new();
        for (field, value) in patch {
            match field.as_str() {
                "name" => {}
                "category" => {
                    let category = value.as_str().map(str::to_owned);
                    if entity.category != category {
                        entity.category = category;
                        changed = true;
                    }
                }
                "value" => {
                    let v = value.as_f64();
                    if entity.value != v {
                        entity.value = v;
                        changed = true;
                    }
                }
                _ => {
                    rest.insert(field.clone(), value.clone());
                }
            }
        }
        merge_attributes(&mut entity.attributes, &rest, &[]) || changed
    }
}
