//! Relations and the loosely-typed attribute maps carried by every record.
//!
//! Entities are schema-specific (see [`crate::variants`]), but relations have
//! the same shape in every visualization: two endpoints, a numeric value and
//! free-form attributes. On the wire an endpoint may be a key or, for
//! index-addressed formats, a positional slot; inside the store it is always
//! a key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form record attributes (a JSON object).
pub type Attributes = serde_json::Map<String, Value>;

/// Fields of a relation that identify it and can never be patched.
pub const LINK_RESERVED_FIELDS: &[&str] = &["source", "target", "from", "to"];

/// Shallow-merges `patch` into `target`, skipping `reserved` fields.
///
/// Returns true if any value was inserted or replaced.
pub fn merge_attributes(target: &mut Attributes, patch: &Attributes, reserved: &[&str]) -> bool {
    let mut changed = false;
    for (field, value) in patch {
        if reserved.contains(&field.as_str()) {
            continue;
        }
        if target.get(field) != Some(value) {
            target.insert(field.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Reference to an entity as it appears in a wire payload.
///
/// Numbers are positional slots (the entity's index in insertion order);
/// anything else is parsed as a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef<K> {
    /// Position in the current insertion order.
    Slot(usize),
    /// Entity key.
    Key(K),
}

impl<K> EntityRef<K> {
    /// Returns the key if this reference is key-addressed.
    pub fn as_key(&self) -> Option<&K> {
        match self {
            Self::Key(key) => Some(key),
            Self::Slot(_) => None,
        }
    }
}

impl<K> From<K> for EntityRef<K> {
    fn from(key: K) -> Self {
        Self::Key(key)
    }
}

/// A weighted, directed relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link<K> {
    /// Origin endpoint.
    #[serde(alias = "from")]
    pub source: K,
    /// Destination endpoint.
    #[serde(alias = "to")]
    pub target: K,
    /// Weight; drives relation-cap eviction for valued schemas.
    #[serde(default)]
    pub value: f64,
    /// Everything else the server attached.
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl<K> Link<K> {
    /// Creates a link without attributes.
    pub fn new(source: K, target: K, value: f64) -> Self {
        Self {
            source,
            target,
            value,
            attributes: Attributes::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    /// Rewrites both endpoints, failing if either cannot be mapped.
    pub fn try_map_endpoints<J>(self, mut f: impl FnMut(&K) -> Option<J>) -> Option<Link<J>> {
        let source = f(&self.source)?;
        let target = f(&self.target)?;
        Some(Link {
            source,
            target,
            value: self.value,
            attributes: self.attributes,
        })
    }

    /// Applies an update: `value` is taken if numeric, endpoints are ignored,
    /// everything else is shallow-merged. Returns true on any change.
    pub fn apply_patch(&mut self, patch: &Attributes) -> bool {
        let mut changed = false;
        for (field, value) in patch {
            match field.as_str() {
                f if LINK_RESERVED_FIELDS.contains(&f) => {}
                "value" => {
                    if let Some(v) = value.as_f64() {
                        if v != self.value {
                            self.value = v;
                            changed = true;
                        }
                    }
                }
                _ => {
                    if self.attributes.get(field) != Some(value) {
                        self.attributes.insert(field.clone(), value.clone());
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}

/// Identifies a relation by its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSelector<K> {
    #[serde(alias = "from")]
    pub source: K,
    #[serde(alias = "to")]
    pub target: K,
}

impl<K> LinkSelector<K> {
    pub fn new(source: K, target: K) -> Self {
        Self { source, target }
    }
}

/// An update addressed to one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPatch<K> {
    #[serde(alias = "from")]
    pub source: K,
    #[serde(alias = "to")]
    pub target: K,
    #[serde(default)]
    pub updates: Attributes,
}

impl<K: Clone> LinkPatch<K> {
    /// The selector this patch is addressed to.
    pub fn selector(&self) -> LinkSelector<K> {
        LinkSelector::new(self.source.clone(), self.target.clone())
    }
}
