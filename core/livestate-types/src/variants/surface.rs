//! 3-D surface: points keyed by their grid position.

use crate::record::{merge_attributes, Attributes};
use crate::schema::{RelationEviction, Schema};
use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Schema marker for live surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Surface;

/// Grid position of a surface point.
///
/// Compared bitwise so it can be hashed; `-0.0` is folded into `0.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridKey {
    pub x: f64,
    pub y: f64,
}

impl GridKey {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn bits(&self) -> (u64, u64) {
        // adding 0.0 turns -0.0 into 0.0
        ((self.x + 0.0).to_bits(), (self.y + 0.0).to_bits())
    }
}

impl PartialEq for GridKey {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for GridKey {}

impl Hash for GridKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// A sampled surface point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl SurfacePoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            attributes: Attributes::new(),
        }
    }

    pub fn key(&self) -> GridKey {
        GridKey::new(self.x, self.y)
    }
}

impl Schema for Surface {
    type Key = GridKey;
    type Entity = SurfacePoint;

    const NAME: &'static str = "surface";
    const RELATION_EVICTION: RelationEviction = RelationEviction::OldestInserted;
    const DEFAULT_BATCH_SIZE: usize = 20;
    const DEFAULT_MAX_ENTITIES: usize = 1000;
    const DEFAULT_MAX_RELATIONS: usize = 1000;

    fn key_of(entity: &SurfacePoint) -> GridKey {
        entity.key()
    }

    /// Accepts `{ "x": .., "y": .. }` or `[x, y]`.
    fn selector_key(selector: &Value) -> crate::Result<GridKey> {
        let (x, y) = match selector {
            Value::Object(map) => (map.get("x"), map.get("y")),
            Value::Array(items) => (items.first(), items.get(1)),
            _ => (None, None),
        };
        match (x.and_then(Value::as_f64), y.and_then(Value::as_f64)) {
            (Some(x), Some(y)) => Ok(GridKey::new(x, y)),
            _ => Err(Error::InvalidPayload(
                "surface selector needs numeric x and y".into(),
            )),
        }
    }

    fn apply_patch(entity: &mut SurfacePoint, patch: &Attributes) -> bool {
        let mut changed = false;
        if let Some(z) = patch.get("z").and_then(Value::as_f64) {
            if z != entity.z {
                entity.z = z;
                changed = true;
            }
        }
        merge_attributes(&mut entity.attributes, patch, &["x", "y", "z"]) || changed
    }
}
