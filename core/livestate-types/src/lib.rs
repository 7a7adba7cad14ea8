//! Core type definitions for livestate.
//!
//! This crate defines the data model shared by every live visualization
//! engine:
//! - The [`Schema`] trait, which parameterizes the engine per visualization
//! - Relations ([`Link`]) and wire-level entity references ([`EntityRef`])
//! - Epoch-millisecond [`Timestamp`]s
//! - Subscription and engine identifiers (UUID v7)
//!
//! Concrete schemas for the three built-in visualizations live in
//! [`variants`].

mod ids;
mod record;
mod schema;
mod timestamp;
pub mod variants;

pub use ids::{EngineId, SubscriptionId};
pub use record::{
    merge_attributes, Attributes, EntityRef, Link, LinkPatch, LinkSelector, LINK_RESERVED_FIELDS,
};
pub use schema::{deserialize_key, string_selector, RelationEviction, Schema};
pub use timestamp::Timestamp;
pub use variants::{Graph, GraphNode, GridKey, Sankey, SankeyNode, Surface, SurfacePoint};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
