//! Built-in visualization schemas.
//!
//! | Schema | Entity | Key | Relation cap order |
//! |---|---|---|---|
//! | [`Graph`] | [`GraphNode`] | node id | lowest value |
//! | [`Sankey`] | [`SankeyNode`] | node name | lowest value |
//! | [`Surface`] | [`SurfacePoint`] | [`GridKey`] | oldest inserted |

mod graph;
mod sankey;
mod surface;

pub use graph::{Graph, GraphNode};
pub use sankey::{Sankey, SankeyNode};
pub use surface::{GridKey, Surface, SurfacePoint};
