//! Engine data structures: transforms, meshes, textures, features and the scene graph.
//!
//! - `transform` holds the local TRS transformation of a node
//! - `mesh` contains CPU-side geometry and the compiled mesh stored in the cache
//! - `texture` contains decoded images, sampler settings and the GPU texture wrapper
//! - `feature` is the closed set of capabilities a node can carry
//! - `scene_graph` is the node/feature arena with its per-scene collections

pub mod feature;
pub mod mesh;
pub mod scene_graph;
pub mod texture;
pub mod transform;
