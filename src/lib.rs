//! flow-scene
//!
//! Scene graph construction for flow-ngin. Scenes are built either from
//! declarative configuration collections or by importing external assets
//! (glTF), and every GPU resource they need goes through one shared,
//! reference-counted cache so identical meshes, textures and shader variants
//! are created once.
//!
//! High-level modules
//! - `backend`: where GPU objects are created (wgpu or headless)
//! - `builder`: builds and resets scene nodes from configuration records
//! - `config`: the hierarchical key/value configuration scenes are described in
//! - `context`: owns the backend, resource cache and shader resolver
//! - `data_structures`: transforms, meshes, textures, features and the scene graph
//! - `errors`: error types and build diagnostics
//! - `importer`: turns an external asset into a scene graph
//! - `pipelines`: shader permutations and their generated sources
//! - `render`: collects draw calls, lights and camera for a frame
//! - `resources`: resource cache, primitives and asset sources
//! - `settings`: defaults for everything a record leaves out
//! - `simulation`: runs scripts and resets the scene when they stop
//!

pub mod backend;
pub mod builder;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod errors;
pub mod importer;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod settings;
pub mod simulation;

// Re-exports commonly used types for convenience in downstream code.
pub use builder::{BuildReport, SceneBuilder};
pub use cgmath::*;
pub use context::Context;
pub use data_structures::scene_graph::{FeatureKey, NodeKey, SceneGraph};
pub use importer::{ImportedScene, import, import_file};
pub use wgpu;
