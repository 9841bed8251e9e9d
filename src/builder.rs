//! Declarative scene construction.
//!
//! The [`SceneBuilder`] turns a configuration tree into nodes and features and
//! keeps every node and feature linked to the record it came from. Later edits
//! (adding or removing features and objects, swapping a primitive) go through
//! the builder so graph and configuration stay in sync, and
//! [`SceneBuilder::reset_object`] re-applies a record to an existing node.
//!
//! Reading a record never writes to it. [`resolve_object`] and
//! [`resolve_feature`] return the values to use plus a [`ConfigPatch`] with
//! every default they had to fill in; the builder persists that patch in one
//! place before the values are used. A field that is present is never
//! re-defaulted.
//!
//! Records look like this (groups in brackets):
//!
//! ```text
//! [scene]
//!   [child] name, transformation
//!     [feature] type = "mesh", size
//!       [primitive] type, segments, rings
//!       [material]  ambient_color, diffuse_color, diffuse_texture, normal_texture,
//!                   alpha_mode, alpha_mask
//!     [feature] type = "light", kind, color, intensity, range
//!     [child] ...
//! ```

use std::{path::Path, rc::Rc};

use cgmath::{Deg, Matrix4, Quaternion, Rotation3, Vector2, Vector3};

use crate::{
    config::{ConfigGroup, ConfigPatch, ConfigRef, read_or_default},
    context::Context,
    data_structures::{
        feature::{
            AlphaMode, CameraFeature, Feature, FeatureKind, LightFeature, LightKind, Material,
            MeshFeature, Projection, RectangleShapeFeature, ScriptFeature, SpriteFeature,
        },
        mesh::GpuMesh,
        scene_graph::{FeatureKey, NodeKey, SceneGraph},
        texture::GpuTexture,
        transform::Transform,
    },
    errors::{BuildError, Diagnostic, Severity},
    pipelines::shader::{ShaderFlags, ShaderProgram, ShaderVariant},
    resources::{
        cache::{Handle, ResourcePolicy},
        primitives::Primitive,
        texture::load_texture,
    },
    settings::SceneSettings,
};

/// Problems collected while building. The graph is usable regardless.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    pub name: String,
    pub transformation: Matrix4<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshRecord {
    pub primitive: String,
    pub segments: u32,
    pub rings: u32,
    pub size: Vector3<f32>,
    pub ambient_color: [f32; 4],
    pub diffuse_color: [f32; 4],
    pub diffuse_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub alpha_mode: AlphaMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpriteRecord {
    pub texture: String,
    pub size: Vector2<f32>,
    pub color: [f32; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub struct RectangleRecord {
    pub size: Vector2<f32>,
    pub color: [f32; 4],
}

/// A feature record with every default filled in.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureRecord {
    Mesh(MeshRecord),
    Light(LightFeature),
    Camera(CameraFeature),
    Script(ScriptFeature),
    Sprite(SpriteRecord),
    RectangleShape(RectangleRecord),
}

/// Name and transformation of an object record.
///
/// A missing transformation defaults to an identity scaling.
pub fn resolve_object(record: &ConfigGroup) -> (ObjectRecord, ConfigPatch) {
    let mut patch = ConfigPatch::new();
    let name = read_or_default(Some(record), "name", String::from("object"), &mut patch);
    let transformation = read_or_default(
        Some(record),
        "transformation",
        Matrix4::from_scale(1.0),
        &mut patch,
    );
    (
        ObjectRecord {
            name,
            transformation,
        },
        patch,
    )
}

/// Fields of a feature record of the given kind.
pub fn resolve_feature(
    kind: FeatureKind,
    record: &ConfigGroup,
    settings: &SceneSettings,
) -> (FeatureRecord, ConfigPatch) {
    let mut patch = ConfigPatch::new();
    let resolved = match kind {
        FeatureKind::Mesh => FeatureRecord::Mesh(resolve_mesh(record, settings, &mut patch)),
        FeatureKind::Light => FeatureRecord::Light(resolve_light(record, &mut patch)),
        FeatureKind::Camera => FeatureRecord::Camera(resolve_camera(record, settings, &mut patch)),
        FeatureKind::Script => FeatureRecord::Script(resolve_script(record, &mut patch)),
        FeatureKind::Sprite => {
            let r = Some(record);
            FeatureRecord::Sprite(SpriteRecord {
                texture: read_or_default(r, "texture", String::new(), &mut patch),
                size: read_or_default(r, "size", Vector2::new(1.0, 1.0), &mut patch),
                color: read_or_default(r, "color", [1.0; 4], &mut patch),
            })
        }
        FeatureKind::RectangleShape => {
            let r = Some(record);
            let defaults = &settings.rectangle;
            FeatureRecord::RectangleShape(RectangleRecord {
                size: read_or_default(r, "size", Vector2::from(defaults.size), &mut patch),
                color: read_or_default(r, "color", defaults.color, &mut patch),
            })
        }
    };
    (resolved, patch)
}

fn resolve_mesh(record: &ConfigGroup, settings: &SceneSettings, patch: &mut ConfigPatch) -> MeshRecord {
    let size = read_or_default(Some(record), "size", Vector3::new(1.0, 1.0, 1.0), patch);

    let primitive_group = record.group("primitive");
    let primitive = primitive_group.as_ref().map(|g| g.borrow());
    let primitive = primitive.as_deref();
    let p = patch.group("primitive");
    let kind = read_or_default(primitive, "type", String::from("cube"), p);
    let segments = read_or_default(primitive, "segments", 32u32, p);
    let rings = read_or_default(primitive, "rings", 16u32, p);

    let material_group = record.group("material");
    let material = material_group.as_ref().map(|g| g.borrow());
    let material = material.as_deref();
    let m = patch.group("material");
    let ambient_color = read_or_default(material, "ambient_color", settings.phong.ambient_color, m);
    let diffuse_color = read_or_default(material, "diffuse_color", settings.phong.diffuse_color, m);
    let diffuse_texture = material.and_then(|g| g.value::<String>("diffuse_texture"));
    let normal_texture = material.and_then(|g| g.value::<String>("normal_texture"));
    let alpha_mode = match read_or_default(material, "alpha_mode", String::from("opaque"), m).as_str() {
        "opaque" => AlphaMode::Opaque,
        "mask" => AlphaMode::Mask(read_or_default(material, "alpha_mask", 0.5f32, m)),
        "blend" => AlphaMode::Blend,
        other => {
            log::warn!("unknown alpha mode {:?}, drawing opaque", other);
            AlphaMode::Opaque
        }
    };

    MeshRecord {
        primitive: kind,
        segments,
        rings,
        size,
        ambient_color,
        diffuse_color,
        diffuse_texture,
        normal_texture,
        alpha_mode,
    }
}

fn resolve_light(record: &ConfigGroup, patch: &mut ConfigPatch) -> LightFeature {
    let r = Some(record);
    let kind = match read_or_default(r, "kind", String::from("point"), patch).as_str() {
        "point" => LightKind::Point,
        "directional" => LightKind::Directional,
        "spot" => LightKind::Spot,
        other => {
            log::warn!("unknown light kind {:?}, using a point light", other);
            LightKind::Point
        }
    };
    LightFeature {
        kind,
        color: read_or_default(r, "color", [1.0; 3], patch),
        intensity: read_or_default(r, "intensity", 1.0f32, patch),
        range: read_or_default(r, "range", f32::INFINITY, patch),
    }
}

fn resolve_camera(record: &ConfigGroup, settings: &SceneSettings, patch: &mut ConfigPatch) -> CameraFeature {
    let r = Some(record);
    let defaults = &settings.camera_feature;
    let near = read_or_default(r, "near", defaults.near, patch);
    let far = read_or_default(r, "far", defaults.far, patch);
    let projection = match read_or_default(r, "projection", String::from("perspective"), patch).as_str() {
        "orthographic" => Projection::Orthographic {
            size: read_or_default(r, "size", Vector2::new(10.0, 10.0), patch),
            near,
            far,
        },
        other => {
            if other != "perspective" {
                log::warn!("unknown projection {:?}, using perspective", other);
            }
            Projection::Perspective {
                fov: Deg(read_or_default(r, "fov", defaults.fov_degrees, patch)),
                aspect_ratio: read_or_default(r, "aspect_ratio", 1.0f32, patch),
                near,
                far,
            }
        }
    };
    CameraFeature { projection }
}

fn resolve_script(record: &ConfigGroup, patch: &mut ConfigPatch) -> ScriptFeature {
    let r = Some(record);
    let path = read_or_default(r, "script_path", String::new(), patch);
    let stem = Path::new(&path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let class_name = read_or_default(r, "class_name", stem, patch);
    ScriptFeature { path, class_name }
}

/// Resolve a record and persist the defaults it needed.
fn persist<T>(record: &ConfigRef, resolve: impl FnOnce(&ConfigGroup) -> (T, ConfigPatch)) -> T {
    let (value, patch) = resolve(&record.borrow());
    if !patch.is_empty() {
        patch.apply(&mut record.borrow_mut());
    }
    value
}

/// Number of light features declared in a record and its children.
pub fn count_light_records(record: &ConfigGroup) -> u32 {
    let own = record
        .groups("feature")
        .iter()
        .filter(|f| f.borrow().value::<String>("type").as_deref() == Some("light"))
        .count() as u32;
    own + record
        .groups("child")
        .iter()
        .map(|child| count_light_records(&child.borrow()))
        .sum::<u32>()
}

/// The editor grid. It is drawn separately from scene drawables and is not
/// part of the graph.
#[derive(Debug)]
pub struct EditorGrid {
    pub transform: Transform,
    pub feature: MeshFeature,
}

pub struct SceneBuilder<'a> {
    ctx: &'a mut Context,
    graph: &'a mut SceneGraph,
    report: BuildReport,
    lights_dirty: bool,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(ctx: &'a mut Context, graph: &'a mut SceneGraph) -> Self {
        Self {
            ctx,
            graph,
            report: BuildReport::default(),
            lights_dirty: false,
        }
    }

    pub fn graph(&self) -> &SceneGraph {
        self.graph
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn finish(self) -> BuildReport {
        self.report
    }

    /// Build a whole collection: external resources first, then the `scene`
    /// group under the graph root.
    pub fn build_collection(&mut self, collection: &ConfigRef) -> NodeKey {
        self.load_external_resources(&collection.borrow());

        let scene = collection.borrow().group("scene");
        let scene = match scene {
            Some(scene) => scene,
            None => collection.borrow_mut().add_group("scene"),
        };

        // Compile lit shaders for the final light count right away.
        let lights = count_light_records(&scene.borrow());
        if let Err(err) = self.ctx.set_light_count(lights) {
            self.report.push(Diagnostic::error(format!(
                "cannot build shaders for {} lights: {:#}",
                lights, err
            )));
        }

        let root = self.graph.root();
        self.graph.set_node_config(root, Rc::clone(&scene));
        self.build_children(&scene, root);
        self.lights_dirty = true;
        self.flush_lights();
        root
    }

    /// Load every `external_resources/resource` record into the cache, keyed by path.
    pub fn load_external_resources(&mut self, collection: &ConfigGroup) {
        let Some(resources) = collection.group("external_resources") else {
            return;
        };
        let resources = resources.borrow().groups("resource");
        for resource in resources {
            let resource = resource.borrow();
            let kind = resource.value::<String>("type").unwrap_or_default();
            let Some(path) = resource.value::<String>("path") else {
                self.report
                    .push(Diagnostic::warn("external resource without a path"));
                continue;
            };
            match kind.as_str() {
                // Stays cached without references until the next free().
                "Texture2D" => {
                    self.texture(&path, false);
                }
                other => self.report.push(Diagnostic::warn(format!(
                    "skipping external resource {} of unknown type {:?}",
                    path, other
                ))),
            }
        }
    }

    /// Build an object record, its features and all its children under `parent`.
    pub fn load_object(&mut self, record: &ConfigRef, parent: NodeKey) -> NodeKey {
        let node = self.build_object(record, parent);
        self.flush_lights();
        node
    }

    /// Build every `child` record of `record` under `node`, in order.
    pub fn load_children(&mut self, record: &ConfigRef, node: NodeKey) {
        self.build_children(record, node);
        self.flush_lights();
    }

    /// Build one feature record and attach it to `node`.
    ///
    /// Unknown types are skipped with a warning and return `Ok(None)`.
    pub fn load_feature(
        &mut self,
        record: &ConfigRef,
        node: NodeKey,
    ) -> Result<Option<FeatureKey>, BuildError> {
        let result = self.build_feature(record, node);
        self.flush_lights();
        result
    }

    fn build_object(&mut self, record: &ConfigRef, parent: NodeKey) -> NodeKey {
        let object = persist(record, resolve_object);
        let node = self.graph.add_node(
            parent,
            &object.name,
            Transform::from_matrix(object.transformation),
        );
        self.graph.set_node_config(node, Rc::clone(record));

        let features = record.borrow().groups("feature");
        for feature in features {
            if let Err(err) = self.build_feature(&feature, node) {
                self.report.push(err.into());
            }
        }
        self.build_children(record, node);
        node
    }

    fn build_children(&mut self, record: &ConfigRef, node: NodeKey) {
        let children = record.borrow().groups("child");
        for child in children {
            self.build_object(&child, node);
        }
    }

    fn build_feature(
        &mut self,
        record: &ConfigRef,
        node: NodeKey,
    ) -> Result<Option<FeatureKey>, BuildError> {
        let type_name = record.borrow().value::<String>("type").unwrap_or_default();
        match FeatureKind::parse(&type_name) {
            Some(kind) => self.build_feature_of_kind(record, node, kind).map(Some),
            None => {
                self.report.push(Diagnostic::warn(format!(
                    "skipping feature of unknown type {:?} on {}",
                    type_name,
                    self.node_name(node)
                )));
                Ok(None)
            }
        }
    }

    fn build_feature_of_kind(
        &mut self,
        record: &ConfigRef,
        node: NodeKey,
        kind: FeatureKind,
    ) -> Result<FeatureKey, BuildError> {
        if self.graph.find_feature(node, kind).is_some() {
            return Err(BuildError::DuplicateFeature {
                node: self.node_name(node),
                kind: kind.type_name(),
            });
        }
        let settings = &self.ctx.settings;
        let fields = persist(record, |r| resolve_feature(kind, r, settings));
        let feature = self.instantiate(&fields)?;
        let key = self.graph.attach(node, feature, Some(Rc::clone(record)));
        match kind {
            FeatureKind::Light => self.lights_dirty = true,
            FeatureKind::Camera if self.graph.active_camera().is_none() => {
                self.graph.set_active_camera(Some(key))
            }
            _ => {}
        }
        Ok(key)
    }

    /// Create a new `child` record under `parent` and build it.
    ///
    /// # Panics
    ///
    /// If `parent` wasn't built from configuration.
    pub fn add_object(&mut self, parent: NodeKey, name: &str) -> NodeKey {
        let parent_record = self.node_config(parent);
        let record = parent_record.borrow_mut().add_group("child");
        record.borrow_mut().set_value("name", name.to_string());
        self.load_object(&record, parent)
    }

    /// Destroy a node with its subtree and drop its record from the parent.
    pub fn remove_object(&mut self, node: NodeKey) {
        let record = self.graph.node(node).and_then(|n| n.config().cloned());
        let parent_record = self
            .graph
            .node(node)
            .and_then(|n| n.parent())
            .and_then(|p| self.graph.node(p))
            .and_then(|p| p.config().cloned());
        if let (Some(record), Some(parent_record)) = (record, parent_record) {
            parent_record.borrow_mut().remove_group(&record);
        }
        let removed = self.graph.remove_node(node);
        if removed.iter().any(|f| f.kind() == FeatureKind::Light) {
            self.lights_dirty = true;
        }
        self.flush_lights();
    }

    /// Add a `feature` record of `kind` to the node's record and attach it.
    ///
    /// On failure the record is removed again.
    ///
    /// # Panics
    ///
    /// If `node` wasn't built from configuration.
    pub fn add_feature(&mut self, node: NodeKey, kind: FeatureKind) -> Result<FeatureKey, BuildError> {
        if self.graph.find_feature(node, kind).is_some() {
            return Err(BuildError::DuplicateFeature {
                node: self.node_name(node),
                kind: kind.type_name(),
            });
        }
        let node_record = self.node_config(node);
        let record = node_record.borrow_mut().add_group("feature");
        record
            .borrow_mut()
            .set_value("type", kind.type_name().to_string());
        let result = self.build_feature_of_kind(&record, node, kind);
        if result.is_err() {
            node_record.borrow_mut().remove_group(&record);
        }
        self.flush_lights();
        result
    }

    /// Detach a feature and drop its record from the node's record.
    ///
    /// # Panics
    ///
    /// If the feature doesn't exist.
    pub fn remove_feature(&mut self, key: FeatureKey) -> Feature {
        let (node, record) = match self.graph.feature(key) {
            Some(slot) => (slot.node, slot.config.clone()),
            None => panic!("feature {:?} is not attached", key),
        };
        let feature = self.graph.detach(key);
        let node_record = self.graph.node(node).and_then(|n| n.config().cloned());
        if let (Some(record), Some(node_record)) = (record, node_record) {
            node_record.borrow_mut().remove_group(&record);
        }
        if feature.kind() == FeatureKind::Light {
            self.lights_dirty = true;
        }
        self.flush_lights();
        feature
    }

    /// Swap the procedural mesh of a mesh feature and record the change.
    ///
    /// The shader is kept; primitives never change material capabilities.
    ///
    /// # Panics
    ///
    /// If `key` is not a mesh feature.
    pub fn set_primitive(&mut self, key: FeatureKey, primitive: Primitive) -> Result<(), BuildError> {
        let record = match self.graph.feature(key) {
            Some(slot) if slot.feature.kind() == FeatureKind::Mesh => slot.config.clone(),
            _ => panic!("feature {:?} is not a mesh", key),
        };
        let mesh = self.primitive_mesh(primitive)?;

        if let Some(record) = record {
            let group = record.borrow().group("primitive");
            let group = match group {
                Some(group) => group,
                None => record.borrow_mut().add_group("primitive"),
            };
            let mut group = group.borrow_mut();
            group.set_value("type", primitive.kind().to_string());
            match primitive {
                Primitive::Circle { segments } => group.set_value("segments", segments),
                Primitive::Sphere { rings, segments } => {
                    group.set_value("rings", rings);
                    group.set_value("segments", segments);
                }
                Primitive::Grid { subdivisions } => group.set_value("segments", subdivisions),
                _ => {}
            }
        }

        if let Some(Feature::Mesh(feature)) = self.graph.feature_mut(key).map(|s| &mut s.feature) {
            feature.mesh = mesh;
            feature.mesh_key = primitive.key();
            feature.primitive = Some(primitive);
        }
        Ok(())
    }

    /// Re-apply a node's record and its features' records.
    ///
    /// The node and its features keep their keys; only their values change.
    pub fn reset_object(&mut self, node: NodeKey) {
        self.reset_node(node);
        self.flush_lights();
    }

    /// [`SceneBuilder::reset_object`] for a node and all its descendants.
    pub fn reset_tree(&mut self, node: NodeKey) {
        for key in self.graph.descendants(node) {
            self.reset_node(key);
        }
        self.flush_lights();
    }

    fn reset_node(&mut self, node: NodeKey) {
        let Some(record) = self.graph.node(node).and_then(|n| n.config().cloned()) else {
            return;
        };
        if node != self.graph.root() {
            let object = persist(&record, resolve_object);
            if let Some(n) = self.graph.node_mut(node) {
                n.name = object.name;
                n.transform = Transform::from_matrix(object.transformation);
            }
        }
        let features = self
            .graph
            .node(node)
            .map(|n| n.features().to_vec())
            .unwrap_or_default();
        for key in features {
            self.reset_feature(key);
        }
    }

    fn reset_feature(&mut self, key: FeatureKey) {
        let Some((kind, Some(record))) = self
            .graph
            .feature(key)
            .map(|slot| (slot.feature.kind(), slot.config.clone()))
        else {
            return;
        };
        let settings = &self.ctx.settings;
        let fields = persist(&record, |r| resolve_feature(kind, r, settings));
        match self.instantiate(&fields) {
            Ok(feature) => {
                if let Some(slot) = self.graph.feature_mut(key) {
                    slot.feature = feature;
                }
                self.graph.regroup(key);
            }
            Err(err) => self.report.push(err.into()),
        }
    }

    /// Register the editor grid mesh (manually managed, key `grid`) and return
    /// its mesh feature, lying in the XZ plane.
    pub fn create_grid(&mut self) -> Result<EditorGrid, BuildError> {
        let settings = &self.ctx.settings.grid;
        let size = settings.subdivisions as f32;
        let ambient = settings.ambient;
        let primitive = Primitive::Grid {
            subdivisions: settings.subdivisions.saturating_sub(1),
        };
        let mesh = self
            .ctx
            .mesh("grid", ResourcePolicy::Manual, || primitive.mesh_data())
            .map_err(|source| BuildError::Mesh {
                key: "grid".to_string(),
                source,
            })?;
        let shader = self.flat(ShaderFlags::OBJECT_ID)?;
        let material = Material {
            ambient_color: [ambient, ambient, ambient, 1.0],
            diffuse_color: [ambient, ambient, ambient, 1.0],
            ..Default::default()
        };
        Ok(EditorGrid {
            transform: Transform::from_trs(
                [0.0, 0.0, 0.0],
                Quaternion::from_angle_x(Deg(90.0)),
                [1.0, 1.0, 1.0],
            ),
            feature: MeshFeature {
                mesh,
                mesh_key: "grid".to_string(),
                shader,
                material,
                primitive: Some(primitive),
                size: Vector3::new(size, size, size),
                object_id: 0,
            },
        })
    }

    fn instantiate(&mut self, record: &FeatureRecord) -> Result<Feature, BuildError> {
        let feature = match record {
            FeatureRecord::Mesh(mesh) => Feature::Mesh(self.mesh_feature(mesh)?),
            FeatureRecord::Light(light) => Feature::Light(light.clone()),
            FeatureRecord::Camera(camera) => Feature::Camera(camera.clone()),
            FeatureRecord::Script(script) => Feature::Script(script.clone()),
            FeatureRecord::Sprite(sprite) => {
                let texture = if sprite.texture.is_empty() {
                    None
                } else {
                    self.texture(&sprite.texture, false)
                };
                let mut flags = ShaderFlags::OBJECT_ID;
                if texture.is_some() {
                    flags |= ShaderFlags::DIFFUSE_TEXTURE;
                }
                Feature::Sprite(SpriteFeature {
                    texture,
                    texture_path: sprite.texture.clone(),
                    size: sprite.size,
                    color: sprite.color,
                    mesh: self.primitive_mesh(Primitive::Square)?,
                    shader: self.flat(flags)?,
                    object_id: 0,
                })
            }
            FeatureRecord::RectangleShape(rect) => Feature::RectangleShape(RectangleShapeFeature {
                size: rect.size,
                color: rect.color,
                mesh: self.primitive_mesh(Primitive::Square)?,
                shader: self.flat(ShaderFlags::OBJECT_ID)?,
                object_id: 0,
            }),
        };
        Ok(feature)
    }

    fn mesh_feature(&mut self, record: &MeshRecord) -> Result<MeshFeature, BuildError> {
        let Some(primitive) = Primitive::parse(&record.primitive, record.segments, record.rings)
        else {
            return Err(BuildError::MissingResource {
                key: format!("primitive:{}", record.primitive),
                reason: "unknown primitive".to_string(),
            });
        };
        let mesh = self.primitive_mesh(primitive)?;
        let diffuse_texture = match &record.diffuse_texture {
            Some(path) => self.texture(path, false),
            None => None,
        };
        let normal_texture = match &record.normal_texture {
            Some(path) => self.texture(path, true),
            None => None,
        };
        // The mask is read from the diffuse texture.
        let alpha_mode = match record.alpha_mode {
            AlphaMode::Mask(_) if diffuse_texture.is_none() => AlphaMode::Opaque,
            mode => mode,
        };
        let material = Material {
            ambient_color: record.ambient_color,
            diffuse_color: record.diffuse_color,
            diffuse_texture,
            normal_texture,
            alpha_mode,
            ..Default::default()
        };
        let shader = self.phong(material.flags() | ShaderFlags::OBJECT_ID)?;
        Ok(MeshFeature {
            mesh,
            mesh_key: primitive.key(),
            shader,
            material,
            primitive: Some(primitive),
            size: record.size,
            object_id: 0,
        })
    }

    fn primitive_mesh(&mut self, primitive: Primitive) -> Result<Handle<GpuMesh>, BuildError> {
        let key = primitive.key();
        self.ctx
            .mesh(&key, ResourcePolicy::ReferenceCounted, || primitive.mesh_data())
            .map_err(|source| BuildError::Mesh { key, source })
    }

    /// Cached texture for `path`; failures are reported and yield `None`.
    fn texture(&mut self, path: &str, is_normal_map: bool) -> Option<Handle<GpuTexture>> {
        let root = self.ctx.settings.assets.root.clone();
        match self
            .ctx
            .texture(path, || load_texture(&root, path, is_normal_map))
        {
            Ok(texture) => Some(texture),
            Err(err) => {
                self.report.push(
                    BuildError::MissingResource {
                        key: path.to_string(),
                        reason: format!("{:#}", err),
                    }
                    .into(),
                );
                None
            }
        }
    }

    fn phong(&mut self, flags: ShaderFlags) -> Result<Handle<ShaderProgram>, BuildError> {
        let key = ShaderVariant::phong(flags, self.ctx.shaders.light_count()).key();
        self.ctx
            .phong_shader(flags)
            .map_err(|source| BuildError::Shader { key, source })
    }

    fn flat(&mut self, flags: ShaderFlags) -> Result<Handle<ShaderProgram>, BuildError> {
        let key = ShaderVariant::flat(flags).key();
        self.ctx
            .flat_shader(flags)
            .map_err(|source| BuildError::Shader { key, source })
    }

    fn flush_lights(&mut self) {
        if !std::mem::take(&mut self.lights_dirty) {
            return;
        }
        let count = self.graph.lights().len() as u32;
        if let Err(err) = self.ctx.set_light_count(count) {
            self.report.push(Diagnostic::error(format!(
                "cannot rebuild shaders for {} lights: {:#}",
                count, err
            )));
        }
    }

    fn node_config(&self, node: NodeKey) -> ConfigRef {
        match self.graph.node(node).and_then(|n| n.config()) {
            Some(config) => Rc::clone(config),
            None => panic!("node {} wasn't built from configuration", self.node_name(node)),
        }
    }

    fn node_name(&self, node: NodeKey) -> String {
        self.graph
            .node(node)
            .map(|n| n.name.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigGroup;

    fn collection() -> ConfigRef {
        let collection = ConfigGroup::shared("collection");
        let scene = collection.borrow_mut().add_group("scene");
        let box_record = scene.borrow_mut().add_group("child");
        box_record
            .borrow_mut()
            .set_value("name", String::from("box"));
        box_record
            .borrow_mut()
            .add_group("feature")
            .borrow_mut()
            .set_value("type", String::from("mesh"));
        collection
    }

    #[test]
    fn object_defaults_are_injected_once() {
        let mut record = ConfigGroup::new("child");
        let (first, patch) = resolve_object(&record);
        assert!(patch.keys().any(|k| k == "transformation"));
        patch.apply(&mut record);
        let (second, patch) = resolve_object(&record);
        assert!(patch.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn rectangle_defaults_come_from_settings() {
        let record = ConfigGroup::new("feature");
        let (fields, _) = resolve_feature(
            FeatureKind::RectangleShape,
            &record,
            &SceneSettings::default(),
        );
        assert_eq!(
            fields,
            FeatureRecord::RectangleShape(RectangleRecord {
                size: Vector2::new(200.0, 100.0),
                color: [1.0; 4],
            })
        );
    }

    #[test]
    fn script_class_defaults_to_file_stem() {
        let mut record = ConfigGroup::new("feature");
        record.set_value("script_path", String::from("scripts/player_controller.py"));
        let (fields, _) = resolve_feature(FeatureKind::Script, &record, &SceneSettings::default());
        let FeatureRecord::Script(script) = fields else {
            panic!("expected a script");
        };
        assert_eq!(script.class_name, "player_controller");
    }

    #[test]
    fn builds_mesh_features_with_injected_defaults() {
        let mut ctx = Context::headless();
        let mut graph = SceneGraph::new();
        let collection = collection();
        let report = {
            let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
            builder.build_collection(&collection);
            builder.finish()
        };
        assert!(report.is_clean(), "{:?}", report.diagnostics);

        let node = graph.find_by_name("box").unwrap();
        let feature = graph.feature_of(node, FeatureKind::Mesh);
        let mesh = graph.feature(feature).unwrap().feature.as_mesh().unwrap();
        assert_eq!(mesh.mesh_key, "primitive:cube");
        assert_eq!(mesh.object_id, 1);

        let record = graph.feature(feature).unwrap().config.clone().unwrap();
        let primitive = record.borrow().group("primitive").unwrap();
        assert_eq!(primitive.borrow().value::<u32>("segments"), Some(32));
    }

    #[test]
    fn duplicate_features_are_rejected() {
        let mut ctx = Context::headless();
        let mut graph = SceneGraph::new();
        let collection = collection();
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        builder.build_collection(&collection);
        let node = builder.add_object(builder.graph.root(), "lamp");
        builder.add_feature(node, FeatureKind::Light).unwrap();
        assert!(matches!(
            builder.add_feature(node, FeatureKind::Light),
            Err(BuildError::DuplicateFeature { .. })
        ));
    }

    #[test]
    fn counts_lights_in_nested_records() {
        let root = ConfigGroup::shared("scene");
        let child = root.borrow_mut().add_group("child");
        let grandchild = child.borrow_mut().add_group("child");
        for record in [&child, &grandchild] {
            record
                .borrow_mut()
                .add_group("feature")
                .borrow_mut()
                .set_value("type", String::from("light"));
        }
        assert_eq!(count_light_records(&root.borrow()), 2);
    }
}
