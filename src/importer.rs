//! Building a scene graph from an external asset.
//!
//! Every item of the asset is loaded on its own: a texture, light, material,
//! mesh or object that fails is reported and left out, and everything that
//! doesn't depend on it is still imported. Only an asset that can't be opened
//! or a scene that can't be read aborts the import.
//!
//! Cache keys are `"<asset path>#texture<index>"` and `"<asset path>#mesh<index>"`,
//! so re-importing the same asset reuses whatever is still cached.

use std::path::Path;

use cgmath::{Deg, Matrix3, Vector3};

use crate::{
    context::Context,
    data_structures::{
        feature::{AlphaMode, CameraFeature, Feature, LightFeature, Material, MeshFeature, Projection},
        mesh::GpuMesh,
        scene_graph::{FeatureKey, NodeKey, SceneGraph},
        texture::GpuTexture,
        transform::Transform,
    },
    errors::{Diagnostic, ImportError},
    pipelines::shader::ShaderFlags,
    resources::{
        AssetMaterial, AssetObject, AssetSource, Instance, MaterialModel, ObjectTransform,
        cache::{Handle, ResourcePolicy},
        gltf::GltfSource,
    },
};

/// What became of one asset object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    /// `None` if the object failed to load or was never reached.
    pub node: Option<NodeKey>,
    pub mesh: Option<FeatureKey>,
    pub light: Option<FeatureKey>,
    /// Asset indices of the children.
    pub children: Vec<usize>,
}

#[derive(Debug)]
pub struct ImportedScene {
    pub graph: SceneGraph,
    /// One entry per asset object plus a last one for the scene itself.
    pub objects: Vec<ObjectInfo>,
    pub scene_object_id: usize,
    /// Node carrying the active camera.
    pub camera: NodeKey,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportedScene {
    pub fn object(&self, id: usize) -> Option<&ObjectInfo> {
        self.objects.get(id)
    }

    pub fn scene_object(&self) -> &ObjectInfo {
        &self.objects[self.scene_object_id]
    }
}

/// Open a glTF file and import its default scene.
pub fn import_file(ctx: &mut Context, path: impl AsRef<Path>) -> Result<ImportedScene, ImportError> {
    let path = path.as_ref();
    let source = GltfSource::open(path).map_err(|source| ImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    import(ctx, &source)
}

/// Import an opened asset into a new scene graph.
pub fn import(ctx: &mut Context, source: &dyn AssetSource) -> Result<ImportedScene, ImportError> {
    let mut importer = Importer {
        ctx,
        source,
        graph: SceneGraph::new(),
        diagnostics: Vec::new(),
        textures: Vec::new(),
        lights: Vec::new(),
        materials: Vec::new(),
        meshes: Vec::new(),
        objects: Vec::new(),
        camera: None,
    };
    importer.load_textures();
    importer.load_lights();
    importer.load_materials();
    importer.load_meshes();
    importer.build()
}

/// A material the Phong shader can draw, with its texture matrix.
struct PhongMaterial {
    data: AssetMaterial,
    texture_matrix: Option<Matrix3<f32>>,
}

struct LoadedMesh {
    key: String,
    mesh: Handle<GpuMesh>,
}

struct Importer<'a> {
    ctx: &'a mut Context,
    source: &'a dyn AssetSource,
    graph: SceneGraph,
    diagnostics: Vec<Diagnostic>,
    textures: Vec<Option<Handle<GpuTexture>>>,
    lights: Vec<Option<LightFeature>>,
    materials: Vec<Option<PhongMaterial>>,
    meshes: Vec<Option<LoadedMesh>>,
    objects: Vec<ObjectInfo>,
    camera: Option<NodeKey>,
}

impl Importer<'_> {
    fn key(&self, kind: &str, index: usize) -> String {
        format!("{}#{}{}", self.source.path(), kind, index)
    }

    fn warn(&mut self, message: String) {
        self.diagnostics.push(Diagnostic::warn(message));
    }

    fn load_textures(&mut self) {
        for i in 0..self.source.texture_count() {
            let key = self.key("texture", i);
            let source = self.source;
            match self.ctx.texture(&key, || source.texture(i)) {
                Ok(texture) => self.textures.push(Some(texture)),
                Err(err) => {
                    self.warn(format!("cannot load texture {}: {:#}", i, err));
                    self.textures.push(None);
                }
            }
        }
    }

    fn load_lights(&mut self) {
        for i in 0..self.source.light_count() {
            match self.source.light(i) {
                Ok(light) => self.lights.push(Some(light)),
                Err(err) => {
                    self.warn(format!("cannot load light {}: {:#}", i, err));
                    self.lights.push(None);
                }
            }
        }
    }

    fn load_materials(&mut self) {
        for i in 0..self.source.material_count() {
            let material = self
                .source
                .material(i)
                .map_err(|err| format!("{:#}", err))
                .and_then(phong_material);
            match material {
                Ok(material) => self.materials.push(Some(material)),
                Err(reason) => {
                    self.warn(format!("cannot load material {}: {}", i, reason));
                    self.materials.push(None);
                }
            }
        }
    }

    fn load_meshes(&mut self) {
        for i in 0..self.source.mesh_count() {
            let key = self.key("mesh", i);
            let source = self.source;
            match self
                .ctx
                .mesh(&key, ResourcePolicy::ReferenceCounted, || source.mesh(i))
            {
                Ok(mesh) => self.meshes.push(Some(LoadedMesh { key, mesh })),
                Err(err) => {
                    self.warn(format!("cannot load mesh {}: {:#}", i, err));
                    self.meshes.push(None);
                }
            }
        }
    }

    fn build(mut self) -> Result<ImportedScene, ImportError> {
        let scene_object_id = match self.source.default_scene() {
            Some(index) => self.build_scene(index)?,
            None => self.build_single_mesh(),
        };

        let root = self.graph.root();
        if let Some(node) = self.graph.node_mut(root) {
            node.name = "scene".to_string();
        }
        let scene = &mut self.objects[scene_object_id];
        scene.name = "scene".to_string();
        scene.node = Some(root);

        // Lights skipped during the walk leave the pre-counted shaders too large.
        let lights = self.graph.lights().len() as u32;
        self.set_light_count(lights);

        let camera = self.attach_camera();
        Ok(ImportedScene {
            graph: self.graph,
            objects: self.objects,
            scene_object_id,
            camera,
            diagnostics: self.diagnostics,
        })
    }

    fn build_scene(&mut self, index: usize) -> Result<usize, ImportError> {
        let scene = self
            .source
            .scene(index)
            .map_err(|err| {
                log::error!("cannot load scene {}: {:#}", index, err);
                ImportError::MissingScene {
                    path: self.source.path().to_string(),
                    index,
                }
            })?;

        let count = self.source.object_count();
        self.objects = vec![ObjectInfo::default(); count + 1];
        let mut objects = Vec::with_capacity(count);
        let mut lights = 0;
        for i in 0..count {
            match self.source.object(i) {
                Ok(object) => {
                    self.objects[i].name = object
                        .name
                        .clone()
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| format!("object #{}", i));
                    self.objects[i].children = object.children.clone();
                    if let Instance::Light(light) = object.instance {
                        if self.lights.get(light).is_some_and(Option::is_some) {
                            lights += 1;
                        }
                    }
                    objects.push(Some(object));
                }
                Err(err) => {
                    self.warn(format!("cannot load object {}: {:#}", i, err));
                    self.objects[i].name = format!("object #{}", i);
                    objects.push(None);
                }
            }
        }

        // Compile lit shaders for the final light count right away.
        self.set_light_count(lights);

        self.objects[count].children = scene.children.clone();
        let root = self.graph.root();
        for &child in &scene.children {
            self.add_object(&objects, root, child);
        }
        Ok(count)
    }

    fn add_object(&mut self, objects: &[Option<AssetObject>], parent: NodeKey, index: usize) {
        let Some(Some(object)) = objects.get(index) else {
            if index >= objects.len() {
                self.warn(format!("object {} does not exist", index));
            }
            return;
        };
        if self.objects[index].node.is_some() {
            self.warn(format!("object {} is referenced more than once", index));
            return;
        }

        let transform = match object.transform {
            ObjectTransform::Trs {
                translation,
                rotation,
                scale,
            } => Transform::from_trs(translation, rotation, scale),
            ObjectTransform::Matrix(matrix) => Transform::from_matrix(matrix),
        };
        let name = self.objects[index].name.clone();
        let node = self.graph.add_node(parent, &name, transform);
        self.objects[index].node = Some(node);

        match object.instance {
            Instance::Mesh { mesh, material } => {
                if let Some(feature) = self.mesh_feature(mesh, material) {
                    let key = self.graph.attach(node, Feature::Mesh(feature), None);
                    self.objects[index].mesh = Some(key);
                } else {
                    self.warn(format!("object {} has no usable mesh {}", name, mesh));
                }
            }
            Instance::Light(light) => match self.lights.get(light).cloned().flatten() {
                Some(light) => {
                    let key = self.graph.attach(node, Feature::Light(light), None);
                    self.objects[index].light = Some(key);
                }
                None => self.warn(format!("object {} has no usable light {}", name, light)),
            },
            Instance::Camera(0) => self.camera = Some(node),
            Instance::Camera(_) | Instance::Empty => {}
        }

        for &child in &object.children {
            self.add_object(objects, node, child);
        }
    }

    /// The first loaded mesh with a default material, for assets without a
    /// scene hierarchy.
    fn build_single_mesh(&mut self) -> usize {
        let Some(mesh) = self.meshes.iter().position(Option::is_some) else {
            self.objects = vec![ObjectInfo::default()];
            return 0;
        };
        self.set_light_count(0);

        self.objects = vec![ObjectInfo::default(); 2];
        let root = self.graph.root();
        let node = self.graph.add_node(root, "object #0", Transform::new());
        self.objects[0].name = "object #0".to_string();
        self.objects[0].node = Some(node);
        if let Some(feature) = self.mesh_feature(mesh, None) {
            let key = self.graph.attach(node, Feature::Mesh(feature), None);
            self.objects[0].mesh = Some(key);
        }
        self.objects[1].children.push(0);
        1
    }

    /// Mesh feature for a loaded mesh. Textures that failed to load are left
    /// out of the material and its shader flags.
    fn mesh_feature(&mut self, mesh: usize, material: Option<usize>) -> Option<MeshFeature> {
        let loaded = self.meshes.get(mesh)?.as_ref()?;
        let (key, handle) = (loaded.key.clone(), loaded.mesh.clone());
        let mut flags = ShaderFlags::OBJECT_ID;
        if handle.borrow().has_vertex_colors {
            flags |= ShaderFlags::VERTEX_COLOR;
        }

        let mut result = Material::default();
        if let Some(Some(phong)) = material.and_then(|m| self.materials.get(m)) {
            let data = &phong.data;
            result.ambient_color = data.ambient_color;
            result.diffuse_color = data.diffuse_color;
            result.alpha_mode = data.alpha_mode;
            let texture = |index: usize| self.textures.get(index).cloned().flatten();
            if let Some(diffuse) = data.diffuse_texture.as_ref().and_then(|t| texture(t.index)) {
                result.ambient_texture = Some(diffuse.clone());
                result.diffuse_texture = Some(diffuse);
            } else if let AlphaMode::Mask(_) = result.alpha_mode {
                // The mask is read from the diffuse texture.
                result.alpha_mode = AlphaMode::Opaque;
            }
            if let Some(normal) = data.normal_texture.as_ref().and_then(|t| texture(t.index)) {
                result.normal_texture = Some(normal);
                result.normal_texture_scale = data.normal_texture_scale;
            }
            if let Some(matrix) = phong.texture_matrix {
                result.texture_matrix = matrix;
            }
        } else if let Some(material) = material {
            log::debug!("mesh {} drawn with a default material instead of {}", mesh, material);
        }
        flags |= result.flags();

        let shader = match self.ctx.phong_shader(flags) {
            Ok(shader) => shader,
            Err(err) => {
                self.diagnostics.push(Diagnostic::error(format!(
                    "cannot create shader for mesh {}: {:#}",
                    mesh, err
                )));
                return None;
            }
        };
        Some(MeshFeature {
            mesh: handle,
            mesh_key: key,
            shader,
            material: result,
            primitive: None,
            size: Vector3::new(1.0, 1.0, 1.0),
            object_id: 0,
        })
    }

    /// Attach the default perspective to the asset's camera node, adding one
    /// in front of the origin if the asset has none.
    fn attach_camera(&mut self) -> NodeKey {
        let defaults = &self.ctx.settings.camera;
        let projection = Projection::Perspective {
            fov: Deg(defaults.fov_degrees),
            aspect_ratio: defaults.aspect_ratio,
            near: defaults.near,
            far: defaults.far,
        };
        let node = match self.camera {
            Some(node) => node,
            None => {
                let root = self.graph.root();
                let offset = Vector3::new(0.0, 0.0, defaults.distance);
                self.graph.add_node(root, "camera", Transform::from(offset))
            }
        };
        let camera = self
            .graph
            .attach(node, Feature::Camera(CameraFeature { projection }), None);
        self.graph.set_active_camera(Some(camera));
        node
    }

    fn set_light_count(&mut self, count: u32) {
        if let Err(err) = self.ctx.set_light_count(count) {
            self.diagnostics.push(Diagnostic::error(format!(
                "cannot build shaders for {} lights: {:#}",
                count, err
            )));
        }
    }
}

/// Accept a material if the Phong shader can draw it.
fn phong_material(material: AssetMaterial) -> Result<PhongMaterial, String> {
    if let MaterialModel::Other(model) = &material.model {
        return Err(format!("{} materials are not supported", model));
    }
    if material.textures().any(|t| t.tex_coord != 0) {
        return Err("only the first texture coordinate set is supported".to_string());
    }
    let texture_matrix = material.common_texture_matrix()?;
    Ok(PhongMaterial {
        data: material,
        texture_matrix,
    })
}
