//! Loading helpers: the resource cache, procedural primitives, texture files
//! and external scene assets.
//!
//! External assets are read through the [`AssetSource`] trait. The importer
//! only sees counts and per-index items, each of which may fail on its own;
//! [`gltf::GltfSource`] reads glTF files and [`MemoryAsset`] holds everything
//! in memory for tools and tests.

use cgmath::{Matrix3, Matrix4, Quaternion, Vector3};

use crate::data_structures::{
    feature::{AlphaMode, LightFeature},
    mesh::MeshData,
    texture::TextureData,
};

pub mod cache;
pub mod gltf;
pub mod primitives;
pub mod texture;

/// A texture referenced by a material.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetTextureRef {
    /// Index into the asset's textures.
    pub index: usize,
    /// Texture coordinate set the texture is sampled with.
    pub tex_coord: u32,
    pub transform: Option<Matrix3<f32>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MaterialModel {
    Phong,
    /// Anything the Phong shader can't express, with a short description.
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssetMaterial {
    pub name: Option<String>,
    pub model: MaterialModel,
    pub ambient_color: [f32; 4],
    pub diffuse_color: [f32; 4],
    pub diffuse_texture: Option<AssetTextureRef>,
    pub normal_texture: Option<AssetTextureRef>,
    pub normal_texture_scale: f32,
    pub alpha_mode: AlphaMode,
}

impl Default for AssetMaterial {
    fn default() -> Self {
        Self {
            name: None,
            model: MaterialModel::Phong,
            ambient_color: [0.0, 0.0, 0.0, 1.0],
            diffuse_color: [1.0; 4],
            diffuse_texture: None,
            normal_texture: None,
            normal_texture_scale: 1.0,
            alpha_mode: AlphaMode::Opaque,
        }
    }
}

impl AssetMaterial {
    pub fn textures(&self) -> impl Iterator<Item = &AssetTextureRef> {
        self.diffuse_texture.iter().chain(self.normal_texture.iter())
    }

    /// The texture transformation shared by all textures.
    ///
    /// `Ok(None)` if no texture is transformed. Fails when some textures are
    /// transformed differently than others.
    pub fn common_texture_matrix(&self) -> Result<Option<Matrix3<f32>>, String> {
        let mut transforms = self.textures().map(|t| t.transform);
        let Some(first) = transforms.next() else {
            return Ok(None);
        };
        if transforms.all(|t| t == first) {
            Ok(first)
        } else {
            Err("textures use different texture transformations".to_string())
        }
    }
}

/// Local transformation of an asset object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ObjectTransform {
    Trs {
        translation: Vector3<f32>,
        rotation: Quaternion<f32>,
        scale: Vector3<f32>,
    },
    Matrix(Matrix4<f32>),
}

/// What an object instantiates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instance {
    Empty,
    Mesh { mesh: usize, material: Option<usize> },
    Light(usize),
    Camera(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssetObject {
    pub name: Option<String>,
    pub transform: ObjectTransform,
    pub instance: Instance,
    /// Indices of child objects, in order.
    pub children: Vec<usize>,
}

impl AssetObject {
    pub fn new(instance: Instance) -> Self {
        Self {
            name: None,
            transform: ObjectTransform::Matrix(Matrix4::from_scale(1.0)),
            instance,
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetScene {
    /// Top-level objects of the scene.
    pub children: Vec<usize>,
}

/// Read access to an opened scene asset.
///
/// Counts never fail. Every indexed item is loaded on request and may fail
/// without affecting the others.
pub trait AssetSource {
    /// Path the asset was opened from. Cache keys derived from the asset are
    /// namespaced by it.
    fn path(&self) -> &str;

    fn texture_count(&self) -> usize;
    fn texture(&self, index: usize) -> anyhow::Result<TextureData>;

    fn light_count(&self) -> usize;
    fn light(&self, index: usize) -> anyhow::Result<LightFeature>;

    fn material_count(&self) -> usize;
    fn material(&self, index: usize) -> anyhow::Result<AssetMaterial>;

    fn mesh_count(&self) -> usize;
    /// Geometry with [`MeshData::has_vertex_colors`] set when the source
    /// carries a colour attribute.
    fn mesh(&self, index: usize) -> anyhow::Result<MeshData>;

    fn object_count(&self) -> usize;
    fn object(&self, index: usize) -> anyhow::Result<AssetObject>;

    /// Scene to show, `None` for assets without a hierarchy.
    fn default_scene(&self) -> Option<usize>;
    fn scene(&self, index: usize) -> anyhow::Result<AssetScene>;
}

/// An asset kept entirely in memory.
///
/// Textures are stored encoded and decoded on request, like a file-backed
/// source would. Other items are stored ready to use; an `Err` entry stands
/// for an item that fails to load.
#[derive(Debug, Default)]
pub struct MemoryAsset {
    pub path: String,
    pub textures: Vec<Vec<u8>>,
    pub lights: Vec<Result<LightFeature, String>>,
    pub materials: Vec<Result<AssetMaterial, String>>,
    pub meshes: Vec<Result<MeshData, String>>,
    pub objects: Vec<Result<AssetObject, String>>,
    pub scenes: Vec<AssetScene>,
    pub default_scene: Option<usize>,
}

impl MemoryAsset {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Append an encoded image and return its index.
    pub fn add_texture(&mut self, encoded: Vec<u8>) -> usize {
        self.textures.push(encoded);
        self.textures.len() - 1
    }

    pub fn add_light(&mut self, light: LightFeature) -> usize {
        self.lights.push(Ok(light));
        self.lights.len() - 1
    }

    pub fn add_material(&mut self, material: AssetMaterial) -> usize {
        self.materials.push(Ok(material));
        self.materials.len() - 1
    }

    pub fn add_mesh(&mut self, mesh: MeshData) -> usize {
        self.meshes.push(Ok(mesh));
        self.meshes.len() - 1
    }

    pub fn add_object(&mut self, object: AssetObject) -> usize {
        self.objects.push(Ok(object));
        self.objects.len() - 1
    }

    /// Add a scene with the given top-level objects and make it the default.
    pub fn add_scene(&mut self, children: Vec<usize>) -> usize {
        self.scenes.push(AssetScene { children });
        let index = self.scenes.len() - 1;
        self.default_scene = Some(index);
        index
    }
}

fn item<T: Clone>(items: &[Result<T, String>], what: &str, index: usize) -> anyhow::Result<T> {
    match items.get(index) {
        Some(Ok(item)) => Ok(item.clone()),
        Some(Err(reason)) => Err(anyhow::anyhow!("cannot load {} {}: {}", what, index, reason)),
        None => Err(anyhow::anyhow!("{} {} does not exist", what, index)),
    }
}

impl AssetSource for MemoryAsset {
    fn path(&self) -> &str {
        &self.path
    }

    fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn texture(&self, index: usize) -> anyhow::Result<TextureData> {
        let Some(bytes) = self.textures.get(index) else {
            anyhow::bail!("texture {} does not exist", index);
        };
        TextureData::from_bytes(bytes, &format!("{}#texture{}", self.path, index), None)
    }

    fn light_count(&self) -> usize {
        self.lights.len()
    }

    fn light(&self, index: usize) -> anyhow::Result<LightFeature> {
        item(&self.lights, "light", index)
    }

    fn material_count(&self) -> usize {
        self.materials.len()
    }

    fn material(&self, index: usize) -> anyhow::Result<AssetMaterial> {
        item(&self.materials, "material", index)
    }

    fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    fn mesh(&self, index: usize) -> anyhow::Result<MeshData> {
        item(&self.meshes, "mesh", index)
    }

    fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn object(&self, index: usize) -> anyhow::Result<AssetObject> {
        item(&self.objects, "object", index)
    }

    fn default_scene(&self) -> Option<usize> {
        self.default_scene
    }

    fn scene(&self, index: usize) -> anyhow::Result<AssetScene> {
        self.scenes
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("scene {} does not exist", index))
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Matrix3, Vector2};

    use super::*;

    fn textured(index: usize, transform: Option<Matrix3<f32>>) -> AssetTextureRef {
        AssetTextureRef {
            index,
            tex_coord: 0,
            transform,
        }
    }

    #[test]
    fn common_texture_matrix_requires_agreement() {
        let shifted = Matrix3::from_translation(Vector2::new(0.5, 0.0));
        let mut material = AssetMaterial {
            diffuse_texture: Some(textured(0, Some(shifted))),
            normal_texture: Some(textured(1, Some(shifted))),
            ..Default::default()
        };
        assert_eq!(material.common_texture_matrix(), Ok(Some(shifted)));

        material.normal_texture = Some(textured(1, None));
        assert!(material.common_texture_matrix().is_err());

        material.diffuse_texture = None;
        assert_eq!(material.common_texture_matrix(), Ok(None));
    }

    #[test]
    fn failed_items_carry_their_index() {
        let mut asset = MemoryAsset::new("broken.gltf");
        asset.meshes.push(Err("truncated buffer".to_string()));
        let err = asset.mesh(0).unwrap_err().to_string();
        assert!(err.contains("mesh 0"));
        assert!(err.contains("truncated buffer"));
        assert!(asset.mesh(1).is_err());
    }

    #[test]
    fn corrupt_texture_bytes_fail_to_decode() {
        let mut asset = MemoryAsset::new("broken.gltf");
        asset.add_texture(vec![0x89, b'P', b'N', b'G', 0, 0]);
        assert!(asset.texture(0).is_err());
    }
}
