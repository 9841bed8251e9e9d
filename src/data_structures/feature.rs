//! Features: what a node can do.
//!
//! Every feature is owned by exactly one node. Renderable variants hold cache
//! handles for their mesh, shader and textures; dropping the feature drops
//! those references.

use cgmath::{Deg, Matrix3, Matrix4, SquareMatrix, Vector2, Vector3, ortho, perspective};

use crate::{
    data_structures::{mesh::GpuMesh, texture::GpuTexture},
    pipelines::shader::{ShaderFlags, ShaderProgram},
    resources::{cache::Handle, primitives::Primitive},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Mesh,
    Light,
    Camera,
    Script,
    Sprite,
    RectangleShape,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::Mesh,
        FeatureKind::Light,
        FeatureKind::Camera,
        FeatureKind::Script,
        FeatureKind::Sprite,
        FeatureKind::RectangleShape,
    ];

    /// The `type` string of a `feature` record.
    pub fn type_name(&self) -> &'static str {
        match self {
            FeatureKind::Mesh => "mesh",
            FeatureKind::Light => "light",
            FeatureKind::Camera => "camera",
            FeatureKind::Script => "script",
            FeatureKind::Sprite => "sprite",
            FeatureKind::RectangleShape => "rectangle_shape",
        }
    }

    pub fn parse(type_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name() == type_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Fragments with alpha below the cutoff are discarded.
    Mask(f32),
    Blend,
}

/// Which drawable collection a renderable lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrawGroup {
    #[default]
    Opaque,
    Transparent,
}

/// Phong material of a mesh feature.
#[derive(Clone, Debug)]
pub struct Material {
    pub ambient_color: [f32; 4],
    pub diffuse_color: [f32; 4],
    pub ambient_texture: Option<Handle<GpuTexture>>,
    pub diffuse_texture: Option<Handle<GpuTexture>>,
    pub normal_texture: Option<Handle<GpuTexture>>,
    pub normal_texture_scale: f32,
    /// Applied to texture coordinates when not the identity.
    pub texture_matrix: Matrix3<f32>,
    pub alpha_mode: AlphaMode,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient_color: [0.0, 0.0, 0.0, 1.0],
            diffuse_color: [1.0; 4],
            ambient_texture: None,
            diffuse_texture: None,
            normal_texture: None,
            normal_texture_scale: 1.0,
            texture_matrix: Matrix3::identity(),
            alpha_mode: AlphaMode::Opaque,
        }
    }
}

impl Material {
    /// Shader capabilities this material needs.
    pub fn flags(&self) -> ShaderFlags {
        let mut flags = ShaderFlags::empty();
        if self.ambient_texture.is_some() {
            flags |= ShaderFlags::AMBIENT_TEXTURE;
        }
        if self.diffuse_texture.is_some() {
            flags |= ShaderFlags::DIFFUSE_TEXTURE;
        }
        if self.normal_texture.is_some() {
            flags |= ShaderFlags::NORMAL_TEXTURE;
        }
        let textured = flags.intersects(
            ShaderFlags::AMBIENT_TEXTURE | ShaderFlags::DIFFUSE_TEXTURE | ShaderFlags::NORMAL_TEXTURE,
        );
        if textured && self.texture_matrix != Matrix3::identity() {
            flags |= ShaderFlags::TEXTURE_TRANSFORMATION;
        }
        if let AlphaMode::Mask(_) = self.alpha_mode {
            flags |= ShaderFlags::ALPHA_MASK;
        }
        flags
    }

    pub fn draw_group(&self) -> DrawGroup {
        match self.alpha_mode {
            AlphaMode::Blend => DrawGroup::Transparent,
            _ => DrawGroup::Opaque,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MeshFeature {
    pub mesh: Handle<GpuMesh>,
    pub mesh_key: String,
    pub shader: Handle<ShaderProgram>,
    pub material: Material,
    /// Set when the mesh is procedural and can be swapped.
    pub primitive: Option<Primitive>,
    /// Scale applied to the mesh on top of the node transform.
    pub size: Vector3<f32>,
    pub object_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LightKind {
    #[default]
    Point,
    Directional,
    Spot,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LightFeature {
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
    /// `f32::INFINITY` for unbounded lights.
    pub range: f32,
}

impl LightFeature {
    /// Colour premultiplied by intensity, as shaders consume it.
    pub fn radiance(&self) -> [f32; 3] {
        self.color.map(|c| c * self.intensity)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        fov: Deg<f32>,
        aspect_ratio: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        size: Vector2<f32>,
        near: f32,
        far: f32,
    },
}

impl Projection {
    pub fn matrix(&self) -> Matrix4<f32> {
        match *self {
            Projection::Perspective {
                fov,
                aspect_ratio,
                near,
                far,
            } => perspective(fov, aspect_ratio, near, far),
            Projection::Orthographic { size, near, far } => {
                let half = size * 0.5;
                ortho(-half.x, half.x, -half.y, half.y, near, far)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraFeature {
    pub projection: Projection,
}

/// Behaviour implemented outside this crate; only its identity is kept here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptFeature {
    pub path: String,
    pub class_name: String,
}

#[derive(Clone, Debug)]
pub struct SpriteFeature {
    pub texture: Option<Handle<GpuTexture>>,
    pub texture_path: String,
    pub size: Vector2<f32>,
    pub color: [f32; 4],
    pub mesh: Handle<GpuMesh>,
    pub shader: Handle<ShaderProgram>,
    pub object_id: u32,
}

#[derive(Clone, Debug)]
pub struct RectangleShapeFeature {
    pub size: Vector2<f32>,
    pub color: [f32; 4],
    pub mesh: Handle<GpuMesh>,
    pub shader: Handle<ShaderProgram>,
    pub object_id: u32,
}

#[derive(Clone, Debug)]
pub enum Feature {
    Mesh(MeshFeature),
    Light(LightFeature),
    Camera(CameraFeature),
    Script(ScriptFeature),
    Sprite(SpriteFeature),
    RectangleShape(RectangleShapeFeature),
}

impl Feature {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Mesh(_) => FeatureKind::Mesh,
            Feature::Light(_) => FeatureKind::Light,
            Feature::Camera(_) => FeatureKind::Camera,
            Feature::Script(_) => FeatureKind::Script,
            Feature::Sprite(_) => FeatureKind::Sprite,
            Feature::RectangleShape(_) => FeatureKind::RectangleShape,
        }
    }

    /// `None` for features that are never drawn.
    pub fn draw_group(&self) -> Option<DrawGroup> {
        match self {
            Feature::Mesh(mesh) => Some(mesh.material.draw_group()),
            Feature::Sprite(sprite) if sprite.color[3] < 1.0 => Some(DrawGroup::Transparent),
            Feature::Sprite(_) | Feature::RectangleShape(_) => Some(DrawGroup::Opaque),
            _ => None,
        }
    }

    pub fn set_object_id(&mut self, id: u32) {
        match self {
            Feature::Mesh(mesh) => mesh.object_id = id,
            Feature::Sprite(sprite) => sprite.object_id = id,
            Feature::RectangleShape(rect) => rect.object_id = id,
            _ => {}
        }
    }

    pub fn object_id(&self) -> Option<u32> {
        match self {
            Feature::Mesh(mesh) => Some(mesh.object_id),
            Feature::Sprite(sprite) => Some(sprite.object_id),
            Feature::RectangleShape(rect) => Some(rect.object_id),
            _ => None,
        }
    }

    pub fn as_mesh(&self) -> Option<&MeshFeature> {
        match self {
            Feature::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut MeshFeature> {
        match self {
            Feature::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<&LightFeature> {
        match self {
            Feature::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn as_camera(&self) -> Option<&CameraFeature> {
        match self {
            Feature::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn as_script(&self) -> Option<&ScriptFeature> {
        match self {
            Feature::Script(script) => Some(script),
            _ => None,
        }
    }
}
