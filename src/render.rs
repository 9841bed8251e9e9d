//! Draw collection.
//!
//! [`collect_draws`] walks the drawable and light collections of a
//! [`SceneGraph`] and produces everything a renderer needs for one frame:
//! ordered draw calls (opaque first, then transparent, then editor-only
//! geometry), the light array and the camera uniform.
//!
//! # Key types
//!
//! - [`Draw<'a>`] is one draw call borrowing the feature's resources
//! - [`LightUniform`] is one element of the shader's light array
//! - [`CameraUniform`] holds the view projection of the active camera
//!

use cgmath::{Matrix4, SquareMatrix, Vector3, Vector4};

use crate::{
    builder::EditorGrid,
    data_structures::{
        feature::{DrawGroup, Feature, LightFeature, LightKind, Material},
        mesh::GpuMesh,
        scene_graph::{FeatureKey, SceneGraph},
        texture::GpuTexture,
        transform::TransformRaw,
    },
    pipelines::shader::ShaderProgram,
    resources::cache::Handle,
};

/// cgmath produces OpenGL clip space (z in -1..1), wgpu expects 0..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// What a draw call binds besides mesh and shader.
#[derive(Clone, Copy, Debug)]
pub enum DrawMaterial<'a> {
    Phong(&'a Material),
    Flat {
        color: [f32; 4],
        texture: Option<&'a Handle<GpuTexture>>,
    },
}

#[derive(Debug)]
pub struct Draw<'a> {
    /// `None` for editor geometry that isn't part of the graph.
    pub feature: Option<FeatureKey>,
    pub transform: TransformRaw,
    pub mesh: &'a Handle<GpuMesh>,
    pub shader: &'a Handle<ShaderProgram>,
    pub material: DrawMaterial<'a>,
    pub object_id: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    /// World position, or the direction the light travels for directional lights.
    pub position: [f32; 4],
    pub color: [f32; 4],
    /// x: range (0 = unbounded), y: 1 for directional lights
    pub params: [f32; 4],
}

impl LightUniform {
    pub fn new(light: &LightFeature, world: &Matrix4<f32>) -> Self {
        let directional = light.kind == LightKind::Directional;
        let position = if directional {
            // lights shine along their local -Z
            world * Vector4::new(0.0, 0.0, -1.0, 0.0)
        } else {
            world.w
        };
        let [r, g, b] = light.radiance();
        Self {
            position: position.into(),
            color: [r, g, b, 1.0],
            params: [
                if light.range.is_finite() { light.range } else { 0.0 },
                if directional { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub view_pos: [f32; 4],
}

impl CameraUniform {
    pub fn new(projection: Matrix4<f32>, camera_world: &Matrix4<f32>) -> Self {
        let view = camera_world.invert().unwrap_or_else(Matrix4::identity);
        Self {
            view_proj: (OPENGL_TO_WGPU_MATRIX * projection * view).into(),
            view_pos: camera_world.w.into(),
        }
    }
}

/// Everything needed to render one frame of a graph.
#[derive(Debug, Default)]
pub struct Frame<'a> {
    pub opaque: Vec<Draw<'a>>,
    pub transparent: Vec<Draw<'a>>,
    pub editor: Vec<Draw<'a>>,
    pub lights: Vec<LightUniform>,
    pub camera: Option<CameraUniform>,
}

impl<'a> Frame<'a> {
    /// All draws in submission order.
    pub fn draws(&self) -> impl Iterator<Item = &Draw<'a>> {
        self.opaque
            .iter()
            .chain(self.transparent.iter())
            .chain(self.editor.iter())
    }
}

fn draw<'a>(key: FeatureKey, feature: &'a Feature, world: Matrix4<f32>) -> Option<Draw<'a>> {
    let (size, mesh, shader, material, object_id) = match feature {
        Feature::Mesh(mesh) => (
            mesh.size,
            &mesh.mesh,
            &mesh.shader,
            DrawMaterial::Phong(&mesh.material),
            mesh.object_id,
        ),
        Feature::Sprite(sprite) => (
            sprite.size.extend(1.0),
            &sprite.mesh,
            &sprite.shader,
            DrawMaterial::Flat {
                color: sprite.color,
                texture: sprite.texture.as_ref(),
            },
            sprite.object_id,
        ),
        Feature::RectangleShape(rect) => (
            rect.size.extend(1.0),
            &rect.mesh,
            &rect.shader,
            DrawMaterial::Flat {
                color: rect.color,
                texture: None,
            },
            rect.object_id,
        ),
        Feature::Light(_) | Feature::Camera(_) | Feature::Script(_) => return None,
    };
    let world = world * Matrix4::from_nonuniform_scale(size.x, size.y, size.z);
    Some(Draw {
        feature: Some(key),
        transform: TransformRaw::from_world(&world),
        mesh,
        shader,
        material,
        object_id,
    })
}

/// Collect the draw calls, lights and camera of a graph.
///
/// The editor grid, if given, is drawn after everything else.
pub fn collect_draws<'a>(graph: &'a SceneGraph, grid: Option<&'a EditorGrid>) -> Frame<'a> {
    let mut frame = Frame::default();
    for (group, keys) in [
        (DrawGroup::Opaque, graph.opaque()),
        (DrawGroup::Transparent, graph.transparent()),
    ] {
        for &key in keys {
            let Some(slot) = graph.feature(key) else {
                continue;
            };
            let world = graph.world_matrix(slot.node);
            if let Some(draw) = draw(key, &slot.feature, world) {
                match group {
                    DrawGroup::Opaque => frame.opaque.push(draw),
                    DrawGroup::Transparent => frame.transparent.push(draw),
                }
            }
        }
    }

    if let Some(grid) = grid {
        let size: Vector3<f32> = grid.feature.size;
        let world = grid.transform.to_matrix() * Matrix4::from_nonuniform_scale(size.x, size.y, size.z);
        frame.editor.push(Draw {
            feature: None,
            transform: TransformRaw::from_world(&world),
            mesh: &grid.feature.mesh,
            shader: &grid.feature.shader,
            material: DrawMaterial::Flat {
                color: grid.feature.material.diffuse_color,
                texture: None,
            },
            object_id: grid.feature.object_id,
        });
    }

    for &key in graph.lights() {
        if let Some(slot) = graph.feature(key) {
            if let Feature::Light(light) = &slot.feature {
                frame
                    .lights
                    .push(LightUniform::new(light, &graph.world_matrix(slot.node)));
            }
        }
    }

    frame.camera = graph.active_camera().and_then(|key| {
        let slot = graph.feature(key)?;
        let camera = slot.feature.as_camera()?;
        Some(CameraUniform::new(
            camera.projection.matrix(),
            &graph.world_matrix(slot.node),
        ))
    });
    frame
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Deg, Quaternion, Rotation3};

    use super::*;

    #[test]
    fn directional_lights_store_their_direction() {
        let light = LightFeature {
            kind: LightKind::Directional,
            color: [1.0, 0.5, 0.0],
            intensity: 2.0,
            range: f32::INFINITY,
        };
        let world = Matrix4::from_translation(Vector3::new(4.0, 5.0, 6.0))
            * Matrix4::from(Quaternion::from_angle_y(Deg(90.0)));
        let uniform = LightUniform::new(&light, &world);
        assert_relative_eq!(uniform.position[0], -1.0, epsilon = 1e-5);
        assert_relative_eq!(uniform.position[2], 0.0, epsilon = 1e-5);
        assert_eq!(uniform.position[3], 0.0);
        assert_eq!(uniform.color, [2.0, 1.0, 0.0, 1.0]);
        assert_eq!(uniform.params, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn point_lights_store_their_position() {
        let light = LightFeature {
            kind: LightKind::Point,
            color: [1.0; 3],
            intensity: 1.0,
            range: 10.0,
        };
        let world = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0));
        let uniform = LightUniform::new(&light, &world);
        assert_eq!(uniform.position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(uniform.params[0], 10.0);
    }
}
