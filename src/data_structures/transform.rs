//! Local node transformations.
//!
//! A node stores its placement relative to its parent as translation, rotation
//! and scaling. World transformations are never stored: they are composed along
//! the parent chain whenever they are needed (see
//! [`SceneGraph::world_matrix`](crate::data_structures::scene_graph::SceneGraph::world_matrix)).

use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, One, Quaternion, SquareMatrix, Vector3};

/// Translation, rotation (as quaternion) and scaling of a node relative to its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn from_trs(
        position: impl Into<Vector3<f32>>,
        rotation: impl Into<Quaternion<f32>>,
        scale: impl Into<Vector3<f32>>,
    ) -> Self {
        Self {
            position: position.into(),
            rotation: rotation.into(),
            scale: scale.into(),
        }
    }

    /// Decomposes an affine matrix into translation, rotation and scaling.
    ///
    /// Shear cannot be represented and is lost. Callers that have the
    /// separate components available should prefer [`Transform::from_trs`].
    pub fn from_matrix(matrix: Matrix4<f32>) -> Self {
        let position = matrix.w.truncate();
        let x = matrix.x.truncate();
        let y = matrix.y.truncate();
        let z = matrix.z.truncate();
        let mut scale = Vector3::new(x.magnitude(), y.magnitude(), z.magnitude());
        // a mirrored basis is folded into a negative x scale
        if Matrix3::from_cols(x, y, z).determinant() < 0.0 {
            scale.x = -scale.x;
        }
        let safe = |v: Vector3<f32>, s: f32| if s.abs() > f32::EPSILON { v / s } else { v };
        let basis = Matrix3::from_cols(safe(x, scale.x), safe(y, scale.y), safe(z, scale.z));
        let rotation = Quaternion::from(basis).normalize();
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vector3<f32>> for Transform {
    fn from(position: Vector3<f32>) -> Self {
        Transform {
            position,
            ..Default::default()
        }
    }
}

impl From<Matrix4<f32>> for Transform {
    fn from(matrix: Matrix4<f32>) -> Self {
        Self::from_matrix(matrix)
    }
}

/**
 * The raw transform is what ends up in a per-draw uniform on the GPU.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
    pub handedness: f32,
}

impl TransformRaw {
    pub fn from_world(world: &Matrix4<f32>) -> Self {
        let basis = Matrix3::from_cols(world.x.truncate(), world.y.truncate(), world.z.truncate());
        // normals need the inverse transpose so non-uniform scaling doesn't skew them
        let normal = basis
            .invert()
            .map(|inverse| inverse.transpose())
            .unwrap_or(basis);
        Self {
            model: (*world).into(),
            normal: normal.into(),
            handedness: world.determinant().signum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Deg, Rotation3};

    use super::*;

    #[test]
    fn matrix_round_trip_keeps_components() {
        let original = Transform::from_trs(
            [1.0, -2.0, 3.0],
            Quaternion::from_angle_y(Deg(30.0)),
            [2.0, 2.0, 0.5],
        );
        let decomposed = Transform::from_matrix(original.to_matrix());
        assert_relative_eq!(decomposed.position.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(decomposed.position.z, 3.0, epsilon = 1e-5);
        assert_relative_eq!(decomposed.scale.x, 2.0, epsilon = 1e-5);
        assert_relative_eq!(decomposed.scale.z, 0.5, epsilon = 1e-5);
        let dot = decomposed.rotation.dot(original.rotation).abs();
        assert_relative_eq!(dot, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn identity_is_default() {
        assert_eq!(Transform::default().to_matrix(), Matrix4::identity());
    }
}
