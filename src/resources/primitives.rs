//! Procedural meshes for mesh features, rectangle shapes, sprites and the
//! editor grid. All primitives span -1..1 and are scaled by their feature.

use std::{f32::consts::PI, fmt};

use crate::data_structures::mesh::{MeshData, MeshVertex, Topology};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Circle { segments: u32 },
    Cube,
    Plane,
    Sphere { rings: u32, segments: u32 },
    Square,
    /// Wireframe grid in the XY plane.
    Grid { subdivisions: u32 },
}

impl Primitive {
    /// Parse the `type` of a `primitive` record. Parameters are ignored by
    /// kinds that don't take them.
    pub fn parse(kind: &str, segments: u32, rings: u32) -> Option<Self> {
        match kind {
            "circle" => Some(Primitive::Circle { segments }),
            "cube" => Some(Primitive::Cube),
            "plane" => Some(Primitive::Plane),
            "sphere" => Some(Primitive::Sphere { rings, segments }),
            "square" => Some(Primitive::Square),
            "grid" => Some(Primitive::Grid {
                subdivisions: segments,
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Primitive::Circle { .. } => "circle",
            Primitive::Cube => "cube",
            Primitive::Plane => "plane",
            Primitive::Sphere { .. } => "sphere",
            Primitive::Square => "square",
            Primitive::Grid { .. } => "grid",
        }
    }

    /// Cache key: kind plus every parameter that changes the geometry.
    pub fn key(&self) -> String {
        match self {
            Primitive::Circle { segments } => format!("primitive:circle:{}", segments),
            Primitive::Sphere { rings, segments } => {
                format!("primitive:sphere:{}x{}", rings, segments)
            }
            Primitive::Grid { subdivisions } => format!("primitive:grid:{}", subdivisions),
            other => format!("primitive:{}", other.kind()),
        }
    }

    pub fn mesh_data(&self) -> anyhow::Result<MeshData> {
        let mesh = match *self {
            Primitive::Circle { segments } => {
                if segments < 3 {
                    anyhow::bail!("a circle needs at least 3 segments, got {}", segments);
                }
                circle(segments)
            }
            Primitive::Cube => cube(),
            Primitive::Plane => plane(),
            Primitive::Sphere { rings, segments } => {
                if rings < 2 || segments < 3 {
                    anyhow::bail!(
                        "a sphere needs at least 2 rings and 3 segments, got {}x{}",
                        rings,
                        segments
                    );
                }
                sphere(rings, segments)
            }
            Primitive::Square => square(),
            Primitive::Grid { subdivisions } => grid(subdivisions),
        };
        Ok(mesh)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn square() -> MeshData {
    let n = [0.0, 0.0, 1.0];
    MeshData::new(
        "square",
        vec![
            MeshVertex::new([-1.0, -1.0, 0.0], n, [0.0, 1.0]),
            MeshVertex::new([1.0, -1.0, 0.0], n, [1.0, 1.0]),
            MeshVertex::new([1.0, 1.0, 0.0], n, [1.0, 0.0]),
            MeshVertex::new([-1.0, 1.0, 0.0], n, [0.0, 0.0]),
        ],
        vec![0, 1, 2, 0, 2, 3],
    )
}

fn plane() -> MeshData {
    let n = [0.0, 1.0, 0.0];
    MeshData::new(
        "plane",
        vec![
            MeshVertex::new([-1.0, 0.0, 1.0], n, [0.0, 1.0]),
            MeshVertex::new([1.0, 0.0, 1.0], n, [1.0, 1.0]),
            MeshVertex::new([1.0, 0.0, -1.0], n, [1.0, 0.0]),
            MeshVertex::new([-1.0, 0.0, -1.0], n, [0.0, 0.0]),
        ],
        vec![0, 1, 2, 0, 2, 3],
    )
}

fn cube() -> MeshData {
    // (normal, tangent u, tangent v) per face
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                n[0] + su * u[0] + sv * v[0],
                n[1] + su * u[1] + sv * v[1],
                n[2] + su * u[2] + sv * v[2],
            ];
            let uv = [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5];
            vertices.push(MeshVertex::new(position, n, uv));
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    MeshData::new("cube", vertices, indices)
}

fn circle(segments: u32) -> MeshData {
    let n = [0.0, 0.0, 1.0];
    let mut vertices = vec![MeshVertex::new([0.0, 0.0, 0.0], n, [0.5, 0.5])];
    for i in 0..segments {
        let angle = 2.0 * PI * i as f32 / segments as f32;
        let (sin, cos) = angle.sin_cos();
        vertices.push(MeshVertex::new(
            [cos, sin, 0.0],
            n,
            [0.5 + 0.5 * cos, 0.5 - 0.5 * sin],
        ));
    }
    let mut indices = Vec::with_capacity(segments as usize * 3);
    for i in 0..segments {
        indices.extend([0, 1 + i, 1 + (i + 1) % segments]);
    }
    MeshData::new("circle", vertices, indices)
}

fn sphere(rings: u32, segments: u32) -> MeshData {
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    for ring in 0..=rings {
        let theta = PI * ring as f32 / rings as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();
        for segment in 0..=segments {
            let phi = 2.0 * PI * segment as f32 / segments as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();
            let p = [sin_theta * cos_phi, cos_theta, -sin_theta * sin_phi];
            vertices.push(MeshVertex::new(
                p,
                p,
                [segment as f32 / segments as f32, ring as f32 / rings as f32],
            ));
        }
    }
    let stride = segments + 1;
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend([a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    MeshData::new("sphere", vertices, indices)
}

fn grid(subdivisions: u32) -> MeshData {
    let lines = subdivisions + 2;
    let n = [0.0, 0.0, 1.0];
    let mut vertices = Vec::with_capacity(lines as usize * 4);
    for i in 0..lines {
        let t = -1.0 + 2.0 * i as f32 / (lines - 1) as f32;
        vertices.push(MeshVertex::new([t, -1.0, 0.0], n, [0.0, 0.0]));
        vertices.push(MeshVertex::new([t, 1.0, 0.0], n, [0.0, 0.0]));
        vertices.push(MeshVertex::new([-1.0, t, 0.0], n, [0.0, 0.0]));
        vertices.push(MeshVertex::new([1.0, t, 0.0], n, [0.0, 0.0]));
    }
    let indices = (0..vertices.len() as u32).collect();
    let mut mesh = MeshData::new("grid", vertices, indices);
    mesh.topology = Topology::Lines;
    mesh
}
