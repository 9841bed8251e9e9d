//! CPU-side mesh data and its compiled GPU counterpart.

/// A single vertex as laid out in the vertex buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
    pub color: [f32; 4],
}

impl MeshVertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coords,
            color: [1.0; 4],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    Triangles,
    Lines,
}

/// Geometry ready to be uploaded: interleaved vertices plus a `u32` index list.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub topology: Topology,
    /// Set when the source geometry carried a per-vertex colour attribute.
    pub has_vertex_colors: bool,
}

impl MeshData {
    pub fn new(name: impl Into<String>, vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            vertices,
            indices,
            topology: Topology::Triangles,
            has_vertex_colors: false,
        }
    }

    pub fn num_elements(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Appends another mesh, rebasing its indices onto the current vertex count.
    pub fn append(&mut self, other: MeshData) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices.extend(other.indices.into_iter().map(|i| i + base));
        self.has_vertex_colors |= other.has_vertex_colors;
    }

    /// Every index must address an existing vertex.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.vertices.is_empty() {
            anyhow::bail!("mesh {} has no vertices", self.name);
        }
        let count = self.vertices.len() as u32;
        if let Some(index) = self.indices.iter().find(|&&i| i >= count) {
            anyhow::bail!(
                "mesh {} references vertex {} but only has {}",
                self.name,
                index,
                count
            );
        }
        Ok(())
    }
}

/// Vertex and index buffers living on the GPU.
#[derive(Debug)]
pub struct MeshBuffers {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
}

/// A compiled mesh as stored in the resource cache.
///
/// `buffers` is `None` for backends that don't own a device (see
/// [`HeadlessBackend`](crate::backend::HeadlessBackend)).
#[derive(Debug)]
pub struct GpuMesh {
    pub name: String,
    pub num_elements: u32,
    pub num_vertices: u32,
    pub topology: Topology,
    pub has_vertex_colors: bool,
    pub buffers: Option<MeshBuffers>,
}

impl GpuMesh {
    pub fn describe(data: &MeshData, buffers: Option<MeshBuffers>) -> Self {
        Self {
            name: data.name.clone(),
            num_elements: data.num_elements(),
            num_vertices: data.vertices.len() as u32,
            topology: data.topology,
            has_vertex_colors: data.has_vertex_colors,
            buffers,
        }
    }
}
