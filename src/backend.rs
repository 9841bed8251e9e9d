//! Where GPU objects are actually created.
//!
//! The cache, resolver, builder and importer only ever talk to a
//! [`RenderBackend`]. [`WgpuBackend`] uploads to a real device;
//! [`HeadlessBackend`] keeps CPU-side descriptions and is what tests and tools
//! without a GPU use. Both count what they create.

use std::collections::HashSet;

use wgpu::util::DeviceExt;

use crate::{
    data_structures::{
        mesh::{GpuMesh, MeshBuffers, MeshData},
        texture::{GpuTexture, TextureData, upload_texture},
    },
    pipelines::shader::{ShaderProgram, ShaderVariant},
};

/// Everything a backend created, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub meshes: Vec<String>,
    pub shaders: Vec<String>,
    pub textures: Vec<String>,
}

impl BackendStats {
    pub fn mesh_uploads(&self) -> usize {
        self.meshes.len()
    }

    pub fn shader_compiles(&self) -> usize {
        self.shaders.len()
    }

    pub fn texture_uploads(&self) -> usize {
        self.textures.len()
    }
}

pub trait RenderBackend {
    fn upload_mesh(&mut self, data: &MeshData) -> anyhow::Result<GpuMesh>;

    fn compile_shader(
        &mut self,
        variant: &ShaderVariant,
        source: String,
    ) -> anyhow::Result<ShaderProgram>;

    fn create_texture(&mut self, data: &TextureData) -> anyhow::Result<GpuTexture>;

    fn stats(&self) -> &BackendStats;
}

pub struct WgpuBackend {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    stats: BackendStats,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            stats: BackendStats::default(),
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn upload_mesh(&mut self, data: &MeshData) -> anyhow::Result<GpuMesh> {
        data.validate()?;
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{:?} Vertex Buffer", data.name)),
                contents: bytemuck::cast_slice(&data.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{:?} Index Buffer", data.name)),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        self.stats.meshes.push(data.name.clone());
        Ok(GpuMesh::describe(
            data,
            Some(MeshBuffers {
                vertex_buffer,
                index_buffer,
            }),
        ))
    }

    fn compile_shader(
        &mut self,
        variant: &ShaderVariant,
        source: String,
    ) -> anyhow::Result<ShaderProgram> {
        let key = variant.key();
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&key),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });
        self.stats.shaders.push(key);
        Ok(ShaderProgram::new(*variant, source, Some(module)))
    }

    fn create_texture(&mut self, data: &TextureData) -> anyhow::Result<GpuTexture> {
        let binding = upload_texture(&self.device, &self.queue, data);
        self.stats.textures.push(data.label.clone());
        Ok(GpuTexture::describe(data, Some(binding)))
    }

    fn stats(&self) -> &BackendStats {
        &self.stats
    }
}

/// A backend without a device.
///
/// Mesh data is validated the same way the GPU path does. Individual shader
/// keys can be made to fail to exercise error paths.
#[derive(Default)]
pub struct HeadlessBackend {
    stats: BackendStats,
    rejected_shaders: HashSet<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every compile of `key` fail.
    pub fn reject_shader(&mut self, key: &str) {
        self.rejected_shaders.insert(key.to_string());
    }
}

impl RenderBackend for HeadlessBackend {
    fn upload_mesh(&mut self, data: &MeshData) -> anyhow::Result<GpuMesh> {
        data.validate()?;
        self.stats.meshes.push(data.name.clone());
        Ok(GpuMesh::describe(data, None))
    }

    fn compile_shader(
        &mut self,
        variant: &ShaderVariant,
        source: String,
    ) -> anyhow::Result<ShaderProgram> {
        let key = variant.key();
        if self.rejected_shaders.contains(&key) {
            anyhow::bail!("shader {} was rejected", key);
        }
        self.stats.shaders.push(key);
        Ok(ShaderProgram::new(*variant, source, None))
    }

    fn create_texture(&mut self, data: &TextureData) -> anyhow::Result<GpuTexture> {
        self.stats.textures.push(data.label.clone());
        Ok(GpuTexture::describe(data, None))
    }

    fn stats(&self) -> &BackendStats {
        &self.stats
    }
}
