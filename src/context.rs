use crate::{
    backend::{HeadlessBackend, RenderBackend},
    data_structures::{
        mesh::{GpuMesh, MeshData},
        texture::{GpuTexture, TextureData},
    },
    pipelines::shader::{ShaderFlags, ShaderProgram, ShaderResolver},
    resources::cache::{Handle, ResourceCache, ResourcePolicy},
    settings::SceneSettings,
};

/// Owns everything the builders share: the backend that creates GPU objects,
/// the cache that deduplicates them and the shader resolver.
pub struct Context {
    pub backend: Box<dyn RenderBackend>,
    pub cache: ResourceCache,
    pub shaders: ShaderResolver,
    pub settings: SceneSettings,
}

impl Context {
    pub fn new(backend: impl RenderBackend + 'static, settings: SceneSettings) -> Self {
        Self {
            backend: Box::new(backend),
            cache: ResourceCache::new(),
            shaders: ShaderResolver::new(settings.phong.clone()),
            settings,
        }
    }

    pub fn headless() -> Self {
        Self::new(HeadlessBackend::new(), SceneSettings::default())
    }

    /// Cached mesh under `key`, built and uploaded on a miss.
    pub fn mesh(
        &mut self,
        key: &str,
        policy: ResourcePolicy,
        build: impl FnOnce() -> anyhow::Result<MeshData>,
    ) -> anyhow::Result<Handle<GpuMesh>> {
        if let Some(mesh) = self.cache.get::<GpuMesh>(key) {
            return Ok(mesh);
        }
        let mesh = self.backend.upload_mesh(&build()?)?;
        Ok(self.cache.set(key, mesh, policy))
    }

    /// Cached texture under `key`, decoded and uploaded on a miss.
    pub fn texture(
        &mut self,
        key: &str,
        load: impl FnOnce() -> anyhow::Result<TextureData>,
    ) -> anyhow::Result<Handle<GpuTexture>> {
        if let Some(texture) = self.cache.get::<GpuTexture>(key) {
            return Ok(texture);
        }
        let texture = self.backend.create_texture(&load()?)?;
        Ok(self.cache.set(key, texture, ResourcePolicy::ReferenceCounted))
    }

    pub fn phong_shader(&mut self, flags: ShaderFlags) -> anyhow::Result<Handle<ShaderProgram>> {
        self.shaders
            .phong(flags, &mut self.cache, self.backend.as_mut())
    }

    pub fn flat_shader(&mut self, flags: ShaderFlags) -> anyhow::Result<Handle<ShaderProgram>> {
        self.shaders.flat(flags, &mut self.cache, self.backend.as_mut())
    }

    /// Rebuild every lit shader for a new light count.
    pub fn set_light_count(&mut self, light_count: u32) -> anyhow::Result<usize> {
        self.shaders
            .set_light_count(light_count, &mut self.cache, self.backend.as_mut())
    }

    /// Drop cache entries no feature references anymore.
    pub fn free(&mut self) -> usize {
        self.cache.free()
    }
}
