//! Shader permutations.
//!
//! A [`ShaderVariant`] is a shading model plus a capability flag set plus, for
//! lit variants, the number of lights. Its [`key`](ShaderVariant::key) is the
//! cache key: flags are written in declaration order so the same set always
//! produces the same string, and different sets never collide.
//!
//! The [`ShaderResolver`] hands out cached programs and remembers every lit
//! variant it created so a light count change can rebuild all of them.

use bitflags::bitflags;

use crate::{
    backend::RenderBackend,
    resources::cache::{Handle, ResourceCache, ResourcePolicy},
    settings::PhongDefaults,
};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ShaderFlags: u32 {
        const AMBIENT_TEXTURE        = 1 << 0;
        const DIFFUSE_TEXTURE        = 1 << 1;
        const NORMAL_TEXTURE         = 1 << 2;
        const TEXTURE_TRANSFORMATION = 1 << 3;
        const VERTEX_COLOR           = 1 << 4;
        const ALPHA_MASK             = 1 << 5;
        const OBJECT_ID              = 1 << 6;
    }
}

// Key fragment and WGSL constant for every flag, in bit order.
const FLAG_NAMES: [(ShaderFlags, &str, &str); 7] = [
    (ShaderFlags::AMBIENT_TEXTURE, "ambientTexture", "HAS_AMBIENT_TEXTURE"),
    (ShaderFlags::DIFFUSE_TEXTURE, "diffuseTexture", "HAS_DIFFUSE_TEXTURE"),
    (ShaderFlags::NORMAL_TEXTURE, "normalTexture", "HAS_NORMAL_TEXTURE"),
    (ShaderFlags::TEXTURE_TRANSFORMATION, "textureTransformation", "HAS_TEXTURE_TRANSFORMATION"),
    (ShaderFlags::VERTEX_COLOR, "vertexColor", "HAS_VERTEX_COLOR"),
    (ShaderFlags::ALPHA_MASK, "alphaMask", "HAS_ALPHA_MASK"),
    (ShaderFlags::OBJECT_ID, "objectId", "HAS_OBJECT_ID"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Lit; depends on the scene's light count.
    Phong,
    /// Unlit colour (optionally textured) for 2D shapes and the grid.
    Flat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderVariant {
    pub kind: ShaderKind,
    pub flags: ShaderFlags,
    /// Always 0 for variants that don't depend on lights.
    pub light_count: u32,
}

impl ShaderVariant {
    pub fn phong(flags: ShaderFlags, light_count: u32) -> Self {
        Self {
            kind: ShaderKind::Phong,
            flags,
            light_count,
        }
    }

    pub fn flat(flags: ShaderFlags) -> Self {
        Self {
            kind: ShaderKind::Flat,
            flags,
            light_count: 0,
        }
    }

    pub fn depends_on_lights(&self) -> bool {
        self.kind == ShaderKind::Phong
    }

    pub fn with_light_count(self, light_count: u32) -> Self {
        match self.kind {
            ShaderKind::Phong => Self {
                light_count,
                ..self
            },
            ShaderKind::Flat => self,
        }
    }

    /// Cache key, e.g. `phong-diffuseTexture-vertexColor-lights2` or `flat`.
    pub fn key(&self) -> String {
        let mut key = String::from(match self.kind {
            ShaderKind::Phong => "phong",
            ShaderKind::Flat => "flat",
        });
        for (flag, name, _) in FLAG_NAMES {
            if self.flags.contains(flag) {
                key.push('-');
                key.push_str(name);
            }
        }
        if self.depends_on_lights() {
            key.push_str(&format!("-lights{}", self.light_count));
        }
        key
    }
}

/// Build the WGSL source for a variant.
///
/// Fails if the variant needs more lights than the template supports.
pub fn generate_source(variant: &ShaderVariant, max_lights: u32) -> anyhow::Result<String> {
    if variant.light_count > max_lights {
        anyhow::bail!(
            "{} needs {} lights but at most {} are supported",
            variant.key(),
            variant.light_count,
            max_lights
        );
    }
    let mut source = String::new();
    if variant.depends_on_lights() {
        // Uniform arrays can't be empty.
        source.push_str(&format!(
            "const LIGHT_COUNT: u32 = {}u;\nconst ACTIVE_LIGHTS: u32 = {}u;\n",
            variant.light_count.max(1),
            variant.light_count
        ));
    }
    for (flag, _, constant) in FLAG_NAMES {
        source.push_str(&format!(
            "const {}: bool = {};\n",
            constant,
            variant.flags.contains(flag)
        ));
    }
    source.push_str(match variant.kind {
        ShaderKind::Phong => include_str!("phong.wgsl"),
        ShaderKind::Flat => include_str!("flat.wgsl"),
    });
    Ok(source)
}

/// A compiled shader permutation as stored in the resource cache.
#[derive(Debug)]
pub struct ShaderProgram {
    pub key: String,
    pub variant: ShaderVariant,
    pub source: String,
    pub specular_color: [f32; 4],
    pub shininess: f32,
    /// `None` when the owning backend has no device.
    pub module: Option<wgpu::ShaderModule>,
}

impl ShaderProgram {
    pub fn new(variant: ShaderVariant, source: String, module: Option<wgpu::ShaderModule>) -> Self {
        Self {
            key: variant.key(),
            variant,
            source,
            specular_color: [0.0; 4],
            shininess: 1.0,
            module,
        }
    }
}

pub struct ShaderResolver {
    light_count: u32,
    /// Lit variants created so far, keyed at the current light count.
    known: Vec<ShaderVariant>,
    phong: PhongDefaults,
}

impl ShaderResolver {
    pub fn new(phong: PhongDefaults) -> Self {
        Self {
            light_count: 0,
            known: Vec::new(),
            phong,
        }
    }

    pub fn light_count(&self) -> u32 {
        self.light_count
    }

    pub fn known_variants(&self) -> &[ShaderVariant] {
        &self.known
    }

    fn compile(
        &self,
        variant: ShaderVariant,
        backend: &mut dyn RenderBackend,
    ) -> anyhow::Result<ShaderProgram> {
        let source = generate_source(&variant, self.phong.max_lights)?;
        let mut program = backend.compile_shader(&variant, source)?;
        program.specular_color = self.phong.specular_color;
        program.shininess = self.phong.shininess;
        Ok(program)
    }

    /// The lit program for `flags` at the current light count.
    pub fn phong(
        &mut self,
        flags: ShaderFlags,
        cache: &mut ResourceCache,
        backend: &mut dyn RenderBackend,
    ) -> anyhow::Result<Handle<ShaderProgram>> {
        self.resolve(ShaderVariant::phong(flags, self.light_count), cache, backend)
    }

    pub fn flat(
        &mut self,
        flags: ShaderFlags,
        cache: &mut ResourceCache,
        backend: &mut dyn RenderBackend,
    ) -> anyhow::Result<Handle<ShaderProgram>> {
        self.resolve(ShaderVariant::flat(flags), cache, backend)
    }

    /// Get the cached program for `variant` or compile and register it.
    ///
    /// A failed compile registers nothing.
    pub fn resolve(
        &mut self,
        variant: ShaderVariant,
        cache: &mut ResourceCache,
        backend: &mut dyn RenderBackend,
    ) -> anyhow::Result<Handle<ShaderProgram>> {
        let key = variant.key();
        if let Some(program) = cache.get::<ShaderProgram>(&key) {
            return Ok(program);
        }
        let program = self.compile(variant, backend)?;
        log::debug!("compiled shader {}", key);
        // A variant freed from the cache and resolved again is already known.
        if variant.depends_on_lights()
            && variant.light_count == self.light_count
            && !self.known.contains(&variant)
        {
            self.known.push(variant);
        }
        Ok(cache.set(&key, program, ResourcePolicy::ReferenceCounted))
    }

    /// Rebuild every known lit variant for a new light count.
    ///
    /// Each program is swapped in place and its entry moved to the key for the
    /// new count, so handles held by features stay valid. If any variant fails
    /// to compile nothing is changed. Returns how many programs were rebuilt.
    ///
    /// Keys always name the light count their program was built for: after the
    /// change a lookup under the old key misses. Resolve through
    /// [`ShaderResolver::phong`] rather than holding key strings.
    pub fn set_light_count(
        &mut self,
        light_count: u32,
        cache: &mut ResourceCache,
        backend: &mut dyn RenderBackend,
    ) -> anyhow::Result<usize> {
        if light_count == self.light_count {
            return Ok(0);
        }
        // Entries dropped by ResourceCache::free need no rebuild.
        self.known.retain(|variant| cache.contains(&variant.key()));

        let rebuilt = self
            .known
            .iter()
            .map(|variant| {
                let next = variant.with_light_count(light_count);
                self.compile(next, backend).map(|program| (*variant, program))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        self.known.clear();
        for (old, program) in rebuilt {
            let old_key = old.key();
            let new_key = program.key.clone();
            let variant = program.variant;
            if !cache.contains(&old_key) || self.known.contains(&variant) {
                continue;
            }
            // A dead program compiled for the new count would block the move.
            if cache.references(&new_key) == Some(0) {
                cache.remove(&new_key);
            }
            cache.replace(&old_key, program);
            cache.rekey(&old_key, &new_key);
            self.known.push(variant);
        }
        log::info!(
            "light count changed from {} to {}, rebuilt {} shaders",
            self.light_count,
            light_count,
            self.known.len()
        );
        self.light_count = light_count;
        Ok(self.known.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn keys_follow_bit_order() {
        let a = ShaderVariant::phong(ShaderFlags::VERTEX_COLOR | ShaderFlags::DIFFUSE_TEXTURE, 2);
        let b = ShaderVariant::phong(ShaderFlags::DIFFUSE_TEXTURE | ShaderFlags::VERTEX_COLOR, 2);
        assert_eq!(a.key(), "phong-diffuseTexture-vertexColor-lights2");
        assert_eq!(a.key(), b.key());
        assert_eq!(ShaderVariant::flat(ShaderFlags::empty()).key(), "flat");
    }

    #[test]
    fn every_flag_set_and_light_count_has_its_own_key() {
        let mut keys = HashSet::new();
        for bits in 0..=ShaderFlags::all().bits() {
            let flags = ShaderFlags::from_bits_truncate(bits);
            for lights in 0..4 {
                assert!(keys.insert(ShaderVariant::phong(flags, lights).key()));
            }
            assert!(keys.insert(ShaderVariant::flat(flags).key()));
        }
    }

    #[test]
    fn flat_variants_ignore_light_count() {
        let flat = ShaderVariant::flat(ShaderFlags::DIFFUSE_TEXTURE);
        assert_eq!(flat.with_light_count(3), flat);
    }

    #[test]
    fn source_declares_constants() {
        let variant = ShaderVariant::phong(ShaderFlags::NORMAL_TEXTURE, 0);
        let source = generate_source(&variant, 4).unwrap();
        assert!(source.contains("const LIGHT_COUNT: u32 = 1u;"));
        assert!(source.contains("const ACTIVE_LIGHTS: u32 = 0u;"));
        assert!(source.contains("const HAS_NORMAL_TEXTURE: bool = true;"));
        assert!(source.contains("const HAS_DIFFUSE_TEXTURE: bool = false;"));
    }

    #[test]
    fn variants_resolved_again_after_free_are_rebuilt_once() {
        let mut resolver = ShaderResolver::new(PhongDefaults::default());
        let mut cache = ResourceCache::new();
        let mut backend = HeadlessBackend::new();
        let flags = ShaderFlags::OBJECT_ID;

        drop(resolver.phong(flags, &mut cache, &mut backend).unwrap());
        assert_eq!(cache.free(), 1);
        let program = resolver.phong(flags, &mut cache, &mut backend).unwrap();
        assert_eq!(resolver.known_variants().len(), 1);

        assert_eq!(resolver.set_light_count(2, &mut cache, &mut backend).unwrap(), 1);
        assert_eq!(program.borrow().key, "phong-objectId-lights2");
        assert!(!cache.contains("phong-objectId-lights0"));

        // Resolving at the new count hits the moved entry.
        let again = resolver.phong(flags, &mut cache, &mut backend).unwrap();
        assert!(again.ptr_eq(&program));
        assert_eq!(backend.stats().shader_compiles(), 3);
    }

    #[test]
    fn dead_programs_for_the_new_count_are_replaced() {
        let mut resolver = ShaderResolver::new(PhongDefaults::default());
        let mut cache = ResourceCache::new();
        let mut backend = HeadlessBackend::new();
        let stale = ShaderVariant::phong(ShaderFlags::empty(), 1);
        drop(resolver.resolve(stale, &mut cache, &mut backend).unwrap());

        let program = resolver.phong(ShaderFlags::empty(), &mut cache, &mut backend).unwrap();
        resolver.set_light_count(1, &mut cache, &mut backend).unwrap();
        assert!(cache.get::<ShaderProgram>("phong-lights1").unwrap().ptr_eq(&program));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn too_many_lights_fail_to_build() {
        let variant = ShaderVariant::phong(ShaderFlags::empty(), 5);
        assert!(generate_source(&variant, 4).is_err());
    }
}
