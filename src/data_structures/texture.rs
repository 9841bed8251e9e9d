//! Textures: decoded image data, sampler settings and the GPU texture wrapper.
//!
//! [`TextureData`] is what loaders produce (an RGBA8 image plus how it should be
//! sampled). Backends turn it into a [`GpuTexture`] which is what the resource
//! cache stores and features reference.

use anyhow::*;
use image::{DynamicImage, GenericImageView, ImageFormat, load_from_memory_with_format};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Wrapping {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

/// How a texture is filtered and wrapped when sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SamplerSettings {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub wrap_u: Wrapping,
    pub wrap_v: Wrapping,
}

/// A decoded, displayable image ready for upload.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub label: String,
    pub image: DynamicImage,
    pub sampler: SamplerSettings,
    /// Normal maps are stored linear, colour maps as sRGB.
    pub is_normal_map: bool,
}

impl TextureData {
    /// Decode raw image file contents (PNG, JPEG, ...).
    ///
    /// `format` is an optional file extension hint (e.g. "png"); without it the
    /// format is guessed from the data. Only 8-bit images are accepted, anything
    /// else can't be displayed by the texture formats we allocate.
    pub fn from_bytes(bytes: &[u8], label: &str, format: Option<&str>) -> Result<Self> {
        let img = match format.and_then(ImageFormat::from_extension) {
            None => image::load_from_memory(bytes)?,
            Some(fmt) => load_from_memory_with_format(bytes, fmt)?,
        };
        Self::from_image(img, label)
    }

    pub fn from_image(image: DynamicImage, label: &str) -> Result<Self> {
        match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_) => {}
            other => bail!("cannot load an image of format {:?}", other.color()),
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            bail!("image {} is empty", label);
        }
        Ok(Self {
            label: label.to_string(),
            image,
            sampler: SamplerSettings::default(),
            is_normal_map: false,
        })
    }

    pub fn with_sampler(mut self, sampler: SamplerSettings) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A GPU texture with a view and sampler.
#[derive(Debug)]
pub struct TextureBinding {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

/// A texture as stored in the resource cache.
///
/// `binding` is `None` when the owning backend has no device.
#[derive(Debug)]
pub struct GpuTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub sampler: SamplerSettings,
    pub binding: Option<TextureBinding>,
}

impl GpuTexture {
    pub fn describe(data: &TextureData, binding: Option<TextureBinding>) -> Self {
        let (width, height) = data.dimensions();
        Self {
            label: data.label.clone(),
            width,
            height,
            sampler: data.sampler,
            binding,
        }
    }
}

fn address_mode(wrapping: Wrapping) -> wgpu::AddressMode {
    match wrapping {
        Wrapping::Repeat => wgpu::AddressMode::Repeat,
        Wrapping::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        Wrapping::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

/// Upload a decoded image and create its view and sampler.
pub fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    data: &TextureData,
) -> TextureBinding {
    let dimensions = data.dimensions();
    let rgba = data.image.to_rgba8();

    let size = wgpu::Extent3d {
        width: dimensions.0,
        height: dimensions.1,
        depth_or_array_layers: 1,
    };
    let format = if data.is_normal_map {
        wgpu::TextureFormat::Rgba8Unorm
    } else {
        wgpu::TextureFormat::Rgba8UnormSrgb
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&data.label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        &rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * dimensions.0),
            rows_per_image: Some(dimensions.1),
        },
        size,
    );

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(&data.label),
        address_mode_u: address_mode(data.sampler.wrap_u),
        address_mode_v: address_mode(data.sampler.wrap_v),
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: filter_mode(data.sampler.mag_filter),
        min_filter: filter_mode(data.sampler.min_filter),
        ..Default::default()
    });

    TextureBinding {
        texture,
        view,
        sampler,
    }
}
