//! glTF asset source.
//!
//! Meshes are flattened to one entry per glTF primitive. A node whose mesh has
//! more than one primitive gets an extra child object for every primitive
//! after the first, so each object instantiates exactly one mesh.

use std::path::{Path, PathBuf};

use cgmath::{Matrix3, Matrix4, Quaternion, Vector3};
use gltf::{
    khr_lights_punctual::Kind,
    mesh::Mode,
    texture::{MagFilter, MinFilter, WrappingMode},
};

use crate::{
    data_structures::{
        feature::{AlphaMode, LightFeature, LightKind},
        mesh::{MeshData, MeshVertex, Topology},
        texture::{Filter, SamplerSettings, TextureData, Wrapping},
    },
    resources::{
        AssetMaterial, AssetObject, AssetScene, AssetSource, AssetTextureRef, Instance,
        MaterialModel, ObjectTransform, texture::load_binary,
    },
};

/// Object created for the extra primitives of a node.
#[derive(Debug)]
struct PrimitiveObject {
    node: usize,
    primitive: usize,
    mesh: usize,
    material: Option<usize>,
}

pub struct GltfSource {
    path: String,
    root: PathBuf,
    document: gltf::Document,
    buffers: Vec<Vec<u8>>,
    /// `(mesh, primitive)` for every flattened mesh index.
    primitives: Vec<(usize, usize)>,
    /// First flattened index of every glTF mesh.
    mesh_offsets: Vec<usize>,
    extra_objects: Vec<PrimitiveObject>,
}

impl GltfSource {
    /// Open a `.gltf` or `.glb` file and load all its buffers.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("{} is not a file", path.display()))?;
        let bytes = load_binary(&root, file_name)?;
        let gltf = gltf::Gltf::from_slice(&bytes)?;

        let mut buffers = Vec::new();
        for buffer in gltf.buffers() {
            match buffer.source() {
                gltf::buffer::Source::Bin => match gltf.blob.as_deref() {
                    Some(blob) => buffers.push(blob.to_vec()),
                    None => anyhow::bail!("{} has no binary chunk", path.display()),
                },
                gltf::buffer::Source::Uri(uri) => {
                    if uri.starts_with("data:") {
                        anyhow::bail!("embedded data URIs are not supported");
                    }
                    buffers.push(load_binary(&root, uri)?);
                }
            }
        }

        let mut primitives = Vec::new();
        let mut mesh_offsets = Vec::new();
        for mesh in gltf.meshes() {
            mesh_offsets.push(primitives.len());
            for primitive in mesh.primitives() {
                primitives.push((mesh.index(), primitive.index()));
            }
        }

        let node_count = gltf.nodes().count();
        let mut extra_objects = Vec::new();
        for node in gltf.nodes() {
            let Some(mesh) = node.mesh() else {
                continue;
            };
            for primitive in mesh.primitives().skip(1) {
                extra_objects.push(PrimitiveObject {
                    node: node.index(),
                    primitive: primitive.index(),
                    mesh: mesh_offsets[mesh.index()] + primitive.index(),
                    material: primitive.material().index(),
                });
            }
        }
        log::debug!(
            "opened {} with {} nodes, {} primitives",
            path.display(),
            node_count,
            primitives.len()
        );

        Ok(Self {
            path: path.to_string_lossy().into_owned(),
            root,
            document: gltf.document,
            buffers,
            primitives,
            mesh_offsets,
            extra_objects,
        })
    }

    fn node_count(&self) -> usize {
        self.document.nodes().count()
    }

    fn texture_ref(&self, info: &gltf::texture::Info) -> AssetTextureRef {
        let mut tex_coord = info.tex_coord();
        let transform = info.texture_transform().map(|transform| {
            if let Some(set) = transform.tex_coord() {
                tex_coord = set;
            }
            texture_matrix(transform.offset(), transform.rotation(), transform.scale())
        });
        AssetTextureRef {
            index: info.texture().index(),
            tex_coord,
            transform,
        }
    }

    fn image_bytes(&self, source: gltf::image::Source) -> anyhow::Result<(Vec<u8>, Option<String>)> {
        match source {
            gltf::image::Source::View { view, mime_type } => {
                let buffer = self
                    .buffers
                    .get(view.buffer().index())
                    .ok_or_else(|| anyhow::anyhow!("image view references a missing buffer"))?;
                let end = view.offset() + view.length();
                if end > buffer.len() {
                    anyhow::bail!("image view exceeds its buffer");
                }
                let format = mime_type.split('/').next_back().map(str::to_string);
                Ok((buffer[view.offset()..end].to_vec(), format))
            }
            gltf::image::Source::Uri { uri, mime_type } => {
                let format = match mime_type {
                    Some(mime_type) => mime_type.split('/').next_back().map(str::to_string),
                    None => Path::new(uri)
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(str::to_string),
                };
                Ok((load_binary(&self.root, uri)?, format))
            }
        }
    }
}

/// `translation * rotation * scale` as KHR_texture_transform defines it.
fn texture_matrix(offset: [f32; 2], rotation: f32, scale: [f32; 2]) -> Matrix3<f32> {
    let (sin, cos) = rotation.sin_cos();
    let translation = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, offset[0], offset[1], 1.0);
    let rotation = Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0);
    let scale = Matrix3::new(scale[0], 0.0, 0.0, 0.0, scale[1], 0.0, 0.0, 0.0, 1.0);
    translation * rotation * scale
}

fn sampler_settings(sampler: gltf::texture::Sampler) -> SamplerSettings {
    let wrapping = |mode: WrappingMode| match mode {
        WrappingMode::ClampToEdge => Wrapping::ClampToEdge,
        WrappingMode::MirroredRepeat => Wrapping::MirroredRepeat,
        WrappingMode::Repeat => Wrapping::Repeat,
    };
    SamplerSettings {
        mag_filter: match sampler.mag_filter() {
            Some(MagFilter::Nearest) => Filter::Nearest,
            _ => Filter::Linear,
        },
        min_filter: match sampler.min_filter() {
            Some(MinFilter::Nearest)
            | Some(MinFilter::NearestMipmapNearest)
            | Some(MinFilter::NearestMipmapLinear) => Filter::Nearest,
            _ => Filter::Linear,
        },
        wrap_u: wrapping(sampler.wrap_s()),
        wrap_v: wrapping(sampler.wrap_t()),
    }
}

impl AssetSource for GltfSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn texture_count(&self) -> usize {
        self.document.textures().count()
    }

    fn texture(&self, index: usize) -> anyhow::Result<TextureData> {
        let texture = self
            .document
            .textures()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("texture {} does not exist", index))?;
        let (bytes, format) = self.image_bytes(texture.source().source())?;
        let label = format!("{}#texture{}", self.path, index);
        let data = TextureData::from_bytes(&bytes, &label, format.as_deref())?;
        Ok(data.with_sampler(sampler_settings(texture.sampler())))
    }

    fn light_count(&self) -> usize {
        self.document.lights().map_or(0, |lights| lights.count())
    }

    fn light(&self, index: usize) -> anyhow::Result<LightFeature> {
        let light = self
            .document
            .lights()
            .and_then(|mut lights| lights.nth(index))
            .ok_or_else(|| anyhow::anyhow!("light {} does not exist", index))?;
        let kind = match light.kind() {
            Kind::Directional => LightKind::Directional,
            Kind::Point => LightKind::Point,
            Kind::Spot { .. } => LightKind::Spot,
        };
        Ok(LightFeature {
            kind,
            color: light.color(),
            intensity: light.intensity(),
            range: light.range().unwrap_or(f32::INFINITY),
        })
    }

    fn material_count(&self) -> usize {
        self.document.materials().count()
    }

    fn material(&self, index: usize) -> anyhow::Result<AssetMaterial> {
        let material = self
            .document
            .materials()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("material {} does not exist", index))?;
        let pbr = material.pbr_metallic_roughness();
        let alpha_mode = match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask(material.alpha_cutoff().unwrap_or(0.5)),
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        };
        let (normal_texture, normal_texture_scale) = match material.normal_texture() {
            Some(normal) => (
                Some(AssetTextureRef {
                    index: normal.texture().index(),
                    tex_coord: normal.tex_coord(),
                    transform: None,
                }),
                normal.scale(),
            ),
            None => (None, 1.0),
        };
        Ok(AssetMaterial {
            name: material.name().map(str::to_string),
            model: MaterialModel::Phong,
            diffuse_color: pbr.base_color_factor(),
            diffuse_texture: pbr.base_color_texture().map(|info| self.texture_ref(&info)),
            normal_texture,
            normal_texture_scale,
            alpha_mode,
            ..Default::default()
        })
    }

    fn mesh_count(&self) -> usize {
        self.primitives.len()
    }

    fn mesh(&self, index: usize) -> anyhow::Result<MeshData> {
        let &(mesh_index, primitive_index) = self
            .primitives
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("mesh {} does not exist", index))?;
        let mesh = self
            .document
            .meshes()
            .nth(mesh_index)
            .ok_or_else(|| anyhow::anyhow!("mesh {} does not exist", mesh_index))?;
        let primitive = mesh
            .primitives()
            .nth(primitive_index)
            .ok_or_else(|| anyhow::anyhow!("primitive {} does not exist", primitive_index))?;
        let topology = match primitive.mode() {
            Mode::Triangles => Topology::Triangles,
            Mode::Lines => Topology::Lines,
            other => anyhow::bail!("unsupported primitive mode {:?}", other),
        };

        let reader = primitive.reader(|buffer| self.buffers.get(buffer.index()).map(Vec::as_slice));
        let Some(positions) = reader.read_positions() else {
            anyhow::bail!("primitive has no positions");
        };
        let mut vertices: Vec<MeshVertex> = positions
            .map(|position| MeshVertex::new(position, [0.0, 0.0, 1.0], [0.0, 0.0]))
            .collect();
        if let Some(normals) = reader.read_normals() {
            for (vertex, normal) in vertices.iter_mut().zip(normals) {
                vertex.normal = normal;
            }
        }
        if let Some(tex_coords) = reader.read_tex_coords(0).map(|v| v.into_f32()) {
            for (vertex, tex_coord) in vertices.iter_mut().zip(tex_coords) {
                vertex.tex_coords = tex_coord;
            }
        }
        let colors = reader.read_colors(0).map(|v| v.into_rgba_f32());
        let has_vertex_colors = colors.is_some();
        if let Some(colors) = colors {
            for (vertex, color) in vertices.iter_mut().zip(colors) {
                vertex.color = color;
            }
        }
        let indices = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            None => (0..vertices.len() as u32).collect(),
        };

        let name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}#mesh{}", self.path, index));
        let mut data = MeshData::new(name, vertices, indices);
        data.topology = topology;
        data.has_vertex_colors = has_vertex_colors;
        data.validate()?;
        Ok(data)
    }

    fn object_count(&self) -> usize {
        self.node_count() + self.extra_objects.len()
    }

    fn object(&self, index: usize) -> anyhow::Result<AssetObject> {
        let node_count = self.node_count();
        if let Some(extra) = index.checked_sub(node_count).and_then(|i| self.extra_objects.get(i)) {
            let parent = self.document.nodes().nth(extra.node).and_then(|n| n.name().map(str::to_string));
            return Ok(AssetObject {
                name: parent.map(|name| format!("{} primitive {}", name, extra.primitive)),
                transform: ObjectTransform::Matrix(Matrix4::from_scale(1.0)),
                instance: Instance::Mesh {
                    mesh: extra.mesh,
                    material: extra.material,
                },
                children: Vec::new(),
            });
        }
        let node = self
            .document
            .nodes()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("object {} does not exist", index))?;

        let transform = match node.transform() {
            gltf::scene::Transform::Decomposed {
                translation,
                rotation: [x, y, z, w],
                scale,
            } => ObjectTransform::Trs {
                translation: Vector3::from(translation),
                rotation: Quaternion::new(w, x, y, z),
                scale: Vector3::from(scale),
            },
            gltf::scene::Transform::Matrix { matrix } => ObjectTransform::Matrix(Matrix4::from(matrix)),
        };

        let instance = if let Some(mesh) = node.mesh() {
            let material = mesh.primitives().next().and_then(|p| p.material().index());
            Instance::Mesh {
                mesh: self.mesh_offsets[mesh.index()],
                material,
            }
        } else if let Some(light) = node.light() {
            Instance::Light(light.index())
        } else if let Some(camera) = node.camera() {
            Instance::Camera(camera.index())
        } else {
            Instance::Empty
        };

        let mut children: Vec<usize> = node.children().map(|child| child.index()).collect();
        children.extend(
            self.extra_objects
                .iter()
                .enumerate()
                .filter(|(_, extra)| extra.node == index)
                .map(|(i, _)| node_count + i),
        );

        Ok(AssetObject {
            name: node.name().map(str::to_string),
            transform,
            instance,
            children,
        })
    }

    /// The scene the file marks as default, or its first scene.
    fn default_scene(&self) -> Option<usize> {
        self.document
            .default_scene()
            .or_else(|| self.document.scenes().next())
            .map(|scene| scene.index())
    }

    fn scene(&self, index: usize) -> anyhow::Result<AssetScene> {
        let scene = self
            .document
            .scenes()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("scene {} does not exist", index))?;
        Ok(AssetScene {
            children: scene.nodes().map(|node| node.index()).collect(),
        })
    }
}
