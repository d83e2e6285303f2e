//! Material and texture records.
//!
//! Records are flattened and deduplicated from the materials the exported
//! polygons actually reference. Texture file handling and baking go through
//! the [`TextureSaver`] and [`TextureBaker`] collaborators.

use crate::config::{BakeLayer, BakeSettings, ExportConfig, TextureProcessing};
use crate::error::Result;
use crate::geometry::GeometryData;
use crate::names::{EntityKey, NameRegistry};
use crate::scene::{Image, Material, MeshData, Scene, SceneObject, TextureExtension, TextureSlot};
use glam::Vec2;
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Renders a texture layer of an object into an image.
pub trait TextureBaker {
    fn bake(
        &mut self,
        scene: &Scene,
        object: &SceneObject,
        layer: BakeLayer,
        settings: BakeSettings,
    ) -> Result<RgbaImage>;
}

/// Persists texture images and returns the path written into the document.
pub trait TextureSaver {
    /// Resolve (and possibly copy) an existing image file.
    fn save_image(&mut self, name: &str, image: &Image) -> Result<String>;
    /// Write a baked image.
    fn save_baked(&mut self, name: &str, image: &RgbaImage) -> Result<String>;
}

/// Shading scalars of one material.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRecord {
    pub name: String,
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    pub emission: [f32; 3],
    pub ambient: [f32; 3],
    /// Written only for transparent materials.
    pub alpha: Option<f32>,
    pub pbs: Option<PbsScalars>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbsScalars {
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub metallic: f32,
    pub ior: f32,
}

/// One `<Texture>` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub name: String,
    pub path: String,
    pub envtype: &'static str,
    pub minfilter: &'static str,
    pub magfilter: &'static str,
    pub wrap: &'static str,
    /// UV layer for non-active layers.
    pub uv_name: Option<String>,
    /// Scale and translation of the texture coordinates.
    pub transform: Option<(Vec2, Vec2)>,
}

/// Everything that goes into the materials block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialLibrary {
    pub materials: Vec<MaterialRecord>,
    pub textures: Vec<TextureRecord>,
}

impl MaterialLibrary {
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty() && self.textures.is_empty()
    }

    pub fn texture(&self, name: &str) -> Option<&TextureRecord> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn material(&self, name: &str) -> Option<&MaterialRecord> {
        self.materials.iter().find(|m| m.name == name)
    }
}

/// Name of the synthetic texture baked for one object layer.
pub fn baked_texture_name(object: &str, layer: BakeLayer) -> String {
    format!("{}_{}", object, layer.as_str())
}

fn slot_envtype(slot: &TextureSlot, mode: TextureProcessing) -> &'static str {
    if mode == TextureProcessing::Raw {
        return "MODULATE";
    }
    if slot.use_map_specular {
        "GLOSS"
    } else if slot.use_map_emit {
        "GLOW"
    } else if slot.use_map_normal {
        "NORMAL"
    } else {
        "MODULATE"
    }
}

/// Slots of a material whose texture resolves to an image.
fn image_slots<'s>(scene: &'s Scene, material: &'s Material) -> impl Iterator<Item = &'s TextureSlot> + 's {
    material.texture_slots.iter().filter(move |slot| {
        match scene.textures.get(&slot.texture) {
            Some(texture) => texture.image.is_some(),
            None => {
                warn!("Texture '{}' referenced by a material slot does not exist", slot.texture);
                false
            }
        }
    })
}

/// Images assigned to a polygon in UV space, as `(layer index, image name)`.
fn polygon_uv_images<'m>(
    scene: &'m Scene,
    mesh: &'m MeshData,
    polygon: usize,
) -> impl Iterator<Item = (usize, &'m str)> + 'm {
    mesh.uv_layers
        .iter()
        .enumerate()
        .filter_map(move |(li, layer)| layer.image(polygon).map(|image| (li, image)))
        .filter(move |(_, image)| scene.images.contains_key(*image))
}

/// Texture names referenced by one polygon of a mesh.
pub fn polygon_texture_refs(
    scene: &Scene,
    names: &NameRegistry,
    config: &ExportConfig,
    object: &str,
    mesh: &MeshData,
    polygon: usize,
) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !refs.contains(&name) {
            refs.push(name);
        }
    };
    if config.texture_processing != TextureProcessing::Bake {
        if config.texture_processing == TextureProcessing::Simple && config.uv_image_as_texture {
            for (_, image) in polygon_uv_images(scene, mesh, polygon) {
                push(names.image(image));
            }
        }
        let material = mesh
            .polygons
            .get(polygon)
            .and_then(|p| mesh.material_name(p))
            .and_then(|m| scene.materials.get(m));
        if let Some(material) = material {
            for slot in image_slots(scene, material) {
                push(names.texture(&slot.texture));
            }
        }
    }
    // Baked images are addressed through UV space.
    if !mesh.uv_layers.is_empty() {
        let object = names.object(object);
        for (layer, _) in config.active_bake_layers() {
            push(baked_texture_name(&object, layer));
        }
    }
    refs
}

fn material_record(name: String, material: &Material, config: &ExportConfig) -> MaterialRecord {
    let diffuse = if config.texture_processing == TextureProcessing::Bake {
        [1.0, 1.0, 1.0]
    } else {
        material.diffuse_color.map(|c| c * material.diffuse_intensity)
    };
    MaterialRecord {
        name,
        diffuse,
        specular: material.specular_color.map(|c| c * material.specular_intensity),
        shininess: material.hardness / 512.0 * 128.0,
        emission: [material.emit * 0.1; 3],
        ambient: [material.ambient; 3],
        alpha: material.use_transparency.then_some(material.alpha),
        pbs: config.export_pbs.then(|| PbsScalars {
            base_color: material.diffuse_color,
            roughness: material.roughness,
            metallic: material.metallic,
            ior: material.ior,
        }),
    }
}

/// Collects material and texture records for a set of converted meshes.
pub struct MaterialCollector<'a> {
    scene: &'a Scene,
    names: &'a NameRegistry,
    config: &'a ExportConfig,
}

impl<'a> MaterialCollector<'a> {
    pub fn new(scene: &'a Scene, names: &'a NameRegistry, config: &'a ExportConfig) -> Self {
        Self { scene, names, config }
    }

    /// Build the library from `(object, geometry)` pairs in hierarchy order.
    pub fn collect(
        &self,
        meshes: &[(&SceneObject, &GeometryData)],
        saver: &mut dyn TextureSaver,
        baker: &mut dyn TextureBaker,
    ) -> Result<MaterialLibrary> {
        let mut library = MaterialLibrary::default();

        for (object, geometry) in meshes {
            let active_uv = object
                .mesh()
                .and_then(|m| m.active_uv_layer().or(m.uv_layers.first()))
                .map(|l| l.name.clone());

            if self.config.texture_processing == TextureProcessing::Simple
                && self.config.uv_image_as_texture
            {
                if let Some(mesh) = object.mesh() {
                    self.collect_uv_images(mesh, active_uv.as_deref(), saver, &mut library)?;
                }
            }

            for polygon in &geometry.polygons {
                let Some(host_name) = polygon.material.as_deref() else {
                    continue;
                };
                let export_name = self.names.material(host_name);
                if library.material(&export_name).is_some() {
                    continue;
                }
                let Some(material) = self.scene.materials.get(host_name) else {
                    warn!("Material '{}' used by '{}' does not exist", host_name, object.name);
                    continue;
                };
                library
                    .materials
                    .push(material_record(export_name, material, self.config));

                if self.config.texture_processing != TextureProcessing::Bake {
                    self.collect_slot_textures(material, active_uv.as_deref(), saver, &mut library)?;
                }
            }

            for (layer, settings) in self.config.active_bake_layers() {
                let name = baked_texture_name(&self.names.object(&object.name), layer);
                let image = baker.bake(self.scene, object, layer, settings)?;
                let path = saver.save_baked(&name, &image)?;
                debug!("Baked {} ({}x{}) -> {}", name, settings.width, settings.height, path);
                library.textures.push(TextureRecord {
                    name,
                    path,
                    envtype: layer.envtype(),
                    minfilter: "LINEAR_MIPMAP_LINEAR",
                    magfilter: "LINEAR_MIPMAP_LINEAR",
                    wrap: "REPEAT",
                    uv_name: None,
                    transform: None,
                });
            }
        }
        Ok(library)
    }

    fn collect_uv_images(
        &self,
        mesh: &MeshData,
        active_uv: Option<&str>,
        saver: &mut dyn TextureSaver,
        library: &mut MaterialLibrary,
    ) -> Result<()> {
        for polygon in 0..mesh.polygons.len() {
            for (li, image_name) in polygon_uv_images(self.scene, mesh, polygon) {
                let name = self.names.image(image_name);
                if library.texture(&name).is_some() {
                    continue;
                }
                let Some(image) = self.scene.images.get(image_name) else {
                    continue;
                };
                let path = saver.save_image(&name, image)?;
                let layer = &mesh.uv_layers[li].name;
                library.textures.push(TextureRecord {
                    name,
                    path,
                    envtype: "MODULATE",
                    minfilter: "LINEAR_MIPMAP_LINEAR",
                    magfilter: "LINEAR",
                    wrap: "REPEAT",
                    uv_name: (Some(layer.as_str()) != active_uv).then(|| layer.clone()),
                    transform: None,
                });
            }
        }
        Ok(())
    }

    fn collect_slot_textures(
        &self,
        material: &Material,
        active_uv: Option<&str>,
        saver: &mut dyn TextureSaver,
        library: &mut MaterialLibrary,
    ) -> Result<()> {
        for slot in image_slots(self.scene, material) {
            let name = self.names.texture(&slot.texture);
            if library.texture(&name).is_some() {
                continue;
            }
            let Some(texture) = self.scene.textures.get(&slot.texture) else {
                continue;
            };
            let Some(image_name) = texture.image.as_deref() else {
                continue;
            };
            let Some(image) = self.scene.images.get(image_name) else {
                warn!("Image '{}' of texture '{}' does not exist", image_name, slot.texture);
                continue;
            };
            let image_export = self
                .names
                .resolve(&EntityKey::Image(image_name.to_string()))
                .to_string();
            let path = saver.save_image(&image_export, image)?;

            let uv_name = slot
                .uv_layer
                .as_ref()
                .filter(|layer| Some(layer.as_str()) != active_uv)
                .cloned();
            let transform = slot.has_transform().then(|| {
                (
                    Vec2::new(slot.scale.x, slot.scale.y),
                    Vec2::new(slot.offset.x, slot.offset.y),
                )
            });

            library.textures.push(TextureRecord {
                name,
                path,
                envtype: slot_envtype(slot, self.config.texture_processing),
                minfilter: if texture.use_mipmap { "LINEAR_MIPMAP_LINEAR" } else { "LINEAR" },
                magfilter: if texture.use_interpolation { "LINEAR" } else { "NEAREST" },
                wrap: match texture.extension {
                    TextureExtension::Repeat => "REPEAT",
                    TextureExtension::Clip => "CLAMP",
                },
                uv_name,
                transform,
            });
        }
        Ok(())
    }
}

fn to_slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Saves textures next to the primary document.
pub struct FsTextureSaver {
    output_dir: PathBuf,
    texture_path: String,
    copy: bool,
}

impl FsTextureSaver {
    pub fn new(output_dir: impl Into<PathBuf>, texture_path: impl Into<String>, copy: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            texture_path: texture_path.into(),
            copy,
        }
    }

    pub fn from_config(document: &Path, config: &ExportConfig) -> Self {
        let output_dir = document.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::new(output_dir, config.texture_path.clone(), config.copy_texture_files)
    }

    fn texture_dir(&self) -> PathBuf {
        self.output_dir.join(&self.texture_path)
    }

    fn relative(&self, file_name: &str) -> String {
        format!("{}/{}", self.texture_path.trim_end_matches('/'), file_name)
    }

    fn reference_in_place(&self, source: &Path) -> String {
        match source.strip_prefix(&self.output_dir) {
            Ok(relative) if source.is_absolute() => to_slash_path(relative),
            _ => to_slash_path(source),
        }
    }
}

impl TextureSaver for FsTextureSaver {
    fn save_image(&mut self, name: &str, image: &Image) -> Result<String> {
        let source = Path::new(&image.filepath);
        if !self.copy {
            return Ok(self.reference_in_place(source));
        }
        let file_name = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.png", name));
        let dir = self.texture_dir();
        std::fs::create_dir_all(&dir)?;
        match std::fs::copy(source, dir.join(&file_name)) {
            Ok(_) => Ok(self.relative(&file_name)),
            Err(e) => {
                warn!("Failed to copy texture '{}': {}", image.filepath, e);
                Ok(self.reference_in_place(source))
            }
        }
    }

    fn save_baked(&mut self, name: &str, image: &RgbaImage) -> Result<String> {
        let dir = self.texture_dir();
        std::fs::create_dir_all(&dir)?;
        let file_name = format!("{}.png", name);
        image.save(dir.join(&file_name))?;
        Ok(self.relative(&file_name))
    }
}

/// Bakes each layer as a flat color taken from the object's first material.
#[derive(Debug, Default)]
pub struct FlatColorBaker;

impl TextureBaker for FlatColorBaker {
    fn bake(
        &mut self,
        scene: &Scene,
        object: &SceneObject,
        layer: BakeLayer,
        settings: BakeSettings,
    ) -> Result<RgbaImage> {
        let material = object
            .mesh()
            .and_then(|m| m.materials.iter().flatten().next())
            .and_then(|name| scene.materials.get(name));
        let default = Material::default();
        let material = material.unwrap_or(&default);

        let color = match layer {
            BakeLayer::Diffuse => material.diffuse_color.map(|c| c * material.diffuse_intensity),
            BakeLayer::Normal => [0.5, 0.5, 1.0],
            BakeLayer::Gloss => material.specular_color.map(|c| c * material.specular_intensity),
            BakeLayer::Glow => material.diffuse_color.map(|c| c * material.emit),
            BakeLayer::Ao | BakeLayer::Shadow => [1.0, 1.0, 1.0],
        };
        let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        let pixel = Rgba([to_byte(color[0]), to_byte(color[1]), to_byte(color[2]), 255]);
        Ok(RgbaImage::from_pixel(settings.width.max(1), settings.height.max(1), pixel))
    }
}
