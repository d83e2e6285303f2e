//! Materials, textures and images.

use glam::Vec3;
use serde::{Deserialize, Serialize};

fn yes() -> bool {
    true
}

fn unit_scale() -> Vec3 {
    Vec3::ONE
}

/// A texture applied through a material slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureSlot {
    /// Texture data-block name.
    pub texture: String,
    #[serde(default = "yes")]
    pub use_map_color_diffuse: bool,
    #[serde(default)]
    pub use_map_normal: bool,
    #[serde(default)]
    pub use_map_specular: bool,
    #[serde(default)]
    pub use_map_emit: bool,
    /// UV layer name; the active layer when absent.
    #[serde(default)]
    pub uv_layer: Option<String>,
    #[serde(default)]
    pub offset: Vec3,
    #[serde(default = "unit_scale")]
    pub scale: Vec3,
}

impl TextureSlot {
    pub fn new(texture: impl Into<String>) -> Self {
        Self {
            texture: texture.into(),
            use_map_color_diffuse: true,
            use_map_normal: false,
            use_map_specular: false,
            use_map_emit: false,
            uv_layer: None,
            offset: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }

    pub fn has_transform(&self) -> bool {
        self.offset != Vec3::ZERO || self.scale != Vec3::ONE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub diffuse_color: [f32; 3],
    pub diffuse_intensity: f32,
    pub specular_color: [f32; 3],
    pub specular_intensity: f32,
    pub hardness: f32,
    pub emit: f32,
    pub ambient: f32,
    pub alpha: f32,
    pub use_transparency: bool,
    pub use_vertex_color_paint: bool,
    pub roughness: f32,
    pub metallic: f32,
    pub ior: f32,
    pub texture_slots: Vec<TextureSlot>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse_color: [0.8, 0.8, 0.8],
            diffuse_intensity: 0.8,
            specular_color: [1.0, 1.0, 1.0],
            specular_intensity: 0.5,
            hardness: 50.0,
            emit: 0.0,
            ambient: 1.0,
            alpha: 1.0,
            use_transparency: false,
            use_vertex_color_paint: false,
            roughness: 0.5,
            metallic: 0.0,
            ior: 1.45,
            texture_slots: Vec::new(),
        }
    }
}

/// Texture wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureExtension {
    #[default]
    Repeat,
    Clip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    /// Image data-block name; procedural textures have none.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub extension: TextureExtension,
    #[serde(default = "yes")]
    pub use_mipmap: bool,
    #[serde(default = "yes")]
    pub use_interpolation: bool,
}

impl Texture {
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            extension: TextureExtension::Repeat,
            use_mipmap: true,
            use_interpolation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub filepath: String,
}

impl Image {
    pub fn new(filepath: impl Into<String>) -> Self {
        Self { filepath: filepath.into() }
    }
}
