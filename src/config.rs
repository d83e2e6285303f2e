//! Export configuration.
//!
//! [`ExportConfig`] is built once per run and handed by reference to every
//! stage of the pipeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How material textures are turned into `<Texture>` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureProcessing {
    /// One texture per populated material slot, envtype inferred from slot usage.
    #[default]
    Simple,
    /// Bake each enabled layer into a synthetic image per mesh.
    Bake,
    /// One texture per slot, no usage inference.
    Raw,
}

/// Where tangent/binormal vectors come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TangentMode {
    #[default]
    None,
    /// Use tangents supplied by the scene, or derive them from UV gradients.
    Host,
    /// Run `egg-trans -tbnall` on the written document.
    External,
}

/// Texture layers that can be baked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BakeLayer {
    Diffuse,
    Normal,
    Gloss,
    Glow,
    Ao,
    Shadow,
}

impl BakeLayer {
    pub const ALL: [BakeLayer; 6] = [
        BakeLayer::Diffuse,
        BakeLayer::Normal,
        BakeLayer::Gloss,
        BakeLayer::Glow,
        BakeLayer::Ao,
        BakeLayer::Shadow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diffuse => "diffuse",
            Self::Normal => "normal",
            Self::Gloss => "gloss",
            Self::Glow => "glow",
            Self::Ao => "AO",
            Self::Shadow => "shadow",
        }
    }

    /// EGG `envtype` used when this layer is applied.
    pub fn envtype(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Gloss => "GLOSS",
            Self::Glow => "GLOW",
            Self::Diffuse | Self::Ao | Self::Shadow => "MODULATE",
        }
    }

    /// Whether the layer may be baked under the given texture mode.
    pub fn allowed_in(&self, mode: TextureProcessing) -> bool {
        match mode {
            TextureProcessing::Bake => true,
            TextureProcessing::Simple => matches!(self, Self::Ao | Self::Shadow),
            TextureProcessing::Raw => false,
        }
    }
}

/// Resolution and enable flag of one bake layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BakeSettings {
    pub width: u32,
    pub height: u32,
    pub export: bool,
}

impl BakeSettings {
    pub fn new(width: u32, height: u32, export: bool) -> Self {
        Self { width, height, export }
    }
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self::new(512, 512, false)
    }
}

/// A named frame range to sample. `stop` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationRange {
    pub start: i32,
    pub stop: i32,
    pub fps: u32,
}

impl AnimationRange {
    pub fn new(start: i32, stop: i32, fps: u32) -> Self {
        Self { start, stop, fps }
    }

    /// The sampled range; an empty range is widened to one frame.
    pub fn frames(&self) -> std::ops::Range<i32> {
        if self.start == self.stop {
            self.start..self.start + 1
        } else {
            self.start..self.stop
        }
    }
}

/// Which animations a run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationRequest {
    /// Caller-supplied named ranges.
    Named(IndexMap<String, AnimationRange>),
    /// One animation per action in the scene, using the action's own range.
    FromActions,
}

impl Default for AnimationRequest {
    fn default() -> Self {
        Self::Named(IndexMap::new())
    }
}

impl AnimationRequest {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Named(map) if map.is_empty())
    }
}

/// Options controlling one export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub animations: AnimationRequest,
    pub texture_processing: TextureProcessing,
    pub tangents: TangentMode,
    pub bake_layers: IndexMap<BakeLayer, BakeSettings>,
    pub copy_texture_files: bool,
    /// In `Simple` mode, also export images assigned per polygon in UV space.
    pub uv_image_as_texture: bool,
    /// Texture directory, relative to the primary document's directory.
    pub texture_path: String,
    pub separate_animation_files: bool,
    pub animation_only: bool,
    pub merge_actor: bool,
    pub apply_modifiers: bool,
    pub use_loop_normals: bool,
    pub export_pbs: bool,
    pub force_vertex_colors: bool,
    /// Decimal places written for every float.
    pub precision: usize,
    pub launch_viewer: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let mut bake_layers = IndexMap::new();
        for layer in BakeLayer::ALL {
            let export = layer == BakeLayer::Diffuse;
            bake_layers.insert(layer, BakeSettings::new(512, 512, export));
        }
        Self {
            animations: AnimationRequest::default(),
            texture_processing: TextureProcessing::Simple,
            tangents: TangentMode::None,
            bake_layers,
            copy_texture_files: true,
            uv_image_as_texture: false,
            texture_path: "./tex".to_string(),
            separate_animation_files: true,
            animation_only: false,
            merge_actor: false,
            apply_modifiers: true,
            use_loop_normals: false,
            export_pbs: false,
            force_vertex_colors: false,
            precision: 6,
            launch_viewer: false,
        }
    }
}

impl ExportConfig {
    /// Set a named animation range.
    pub fn with_animation(mut self, name: impl Into<String>, range: AnimationRange) -> Self {
        match &mut self.animations {
            AnimationRequest::Named(map) => {
                map.insert(name.into(), range);
            }
            AnimationRequest::FromActions => {
                let mut map = IndexMap::new();
                map.insert(name.into(), range);
                self.animations = AnimationRequest::Named(map);
            }
        }
        self
    }

    /// Layers that will actually be baked under this configuration.
    pub fn active_bake_layers(&self) -> Vec<(BakeLayer, BakeSettings)> {
        self.bake_layers
            .iter()
            .filter(|(layer, settings)| settings.export && layer.allowed_in(self.texture_processing))
            .map(|(layer, settings)| (*layer, *settings))
            .collect()
    }
}
