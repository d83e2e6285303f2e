//! # EGG Writer
//!
//! A Rust library for exporting 3D scenes to Panda3D EGG documents.
//!
//! ## Overview
//!
//! This library takes a scene (objects, meshes, armatures, curves, materials
//! and actions) and a list of objects to export, and produces a primary EGG
//! document plus optional per-animation side documents and texture files.
//!
//! ## Quick Start
//!
//! ```ignore
//! use egg_writer::{write_out, AnimationRange, ExportConfig, Scene};
//!
//! let scene = Scene::load("scene.json")?;
//! let config = ExportConfig::default()
//!     .with_animation("walk", AnimationRange::new(1, 25, 24));
//!
//! let errors = write_out("out/character.egg".as_ref(), &scene, &["Body".into()], &config);
//! assert!(errors.is_empty());
//! ```
//!
//! ## Pipeline
//!
//! A run goes through these stages, each in its own module:
//!
//! 1. [`prepare`] copies the scene, applies modifiers and merges actors.
//! 2. [`animation`] samples joint and morph tables frame by frame.
//! 3. [`hierarchy`] builds the group tree and converts geometry.
//! 4. [`skinning`] attaches vertex weights to joints.
//! 5. [`materials`] collects materials and saves or bakes textures.
//! 6. [`export`] serializes everything as EGG text.

pub mod error;
pub mod config;
pub mod scene;
pub mod names;
pub mod math;
pub mod prepare;
pub mod geometry;
pub mod hierarchy;
pub mod skinning;
pub mod animation;
pub mod materials;
pub mod export;
pub mod tools;
pub mod pipeline;

// Re-export main types for convenience
pub use error::{ErrorCode, ExportError, Result};
pub use config::{AnimationRange, AnimationRequest, BakeLayer, BakeSettings, ExportConfig, TangentMode, TextureProcessing};
pub use scene::{Scene, SceneObject, ObjectData, ObjectKind, Modifier};
pub use names::NameRegistry;
pub use hierarchy::{GroupNode, HierarchyBuilder};
pub use animation::{AnimationSampler, SampledAnimation};
pub use materials::{MaterialLibrary, TextureBaker, TextureSaver};
pub use export::EggSerializer;
pub use tools::{ExternalTools, ProcessTools};
pub use pipeline::{animation_path, write_out, write_out_with, Collaborators};

/// Load a scene description from a JSON file.
pub fn load_scene<P: AsRef<std::path::Path>>(path: P) -> Result<Scene> {
    Scene::load(path)
}
