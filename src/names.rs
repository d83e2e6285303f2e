//! Stable export names.
//!
//! Names are captured from the scene before any preparation step touches it,
//! so later renames (copies, merges) do not leak into the document. The
//! registry does not enforce uniqueness; two entities may share a name.

use crate::scene::{ObjectData, Scene};
use std::collections::HashMap;

/// Identity of a nameable scene entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Object(String),
    Mesh(String),
    Curve(String),
    Material(String),
    Texture(String),
    Image(String),
    Bone { armature: String, bone: String },
}

impl EntityKey {
    pub fn bone(armature: impl Into<String>, bone: impl Into<String>) -> Self {
        Self::Bone {
            armature: armature.into(),
            bone: bone.into(),
        }
    }

    /// The host-side name the key was built from.
    pub fn raw(&self) -> &str {
        match self {
            Self::Object(name)
            | Self::Mesh(name)
            | Self::Curve(name)
            | Self::Material(name)
            | Self::Texture(name)
            | Self::Image(name) => name,
            Self::Bone { bone, .. } => bone,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    names: HashMap<EntityKey, String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every entity of a scene under its current name.
    pub fn from_scene(scene: &Scene) -> Self {
        let mut registry = Self::new();
        for object in &scene.objects {
            registry.assign(EntityKey::Object(object.name.clone()), &object.name);
            match &object.data {
                ObjectData::Mesh(mesh) => {
                    registry.assign(EntityKey::Mesh(mesh.name.clone()), &mesh.name);
                }
                ObjectData::Curve(curve) => {
                    registry.assign(EntityKey::Curve(curve.name.clone()), &curve.name);
                }
                ObjectData::Armature(armature) => {
                    for bone in &armature.bones {
                        registry.assign(EntityKey::bone(&object.name, &bone.name), &bone.name);
                    }
                }
                ObjectData::Empty => {}
            }
        }
        for name in scene.materials.keys() {
            registry.assign(EntityKey::Material(name.clone()), name);
        }
        for name in scene.textures.keys() {
            registry.assign(EntityKey::Texture(name.clone()), name);
        }
        for name in scene.images.keys() {
            registry.assign(EntityKey::Image(name.clone()), name);
        }
        registry
    }

    /// Assign a name to an entity. An entity keeps its first name.
    pub fn assign(&mut self, key: EntityKey, name: &str) -> &str {
        self.names.entry(key).or_insert_with(|| name.to_string())
    }

    pub fn get(&self, key: &EntityKey) -> Option<&str> {
        self.names.get(key).map(String::as_str)
    }

    /// Assigned name, falling back to the key's raw name for late entities.
    pub fn resolve<'a>(&'a self, key: &'a EntityKey) -> &'a str {
        self.get(key).unwrap_or_else(|| key.raw())
    }

    pub fn object(&self, name: &str) -> String {
        self.resolve(&EntityKey::Object(name.to_string())).to_string()
    }

    pub fn bone(&self, armature: &str, bone: &str) -> String {
        self.resolve(&EntityKey::bone(armature, bone)).to_string()
    }

    pub fn material(&self, name: &str) -> String {
        self.resolve(&EntityKey::Material(name.to_string())).to_string()
    }

    pub fn texture(&self, name: &str) -> String {
        self.resolve(&EntityKey::Texture(name.to_string())).to_string()
    }

    pub fn image(&self, name: &str) -> String {
        self.resolve(&EntityKey::Image(name.to_string())).to_string()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Make a name safe for the EGG grammar.
///
/// Quotes become underscores; names containing spaces are quoted.
pub fn escape(raw: &str) -> String {
    let cleaned = raw.replace('"', "_");
    if cleaned.contains(' ') {
        format!("\"{}\"", cleaned)
    } else {
        cleaned
    }
}
