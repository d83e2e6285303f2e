//! Host scene model.
//!
//! This is the in-memory scene graph the exporter reads: objects with world
//! matrices and parent links, mesh/armature/curve data blocks, materials,
//! textures, images and keyframed actions. It can be deserialized from JSON.

pub mod action;
pub mod armature;
pub mod curve;
pub mod material;
pub mod mesh;

pub use action::{Action, BoneTracks, Keyframe, Track};
pub use armature::{ArmatureData, Bone};
pub use curve::{CurveData, Spline};
pub use material::{Image, Material, Texture, TextureExtension, TextureSlot};
pub use mesh::{
    ColorLayer, GroupWeight, LoopTangent, MeshData, MeshEdge, MeshPolygon, MeshVertex, ShapeKey,
    UvLayer,
};

use crate::error::{ExportError, Result};
use glam::Mat4;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kind tag of an exportable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Mesh,
    Armature,
    Bone,
    Curve,
    Other,
}

/// Data block attached to an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectData {
    Mesh(MeshData),
    Armature(ArmatureData),
    Curve(CurveData),
    Empty,
}

/// Axis used by a mirror modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorAxis {
    X,
    Y,
    Z,
}

impl MirrorAxis {
    pub fn index(&self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// A modifier in an object's stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Modifier {
    /// Deform by the named armature object.
    Armature { object: String },
    /// Mirror the mesh across a local axis.
    Mirror { axis: MirrorAxis },
    /// Any modifier the exporter cannot evaluate itself.
    Other { name: String },
}

/// One object in the scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Bone of the parent armature this object is attached to.
    #[serde(default)]
    pub parent_bone: Option<String>,
    #[serde(default)]
    pub matrix_world: Mat4,
    pub data: ObjectData,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Custom properties, rendered as tags.
    #[serde(default)]
    pub properties: IndexMap<String, String>,
    /// Action currently assigned to the object.
    #[serde(default)]
    pub action: Option<String>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, data: ObjectData) -> Self {
        Self {
            name: name.into(),
            parent: None,
            parent_bone: None,
            matrix_world: Mat4::IDENTITY,
            data,
            modifiers: Vec::new(),
            properties: IndexMap::new(),
            action: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_parent_bone(mut self, armature: impl Into<String>, bone: impl Into<String>) -> Self {
        self.parent = Some(armature.into());
        self.parent_bone = Some(bone.into());
        self
    }

    pub fn with_matrix(mut self, matrix: Mat4) -> Self {
        self.matrix_world = matrix;
        self
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn kind(&self) -> ObjectKind {
        match self.data {
            ObjectData::Mesh(_) => ObjectKind::Mesh,
            ObjectData::Armature(_) => ObjectKind::Armature,
            ObjectData::Curve(_) => ObjectKind::Curve,
            ObjectData::Empty => ObjectKind::Other,
        }
    }

    pub fn mesh(&self) -> Option<&MeshData> {
        match &self.data {
            ObjectData::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut MeshData> {
        match &mut self.data {
            ObjectData::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn armature(&self) -> Option<&ArmatureData> {
        match &self.data {
            ObjectData::Armature(armature) => Some(armature),
            _ => None,
        }
    }

    pub fn curve(&self) -> Option<&CurveData> {
        match &self.data {
            ObjectData::Curve(curve) => Some(curve),
            _ => None,
        }
    }

    /// Name of the armature object deforming this object, if any.
    pub fn armature_modifier(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Armature { object } => Some(object.as_str()),
            _ => None,
        })
    }
}

/// Shared frame cursor of a scene.
///
/// Moving the cursor re-evaluates every animated value in the scene.
pub trait SceneClock {
    fn current_frame(&self) -> i32;
    fn set_frame(&mut self, frame: i32);
}

fn default_fps() -> u32 {
    24
}

/// A complete scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub frame_current: i32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub materials: IndexMap<String, Material>,
    #[serde(default)]
    pub textures: IndexMap<String, Texture>,
    #[serde(default)]
    pub images: IndexMap<String, Image>,
    #[serde(default)]
    pub actions: IndexMap<String, Action>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            fps: default_fps(),
            ..Self::default()
        }
    }

    /// Load a scene from a JSON file.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn add_object(&mut self, object: SceneObject) -> &mut Self {
        self.objects.push(object);
        self
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn object_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    pub fn require_object(&self, name: &str) -> Result<&SceneObject> {
        self.object(name)
            .ok_or_else(|| ExportError::NotFound(format!("object '{}'", name)))
    }

    /// Assign an action to an object.
    pub fn set_action(&mut self, object: &str, action: &str) -> Result<()> {
        if !self.actions.contains_key(action) {
            return Err(ExportError::NotFound(format!("action '{}'", action)));
        }
        let object = self
            .object_mut(object)
            .ok_or_else(|| ExportError::NotFound(format!("object '{}'", object)))?;
        object.action = Some(action.to_string());
        Ok(())
    }

    fn assigned_action(&self, object: &SceneObject) -> Option<&Action> {
        object.action.as_deref().and_then(|name| self.actions.get(name))
    }

    /// Armature-space matrix of a bone at the current frame.
    pub fn bone_pose_matrix(&self, armature: &SceneObject, bone: &str) -> Result<Mat4> {
        let data = armature.armature().ok_or_else(|| {
            ExportError::NotFound(format!("armature data on '{}'", armature.name))
        })?;
        data.pose_matrix(bone, self.assigned_action(armature), self.frame_current as f32)
    }

    /// Current blend value of a shape key on a mesh object.
    pub fn shape_key_value(&self, object: &SceneObject, key: &str) -> Option<f32> {
        let mesh = object.mesh()?;
        let shape = mesh.shape_keys.iter().find(|k| k.name == key)?;
        let animated = self
            .assigned_action(object)
            .and_then(|a| a.shape_keys.get(key))
            .and_then(|track| track.evaluate(self.frame_current as f32));
        Some(animated.unwrap_or(shape.value))
    }
}

impl SceneClock for Scene {
    fn current_frame(&self) -> i32 {
        self.frame_current
    }

    fn set_frame(&mut self, frame: i32) {
        self.frame_current = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_from_json() {
        let json = r#"{
            "fps": 30,
            "objects": [
                { "name": "Empty", "data": { "type": "empty" } },
                { "name": "Rig", "data": { "type": "armature", "bones": [] } },
                {
                    "name": "Body",
                    "parent": "Rig",
                    "data": { "type": "mesh", "name": "BodyMesh", "vertices": [], "polygons": [] },
                    "modifiers": [ { "type": "armature", "object": "Rig" } ]
                }
            ]
        }"#;
        let scene: Scene = serde_json::from_str(json).unwrap();
        assert_eq!(scene.fps, 30);
        assert_eq!(scene.objects.len(), 3);
        assert_eq!(scene.object("Empty").unwrap().kind(), ObjectKind::Other);
        assert_eq!(scene.object("Rig").unwrap().kind(), ObjectKind::Armature);
        let body = scene.object("Body").unwrap();
        assert_eq!(body.kind(), ObjectKind::Mesh);
        assert_eq!(body.armature_modifier(), Some("Rig"));
        assert_eq!(body.matrix_world, Mat4::IDENTITY);
    }

    #[test]
    fn test_set_action_unknown() {
        let mut scene = Scene::new();
        scene.add_object(SceneObject::new("Rig", ObjectData::Armature(ArmatureData::default())));
        assert!(scene.set_action("Rig", "missing").is_err());
    }
}
