//! Armatures and bones.

use super::action::Action;
use crate::error::{ExportError, Result};
use glam::Mat4;
use serde::{Deserialize, Serialize};

/// A bone with its rest matrix in armature space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub matrix_local: Mat4,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent: Option<&str>, matrix_local: Mat4) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_string),
            matrix_local,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmatureData {
    #[serde(default)]
    pub bones: Vec<Bone>,
}

impl ArmatureData {
    pub fn new(bones: Vec<Bone>) -> Self {
        Self { bones }
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|b| b.name == name)
    }

    fn require_bone(&self, name: &str) -> Result<&Bone> {
        self.bone(name)
            .ok_or_else(|| ExportError::NotFound(format!("bone '{}'", name)))
    }

    /// Bones without a parent bone, in declaration order.
    pub fn root_bones(&self) -> impl Iterator<Item = &Bone> {
        self.bones.iter().filter(|b| b.parent.is_none())
    }

    /// Direct children of a bone, in declaration order.
    pub fn children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Bone> + 'a {
        self.bones
            .iter()
            .filter(move |b| b.parent.as_deref() == Some(parent))
    }

    /// Rest matrix of a bone relative to its parent bone (armature space for roots).
    pub fn rest_local(&self, bone: &str) -> Result<Mat4> {
        let b = self.require_bone(bone)?;
        match &b.parent {
            Some(parent) => Ok(self.require_bone(parent)?.matrix_local.inverse() * b.matrix_local),
            None => Ok(b.matrix_local),
        }
    }

    /// Posed armature-space matrix of a bone.
    pub fn pose_matrix(&self, bone: &str, action: Option<&Action>, frame: f32) -> Result<Mat4> {
        self.pose_matrix_depth(bone, action, frame, 0)
    }

    fn pose_matrix_depth(
        &self,
        bone: &str,
        action: Option<&Action>,
        frame: f32,
        depth: usize,
    ) -> Result<Mat4> {
        if depth > self.bones.len() {
            return Err(ExportError::Hierarchy(format!(
                "bone parent chain of '{}' is cyclic",
                bone
            )));
        }
        let b = self.require_bone(bone)?;
        let basis = action
            .and_then(|a| a.bones.get(bone))
            .map(|tracks| tracks.basis(frame))
            .unwrap_or(Mat4::IDENTITY);
        match &b.parent {
            Some(parent) => {
                let parent_rest = self.require_bone(parent)?.matrix_local;
                let parent_pose = self.pose_matrix_depth(parent, action, frame, depth + 1)?;
                Ok(parent_pose * parent_rest.inverse() * b.matrix_local * basis)
            }
            None => Ok(b.matrix_local * basis),
        }
    }
}
