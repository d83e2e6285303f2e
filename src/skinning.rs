//! Joint vertex references.
//!
//! Each vertex group of a skinned mesh names a bone. For every joint the
//! resolver collects the exploded vertices of every pool that reference it,
//! grouped by exact weight, and attaches the result to the joint node.

use crate::hierarchy::{GroupNode, NodePayload, NodeSource};
use crate::scene::ObjectKind;
use indexmap::IndexMap;
use tracing::debug;

/// Vertices sharing one membership weight on a joint, per vertex pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGroup {
    pub weight: f32,
    /// Pool name to exploded vertex indices, in insertion order.
    pub members: IndexMap<String, Vec<u32>>,
}

impl WeightGroup {
    pub fn vertex_count(&self) -> usize {
        self.members.values().map(Vec::len).sum()
    }
}

/// Key of a joint: owning armature object and bone, both host names.
pub type JointKey = (String, String);

/// Weight groups of every joint, built across all skinned pools.
#[derive(Debug, Clone, Default)]
pub struct JointVertexReference {
    joints: IndexMap<JointKey, IndexMap<u32, WeightGroup>>,
}

impl JointVertexReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one vertex of `pool` bound to `bone` with `weight`.
    pub fn add(&mut self, armature: &str, bone: &str, pool: &str, vertex: u32, weight: f32) {
        let groups = self
            .joints
            .entry((armature.to_string(), bone.to_string()))
            .or_default();
        let group = groups.entry(weight.to_bits()).or_insert_with(|| WeightGroup {
            weight,
            members: IndexMap::new(),
        });
        group.members.entry(pool.to_string()).or_default().push(vertex);
    }

    pub fn groups(&self, armature: &str, bone: &str) -> Vec<WeightGroup> {
        self.joints
            .get(&(armature.to_string(), bone.to_string()))
            .map(|groups| groups.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Collect references from every skinned mesh node under `root`.
    pub fn from_tree(root: &GroupNode<'_>) -> Self {
        let mut armatures = Vec::new();
        root.walk(&mut |node| {
            if let Some(NodeSource::Object(object)) = node.source {
                if object.kind() == ObjectKind::Armature {
                    armatures.push(object);
                }
            }
        });

        let mut refs = Self::new();
        root.walk(&mut |node| {
            let (Some(NodeSource::Object(object)), NodePayload::Mesh(geometry)) =
                (node.source, &node.payload)
            else {
                return;
            };
            let Some(armature_name) = object.armature_modifier() else {
                return;
            };
            let Some(armature) = armatures.iter().find(|a| a.name == armature_name) else {
                debug!(
                    "'{}' is deformed by '{}', which is not exported",
                    object.name, armature_name
                );
                return;
            };
            let (Some(mesh), Some(bones)) = (object.mesh(), armature.armature()) else {
                return;
            };

            for (index, vertex) in geometry.vertices.iter().enumerate() {
                let Some(source) = mesh.vertices.get(vertex.source as usize) else {
                    continue;
                };
                for membership in source.groups.iter().filter(|m| m.weight != 0.0) {
                    let Some(group) = mesh.vertex_groups.get(membership.group) else {
                        continue;
                    };
                    if bones.bone(group).is_none() {
                        continue;
                    }
                    refs.add(
                        &armature.name,
                        group,
                        &geometry.pool,
                        index as u32,
                        membership.weight,
                    );
                }
            }

            for group in &mesh.vertex_groups {
                if bones.bone(group).is_none() {
                    debug!("Vertex group '{}' of '{}' has no matching bone", group, object.name);
                }
            }
        });
        refs
    }

    /// Copy the collected groups onto the joint nodes of the tree.
    pub fn attach(&self, root: &mut GroupNode<'_>) {
        root.walk_mut(&mut |node| {
            let Some(NodeSource::Bone { armature, bone }) = node.source else {
                return;
            };
            if let NodePayload::Joint(joint) = &mut node.payload {
                joint.weights = self.groups(&armature.name, &bone.name);
            }
        });
    }
}

/// Resolve skinning for a built tree. Returns the number of weighted joints.
pub fn resolve(root: &mut GroupNode<'_>) -> usize {
    let refs = JointVertexReference::from_tree(root);
    refs.attach(root);
    debug!("Skinning resolved for {} joints", refs.joint_count());
    refs.joint_count()
}
