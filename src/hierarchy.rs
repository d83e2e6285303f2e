//! Group hierarchy reconstruction.
//!
//! The export set arrives as a flat, unordered list of objects. The builder
//! turns it into a tree rooted at a synthetic node by repeatedly scanning the
//! remaining candidates for children of the node being expanded. Bones are
//! injected as candidates when their armature's node is expanded.

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::geometry::{CurveGeometry, GeometryConverter, GeometryData};
use crate::names::NameRegistry;
use crate::scene::{Bone, ObjectData, ObjectKind, Scene, SceneObject};
use crate::skinning::WeightGroup;
use glam::Mat4;
use std::collections::HashSet;
use tracing::{debug, error};

/// What a group node was built from.
#[derive(Debug, Clone, Copy)]
pub enum NodeSource<'s> {
    Object(&'s SceneObject),
    Bone {
        armature: &'s SceneObject,
        bone: &'s Bone,
    },
}

impl<'s> NodeSource<'s> {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Object(object) => object.kind(),
            Self::Bone { .. } => ObjectKind::Bone,
        }
    }

    /// Host name of the object or bone.
    pub fn host_name(&self) -> &'s str {
        match self {
            Self::Object(object) => &object.name,
            Self::Bone { bone, .. } => &bone.name,
        }
    }

    pub fn object(&self) -> Option<&'s SceneObject> {
        match self {
            Self::Object(object) => Some(object),
            Self::Bone { .. } => None,
        }
    }
}

/// The parenting relation that attached a node to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Top-level object whose parent is not exported.
    Root,
    ObjectToObject,
    /// Root bone under its armature object.
    ArmatureToBone,
    BoneToBone,
    ObjectToBone,
}

/// Joint payload of a bone node.
#[derive(Debug, Clone, PartialEq)]
pub struct JointData {
    /// Host name of the owning armature object.
    pub armature: String,
    /// Weight groups per vertex pool, attached by the skinning pass.
    pub weights: Vec<WeightGroup>,
}

/// Per-kind payload, chosen when the node is built.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePayload {
    Mesh(GeometryData),
    Joint(JointData),
    Curve(CurveGeometry),
    Generic,
}

#[derive(Debug, Clone)]
pub struct GroupNode<'s> {
    /// `None` only for the synthetic root.
    pub source: Option<NodeSource<'s>>,
    /// Export name.
    pub name: String,
    pub relation: Option<Relation>,
    /// Transform relative to the parent node.
    pub transform: Mat4,
    /// Animated character root (`<Dart>`).
    pub character: bool,
    pub payload: NodePayload,
    pub children: Vec<GroupNode<'s>>,
}

impl<'s> GroupNode<'s> {
    fn root() -> Self {
        Self {
            source: None,
            name: String::new(),
            relation: None,
            transform: Mat4::IDENTITY,
            character: false,
            payload: NodePayload::Generic,
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.source.is_none()
    }

    pub fn kind(&self) -> Option<ObjectKind> {
        self.source.map(|s| s.kind())
    }

    /// Depth-first, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a GroupNode<'s>)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut GroupNode<'s>)) {
        f(self);
        for child in &mut self.children {
            child.walk_mut(f);
        }
    }

    /// Number of nodes below the root, excluding it.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// First node with the given host name.
    pub fn find(&self, host_name: &str) -> Option<&GroupNode<'s>> {
        if self.source.map(|s| s.host_name()) == Some(host_name) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(host_name))
    }

    pub fn geometry(&self) -> Option<&GeometryData> {
        match &self.payload {
            NodePayload::Mesh(data) => Some(data),
            _ => None,
        }
    }

    pub fn joint(&self) -> Option<&JointData> {
        match &self.payload {
            NodePayload::Joint(joint) => Some(joint),
            _ => None,
        }
    }
}

/// Builds the group tree for one export run.
pub struct HierarchyBuilder<'s> {
    scene: &'s Scene,
    names: &'s NameRegistry,
    converter: GeometryConverter<'s>,
    exported: HashSet<&'s str>,
    candidates: Vec<NodeSource<'s>>,
}

impl<'s> HierarchyBuilder<'s> {
    /// `objects` is the export set; names missing from the scene are an error.
    pub fn new(
        scene: &'s Scene,
        names: &'s NameRegistry,
        config: &'s ExportConfig,
        objects: &[String],
    ) -> Result<Self> {
        let mut candidates = Vec::with_capacity(objects.len());
        let mut exported = HashSet::new();
        for name in objects {
            let object = scene.object(name).ok_or_else(|| {
                ExportError::Hierarchy(format!("object '{}' is not in the scene", name))
            })?;
            if exported.insert(object.name.as_str()) {
                candidates.push(NodeSource::Object(object));
            }
        }
        Ok(Self {
            scene,
            names,
            converter: GeometryConverter::new(scene, names, config),
            exported,
            candidates,
        })
    }

    /// Build the tree. Every candidate must end up in it exactly once.
    pub fn build(mut self) -> Result<GroupNode<'s>> {
        let mut root = GroupNode::root();
        self.expand(&mut root)?;

        if !self.candidates.is_empty() {
            let stranded: Vec<&str> = self.candidates.iter().map(|c| c.host_name()).collect();
            error!("Unreachable nodes after hierarchy build: {:?}", stranded);
            return Err(ExportError::Hierarchy(format!(
                "could not attach {} (cyclic or dangling parents)",
                stranded.join(", ")
            )));
        }
        debug!("Hierarchy built with {} nodes", root.descendant_count());
        Ok(root)
    }

    fn expand(&mut self, node: &mut GroupNode<'s>) -> Result<()> {
        let owner = node.source;
        if let Some(NodeSource::Object(object)) = owner {
            if let ObjectData::Armature(armature) = &object.data {
                self.candidates.extend(armature.bones.iter().map(|bone| NodeSource::Bone {
                    armature: object,
                    bone,
                }));
            }
        }

        let mut matched = Vec::new();
        let mut i = 0;
        while i < self.candidates.len() {
            match self.relation(owner, &self.candidates[i]) {
                Some(relation) => matched.push((relation, self.candidates.remove(i))),
                None => i += 1,
            }
        }

        for (relation, candidate) in matched {
            let mut child = self.make_node(owner, candidate, relation).map_err(|e| match e {
                ExportError::ObjectBuild { .. } | ExportError::Hierarchy(_) => e,
                other => ExportError::object_build(candidate.host_name(), other),
            })?;
            self.expand(&mut child)?;
            node.children.push(child);
        }
        Ok(())
    }

    /// True when `child` hangs off one of `armature`'s bones rather than the object.
    fn is_bone_parented(armature: &SceneObject, child: &SceneObject) -> bool {
        match (armature.armature(), child.parent_bone.as_deref()) {
            (Some(data), Some(bone)) => data.bone(bone).is_some(),
            _ => false,
        }
    }

    fn relation(&self, owner: Option<NodeSource<'s>>, candidate: &NodeSource<'s>) -> Option<Relation> {
        match (owner, *candidate) {
            (None, NodeSource::Object(c)) => match c.parent.as_deref() {
                None => Some(Relation::Root),
                Some(parent) if !self.exported.contains(parent) => Some(Relation::Root),
                _ => None,
            },
            (Some(NodeSource::Object(o)), NodeSource::Object(c)) => {
                (c.parent.as_deref() == Some(o.name.as_str()) && !Self::is_bone_parented(o, c))
                    .then_some(Relation::ObjectToObject)
            }
            (Some(NodeSource::Object(o)), NodeSource::Bone { armature, bone }) => {
                (armature.name == o.name && bone.parent.is_none()).then_some(Relation::ArmatureToBone)
            }
            (Some(NodeSource::Bone { armature, bone }), NodeSource::Bone { armature: ca, bone: cb }) => {
                (ca.name == armature.name && cb.parent.as_deref() == Some(bone.name.as_str()))
                    .then_some(Relation::BoneToBone)
            }
            (Some(NodeSource::Bone { armature, bone }), NodeSource::Object(c)) => {
                (c.parent.as_deref() == Some(armature.name.as_str())
                    && c.parent_bone.as_deref() == Some(bone.name.as_str()))
                .then_some(Relation::ObjectToBone)
            }
            (None, NodeSource::Bone { .. }) => None,
        }
    }

    /// World matrix of the node a child is attached to.
    fn parent_world(&self, owner: Option<NodeSource<'s>>) -> Mat4 {
        match owner {
            None => Mat4::IDENTITY,
            Some(NodeSource::Object(object)) => object.matrix_world,
            Some(NodeSource::Bone { armature, bone }) => armature.matrix_world * bone.matrix_local,
        }
    }

    fn make_node(
        &self,
        owner: Option<NodeSource<'s>>,
        candidate: NodeSource<'s>,
        relation: Relation,
    ) -> Result<GroupNode<'s>> {
        let (name, transform, character, payload) = match candidate {
            NodeSource::Object(object) => {
                let transform = self.parent_world(owner).inverse() * object.matrix_world;
                let payload = match &object.data {
                    ObjectData::Mesh(_) => NodePayload::Mesh(self.converter.convert_mesh(object)?),
                    ObjectData::Curve(_) => NodePayload::Curve(self.converter.convert_curve(object)?),
                    ObjectData::Armature(_) | ObjectData::Empty => NodePayload::Generic,
                };
                let character = match &object.data {
                    ObjectData::Armature(_) => true,
                    ObjectData::Mesh(mesh) => {
                        mesh.shape_keys.len() > 1 && !self.deformed_by_exported_armature(object)
                    }
                    _ => false,
                };
                (self.names.object(&object.name), transform, character, payload)
            }
            NodeSource::Bone { armature, bone } => {
                let data = armature.armature().ok_or_else(|| {
                    ExportError::object_build(&armature.name, "bone owner has no armature data")
                })?;
                let transform = data.rest_local(&bone.name)?;
                let joint = JointData {
                    armature: armature.name.clone(),
                    weights: Vec::new(),
                };
                (
                    self.names.bone(&armature.name, &bone.name),
                    transform,
                    false,
                    NodePayload::Joint(joint),
                )
            }
        };
        debug!("Attached '{}' ({:?})", name, relation);
        Ok(GroupNode {
            source: Some(candidate),
            name,
            relation: Some(relation),
            transform,
            character,
            payload,
            children: Vec::new(),
        })
    }

    fn deformed_by_exported_armature(&self, object: &SceneObject) -> bool {
        object
            .armature_modifier()
            .map(|arm| self.exported.contains(arm) && self.scene.object(arm).is_some())
            .unwrap_or(false)
    }
}
