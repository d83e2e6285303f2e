//! Frame-by-frame animation sampling.
//!
//! The sampler steps the scene clock through a closed-open frame range and
//! reads the already-evaluated pose at every frame. It never interpolates
//! itself. The clock is borrowed exclusively through a [`ClockGuard`], which
//! puts the frame back when sampling ends on any path.

use crate::config::{AnimationRange, AnimationRequest};
use crate::error::{ExportError, Result};
use crate::math::decompose;
use crate::names::NameRegistry;
use crate::scene::{ArmatureData, ObjectData, Scene, SceneClock, SceneObject};
use glam::Mat4;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

/// Exclusive, scoped hold on a scene clock. Restores the saved frame on drop.
pub struct ClockGuard<'c, C: SceneClock> {
    clock: &'c mut C,
    saved: i32,
}

impl<'c, C: SceneClock> ClockGuard<'c, C> {
    pub fn new(clock: &'c mut C) -> Self {
        let saved = clock.current_frame();
        Self { clock, saved }
    }

    /// Frame that will be restored.
    pub fn saved_frame(&self) -> i32 {
        self.saved
    }
}

impl<C: SceneClock> Deref for ClockGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.clock
    }
}

impl<C: SceneClock> DerefMut for ClockGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.clock
    }
}

impl<C: SceneClock> Drop for ClockGuard<'_, C> {
    fn drop(&mut self) {
        self.clock.set_frame(self.saved);
    }
}

/// Nine per-frame channels of one joint, plus its child joints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointCurve {
    /// Host bone name.
    pub bone: String,
    /// Export name.
    pub name: String,
    /// Channels in `ijkprhxyz` order: scale xyz, rotation xyz (degrees), translation xyz.
    pub channels: [Vec<f32>; 9],
    pub children: Vec<JointCurve>,
}

impl JointCurve {
    fn from_bone(names: &NameRegistry, armature: &SceneObject, data: &ArmatureData, bone: &str) -> Self {
        Self {
            bone: bone.to_string(),
            name: names.bone(&armature.name, bone),
            channels: Default::default(),
            children: data
                .children(bone)
                .map(|child| Self::from_bone(names, armature, data, &child.name))
                .collect(),
        }
    }

    /// Number of sampled frames.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Channel values of one frame.
    pub fn row(&self, frame: usize) -> [f32; 9] {
        std::array::from_fn(|c| self.channels[c][frame])
    }

    pub fn find(&self, bone: &str) -> Option<&JointCurve> {
        if self.bone == bone {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(bone))
    }

    fn sample(&mut self, scene: &Scene, armature: &SceneObject, parent_pose: Option<Mat4>) -> Result<()> {
        let pose = scene.bone_pose_matrix(armature, &self.bone)?;
        let local = match parent_pose {
            Some(parent) => parent.inverse() * pose,
            None => pose,
        };
        for (channel, value) in self.channels.iter_mut().zip(decompose(&local).channels()) {
            channel.push(value);
        }
        for child in &mut self.children {
            child.sample(scene, armature, Some(pose))?;
        }
        Ok(())
    }
}

/// Per-frame blend values of one shape key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MorphCurve {
    /// Host mesh object owning the key.
    pub object: String,
    pub key: String,
    pub values: Vec<f32>,
}

/// Curves of one animated character.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimationBundle {
    /// Host name of the character object (armature, or an unskinned morph mesh).
    pub owner: String,
    /// Export name of the character.
    pub name: String,
    /// Root joints; empty for a morph-only bundle.
    pub skeleton: Vec<JointCurve>,
    pub morphs: Vec<MorphCurve>,
}

impl AnimationBundle {
    pub fn find_joint(&self, bone: &str) -> Option<&JointCurve> {
        self.skeleton.iter().find_map(|j| j.find(bone))
    }

    pub fn morph(&self, key: &str) -> Option<&MorphCurve> {
        self.morphs.iter().find(|m| m.key == key)
    }
}

/// Result of sampling one animation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledAnimation {
    pub name: String,
    pub fps: u32,
    pub frame_count: usize,
    pub bundles: Vec<AnimationBundle>,
}

impl SampledAnimation {
    pub fn bundle(&self, owner: &str) -> Option<&AnimationBundle> {
        self.bundles.iter().find(|b| b.owner == owner)
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Shape keys beyond the basis, or nothing.
fn morph_keys(object: &SceneObject) -> Vec<String> {
    match object.mesh() {
        Some(mesh) if mesh.shape_keys.len() > 1 => {
            mesh.shape_keys[1..].iter().map(|k| k.name.clone()).collect()
        }
        _ => Vec::new(),
    }
}

/// Samples animations of the objects in an export set.
pub struct AnimationSampler<'a> {
    names: &'a NameRegistry,
    objects: &'a [String],
}

impl<'a> AnimationSampler<'a> {
    pub fn new(names: &'a NameRegistry, objects: &'a [String]) -> Self {
        Self { names, objects }
    }

    fn exported<'s>(&self, scene: &'s Scene) -> Vec<&'s SceneObject> {
        self.objects.iter().filter_map(|name| scene.object(name)).collect()
    }

    /// Empty bundles for every animated character in the export set.
    fn plan(&self, scene: &Scene) -> Vec<AnimationBundle> {
        let objects = self.exported(scene);
        let is_exported = |name: &str| objects.iter().any(|o| o.name == name);
        let mut bundles = Vec::new();

        for object in &objects {
            match &object.data {
                ObjectData::Armature(data) => {
                    let skeleton = data
                        .root_bones()
                        .map(|bone| JointCurve::from_bone(self.names, object, data, &bone.name))
                        .collect();
                    let morphs = objects
                        .iter()
                        .filter(|o| o.armature_modifier() == Some(object.name.as_str()))
                        .flat_map(|o| Self::morph_curves(o))
                        .collect();
                    bundles.push(AnimationBundle {
                        owner: object.name.clone(),
                        name: self.names.object(&object.name),
                        skeleton,
                        morphs,
                    });
                }
                ObjectData::Mesh(_) => {
                    let skinned = object
                        .armature_modifier()
                        .map(|arm| is_exported(arm) && scene.object(arm).is_some())
                        .unwrap_or(false);
                    let morphs = Self::morph_curves(object);
                    if !skinned && !morphs.is_empty() {
                        bundles.push(AnimationBundle {
                            owner: object.name.clone(),
                            name: self.names.object(&object.name),
                            skeleton: Vec::new(),
                            morphs,
                        });
                    }
                }
                _ => {}
            }
        }
        bundles
    }

    fn morph_curves(object: &SceneObject) -> Vec<MorphCurve> {
        morph_keys(object)
            .into_iter()
            .map(|key| MorphCurve {
                object: object.name.clone(),
                key,
                values: Vec::new(),
            })
            .collect()
    }

    /// Sample one named range.
    pub fn sample(&self, scene: &mut Scene, name: &str, range: AnimationRange) -> Result<SampledAnimation> {
        let mut bundles = self.plan(scene);
        let frames = range.frames();
        let mut clock = ClockGuard::new(scene);

        for frame in frames.clone() {
            clock.set_frame(frame);
            let scene: &Scene = &clock;
            for bundle in &mut bundles {
                if !bundle.skeleton.is_empty() {
                    let armature = scene.require_object(&bundle.owner)?;
                    for joint in &mut bundle.skeleton {
                        joint.sample(scene, armature, None)?;
                    }
                }
                for morph in &mut bundle.morphs {
                    let object = scene.require_object(&morph.object)?;
                    let value = scene.shape_key_value(object, &morph.key).ok_or_else(|| {
                        ExportError::NotFound(format!("shape key '{}' on '{}'", morph.key, morph.object))
                    })?;
                    morph.values.push(value);
                }
            }
        }

        let frame_count = frames.len();
        debug!(
            "Sampled '{}' frames {}..{} ({} bundles), clock back to {}",
            name,
            frames.start,
            frames.end,
            bundles.len(),
            clock.saved_frame()
        );
        Ok(SampledAnimation {
            name: name.to_string(),
            fps: range.fps,
            frame_count,
            bundles,
        })
    }

    /// Sample every animation a request asks for, in request order.
    pub fn sample_all(&self, scene: &mut Scene, request: &AnimationRequest) -> Result<Vec<SampledAnimation>> {
        match request {
            AnimationRequest::Named(ranges) => ranges
                .iter()
                .map(|(name, range)| self.sample(scene, name, *range))
                .collect(),
            AnimationRequest::FromActions => self.sample_actions(scene),
        }
    }

    /// One animation per action, each assigned to the animated objects first.
    fn sample_actions(&self, scene: &mut Scene) -> Result<Vec<SampledAnimation>> {
        let targets: Vec<String> = self
            .plan(scene)
            .iter()
            .flat_map(|bundle| {
                let mut owners = vec![bundle.owner.clone()];
                owners.extend(bundle.morphs.iter().map(|m| m.object.clone()));
                owners
            })
            .collect();
        let saved: Vec<(String, Option<String>)> = targets
            .iter()
            .filter_map(|name| scene.object(name).map(|o| (name.clone(), o.action.clone())))
            .collect();
        let actions: Vec<(String, AnimationRange)> = scene
            .actions
            .iter()
            .map(|(name, action)| {
                (name.clone(), AnimationRange::new(action.frame_start, action.frame_end, scene.fps))
            })
            .collect();

        let result = self.sample_assigned(scene, &actions, &targets);
        for (name, action) in saved {
            if let Some(object) = scene.object_mut(&name) {
                object.action = action;
            }
        }
        result
    }

    fn sample_assigned(
        &self,
        scene: &mut Scene,
        actions: &[(String, AnimationRange)],
        targets: &[String],
    ) -> Result<Vec<SampledAnimation>> {
        let mut sampled = Vec::with_capacity(actions.len());
        for (name, range) in actions {
            for target in targets {
                scene.set_action(target, name)?;
            }
            info!("Sampling action '{}'", name);
            sampled.push(self.sample(scene, name, *range)?);
        }
        Ok(sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Action, Bone, BoneTracks, MeshData, Modifier, ShapeKey, Track};
    use glam::Vec3;

    fn spinning_rig(scene: &mut Scene) {
        let mut tracks = BoneTracks::default();
        tracks.rotation_euler[2] = Track::new([(0.0, 0.0), (10.0, 90f32.to_radians())]);
        scene
            .actions
            .insert("Spin".into(), Action::new(0, 10).with_bone("Bone", tracks));
        let rig = ArmatureData::new(vec![
            Bone::new("Bone", None, Mat4::IDENTITY),
            Bone::new("Tip", Some("Bone"), Mat4::from_translation(Vec3::Y)),
        ]);
        scene.add_object(SceneObject::new("Rig", ObjectData::Armature(rig)).with_action("Spin"));
    }

    fn morph_mesh(name: &str) -> SceneObject {
        let mut mesh = MeshData::cube(format!("{}Mesh", name));
        let basis: Vec<Vec3> = mesh.vertices.iter().map(|v| v.co).collect();
        mesh.shape_keys = vec![
            ShapeKey { name: "Basis".into(), positions: basis.clone(), value: 0.0 },
            ShapeKey { name: "Open".into(), positions: basis, value: 0.25 },
        ];
        SceneObject::new(name, ObjectData::Mesh(mesh))
    }

    #[test]
    fn test_guard_restores_frame() {
        let mut scene = Scene::new();
        scene.frame_current = 42;
        {
            let mut guard = ClockGuard::new(&mut scene);
            guard.set_frame(7);
            assert_eq!(guard.current_frame(), 7);
        }
        assert_eq!(scene.frame_current, 42);
    }

    #[test]
    fn test_linear_rotation_sampled() {
        let mut scene = Scene::new();
        spinning_rig(&mut scene);
        scene.frame_current = 3;
        let names = NameRegistry::from_scene(&scene);
        let objects = vec!["Rig".to_string()];
        let sampler = AnimationSampler::new(&names, &objects);
        let anim = sampler.sample(&mut scene, "spin", AnimationRange::new(0, 10, 5)).unwrap();

        assert_eq!(anim.frame_count, 10);
        assert_eq!(anim.fps, 5);
        let joint = anim.bundle("Rig").unwrap().find_joint("Bone").unwrap();
        let z = &joint.channels[5];
        assert_eq!(z.len(), 10);
        for pair in z.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert!(z[0].abs() < 1e-4);
        assert!((z[9] - 81.0).abs() < 1e-3);
        assert_eq!(scene.frame_current, 3);
    }

    #[test]
    fn test_child_joint_is_parent_relative() {
        let mut scene = Scene::new();
        spinning_rig(&mut scene);
        let names = NameRegistry::from_scene(&scene);
        let objects = vec!["Rig".to_string()];
        let sampler = AnimationSampler::new(&names, &objects);
        let anim = sampler.sample(&mut scene, "spin", AnimationRange::new(0, 10, 24)).unwrap();

        // Tip carries no keys: its local transform stays the rest offset.
        let tip = anim.bundle("Rig").unwrap().find_joint("Tip").unwrap();
        for frame in 0..tip.len() {
            let row = tip.row(frame);
            assert!(row[5].abs() < 1e-3);
            assert!((row[7] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_range_yields_one_frame() {
        let mut scene = Scene::new();
        spinning_rig(&mut scene);
        let names = NameRegistry::from_scene(&scene);
        let objects = vec!["Rig".to_string()];
        let sampler = AnimationSampler::new(&names, &objects);

        for frame in [3, 5] {
            let anim = sampler.sample(&mut scene, "still", AnimationRange::new(frame, frame, 24)).unwrap();
            assert_eq!(anim.frame_count, 1);
            let joint = anim.bundle("Rig").unwrap().find_joint("Bone").unwrap();
            assert!(joint.channels.iter().all(|c| c.len() == 1));
            assert!((joint.channels[5][0] - frame as f32 * 9.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_morph_bundles() {
        let mut scene = Scene::new();
        spinning_rig(&mut scene);
        scene.add_object(
            morph_mesh("Face").with_modifier(Modifier::Armature { object: "Rig".into() }),
        );
        scene.add_object(morph_mesh("Blob"));
        scene
            .actions
            .insert("Blink".into(), Action::new(0, 2).with_shape_key("Open", Track::new([(0.0, 0.0), (2.0, 1.0)])));
        scene.object_mut("Blob").unwrap().action = Some("Blink".into());

        let names = NameRegistry::from_scene(&scene);
        let objects: Vec<String> = ["Rig", "Face", "Blob"].iter().map(|s| s.to_string()).collect();
        let sampler = AnimationSampler::new(&names, &objects);
        let anim = sampler.sample(&mut scene, "a", AnimationRange::new(0, 2, 24)).unwrap();

        assert_eq!(anim.bundles.len(), 2);
        let rig = anim.bundle("Rig").unwrap();
        assert_eq!(rig.morph("Open").unwrap().object, "Face");
        assert_eq!(rig.morph("Open").unwrap().values, vec![0.25, 0.25]);
        let blob = anim.bundle("Blob").unwrap();
        assert!(blob.skeleton.is_empty());
        assert_eq!(blob.morph("Open").unwrap().values, vec![0.0, 0.5]);
    }

    #[test]
    fn test_from_actions() {
        let mut scene = Scene::new();
        spinning_rig(&mut scene);
        scene.object_mut("Rig").unwrap().action = None;
        scene.actions.insert("Idle".into(), Action::new(0, 0));
        let names = NameRegistry::from_scene(&scene);
        let objects = vec!["Rig".to_string()];
        let sampler = AnimationSampler::new(&names, &objects);
        let anims = sampler.sample_all(&mut scene, &AnimationRequest::FromActions).unwrap();

        let names: Vec<&str> = anims.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Spin", "Idle"]);
        assert_eq!(anims[0].frame_count, 10);
        assert_eq!(anims[0].fps, scene.fps);
        assert_eq!(anims[1].frame_count, 1);
        assert_eq!(scene.object("Rig").unwrap().action, None);
    }

    fn abort_midway(scene: &mut Scene) -> Result<()> {
        let mut clock = ClockGuard::new(scene);
        clock.set_frame(100);
        Err(ExportError::NotFound("aborted".into()))
    }

    #[test]
    fn test_frame_restored_on_error() {
        let mut scene = Scene::new();
        scene.frame_current = 9;
        assert!(abort_midway(&mut scene).is_err());
        assert_eq!(scene.frame_current, 9);
    }
}
