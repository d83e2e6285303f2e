//! Selection preparation.
//!
//! Before the hierarchy is built, the requested objects are resolved against
//! the scene, owning armatures are pulled in, and a temporary copy of the
//! scene is made so modifiers can be applied and skinned meshes merged
//! without touching the caller's data.

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::scene::{ColorLayer, MeshData, MeshPolygon, Modifier, MirrorAxis, Scene, ShapeKey, UvLayer};
use glam::{Mat3, Mat4, Vec3};
use std::ops::{Deref, DerefMut};
use tracing::{debug, info, warn};

/// A temporary working copy of a scene, torn down when dropped.
pub struct SceneCopy {
    scene: Scene,
    /// Objects removed or rewritten by preparation.
    synthetic: Vec<String>,
}

impl SceneCopy {
    pub fn new(source: &Scene) -> Self {
        debug!("Creating temporary scene copy ({} objects)", source.objects.len());
        Self {
            scene: source.clone(),
            synthetic: Vec::new(),
        }
    }

    pub fn mark_synthetic(&mut self, name: impl Into<String>) {
        self.synthetic.push(name.into());
    }

    pub fn synthetic(&self) -> &[String] {
        &self.synthetic
    }
}

impl Deref for SceneCopy {
    type Target = Scene;

    fn deref(&self) -> &Scene {
        &self.scene
    }
}

impl DerefMut for SceneCopy {
    fn deref_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }
}

impl Drop for SceneCopy {
    fn drop(&mut self) {
        debug!(
            "Removing temporary scene copy ({} synthetic objects)",
            self.synthetic.len()
        );
        self.synthetic.clear();
        self.scene.objects.clear();
    }
}

/// Resolve requested names against the scene, dropping unknown and repeated names.
pub fn select_objects(scene: &Scene, requested: &[String]) -> Vec<String> {
    let mut objects: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        if scene.object(name).is_none() {
            warn!("Object '{}' not found in scene, skipping", name);
            continue;
        }
        if !objects.contains(name) {
            objects.push(name.clone());
        }
    }
    objects
}

/// Add armatures that own a selected object's parent bone or deform a selected mesh.
pub fn include_armatures(scene: &Scene, objects: &mut Vec<String>) -> usize {
    let mut added = 0;
    let mut i = 0;
    while i < objects.len() {
        let Some(object) = scene.object(&objects[i]) else {
            i += 1;
            continue;
        };
        let bone_owner = object
            .parent_bone
            .as_ref()
            .and(object.parent.as_deref());
        let owners = [bone_owner, object.armature_modifier()];
        for owner in owners.into_iter().flatten() {
            let is_armature = scene.object(owner).map(|o| o.armature().is_some()).unwrap_or(false);
            if is_armature && !objects.iter().any(|o| o == owner) {
                info!("Including armature '{}' for '{}'", owner, object.name);
                objects.push(owner.to_string());
                added += 1;
            }
        }
        i += 1;
    }
    added
}

fn mirror_vec(v: Vec3, axis: MirrorAxis) -> Vec3 {
    let mut v = v;
    v[axis.index()] = -v[axis.index()];
    v
}

/// Per-loop data of the mirrored half: each polygon's loops in reverse order.
fn mirrored_loops<T: Clone>(data: &[T], loops: &[std::ops::Range<usize>]) -> Vec<T> {
    loops
        .iter()
        .flat_map(|range| data[range.clone()].iter().rev().cloned())
        .collect()
}

/// Append a mirrored, winding-flipped copy of the mesh to itself.
pub fn mirror_mesh(mesh: &mut MeshData, axis: MirrorAxis) -> Result<()> {
    mesh.validate()?;
    let offset = mesh.vertices.len() as u32;
    let loops = mesh.polygon_loops();

    let mirrored: Vec<_> = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut v = v.clone();
            v.co = mirror_vec(v.co, axis);
            v
        })
        .collect();
    mesh.vertices.extend(mirrored);

    let polygons: Vec<MeshPolygon> = mesh
        .polygons
        .iter()
        .map(|p| MeshPolygon {
            vertices: p.vertices.iter().rev().map(|v| v + offset).collect(),
            material_index: p.material_index,
            smooth: p.smooth,
            normal: p.normal.map(|n| mirror_vec(n, axis)),
        })
        .collect();
    let polygon_count = mesh.polygons.len();
    mesh.polygons.extend(polygons);

    let edges: Vec<_> = mesh
        .edges
        .iter()
        .map(|e| {
            let mut e = e.clone();
            e.vertices = [e.vertices[0] + offset, e.vertices[1] + offset];
            e
        })
        .collect();
    mesh.edges.extend(edges);

    for layer in &mut mesh.uv_layers {
        let extra = mirrored_loops(&layer.uv, &loops);
        layer.uv.extend(extra);
        if !layer.two_sided.is_empty() {
            layer.two_sided.resize(polygon_count, false);
            let copy = layer.two_sided.clone();
            layer.two_sided.extend(copy);
        }
        if !layer.images.is_empty() {
            layer.images.resize(polygon_count, None);
            let copy = layer.images.clone();
            layer.images.extend(copy);
        }
        layer.tangents = None;
    }
    for layer in &mut mesh.color_layers {
        let extra = mirrored_loops(&layer.colors, &loops);
        layer.colors.extend(extra);
    }
    if let Some(normals) = &mut mesh.loop_normals {
        let extra: Vec<Vec3> = mirrored_loops(&normals[..], &loops)
            .into_iter()
            .map(|n| mirror_vec(n, axis))
            .collect();
        normals.extend(extra);
    }
    for key in &mut mesh.shape_keys {
        let extra: Vec<Vec3> = key.positions.iter().map(|p| mirror_vec(*p, axis)).collect();
        key.positions.extend(extra);
    }
    Ok(())
}

/// Apply every evaluable modifier of the selected meshes to the working copy.
///
/// Armature modifiers stay, since skinning reads them. A modifier that cannot
/// be applied is logged and dropped.
pub fn apply_modifiers(scene: &mut Scene, objects: &[String]) -> usize {
    let mut applied = 0;
    for name in objects {
        let Some(object) = scene.object_mut(name) else {
            continue;
        };
        let modifiers = std::mem::take(&mut object.modifiers);
        let object_name = object.name.clone();
        for modifier in modifiers {
            match modifier {
                Modifier::Armature { .. } => object.modifiers.push(modifier),
                Modifier::Mirror { axis } => {
                    let result = match object.mesh_mut() {
                        Some(mesh) => mirror_mesh(mesh, axis),
                        None => Err(ExportError::object_build(&object_name, "mirror on non-mesh")),
                    };
                    match result {
                        Ok(()) => applied += 1,
                        Err(e) => warn!("Could not apply mirror to '{}': {}", object_name, e),
                    }
                }
                Modifier::Other { name } => {
                    warn!("Modifier '{}' on '{}' cannot be applied, skipping", name, object_name);
                }
            }
        }
    }
    applied
}

/// Mesh data re-expressed in another object's local space.
fn transformed(mesh: &MeshData, matrix: Mat4) -> MeshData {
    let normal_matrix = Mat3::from_mat4(matrix).inverse().transpose();
    let mut mesh = mesh.clone();
    for vertex in &mut mesh.vertices {
        vertex.co = matrix.transform_point3(vertex.co);
    }
    for polygon in &mut mesh.polygons {
        polygon.normal = polygon.normal.map(|n| (normal_matrix * n).normalize_or_zero());
    }
    if let Some(normals) = &mut mesh.loop_normals {
        for n in normals.iter_mut() {
            *n = (normal_matrix * *n).normalize_or_zero();
        }
    }
    for key in &mut mesh.shape_keys {
        for p in &mut key.positions {
            *p = matrix.transform_point3(*p);
        }
    }
    mesh
}

fn slot_index<T: PartialEq + Clone>(slots: &mut Vec<T>, value: &T) -> usize {
    match slots.iter().position(|s| s == value) {
        Some(index) => index,
        None => {
            slots.push(value.clone());
            slots.len() - 1
        }
    }
}

/// Join `other` into `target`. Layers, groups, shape keys and slots are matched by name.
pub fn join_meshes(target: &mut MeshData, other: &MeshData) {
    let vertex_offset = target.vertices.len() as u32;
    let target_loops = target.loop_count();
    let other_loops = other.loop_count();
    let target_polygons = target.polygons.len();

    let group_map: Vec<usize> = other
        .vertex_groups
        .iter()
        .map(|g| slot_index(&mut target.vertex_groups, g))
        .collect();
    // Existing faces use index 0 without any slot; pin it to "no material".
    if target.materials.is_empty() && target_polygons > 0 && !other.materials.is_empty() {
        target.materials.push(None);
    }
    let material_map: Vec<usize> = other
        .materials
        .iter()
        .map(|m| slot_index(&mut target.materials, m))
        .collect();
    let has_unassigned = other
        .polygons
        .iter()
        .any(|p| p.material_index >= material_map.len());
    let unassigned = if has_unassigned && !target.materials.is_empty() {
        slot_index(&mut target.materials, &None)
    } else {
        0
    };

    for key in &mut target.shape_keys {
        let positions = other
            .shape_keys
            .iter()
            .find(|k| k.name == key.name)
            .map(|k| k.positions.clone())
            .unwrap_or_else(|| other.vertices.iter().map(|v| v.co).collect());
        key.positions.extend(positions);
    }
    for key in &other.shape_keys {
        if target.shape_keys.iter().any(|k| k.name == key.name) {
            continue;
        }
        let mut positions: Vec<Vec3> = target.vertices.iter().map(|v| v.co).collect();
        positions.extend(key.positions.iter().copied());
        target.shape_keys.push(ShapeKey {
            name: key.name.clone(),
            positions,
            value: key.value,
        });
    }

    target.vertices.extend(other.vertices.iter().map(|v| {
        let mut v = v.clone();
        for group in &mut v.groups {
            group.group = group_map.get(group.group).copied().unwrap_or(group.group);
        }
        v
    }));
    target.polygons.extend(other.polygons.iter().map(|p| MeshPolygon {
        vertices: p.vertices.iter().map(|v| v + vertex_offset).collect(),
        material_index: material_map.get(p.material_index).copied().unwrap_or(unassigned),
        smooth: p.smooth,
        normal: p.normal,
    }));
    target.edges.extend(other.edges.iter().map(|e| {
        let mut e = e.clone();
        e.vertices = [e.vertices[0] + vertex_offset, e.vertices[1] + vertex_offset];
        e
    }));

    for layer in &mut target.uv_layers {
        match other.uv_layers.iter().find(|l| l.name == layer.name) {
            Some(source) => {
                layer.uv.extend(source.uv.iter().copied());
                if !layer.two_sided.is_empty() || !source.two_sided.is_empty() {
                    layer.two_sided.resize(target_polygons, false);
                    layer
                        .two_sided
                        .extend((0..other.polygons.len()).map(|p| source.is_two_sided(p)));
                }
                if !layer.images.is_empty() || !source.images.is_empty() {
                    layer.images.resize(target_polygons, None);
                    layer.images.extend(
                        (0..other.polygons.len()).map(|p| source.image(p).map(str::to_string)),
                    );
                }
            }
            None => layer.uv.extend(std::iter::repeat([0.0, 0.0]).take(other_loops)),
        }
        layer.tangents = None;
    }
    for source in &other.uv_layers {
        if target.uv_layers.iter().any(|l| l.name == source.name) {
            continue;
        }
        let mut uv = vec![[0.0, 0.0]; target_loops];
        uv.extend(source.uv.iter().copied());
        let mut layer = UvLayer::new(source.name.clone(), uv);
        if !source.two_sided.is_empty() {
            layer.two_sided = vec![false; target_polygons];
            layer
                .two_sided
                .extend((0..other.polygons.len()).map(|p| source.is_two_sided(p)));
        }
        if !source.images.is_empty() {
            layer.images = vec![None; target_polygons];
            layer
                .images
                .extend((0..other.polygons.len()).map(|p| source.image(p).map(str::to_string)));
        }
        target.uv_layers.push(layer);
    }

    for layer in &mut target.color_layers {
        match other.color_layers.iter().find(|l| l.name == layer.name) {
            Some(source) => layer.colors.extend(source.colors.iter().copied()),
            None => layer.colors.extend(std::iter::repeat([1.0; 4]).take(other_loops)),
        }
    }
    for source in &other.color_layers {
        if target.color_layers.iter().any(|l| l.name == source.name) {
            continue;
        }
        let mut colors = vec![[1.0; 4]; target_loops];
        colors.extend(source.colors.iter().copied());
        target.color_layers.push(ColorLayer {
            name: source.name.clone(),
            colors,
        });
    }

    target.loop_normals = match (target.loop_normals.take(), &other.loop_normals) {
        (Some(mut mine), Some(theirs)) => {
            mine.extend(theirs.iter().copied());
            Some(mine)
        }
        _ => None,
    };
    target.use_edge_sharp |= other.use_edge_sharp;
}

/// Merge all selected meshes deformed by the same armature into the first one.
pub fn merge_actors(copy: &mut SceneCopy, objects: &mut Vec<String>) -> Result<usize> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for name in objects.iter() {
        let Some(object) = copy.object(name) else {
            continue;
        };
        let (Some(armature), Some(_)) = (object.armature_modifier(), object.mesh()) else {
            continue;
        };
        match groups.iter_mut().find(|(a, _)| a == armature) {
            Some((_, members)) => members.push(name.clone()),
            None => groups.push((armature.to_string(), vec![name.clone()])),
        }
    }

    let mut merged = 0;
    for (armature, members) in groups {
        let Some((first, rest)) = members.split_first() else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let target_world = copy.require_object(first)?.matrix_world;
        let to_target = target_world.inverse();
        for name in rest {
            let other = copy.require_object(name)?;
            let mesh = other
                .mesh()
                .ok_or_else(|| ExportError::object_build(name, "merged object has no mesh"))?;
            let local = transformed(mesh, to_target * other.matrix_world);
            let target = copy
                .object_mut(first)
                .and_then(|o| o.mesh_mut())
                .ok_or_else(|| ExportError::object_build(first, "merge target has no mesh"))?;
            join_meshes(target, &local);
            objects.retain(|o| o != name);
            copy.mark_synthetic(name.clone());
            merged += 1;
        }
        info!("Merged {} meshes into '{}' for armature '{}'", rest.len(), first, armature);
    }
    Ok(merged)
}

/// Build the working copy and final export set for one run.
pub fn prepare(scene: &Scene, requested: &[String], config: &ExportConfig) -> Result<(SceneCopy, Vec<String>)> {
    let mut objects = select_objects(scene, requested);
    include_armatures(scene, &mut objects);
    let mut copy = SceneCopy::new(scene);
    if config.apply_modifiers {
        let applied = apply_modifiers(&mut copy, &objects);
        debug!("Applied {} modifiers", applied);
    }
    if config.merge_actor {
        merge_actors(&mut copy, &mut objects)?;
    }
    Ok((copy, objects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ArmatureData, Bone, ObjectData, SceneObject};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rigged_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_object(SceneObject::new(
            "Rig",
            ObjectData::Armature(ArmatureData::new(vec![Bone::new("Hand", None, Mat4::IDENTITY)])),
        ));
        scene.add_object(
            SceneObject::new("Sword", ObjectData::Mesh(MeshData::cube("SwordMesh")))
                .with_parent_bone("Rig", "Hand"),
        );
        scene.add_object(
            SceneObject::new("Body", ObjectData::Mesh(MeshData::cube("BodyMesh")))
                .with_modifier(Modifier::Armature { object: "Rig".into() }),
        );
        scene.add_object(
            SceneObject::new("Legs", ObjectData::Mesh(MeshData::cube("LegsMesh")))
                .with_matrix(Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)))
                .with_modifier(Modifier::Armature { object: "Rig".into() }),
        );
        scene
    }

    #[test]
    fn test_select_skips_unknown_and_duplicates() {
        let scene = rigged_scene();
        let objects = select_objects(&scene, &strings(&["Sword", "Nope", "Sword"]));
        assert_eq!(objects, strings(&["Sword"]));
    }

    #[test]
    fn test_bone_child_pulls_in_armature() {
        let scene = rigged_scene();
        let mut objects = strings(&["Sword"]);
        assert_eq!(include_armatures(&scene, &mut objects), 1);
        assert_eq!(objects, strings(&["Sword", "Rig"]));
        assert_eq!(include_armatures(&scene, &mut objects), 0);
    }

    #[test]
    fn test_scene_copy_is_independent() {
        let scene = rigged_scene();
        let mut copy = SceneCopy::new(&scene);
        copy.object_mut("Body").unwrap().name = "Renamed".into();
        assert!(scene.object("Body").is_some());
        assert!(copy.object("Renamed").is_some());
    }

    #[test]
    fn test_mirror_modifier() {
        let mut scene = Scene::new();
        let mut mesh = MeshData::cube("Half");
        let loops = mesh.loop_count();
        mesh.uv_layers.push(UvLayer::new("UV", (0..loops).map(|i| [i as f32, 0.0]).collect()));
        scene.add_object(
            SceneObject::new("Half", ObjectData::Mesh(mesh))
                .with_modifier(Modifier::Mirror { axis: MirrorAxis::X })
                .with_modifier(Modifier::Other { name: "Subsurf".into() }),
        );
        assert_eq!(apply_modifiers(&mut scene, &strings(&["Half"])), 1);

        let object = scene.object("Half").unwrap();
        assert!(object.modifiers.is_empty());
        let mesh = object.mesh().unwrap();
        assert_eq!(mesh.vertices.len(), 16);
        assert_eq!(mesh.polygons.len(), 12);
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.vertices[8].co, Vec3::new(1.0, -1.0, -1.0));
        // First face [0, 2, 3, 1] becomes [9, 11, 10, 8] with reversed UVs.
        assert_eq!(mesh.polygons[6].vertices, vec![9, 11, 10, 8]);
        assert_eq!(mesh.uv_layers[0].uv[24], [3.0, 0.0]);
    }

    #[test]
    fn test_merge_actor() {
        let scene = rigged_scene();
        let mut config = ExportConfig::default();
        config.merge_actor = true;
        let (copy, objects) = prepare(&scene, &strings(&["Body", "Legs"]), &config).unwrap();

        assert_eq!(objects, strings(&["Body", "Rig"]));
        assert_eq!(copy.synthetic(), &strings(&["Legs"])[..]);
        let body = copy.object("Body").unwrap().mesh().unwrap();
        assert_eq!(body.vertices.len(), 16);
        assert_eq!(body.polygons.len(), 12);
        assert!(body.validate().is_ok());
        // Legs sit two units below Body in world space.
        assert_eq!(body.vertices[8].co, Vec3::new(-1.0, -1.0, -3.0));
        // The caller's scene is untouched.
        assert_eq!(scene.object("Body").unwrap().mesh().unwrap().vertices.len(), 8);
    }

    #[test]
    fn test_join_matches_layers_by_name() {
        let mut a = MeshData::cube("A");
        let mut b = MeshData::cube("B");
        a.vertex_groups = strings(&["Spine"]);
        b.vertex_groups = strings(&["Head", "Spine"]);
        b.vertices[0] = b.vertices[0].clone().with_group(1, 0.5);
        b.uv_layers.push(UvLayer::new("Extra", vec![[1.0, 1.0]; 24]));
        b.materials = vec![Some("Skin".into())];

        join_meshes(&mut a, &b);
        assert_eq!(a.vertex_groups, strings(&["Spine", "Head"]));
        assert_eq!(a.vertices[8].groups[0].group, 0);
        assert_eq!(a.uv_layers.len(), 1);
        assert_eq!(a.uv_layers[0].uv.len(), 48);
        assert_eq!(a.uv_layers[0].uv[0], [0.0, 0.0]);
        assert_eq!(a.materials, vec![None, Some("Skin".to_string())]);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_join_keeps_unassigned_faces_unassigned() {
        let mut bare = MeshData::cube("Bare");
        let mut skin = MeshData::cube("Skin");
        skin.materials = vec![Some("Skin".into())];

        join_meshes(&mut bare, &skin);
        assert_eq!(bare.material_name(&bare.polygons[0]), None);
        assert_eq!(bare.material_name(&bare.polygons[6]), Some("Skin"));

        let mut skin = MeshData::cube("Skin");
        skin.materials = vec![Some("Skin".into())];
        join_meshes(&mut skin, &MeshData::cube("Bare"));
        assert_eq!(skin.material_name(&skin.polygons[0]), Some("Skin"));
        assert_eq!(skin.material_name(&skin.polygons[6]), None);
        assert_eq!(skin.materials, vec![Some("Skin".to_string()), None]);
    }

    #[test]
    fn test_join_carries_uv_images() {
        let mut a = MeshData::cube("A");
        let mut b = MeshData::cube("B");
        a.uv_layers.push(UvLayer::new("UVMap", vec![[0.0, 0.0]; 24]));
        let mut layer = UvLayer::new("UVMap", vec![[1.0, 1.0]; 24]);
        layer.images = vec![Some("decal.png".into())];
        b.uv_layers.push(layer);

        join_meshes(&mut a, &b);
        let joined = &a.uv_layers[0];
        assert_eq!(joined.images.len(), 12);
        assert_eq!(joined.image(0), None);
        assert_eq!(joined.image(6), Some("decal.png"));
        assert_eq!(joined.image(7), None);
    }
}
