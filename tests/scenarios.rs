//! End-to-end export tests.
//!
//! Each test builds a small scene in memory, runs a full export into a
//! temporary directory and inspects the written documents.

use egg_writer::scene::{
    Action, ArmatureData, Bone, BoneTracks, GroupWeight, Image, Material, MeshData, Texture,
    TextureSlot, Track,
};
use egg_writer::{
    write_out, write_out_with, AnimationRange, AnimationRequest, Collaborators, ErrorCode,
    ExportConfig, ExternalTools, Modifier, ObjectData, Scene, SceneObject, TangentMode,
    TextureProcessing,
};
use glam::{Mat4, Vec3};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

fn names(objects: &[&str]) -> Vec<String> {
    objects.iter().map(|s| s.to_string()).collect()
}

fn cube_scene() -> Scene {
    let mut scene = Scene::new();
    scene.add_object(SceneObject::new("Cube", ObjectData::Mesh(MeshData::cube("CubeMesh"))));
    scene
}

/// Two-bone armature rotating its root bone 90 degrees about Z over frames 0..10.
fn rigged_scene() -> Scene {
    let mut scene = Scene::new();
    let mut tracks = BoneTracks::default();
    tracks.rotation_euler[2] = Track::new([(0.0, 0.0), (10.0, 90f32.to_radians())]);
    scene
        .actions
        .insert("Spin".into(), Action::new(0, 10).with_bone("Upper", tracks));
    scene.add_object(
        SceneObject::new(
            "Rig",
            ObjectData::Armature(ArmatureData::new(vec![
                Bone::new("Upper", None, Mat4::IDENTITY),
                Bone::new("Lower", Some("Upper"), Mat4::from_translation(Vec3::Z)),
            ])),
        )
        .with_action("Spin"),
    );
    for name in ["Left", "Right"] {
        let mut mesh = MeshData::cube(format!("{}Mesh", name));
        mesh.vertex_groups = vec!["Upper".into(), "Lower".into()];
        for vertex in &mut mesh.vertices {
            // Bottom half follows the upper bone, top half the lower one.
            let group = if vertex.co.z < 0.0 { 0 } else { 1 };
            vertex.groups.push(GroupWeight { group, weight: 1.0 });
        }
        scene.add_object(
            SceneObject::new(name, ObjectData::Mesh(mesh))
                .with_parent("Rig")
                .with_modifier(Modifier::Armature { object: "Rig".into() }),
        );
    }
    scene
}

#[derive(Default)]
struct ToolCalls {
    tangents: Vec<PathBuf>,
    viewed: Vec<PathBuf>,
}

/// Records calls instead of running external programs.
#[derive(Default, Clone)]
struct RecordingTools {
    calls: Rc<RefCell<ToolCalls>>,
}

impl ExternalTools for RecordingTools {
    fn generate_tangents(&mut self, document: &Path) -> egg_writer::Result<()> {
        self.calls.borrow_mut().tangents.push(document.to_path_buf());
        Ok(())
    }

    fn launch_viewer(&mut self, documents: &[PathBuf]) -> egg_writer::Result<()> {
        self.calls.borrow_mut().viewed.extend_from_slice(documents);
        Ok(())
    }
}

#[test]
fn test_single_cube() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.egg");
    let errors = write_out(&path, &cube_scene(), &names(&["Cube"]), &ExportConfig::default());
    assert!(errors.is_empty(), "{:?}", errors);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("<CoordinateSystem> { Z-up }"));
    assert_eq!(text.matches("<Group>").count(), 1);
    assert_eq!(text.matches("<VertexPool>").count(), 1);
    assert_eq!(text.matches("<Vertex> ").count(), 24);
    assert_eq!(text.matches("<Polygon>").count(), 6);
    assert!(!text.contains("<Joint>"));
    assert!(!text.contains("<Material>"));
}

#[test]
fn test_two_meshes_share_weight_groups() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rig.egg");
    let errors = write_out(&path, &rigged_scene(), &names(&["Rig", "Left", "Right"]), &ExportConfig::default());
    assert!(errors.is_empty(), "{:?}", errors);

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("<Joint> Upper {").count(), 1);
    assert_eq!(text.matches("<Joint> Lower {").count(), 1);
    // One weight group per bone, each referencing both pools.
    assert_eq!(text.matches("<Scalar> membership { 1.000000 }").count(), 4);
    assert_eq!(text.matches("<Ref> { Left }").count(), 2 + 6);
    assert_eq!(text.matches("<Ref> { Right }").count(), 2 + 6);
    assert_eq!(text.matches("<Dart> { 1 }").count(), 1);
}

#[test]
fn test_separate_animation_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rig.egg");
    let config = ExportConfig::default().with_animation("spin", AnimationRange::new(0, 10, 5));
    let errors = write_out(&path, &rigged_scene(), &names(&["Rig", "Left", "Right"]), &config);
    assert!(errors.is_empty(), "{:?}", errors);

    let main = fs::read_to_string(&path).unwrap();
    assert!(!main.contains("<Bundle>"));

    let anim = fs::read_to_string(dir.path().join("rig-spin.egg")).unwrap();
    assert_eq!(anim.matches("<Bundle> Rig {").count(), 1);
    assert!(anim.contains("<Table> \"<skeleton>\" {"));
    assert!(anim.contains("<Scalar> fps { 5 }"));
    assert!(anim.contains("<Scalar> contents { ijkprhxyz }"));
    assert!(!anim.contains("<VertexPool>"));

    // Ten rows of nine channels for the animated bone; the heading column climbs to 81.
    let upper = anim.split("<Table> Upper {").nth(1).unwrap();
    let rows: Vec<Vec<f32>> = upper
        .split("<V> {")
        .nth(1)
        .unwrap()
        .lines()
        .map(str::trim)
        .take_while(|line| *line != "}")
        .filter(|line| !line.is_empty())
        .map(|line| line.split(' ').map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|row| row.len() == 9));
    assert!(rows[0][5].abs() < 1e-4);
    assert!((rows[9][5] - 81.0).abs() < 1e-3);
}

#[test]
fn test_inline_animation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rig.egg");
    let mut config = ExportConfig::default().with_animation("spin", AnimationRange::new(3, 3, 24));
    config.separate_animation_files = false;
    let errors = write_out(&path, &rigged_scene(), &names(&["Rig", "Left", "Right"]), &config);
    assert!(errors.is_empty(), "{:?}", errors);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("<VertexPool> Left {"));
    assert_eq!(text.matches("<Bundle> spin {").count(), 1);
    assert!(!dir.path().join("rig-spin.egg").exists());

    // A zero-length range still produces one sample per channel.
    let upper = text.split("<Table> Upper {").nth(1).unwrap();
    let body = upper.split("<V> {").nth(1).unwrap();
    let rows = body
        .lines()
        .map(str::trim)
        .take_while(|line| *line != "}")
        .filter(|line| !line.is_empty())
        .count();
    assert_eq!(rows, 1);
}

#[test]
fn test_animation_only_writes_side_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rig.egg");
    let mut config = ExportConfig::default();
    config.animations = AnimationRequest::FromActions;
    config.animation_only = true;
    let errors = write_out(&path, &rigged_scene(), &names(&["Rig", "Left", "Right"]), &config);
    assert!(errors.is_empty(), "{:?}", errors);

    assert!(!path.exists());
    let anim = fs::read_to_string(dir.path().join("rig-Spin.egg")).unwrap();
    assert!(anim.contains("<Bundle> Rig {"));
}

#[test]
fn test_object_parented_to_unselected_armature() {
    let mut scene = Scene::new();
    scene.add_object(SceneObject::new(
        "Rig",
        ObjectData::Armature(ArmatureData::new(vec![Bone::new("Head", None, Mat4::IDENTITY)])),
    ));
    scene.add_object(
        SceneObject::new("Hat", ObjectData::Mesh(MeshData::cube("HatMesh"))).with_parent_bone("Rig", "Head"),
    );
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hat.egg");
    let errors = write_out(&path, &scene, &names(&["Hat"]), &ExportConfig::default());
    assert!(errors.is_empty(), "{:?}", errors);

    let text = fs::read_to_string(&path).unwrap();
    let joint = text.find("<Joint> Head {").unwrap();
    let hat = text.find("<Group> Hat {").unwrap();
    assert!(joint < hat);
}

#[test]
fn test_hierarchy_failure_reports_code() {
    let mut scene = Scene::new();
    scene.add_object(SceneObject::new("A", ObjectData::Empty).with_parent("B"));
    scene.add_object(SceneObject::new("B", ObjectData::Empty).with_parent("A"));
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cycle.egg");
    let errors = write_out(&path, &scene, &names(&["A", "B"]), &ExportConfig::default());
    assert_eq!(errors, vec![ErrorCode::MkHierarchy]);
    assert!(!path.exists());
}

#[test]
fn test_broken_mesh_reports_code() {
    let mut mesh = MeshData::cube("BadMesh");
    mesh.polygons[2].vertices = vec![0, 1];
    let mut scene = Scene::new();
    scene.add_object(SceneObject::new("Bad", ObjectData::Mesh(mesh)));
    let dir = TempDir::new().unwrap();
    let errors = write_out(&dir.path().join("bad.egg"), &scene, &names(&["Bad"]), &ExportConfig::default());
    assert_eq!(errors, vec![ErrorCode::MkObj]);
}

#[test]
fn test_textures_copied_next_to_document() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("wood.png");
    image::RgbaImage::from_pixel(2, 2, image::Rgba([120, 80, 40, 255]))
        .save(&source)
        .unwrap();

    let mut scene = cube_scene();
    let mut material = Material::default();
    material.texture_slots.push(TextureSlot::new("WoodTex"));
    scene.materials.insert("Wood".into(), material);
    scene.textures.insert("WoodTex".into(), Texture::from_image("wood.png"));
    scene
        .images
        .insert("wood.png".into(), Image::new(source.to_string_lossy()));
    if let ObjectData::Mesh(mesh) = &mut scene.objects[0].data {
        mesh.materials = vec![Some("Wood".into())];
    }

    let out = dir.path().join("out");
    let path = out.join("cube.egg");
    let errors = write_out(&path, &scene, &names(&["Cube"]), &ExportConfig::default());
    assert!(errors.is_empty(), "{:?}", errors);

    assert!(out.join("tex").join("wood.png").exists());
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("<Material> Wood {"));
    assert!(text.contains("<Texture> WoodTex {"));
    assert!(text.contains("\"./tex/wood.png\""));
    assert_eq!(text.matches("<TRef> { WoodTex }").count(), 6);
    assert_eq!(text.matches("<MRef> { Wood }").count(), 6);
}

#[test]
fn test_baked_textures_written() {
    let mut scene = cube_scene();
    scene.materials.insert("Paint".into(), Material::default());
    if let ObjectData::Mesh(mesh) = &mut scene.objects[0].data {
        mesh.materials = vec![Some("Paint".into())];
    }
    let mut config = ExportConfig::default();
    config.texture_processing = TextureProcessing::Bake;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.egg");
    let errors = write_out(&path, &scene, &names(&["Cube"]), &config);
    assert!(errors.is_empty(), "{:?}", errors);

    assert!(dir.path().join("tex").join("Cube_diffuse.png").exists());
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("<Texture> Cube_diffuse {"));
}

#[test]
fn test_external_tools_invoked() {
    let mut config = ExportConfig::default();
    config.tangents = TangentMode::External;
    config.launch_viewer = true;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.egg");
    let tools = RecordingTools::default();
    let mut collaborators = Collaborators {
        tools: Box::new(tools.clone()),
        ..Collaborators::default()
    };
    let errors = write_out_with(&path, &cube_scene(), &names(&["Cube"]), &config, &mut collaborators);
    assert!(errors.is_empty(), "{:?}", errors);

    let calls = tools.calls.borrow();
    assert_eq!(calls.tangents, vec![path.clone()]);
    assert_eq!(calls.viewed, vec![path]);
}
