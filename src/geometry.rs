//! Exploded per-corner geometry.
//!
//! EGG vertex pools carry one vertex per polygon corner. [`GeometryConverter`]
//! turns a shared-vertex host mesh into that layout, attaching world-space
//! positions, smoothing-aware normals, colors, UVs and shape-key offsets.

use crate::config::{ExportConfig, TangentMode};
use crate::error::{ExportError, Result};
use crate::materials;
use crate::math::rotation_only;
use crate::names::NameRegistry;
use crate::scene::{MeshData, MeshPolygon, Scene, SceneObject};
use glam::{Mat3, Vec3, Vec4};
use tracing::{debug, warn};

/// Shape-key offsets at or below this length (local units) are dropped.
pub const SHAPE_KEY_EPSILON: f32 = 1e-6;

/// One UV set of an exploded vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct UvEntry {
    /// Layer name; `None` for the active layer.
    pub layer: Option<String>,
    pub uv: [f32; 2],
    /// Tangent and binormal, world space.
    pub tangent: Option<(Vec3, Vec3)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplodedVertex {
    /// Shared vertex this corner was exploded from.
    pub source: u32,
    pub position: Vec3,
    pub normal: Option<Vec3>,
    pub color: Option<[f32; 4]>,
    pub uvs: Vec<UvEntry>,
    /// Shape-key name and world-space offset.
    pub morphs: Vec<(String, Vec3)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    /// Exploded vertex indices in winding order.
    pub vertices: Vec<u32>,
    /// Host material name.
    pub material: Option<String>,
    /// Export names of the referenced textures.
    pub textures: Vec<String>,
    pub normal: Vec3,
    pub two_sided: bool,
}

/// Exploded mesh data for one vertex pool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeometryData {
    /// Vertex pool name.
    pub pool: String,
    pub vertices: Vec<ExplodedVertex>,
    pub polygons: Vec<Polygon>,
}

impl GeometryData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Names of all shape keys carried by at least one vertex.
    pub fn morph_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for vertex in &self.vertices {
            for (name, _) in &vertex.morphs {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// A NURBS spline referencing a curve vertex pool.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSpline {
    pub order: u32,
    pub subdiv: u32,
    pub knots: Vec<f32>,
    pub vertices: Vec<u32>,
}

/// Control points of a curve object plus its splines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurveGeometry {
    pub pool: String,
    /// World-space homogeneous control points.
    pub points: Vec<Vec4>,
    pub splines: Vec<CurveSpline>,
}

/// Mark shared vertices that should carry a vertex normal.
pub fn smooth_vertices(mesh: &MeshData) -> Vec<bool> {
    let mut smooth = vec![false; mesh.vertices.len()];
    for polygon in mesh.polygons.iter().filter(|p| p.smooth) {
        for &v in &polygon.vertices {
            smooth[v as usize] = true;
        }
    }
    if mesh.use_edge_sharp {
        for edge in mesh.edges.iter().filter(|e| e.sharp) {
            for &v in &edge.vertices {
                smooth[v as usize] = false;
            }
        }
    }
    smooth
}

/// Averaged adjacent face normals, local space.
fn vertex_normals(mesh: &MeshData) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; mesh.vertices.len()];
    for polygon in &mesh.polygons {
        let normal = mesh.polygon_normal(polygon);
        for &v in &polygon.vertices {
            normals[v as usize] += normal;
        }
    }
    normals.into_iter().map(|n| n.normalize_or_zero()).collect()
}

/// Tangent and binormal of a polygon from its first three corners' UVs.
fn polygon_tangent(mesh: &MeshData, polygon: &MeshPolygon, uvs: &[[f32; 2]]) -> (Vec3, Vec3) {
    let p0 = mesh.vertices[polygon.vertices[0] as usize].co;
    let p1 = mesh.vertices[polygon.vertices[1] as usize].co;
    let p2 = mesh.vertices[polygon.vertices[2] as usize].co;
    let (e1, e2) = (p1 - p0, p2 - p0);
    let (du1, dv1) = (uvs[1][0] - uvs[0][0], uvs[1][1] - uvs[0][1]);
    let (du2, dv2) = (uvs[2][0] - uvs[0][0], uvs[2][1] - uvs[0][1]);
    let det = du1 * dv2 - du2 * dv1;
    if det.abs() < f32::EPSILON {
        return (Vec3::X, Vec3::Y);
    }
    let r = 1.0 / det;
    let tangent = ((e1 * dv2 - e2 * dv1) * r).normalize_or_zero();
    let binormal = ((e2 * du1 - e1 * du2) * r).normalize_or_zero();
    (tangent, binormal)
}

fn world_tangent(rotation: &Mat3, (tangent, binormal): (Vec3, Vec3)) -> (Vec3, Vec3) {
    (
        (*rotation * tangent).normalize_or_zero(),
        (*rotation * binormal).normalize_or_zero(),
    )
}

/// Converts host objects into exploded geometry.
pub struct GeometryConverter<'a> {
    scene: &'a Scene,
    names: &'a NameRegistry,
    config: &'a ExportConfig,
}

impl<'a> GeometryConverter<'a> {
    pub fn new(scene: &'a Scene, names: &'a NameRegistry, config: &'a ExportConfig) -> Self {
        Self { scene, names, config }
    }

    /// Explode a mesh object.
    pub fn convert_mesh(&self, object: &SceneObject) -> Result<GeometryData> {
        let mesh = object.mesh().ok_or_else(|| {
            ExportError::object_build(&object.name, "object has no mesh data")
        })?;
        mesh.validate()?;

        let pool = self.names.object(&object.name);
        let world = object.matrix_world;
        let rotation = rotation_only(&world);
        let smooth = smooth_vertices(mesh);
        let normals = vertex_normals(mesh);
        let loops = mesh.polygon_loops();
        let active_uv = mesh
            .active_uv
            .or(if mesh.uv_layers.is_empty() { None } else { Some(0) });
        let active_color = mesh.active_color_layer();
        let loop_normals = if self.config.use_loop_normals {
            mesh.loop_normals.as_ref()
        } else {
            None
        };

        let mut data = GeometryData {
            pool,
            vertices: Vec::with_capacity(mesh.loop_count()),
            polygons: Vec::with_capacity(mesh.polygons.len()),
        };

        for (pi, polygon) in mesh.polygons.iter().enumerate() {
            let material_name = mesh.material_name(polygon);
            let material = material_name.and_then(|name| self.scene.materials.get(name));
            let use_color = active_color.is_some()
                && (self.config.force_vertex_colors
                    || material.map(|m| m.use_vertex_color_paint).unwrap_or(false));

            let tangents = self.polygon_tangents(mesh, polygon, loops[pi].start);
            let mut corners = Vec::with_capacity(polygon.vertices.len());

            for (corner, &source) in polygon.vertices.iter().enumerate() {
                let loop_index = loops[pi].start + corner;
                let index = data.vertices.len() as u32;
                let shared = &mesh.vertices[source as usize];

                let normal = if smooth[source as usize] {
                    let local = loop_normals
                        .map(|n| n[loop_index])
                        .unwrap_or(normals[source as usize]);
                    Some((rotation * local).normalize_or_zero())
                } else {
                    None
                };

                let color = if use_color {
                    active_color.map(|layer| layer.colors[loop_index])
                } else {
                    None
                };

                let uvs = mesh
                    .uv_layers
                    .iter()
                    .enumerate()
                    .map(|(li, layer)| UvEntry {
                        layer: if Some(li) == active_uv {
                            None
                        } else {
                            Some(layer.name.clone())
                        },
                        uv: layer.uv[loop_index],
                        tangent: tangents
                            .get(li)
                            .and_then(|t| t.as_ref())
                            .map(|t| world_tangent(&rotation, t[corner])),
                    })
                    .collect();

                data.vertices.push(ExplodedVertex {
                    source,
                    position: world.transform_point3(shared.co),
                    normal,
                    color,
                    uvs,
                    morphs: self.morphs(object, mesh, source as usize),
                });
                corners.push(index);
            }

            let textures = materials::polygon_texture_refs(
                self.scene,
                self.names,
                self.config,
                &object.name,
                mesh,
                pi,
            );
            data.polygons.push(Polygon {
                vertices: corners,
                material: material_name.map(str::to_string),
                textures,
                normal: (rotation * mesh.polygon_normal(polygon)).normalize_or_zero(),
                two_sided: mesh.uv_layers.iter().any(|layer| layer.is_two_sided(pi)),
            });
        }

        debug!(
            "Exploded '{}': {} shared vertices -> {} corners, {} polygons",
            object.name,
            mesh.vertices.len(),
            data.vertices.len(),
            data.polygons.len()
        );
        Ok(data)
    }

    /// Per UV layer: tangent frames for each corner of a polygon, when requested.
    fn polygon_tangents(
        &self,
        mesh: &MeshData,
        polygon: &MeshPolygon,
        loop_start: usize,
    ) -> Vec<Option<Vec<(Vec3, Vec3)>>> {
        if self.config.tangents != TangentMode::Host {
            return Vec::new();
        }
        let count = polygon.vertices.len();
        mesh.uv_layers
            .iter()
            .map(|layer| match &layer.tangents {
                Some(supplied) => Some(
                    supplied[loop_start..loop_start + count]
                        .iter()
                        .map(|t| (t.tangent, t.bitangent))
                        .collect(),
                ),
                None => {
                    let uvs = &layer.uv[loop_start..loop_start + count];
                    Some(vec![polygon_tangent(mesh, polygon, uvs); count])
                }
            })
            .collect()
    }

    fn morphs(&self, object: &SceneObject, mesh: &MeshData, source: usize) -> Vec<(String, Vec3)> {
        let Some(basis) = mesh.shape_keys.first() else {
            return Vec::new();
        };
        mesh.shape_keys
            .iter()
            .skip(1)
            .filter_map(|key| {
                let offset = key.positions[source] - basis.positions[source];
                if offset.length() > SHAPE_KEY_EPSILON {
                    Some((key.name.clone(), object.matrix_world.transform_vector3(offset)))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Control-point pool and splines of a curve object.
    pub fn convert_curve(&self, object: &SceneObject) -> Result<CurveGeometry> {
        let curve = object.curve().ok_or_else(|| {
            ExportError::object_build(&object.name, "object has no curve data")
        })?;
        let mut geometry = CurveGeometry {
            pool: self.names.object(&object.name),
            ..CurveGeometry::default()
        };
        for spline in &curve.splines {
            if spline.points.is_empty() {
                warn!("Skipping empty spline on curve '{}'", object.name);
                continue;
            }
            let start = geometry.points.len() as u32;
            for p in &spline.points {
                let world = object.matrix_world.transform_point3(Vec3::new(p[0], p[1], p[2]));
                geometry.points.push(world.extend(p[3]));
            }
            geometry.splines.push(CurveSpline {
                order: spline.effective_order(),
                subdiv: spline.resolution * (spline.points.len() as u32 - 1),
                knots: spline.knots(),
                vertices: (start..start + spline.points.len() as u32).collect(),
            });
        }
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{
        ColorLayer, Material, MeshEdge, ObjectData, ShapeKey, Spline, CurveData, UvLayer,
    };
    use glam::Mat4;

    fn convert(scene: &Scene, config: &ExportConfig, name: &str) -> GeometryData {
        let names = NameRegistry::from_scene(scene);
        let converter = GeometryConverter::new(scene, &names, config);
        converter.convert_mesh(scene.object(name).unwrap()).unwrap()
    }

    fn cube_scene(mesh: MeshData) -> Scene {
        let mut scene = Scene::new();
        scene.add_object(SceneObject::new("Cube", ObjectData::Mesh(mesh)));
        scene
    }

    #[test]
    fn test_explosion_count() {
        let scene = cube_scene(MeshData::cube("CubeMesh"));
        let data = convert(&scene, &ExportConfig::default(), "Cube");
        assert_eq!(data.vertex_count(), 24);
        assert_eq!(data.polygon_count(), 6);
        let corners: usize = data.polygons.iter().map(|p| p.vertices.len()).sum();
        assert_eq!(corners, data.vertex_count());
        assert_eq!(data.polygons[1].vertices, vec![4, 5, 6, 7]);
        assert_eq!(data.vertices[4].source, 4);
        assert_eq!(data.pool, "Cube");
    }

    #[test]
    fn test_flat_mesh_has_no_vertex_normals() {
        let scene = cube_scene(MeshData::cube("CubeMesh"));
        let data = convert(&scene, &ExportConfig::default(), "Cube");
        assert!(data.vertices.iter().all(|v| v.normal.is_none()));
        assert!(data.polygons[1].normal.abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn test_smooth_and_sharp_edges() {
        let mut mesh = MeshData::cube("CubeMesh");
        mesh.polygons[1].smooth = true; // top face: vertices 4,5,6,7
        mesh.use_edge_sharp = true;
        mesh.edges.push(MeshEdge { vertices: [4, 5], sharp: true });
        let scene = cube_scene(mesh);
        let data = convert(&scene, &ExportConfig::default(), "Cube");

        for vertex in &data.vertices {
            let expect_normal = matches!(vertex.source, 6 | 7);
            assert_eq!(vertex.normal.is_some(), expect_normal, "source {}", vertex.source);
        }
    }

    #[test]
    fn test_world_transform_applied() {
        let mut scene = cube_scene(MeshData::cube("CubeMesh"));
        scene.objects[0].matrix_world =
            Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let data = convert(&scene, &ExportConfig::default(), "Cube");
        assert!(data.vertices[0].position.abs_diff_eq(Vec3::new(8.0, -2.0, -2.0), 1e-5));
        // Normals ignore scale.
        assert!((data.polygons[1].normal.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_uv_layers_and_two_sided() {
        let mut mesh = MeshData::cube("CubeMesh");
        let mut main = UvLayer::new("UVMap", vec![[0.25, 0.5]; 24]);
        main.two_sided = vec![false, true, false, false, false, false];
        mesh.uv_layers.push(main);
        mesh.uv_layers.push(UvLayer::new("Detail", vec![[1.0, 1.0]; 24]));
        mesh.active_uv = Some(0);
        let scene = cube_scene(mesh);
        let data = convert(&scene, &ExportConfig::default(), "Cube");

        let uvs = &data.vertices[0].uvs;
        assert_eq!(uvs.len(), 2);
        assert_eq!(uvs[0].layer, None);
        assert_eq!(uvs[1].layer.as_deref(), Some("Detail"));
        assert!(uvs[0].tangent.is_none());
        assert!(data.polygons[1].two_sided);
        assert!(!data.polygons[0].two_sided);
    }

    #[test]
    fn test_host_tangents_computed() {
        let mut mesh = MeshData::cube("CubeMesh");
        let mut uv = Vec::new();
        for _ in 0..6 {
            uv.extend_from_slice(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        }
        mesh.uv_layers.push(UvLayer::new("UVMap", uv));
        let scene = cube_scene(mesh);
        let config = ExportConfig {
            tangents: TangentMode::Host,
            ..ExportConfig::default()
        };
        let data = convert(&scene, &config, "Cube");
        let (tangent, binormal) = data.vertices[4].uvs[0].tangent.unwrap();
        // Top face: 4 -> 5 runs along +X with u increasing.
        assert!(tangent.abs_diff_eq(Vec3::X, 1e-5));
        assert!(binormal.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn test_vertex_colors_follow_material() {
        let mut mesh = MeshData::cube("CubeMesh");
        mesh.color_layers.push(ColorLayer {
            name: "Col".into(),
            colors: vec![[1.0, 0.0, 0.0, 1.0]; 24],
        });
        mesh.active_color = Some(0);
        mesh.materials.push(Some("Paint".into()));
        let mut scene = cube_scene(mesh);
        scene.materials.insert("Paint".into(), Material::default());

        let data = convert(&scene, &ExportConfig::default(), "Cube");
        assert!(data.vertices[0].color.is_none());

        let forced = ExportConfig {
            force_vertex_colors: true,
            ..ExportConfig::default()
        };
        let data = convert(&scene, &forced, "Cube");
        assert_eq!(data.vertices[0].color, Some([1.0, 0.0, 0.0, 1.0]));

        scene.materials.get_mut("Paint").unwrap().use_vertex_color_paint = true;
        let data = convert(&scene, &ExportConfig::default(), "Cube");
        assert!(data.vertices.iter().all(|v| v.color.is_some()));
        assert_eq!(data.polygons[0].material.as_deref(), Some("Paint"));
    }

    #[test]
    fn test_shape_key_epsilon() {
        let mut mesh = MeshData::cube("CubeMesh");
        let basis: Vec<Vec3> = mesh.vertices.iter().map(|v| v.co).collect();
        let mut raised = basis.clone();
        raised[4].z += 0.5;
        raised[5].z += 1e-8;
        mesh.shape_keys.push(ShapeKey { name: "Basis".into(), positions: basis, value: 0.0 });
        mesh.shape_keys.push(ShapeKey { name: "Raise".into(), positions: raised, value: 0.0 });
        let scene = cube_scene(mesh);
        let data = convert(&scene, &ExportConfig::default(), "Cube");

        let with_morph: Vec<u32> = data
            .vertices
            .iter()
            .filter(|v| !v.morphs.is_empty())
            .map(|v| v.source)
            .collect();
        assert!(with_morph.iter().all(|&s| s == 4));
        assert_eq!(with_morph.len(), 3); // vertex 4 is a corner of three faces
        assert_eq!(data.morph_names(), vec!["Raise"]);
    }

    #[test]
    fn test_invalid_mesh_rejected() {
        let mut mesh = MeshData::cube("CubeMesh");
        mesh.polygons[0].vertices[0] = 99;
        let scene = cube_scene(mesh);
        let names = NameRegistry::from_scene(&scene);
        let config = ExportConfig::default();
        let converter = GeometryConverter::new(&scene, &names, &config);
        assert!(converter.convert_mesh(&scene.objects[0]).is_err());
    }

    #[test]
    fn test_curve_pool() {
        let mut scene = Scene::new();
        let mut spline = Spline::new(vec![
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [2.0, 1.0, 0.0, 1.0],
            [3.0, 1.0, 0.0, 1.0],
        ]);
        spline.use_endpoint = true;
        let curve = CurveData { name: "Path".into(), splines: vec![spline] };
        scene.add_object(
            SceneObject::new("Path", ObjectData::Curve(curve))
                .with_matrix(Mat4::from_translation(Vec3::Z)),
        );
        let names = NameRegistry::from_scene(&scene);
        let config = ExportConfig::default();
        let converter = GeometryConverter::new(&scene, &names, &config);
        let geometry = converter.convert_curve(&scene.objects[0]).unwrap();
        assert_eq!(geometry.points.len(), 4);
        assert_eq!(geometry.points[3], Vec4::new(3.0, 1.0, 1.0, 1.0));
        assert_eq!(geometry.splines[0].vertices, vec![0, 1, 2, 3]);
        assert_eq!(geometry.splines[0].knots.len(), 8);
    }
}
