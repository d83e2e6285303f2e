//! Shared-vertex polygon meshes as stored by the host.
//!
//! Per-corner ("loop") data such as UVs, colors, custom normals and tangents
//! is indexed by loop: loops are numbered by walking polygons in order and
//! each polygon's vertices in winding order.

use crate::error::{ExportError, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Membership of a vertex in a vertex group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupWeight {
    pub group: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    pub co: Vec3,
    #[serde(default)]
    pub groups: Vec<GroupWeight>,
}

impl MeshVertex {
    pub fn new(co: Vec3) -> Self {
        Self { co, groups: Vec::new() }
    }

    pub fn with_group(mut self, group: usize, weight: f32) -> Self {
        self.groups.push(GroupWeight { group, weight });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshPolygon {
    pub vertices: Vec<u32>,
    #[serde(default)]
    pub material_index: usize,
    #[serde(default)]
    pub smooth: bool,
    /// Face normal; derived from the vertex positions when absent.
    #[serde(default)]
    pub normal: Option<Vec3>,
}

impl MeshPolygon {
    pub fn new(vertices: Vec<u32>) -> Self {
        Self {
            vertices,
            material_index: 0,
            smooth: false,
            normal: None,
        }
    }

    pub fn smooth(mut self) -> Self {
        self.smooth = true;
        self
    }

    pub fn with_material(mut self, index: usize) -> Self {
        self.material_index = index;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshEdge {
    pub vertices: [u32; 2],
    #[serde(default)]
    pub sharp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopTangent {
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvLayer {
    pub name: String,
    /// One UV per loop.
    pub uv: Vec<[f32; 2]>,
    /// Per-polygon double-sided flags (may be empty).
    #[serde(default)]
    pub two_sided: Vec<bool>,
    /// Per-polygon image assigned in UV space (may be empty).
    #[serde(default)]
    pub images: Vec<Option<String>>,
    /// Per-loop tangent basis supplied by the host (may be absent).
    #[serde(default)]
    pub tangents: Option<Vec<LoopTangent>>,
}

impl UvLayer {
    pub fn new(name: impl Into<String>, uv: Vec<[f32; 2]>) -> Self {
        Self {
            name: name.into(),
            uv,
            two_sided: Vec::new(),
            images: Vec::new(),
            tangents: None,
        }
    }

    pub fn is_two_sided(&self, polygon: usize) -> bool {
        self.two_sided.get(polygon).copied().unwrap_or(false)
    }

    pub fn image(&self, polygon: usize) -> Option<&str> {
        self.images.get(polygon).and_then(|i| i.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorLayer {
    pub name: String,
    /// One RGBA color per loop.
    pub colors: Vec<[f32; 4]>,
}

/// A shape key. The first key of a mesh is its basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeKey {
    pub name: String,
    pub positions: Vec<Vec3>,
    #[serde(default)]
    pub value: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    /// Data-block name.
    pub name: String,
    #[serde(default)]
    pub vertices: Vec<MeshVertex>,
    #[serde(default)]
    pub polygons: Vec<MeshPolygon>,
    #[serde(default)]
    pub edges: Vec<MeshEdge>,
    /// Honor `MeshEdge::sharp` when deciding smooth vertices.
    #[serde(default)]
    pub use_edge_sharp: bool,
    #[serde(default)]
    pub uv_layers: Vec<UvLayer>,
    #[serde(default)]
    pub active_uv: Option<usize>,
    #[serde(default)]
    pub color_layers: Vec<ColorLayer>,
    #[serde(default)]
    pub active_color: Option<usize>,
    #[serde(default)]
    pub shape_keys: Vec<ShapeKey>,
    #[serde(default)]
    pub vertex_groups: Vec<String>,
    /// Material slots; `None` for an empty slot.
    #[serde(default)]
    pub materials: Vec<Option<String>>,
    /// Custom per-loop normals.
    #[serde(default)]
    pub loop_normals: Option<Vec<Vec3>>,
}

impl MeshData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Total number of polygon corners.
    pub fn loop_count(&self) -> usize {
        self.polygons.iter().map(|p| p.vertices.len()).sum()
    }

    /// Loop index range of every polygon, in polygon order.
    pub fn polygon_loops(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.polygons
            .iter()
            .map(|p| {
                let range = start..start + p.vertices.len();
                start = range.end;
                range
            })
            .collect()
    }

    pub fn active_uv_layer(&self) -> Option<&UvLayer> {
        self.active_uv.and_then(|i| self.uv_layers.get(i))
    }

    pub fn active_color_layer(&self) -> Option<&ColorLayer> {
        self.active_color.and_then(|i| self.color_layers.get(i))
    }

    pub fn material_name(&self, polygon: &MeshPolygon) -> Option<&str> {
        self.materials
            .get(polygon.material_index)
            .and_then(|slot| slot.as_deref())
    }

    pub fn vertex_group_index(&self, name: &str) -> Option<usize> {
        self.vertex_groups.iter().position(|g| g == name)
    }

    /// Face normal in local space.
    pub fn polygon_normal(&self, polygon: &MeshPolygon) -> Vec3 {
        if let Some(normal) = polygon.normal {
            return normal;
        }
        // Newell's method
        let mut normal = Vec3::ZERO;
        let count = polygon.vertices.len();
        for i in 0..count {
            let a = self.vertices[polygon.vertices[i] as usize].co;
            let b = self.vertices[polygon.vertices[(i + 1) % count] as usize].co;
            normal.x += (a.y - b.y) * (a.z + b.z);
            normal.y += (a.z - b.z) * (a.x + b.x);
            normal.z += (a.x - b.x) * (a.y + b.y);
        }
        normal.normalize_or_zero()
    }

    /// Check that every index and per-loop array is consistent.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ExportError::InvalidMesh {
            mesh: self.name.clone(),
            reason,
        };
        let vertex_count = self.vertices.len();
        for (pi, polygon) in self.polygons.iter().enumerate() {
            if polygon.vertices.len() < 3 {
                return Err(invalid(format!("polygon {} has fewer than 3 vertices", pi)));
            }
            if let Some(v) = polygon.vertices.iter().find(|&&v| v as usize >= vertex_count) {
                return Err(invalid(format!("polygon {} references vertex {}", pi, v)));
            }
        }
        for edge in &self.edges {
            if edge.vertices.iter().any(|&v| v as usize >= vertex_count) {
                return Err(invalid(format!("edge {:?} out of range", edge.vertices)));
            }
        }
        let loops = self.loop_count();
        for layer in &self.uv_layers {
            if layer.uv.len() != loops {
                return Err(invalid(format!(
                    "UV layer '{}' has {} entries, expected {}",
                    layer.name,
                    layer.uv.len(),
                    loops
                )));
            }
            if let Some(tangents) = &layer.tangents {
                if tangents.len() != loops {
                    return Err(invalid(format!("tangents of '{}' do not match loops", layer.name)));
                }
            }
        }
        for layer in &self.color_layers {
            if layer.colors.len() != loops {
                return Err(invalid(format!(
                    "color layer '{}' has {} entries, expected {}",
                    layer.name,
                    layer.colors.len(),
                    loops
                )));
            }
        }
        if let Some(normals) = &self.loop_normals {
            if normals.len() != loops {
                return Err(invalid("custom normals do not match loops".to_string()));
            }
        }
        for key in &self.shape_keys {
            if key.positions.len() != vertex_count {
                return Err(invalid(format!("shape key '{}' vertex count mismatch", key.name)));
            }
        }
        Ok(())
    }

    /// An axis-aligned unit cube centered at the origin: 8 vertices, 6 quads.
    pub fn cube(name: impl Into<String>) -> Self {
        let mut mesh = Self::new(name);
        for i in 0..8u32 {
            let x = if i & 1 != 0 { 1.0 } else { -1.0 };
            let y = if i & 2 != 0 { 1.0 } else { -1.0 };
            let z = if i & 4 != 0 { 1.0 } else { -1.0 };
            mesh.vertices.push(MeshVertex::new(Vec3::new(x, y, z)));
        }
        let faces: [[u32; 4]; 6] = [
            [0, 2, 3, 1], // -Z
            [4, 5, 7, 6], // +Z
            [0, 1, 5, 4], // -Y
            [2, 6, 7, 3], // +Y
            [0, 4, 6, 2], // -X
            [1, 3, 7, 5], // +X
        ];
        for face in faces {
            mesh.polygons.push(MeshPolygon::new(face.to_vec()));
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_topology() {
        let cube = MeshData::cube("Cube");
        assert_eq!(cube.vertices.len(), 8);
        assert_eq!(cube.loop_count(), 24);
        assert!(cube.validate().is_ok());
        let loops = cube.polygon_loops();
        assert_eq!(loops[1], 4..8);
        assert_eq!(loops[5], 20..24);
    }

    #[test]
    fn test_newell_normal_points_outward() {
        let cube = MeshData::cube("Cube");
        let top = cube.polygon_normal(&cube.polygons[1]);
        assert!(top.abs_diff_eq(Vec3::Z, 1e-6));
        let bottom = cube.polygon_normal(&cube.polygons[0]);
        assert!(bottom.abs_diff_eq(-Vec3::Z, 1e-6));
    }

    #[test]
    fn test_validate_rejects_bad_uv_layer() {
        let mut cube = MeshData::cube("Cube");
        cube.uv_layers.push(UvLayer::new("UVMap", vec![[0.0, 0.0]; 3]));
        assert!(cube.validate().is_err());
    }
}
