//! Panda3D EGG document rendering.
//!
//! A main document holds the coordinate system, the materials block and the
//! group hierarchy. Animations are either appended to it or rendered as
//! standalone documents.

use crate::animation::{AnimationBundle, JointCurve, SampledAnimation};
use crate::config::ExportConfig;
use crate::export::format::EggWriter;
use crate::geometry::{CurveGeometry, ExplodedVertex, GeometryData};
use crate::hierarchy::{GroupNode, JointData, NodePayload};
use crate::materials::{MaterialLibrary, MaterialRecord, TextureRecord};
use crate::names::{escape, NameRegistry};
use glam::Mat4;
use indexmap::IndexMap;

pub const COORDINATE_SYSTEM: &str = "<CoordinateSystem> { Z-up }";

/// Renders documents for one export run.
pub struct EggSerializer<'a> {
    config: &'a ExportConfig,
    names: &'a NameRegistry,
    library: &'a MaterialLibrary,
}

impl<'a> EggSerializer<'a> {
    pub fn new(config: &'a ExportConfig, names: &'a NameRegistry, library: &'a MaterialLibrary) -> Self {
        Self { config, names, library }
    }

    fn writer(&self) -> EggWriter {
        let mut w = EggWriter::new(self.config.precision);
        w.line(COORDINATE_SYSTEM);
        w.blank();
        w
    }

    /// The primary document. `inline` animations are appended after the hierarchy.
    ///
    /// In animation-only mode, or without a tree, the materials and hierarchy are left out.
    pub fn render_main(&self, root: Option<&GroupNode<'_>>, inline: &[SampledAnimation]) -> String {
        let mut w = self.writer();
        if let Some(root) = root.filter(|_| !self.config.animation_only) {
            for material in &self.library.materials {
                self.write_material(&mut w, material);
            }
            for texture in &self.library.textures {
                self.write_texture(&mut w, texture);
            }
            for child in &root.children {
                self.write_node(&mut w, child);
            }
        }
        for animation in inline {
            write_animation(&mut w, animation, &animation.name);
        }
        w.finish()
    }

    /// A standalone animation document, or `None` when nothing is animated.
    pub fn render_animation(&self, animation: &SampledAnimation) -> Option<String> {
        if animation.is_empty() {
            return None;
        }
        let mut w = self.writer();
        write_animation_tables(&mut w, animation, |bundle| bundle.name.clone());
        Some(w.finish())
    }

    fn write_material(&self, w: &mut EggWriter, material: &MaterialRecord) {
        w.open("Material", Some(&material.name));
        for (channel, value) in ["diffr", "diffg", "diffb"].iter().zip(material.diffuse) {
            w.scalar_f(channel, value);
        }
        if let Some(alpha) = material.alpha {
            w.scalar_f("diffa", alpha);
        }
        for (channel, value) in ["specr", "specg", "specb"].iter().zip(material.specular) {
            w.scalar_f(channel, value);
        }
        w.scalar_f("shininess", material.shininess);
        for (channel, value) in ["emitr", "emitg", "emitb"].iter().zip(material.emission) {
            w.scalar_f(channel, value);
        }
        for (channel, value) in ["ambr", "ambg", "ambb"].iter().zip(material.ambient) {
            w.scalar_f(channel, value);
        }
        if let Some(pbs) = &material.pbs {
            for (channel, value) in ["basecolorr", "basecolorg", "basecolorb"].iter().zip(pbs.base_color) {
                w.scalar_f(channel, value);
            }
            w.scalar_f("roughness", pbs.roughness);
            w.scalar_f("metallic", pbs.metallic);
            w.scalar_f("ior", pbs.ior);
        }
        w.close();
        w.blank();
    }

    fn write_texture(&self, w: &mut EggWriter, texture: &TextureRecord) {
        w.open("Texture", Some(&texture.name));
        w.line(format_args!("\"{}\"", texture.path.replace('"', "_")));
        if let Some(uv_name) = &texture.uv_name {
            w.scalar("uv-name", escape(uv_name));
        }
        if texture.envtype != "MODULATE" {
            w.scalar("envtype", texture.envtype);
        }
        w.scalar("minfilter", texture.minfilter);
        w.scalar("magfilter", texture.magfilter);
        w.scalar("wrap", texture.wrap);
        if let Some((scale, offset)) = texture.transform {
            w.open("Transform", None);
            w.vector("Scale", None, &scale.to_array());
            w.vector("Translate", None, &offset.to_array());
            w.close();
        }
        w.close();
        w.blank();
    }

    fn write_tags(&self, w: &mut EggWriter, properties: &IndexMap<String, String>) {
        for (key, value) in properties {
            match key.as_str() {
                "collide" => w.leaf("Collide", None, value),
                "objecttype" => w.leaf("ObjectType", None, value),
                "bin" | "draw_order" => w.scalar(key, value),
                _ => w.leaf("Tag", Some(key), escape(value)),
            }
        }
    }

    fn write_transform(&self, w: &mut EggWriter, matrix: &Mat4) {
        w.open("Transform", None);
        w.open("Matrix4", None);
        for column in matrix.to_cols_array_2d() {
            let row = w.floats(&column);
            w.line(row);
        }
        w.close();
        w.close();
    }

    fn write_node(&self, w: &mut EggWriter, node: &GroupNode<'_>) {
        let tag = match node.payload {
            NodePayload::Joint(_) => "Joint",
            _ => "Group",
        };
        w.open(tag, Some(&node.name));
        if let Some(object) = node.source.and_then(|s| s.object()) {
            self.write_tags(w, &object.properties);
        }
        if node.character {
            w.leaf("Dart", None, 1);
        }
        self.write_transform(w, &node.transform);
        match &node.payload {
            NodePayload::Mesh(geometry) => self.write_geometry(w, geometry),
            NodePayload::Curve(curve) => self.write_curve(w, curve),
            NodePayload::Joint(joint) => self.write_vertex_refs(w, joint),
            NodePayload::Generic => {}
        }
        for child in &node.children {
            self.write_node(w, child);
        }
        w.close();
    }

    fn write_vertex(&self, w: &mut EggWriter, index: usize, vertex: &ExplodedVertex) {
        w.open_raw("Vertex", &index.to_string());
        let position = w.floats(&vertex.position.to_array());
        w.line(position);
        if let Some(normal) = vertex.normal {
            w.vector("Normal", None, &normal.to_array());
        }
        if let Some(color) = vertex.color {
            w.vector("RGBA", None, &color);
        }
        for uv in &vertex.uvs {
            let name = uv.layer.as_deref();
            match uv.tangent {
                Some((tangent, binormal)) => {
                    w.open("UV", name);
                    let coords = w.floats(&uv.uv);
                    w.line(coords);
                    w.vector("Tangent", None, &tangent.to_array());
                    w.vector("Binormal", None, &binormal.to_array());
                    w.close();
                }
                None => w.vector("UV", name, &uv.uv),
            }
        }
        for (key, offset) in &vertex.morphs {
            let body = w.floats(&offset.to_array());
            w.line(format_args!("<Dxyz> \"{}\" {{ {} }}", key.replace('"', "_"), body));
        }
        w.close();
    }

    fn write_geometry(&self, w: &mut EggWriter, geometry: &GeometryData) {
        w.open("VertexPool", Some(&geometry.pool));
        for (index, vertex) in geometry.vertices.iter().enumerate() {
            self.write_vertex(w, index, vertex);
        }
        w.close();

        let pool = escape(&geometry.pool);
        for polygon in &geometry.polygons {
            w.open("Polygon", None);
            for texture in &polygon.textures {
                if self.library.texture(texture).is_some() {
                    w.leaf("TRef", None, escape(texture));
                }
            }
            if let Some(material) = polygon.material.as_deref() {
                let name = self.names.material(material);
                if self.library.material(&name).is_some() {
                    w.leaf("MRef", None, escape(&name));
                }
            }
            w.vector("Normal", None, &polygon.normal.to_array());
            if polygon.two_sided {
                w.leaf("BFace", None, 1);
            }
            let indices: Vec<String> = polygon.vertices.iter().map(u32::to_string).collect();
            w.leaf("VertexRef", None, format_args!("{} <Ref> {{ {} }}", indices.join(" "), pool));
            w.close();
        }
    }

    fn write_curve(&self, w: &mut EggWriter, curve: &CurveGeometry) {
        w.open("VertexPool", Some(&curve.pool));
        for (index, point) in curve.points.iter().enumerate() {
            let coords = w.floats(&point.to_array());
            w.line(format_args!("<Vertex> {} {{ {} }}", index, coords));
        }
        w.close();

        let pool = escape(&curve.pool);
        for spline in &curve.splines {
            w.open("NURBSCurve", None);
            w.scalar("subdiv", spline.subdiv);
            w.leaf("Order", None, spline.order);
            w.vector("Knots", None, &spline.knots);
            let indices: Vec<String> = spline.vertices.iter().map(u32::to_string).collect();
            w.leaf("VertexRef", None, format_args!("{} <Ref> {{ {} }}", indices.join(" "), pool));
            w.close();
        }
    }

    fn write_vertex_refs(&self, w: &mut EggWriter, joint: &JointData) {
        for group in &joint.weights {
            let weight = w.float(group.weight);
            for (pool, indices) in &group.members {
                let indices: Vec<String> = indices.iter().map(u32::to_string).collect();
                w.open("VertexRef", None);
                w.line(indices.join(" "));
                w.scalar("membership", &weight);
                w.leaf("Ref", None, escape(pool));
                w.close();
            }
        }
    }
}

/// Append the tables of one animation, bundles named after the animation.
fn write_animation(w: &mut EggWriter, animation: &SampledAnimation, bundle_name: &str) {
    if animation.is_empty() {
        return;
    }
    write_animation_tables(w, animation, |_| bundle_name.to_string());
}

fn write_animation_tables(
    w: &mut EggWriter,
    animation: &SampledAnimation,
    bundle_name: impl Fn(&AnimationBundle) -> String,
) {
    w.open("Table", None);
    for bundle in &animation.bundles {
        w.open("Bundle", Some(&bundle_name(bundle)));
        if !bundle.skeleton.is_empty() {
            w.open_raw("Table", "\"<skeleton>\"");
            for joint in &bundle.skeleton {
                write_joint_table(w, joint, animation.fps);
            }
            w.close();
        }
        if !bundle.morphs.is_empty() {
            w.open("Table", Some("morph"));
            for morph in &bundle.morphs {
                w.open("S$Anim", Some(&morph.key));
                w.scalar("fps", animation.fps);
                w.vector("V", None, &morph.values);
                w.close();
            }
            w.close();
        }
        w.close();
    }
    w.close();
}

fn write_joint_table(w: &mut EggWriter, joint: &JointCurve, fps: u32) {
    w.open("Table", Some(&joint.name));
    w.open("Xfm$Anim", Some("xform"));
    w.scalar("order", "sprht");
    w.scalar("fps", fps);
    w.scalar("contents", "ijkprhxyz");
    w.open("V", None);
    for frame in 0..joint.len() {
        let row = w.floats(&joint.row(frame));
        w.line(row);
    }
    w.close();
    w.close();
    for child in &joint.children {
        write_joint_table(w, child, fps);
    }
    w.close();
}
