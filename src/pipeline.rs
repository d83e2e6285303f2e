//! One complete export run.
//!
//! [`write_out`] is the entry point hosts call. It prepares the selection,
//! samples animations, builds and skins the hierarchy, collects materials,
//! writes every document and finally runs the optional external tools. Any
//! failure aborts the run and is reported as a coarse [`ErrorCode`].

use crate::animation::AnimationSampler;
use crate::config::{ExportConfig, TangentMode};
use crate::error::{ErrorCode, Result};
use crate::export::EggSerializer;
use crate::geometry::GeometryData;
use crate::hierarchy::{GroupNode, HierarchyBuilder, NodePayload};
use crate::materials::{
    FlatColorBaker, FsTextureSaver, MaterialCollector, MaterialLibrary, TextureBaker, TextureSaver,
};
use crate::names::NameRegistry;
use crate::prepare::prepare;
use crate::scene::{Scene, SceneObject};
use crate::skinning;
use crate::tools::{ExternalTools, ProcessTools};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// Services an export run delegates to.
pub struct Collaborators {
    pub baker: Box<dyn TextureBaker>,
    /// Texture saver; `None` saves next to the primary document.
    pub saver: Option<Box<dyn TextureSaver>>,
    pub tools: Box<dyn ExternalTools>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            baker: Box::new(FlatColorBaker),
            saver: None,
            tools: Box::new(ProcessTools::default()),
        }
    }
}

/// Path of the side document for one animation: `<base>-<name><ext>`.
pub fn animation_path(base: &Path, name: &str) -> PathBuf {
    let is_egg = base
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("egg"))
        .unwrap_or(false);
    let file_name = base
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match (is_egg, base.file_stem(), base.extension()) {
        (true, Some(stem), Some(ext)) => {
            format!("{}-{}.{}", stem.to_string_lossy(), name, ext.to_string_lossy())
        }
        _ => format!("{}-{}.egg", file_name, name),
    };
    base.with_file_name(file_name)
}

fn write_file(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text)?;
    info!("Wrote {} ({} bytes)", path.display(), text.len());
    Ok(())
}

/// Materials and textures of every mesh in the tree, in tree order.
fn collect_materials(
    scene: &Scene,
    names: &NameRegistry,
    config: &ExportConfig,
    tree: &GroupNode<'_>,
    path: &Path,
    collaborators: &mut Collaborators,
) -> Result<MaterialLibrary> {
    let mut meshes: Vec<(&SceneObject, &GeometryData)> = Vec::new();
    tree.walk(&mut |node| {
        if let (Some(object), NodePayload::Mesh(geometry)) =
            (node.source.and_then(|s| s.object()), &node.payload)
        {
            meshes.push((object, geometry));
        }
    });

    let mut default_saver;
    let saver: &mut dyn TextureSaver = match collaborators.saver.as_deref_mut() {
        Some(saver) => saver,
        None => {
            default_saver = FsTextureSaver::from_config(path, config);
            &mut default_saver
        }
    };
    MaterialCollector::new(scene, names, config).collect(&meshes, saver, collaborators.baker.as_mut())
}

/// Run an export and return the files written.
pub fn export(
    path: &Path,
    scene: &Scene,
    objects: &[String],
    config: &ExportConfig,
    collaborators: &mut Collaborators,
) -> Result<Vec<PathBuf>> {
    let start = Instant::now();
    let names = NameRegistry::from_scene(scene);
    let (mut copy, objects) = prepare(scene, objects, config)?;
    info!("Exporting {} objects to {}", objects.len(), path.display());

    let animations = AnimationSampler::new(&names, &objects).sample_all(&mut copy, &config.animations)?;

    let mut root = None;
    let mut library = MaterialLibrary::default();
    if !config.animation_only {
        let mut tree = HierarchyBuilder::new(&copy, &names, config, &objects)?.build()?;
        skinning::resolve(&mut tree);

        library = collect_materials(&copy, &names, config, &tree, path, collaborators)?;
        root = Some(tree);
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let serializer = EggSerializer::new(config, &names, &library);
    let mut written = Vec::new();
    if !(config.animation_only && config.separate_animation_files) {
        let inline = if config.separate_animation_files { &[][..] } else { &animations[..] };
        write_file(path, &serializer.render_main(root.as_ref(), inline))?;
        written.push(path.to_path_buf());
    }
    if config.separate_animation_files {
        for animation in &animations {
            match serializer.render_animation(animation) {
                Some(text) => {
                    let side = animation_path(path, &animation.name);
                    write_file(&side, &text)?;
                    written.push(side);
                }
                None => warn!("Animation '{}' has nothing to animate, no file written", animation.name),
            }
        }
    }

    if config.tangents == TangentMode::External && written.first().map(PathBuf::as_path) == Some(path) {
        if let Err(e) = collaborators.tools.generate_tangents(path) {
            warn!("Tangent generation failed: {}", e);
        }
    }
    if config.launch_viewer && !written.is_empty() {
        if let Err(e) = collaborators.tools.launch_viewer(&written) {
            warn!("Could not launch viewer: {}", e);
        }
    }

    info!("Export finished in {:?}, {} files", start.elapsed(), written.len());
    Ok(written)
}

/// Export with explicit collaborators, reporting failures as error codes.
pub fn write_out_with(
    path: &Path,
    scene: &Scene,
    objects: &[String],
    config: &ExportConfig,
    collaborators: &mut Collaborators,
) -> Vec<ErrorCode> {
    match export(path, scene, objects, config, collaborators) {
        Ok(_) => Vec::new(),
        Err(e) => {
            let code = e.code();
            error!("{}: {}", code, e);
            error!("{}", code.message());
            vec![code]
        }
    }
}

/// Export with the default collaborators. An empty result means success.
pub fn write_out(path: &Path, scene: &Scene, objects: &[String], config: &ExportConfig) -> Vec<ErrorCode> {
    write_out_with(path, scene, objects, config, &mut Collaborators::default())
}
