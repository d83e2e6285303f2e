//! EGG Writer CLI
//!
//! Export objects from a JSON scene description to Panda3D EGG documents.

use clap::{Parser, Subcommand, ValueEnum};
use egg_writer::{
    load_scene, write_out, AnimationRange, AnimationRequest, ErrorCode, ExportConfig, ObjectKind,
    Scene, TangentMode, TextureProcessing,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "egg-writer")]
#[command(author, version, about = "Export 3D scenes to Panda3D EGG documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export objects from a scene
    Export {
        /// Scene description (JSON)
        #[arg(short, long)]
        scene: PathBuf,

        /// Primary output document
        #[arg(short, long)]
        output: PathBuf,

        /// Object to export (repeatable, defaults to every object)
        #[arg(short = 'O', long)]
        object: Vec<String>,

        /// Export configuration (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Animation range as NAME:START:STOP:FPS (repeatable)
        #[arg(short, long, value_parser = parse_animation)]
        anim: Vec<(String, AnimationRange)>,

        /// Export one animation per action instead of named ranges
        #[arg(long, conflicts_with = "anim")]
        anims_from_actions: bool,

        /// Write animation tables only
        #[arg(long)]
        anim_only: bool,

        /// Put animation tables in the primary document
        #[arg(long)]
        no_separate_anims: bool,

        /// Decimal places for floats
        #[arg(long)]
        precision: Option<usize>,

        /// Texture processing mode
        #[arg(long, value_enum)]
        textures: Option<TextureMode>,

        /// Export images assigned in UV space as textures
        #[arg(long)]
        uv_image_textures: bool,

        /// Tangent and binormal source
        #[arg(long, value_enum)]
        tangents: Option<TangentSource>,

        /// Merge actors that share an armature into one mesh
        #[arg(long)]
        merge_actor: bool,

        /// Open the result in the viewer
        #[arg(long)]
        view: bool,
    },

    /// Show information about a scene
    Info {
        /// Scene description (JSON)
        #[arg(short, long)]
        scene: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TextureMode {
    Simple,
    Bake,
    Raw,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TangentSource {
    None,
    Host,
    External,
}

fn parse_animation(s: &str) -> Result<(String, AnimationRange), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
        return Err(format!("Invalid animation format: '{}'. Use NAME:START:STOP:FPS", s));
    }
    let number = |text: &str| {
        text.parse::<i32>()
            .map_err(|e| format!("Invalid number '{}' in '{}': {}", text, s, e))
    };
    let fps = parts[3]
        .parse::<u32>()
        .map_err(|e| format!("Invalid fps '{}' in '{}': {}", parts[3], s, e))?;
    Ok((
        parts[0].to_string(),
        AnimationRange::new(number(parts[1])?, number(parts[2])?, fps),
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            scene,
            output,
            object,
            config,
            anim,
            anims_from_actions,
            anim_only,
            no_separate_anims,
            precision,
            textures,
            uv_image_textures,
            tangents,
            merge_actor,
            view,
        } => {
            let mut export_config = match &config {
                Some(path) => serde_json::from_str::<ExportConfig>(&fs::read_to_string(path)?)?,
                None => ExportConfig::default(),
            };
            for (name, range) in anim {
                export_config = export_config.with_animation(name, range);
            }
            if anims_from_actions {
                export_config.animations = AnimationRequest::FromActions;
            }
            export_config.animation_only |= anim_only;
            export_config.separate_animation_files &= !no_separate_anims;
            export_config.merge_actor |= merge_actor;
            export_config.launch_viewer |= view;
            export_config.uv_image_as_texture |= uv_image_textures;
            if let Some(precision) = precision {
                export_config.precision = precision;
            }
            if let Some(mode) = textures {
                export_config.texture_processing = match mode {
                    TextureMode::Simple => TextureProcessing::Simple,
                    TextureMode::Bake => TextureProcessing::Bake,
                    TextureMode::Raw => TextureProcessing::Raw,
                };
            }
            if let Some(source) = tangents {
                export_config.tangents = match source {
                    TangentSource::None => TangentMode::None,
                    TangentSource::Host => TangentMode::Host,
                    TangentSource::External => TangentMode::External,
                };
            }
            run_export(&scene, &output, object, &export_config)?;
        }
        Commands::Info { scene } => {
            show_scene_info(&scene)?;
        }
    }

    Ok(())
}

fn run_export(
    scene_path: &PathBuf,
    output_path: &PathBuf,
    objects: Vec<String>,
    config: &ExportConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading scene from {:?}...", scene_path);
    let scene = load_scene(scene_path)?;
    let objects = if objects.is_empty() {
        scene.objects.iter().map(|o| o.name.clone()).collect()
    } else {
        objects
    };
    println!("  Exporting {} objects", objects.len());

    let errors = write_out(output_path, &scene, &objects, config);
    export_outcome(output_path, &errors)?;
    println!("Exported EGG to {:?}", output_path);
    Ok(())
}

/// Turn the codes reported by an export into the command's result.
fn export_outcome(output_path: &Path, errors: &[ErrorCode]) -> Result<(), Box<dyn std::error::Error>> {
    if errors.is_empty() {
        return Ok(());
    }
    for code in errors {
        eprintln!("{}: {}", code, code.message());
    }
    let codes: Vec<String> = errors.iter().map(|code| code.to_string()).collect();
    Err(format!("export to {:?} failed: {}", output_path, codes.join(", ")).into())
}

fn show_scene_info(scene_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading scene from {:?}...", scene_path);
    let scene: Scene = load_scene(scene_path)?;

    let count = |kind: ObjectKind| scene.objects.iter().filter(|o| o.kind() == kind).count();
    println!("\nScene Info:");
    println!("  Objects: {}", scene.objects.len());
    println!("    Meshes: {}", count(ObjectKind::Mesh));
    println!("    Armatures: {}", count(ObjectKind::Armature));
    println!("    Curves: {}", count(ObjectKind::Curve));
    println!("  Materials: {}", scene.materials.len());
    println!("  Textures: {}", scene.textures.len());
    println!("  Actions: {}", scene.actions.len());
    for (name, action) in &scene.actions {
        println!("    {} [{}..{}]", name, action.frame_start, action.frame_end);
    }
    println!("  FPS: {}", scene.fps);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_animation() {
        let (name, range) = parse_animation("walk:1:25:24").unwrap();
        assert_eq!(name, "walk");
        assert_eq!(range, AnimationRange::new(1, 25, 24));
        assert!(parse_animation("walk:1:25").is_err());
        assert!(parse_animation("walk:a:25:24").is_err());
    }

    #[test]
    fn test_failed_export_is_an_error() {
        let path = Path::new("out/actor.egg");
        assert!(export_outcome(path, &[]).is_ok());

        let err = export_outcome(path, &[ErrorCode::MkObj]).unwrap_err();
        assert!(err.to_string().contains("ERR_MK_OBJ"));
    }
}
