//! External command-line collaborators.
//!
//! Tangent generation through `egg-trans` and the `pview` viewer are both
//! optional. The pipeline logs their failures and carries on.

use crate::error::{ExportError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Programs run after the documents are written.
pub trait ExternalTools {
    /// Rewrite a document in place with tangents and binormals.
    fn generate_tangents(&mut self, document: &Path) -> Result<()>;
    /// Open the written documents in a viewer without waiting for it.
    fn launch_viewer(&mut self, documents: &[PathBuf]) -> Result<()>;
}

/// Runs the Panda3D command-line tools found on `PATH`.
#[derive(Debug, Clone)]
pub struct ProcessTools {
    pub egg_trans: String,
    pub viewer: String,
}

impl Default for ProcessTools {
    fn default() -> Self {
        Self {
            egg_trans: "egg-trans".to_string(),
            viewer: "pview".to_string(),
        }
    }
}

impl ExternalTools for ProcessTools {
    fn generate_tangents(&mut self, document: &Path) -> Result<()> {
        debug!("Running {} -tbnall on {}", self.egg_trans, document.display());
        let output = Command::new(&self.egg_trans)
            .arg("-tbnall")
            .arg("-o")
            .arg(document)
            .arg(document)
            .output()
            .map_err(|e| ExportError::Tool(format!("{}: {}", self.egg_trans, e)))?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("{}", line);
        }
        if !output.status.success() {
            return Err(ExportError::Tool(format!(
                "{} exited with {}: {}",
                self.egg_trans,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn launch_viewer(&mut self, documents: &[PathBuf]) -> Result<()> {
        Command::new(&self.viewer)
            .args(documents)
            .spawn()
            .map_err(|e| ExportError::Tool(format!("{}: {}", self.viewer, e)))?;
        info!("Launched {} with {} documents", self.viewer, documents.len());
        Ok(())
    }
}
