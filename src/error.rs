//! Error types for the EGG exporter.

use std::fmt;
use thiserror::Error;

/// Result type alias using ExportError.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Main error type for export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse JSON data.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to encode or decode an image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The group hierarchy could not be built from the parenting data.
    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    /// A single object's payload could not be constructed.
    #[error("Failed to build object '{object}': {reason}")]
    ObjectBuild { object: String, reason: String },

    /// A referenced scene entity does not exist.
    #[error("Scene entity not found: {0}")]
    NotFound(String),

    /// Mesh data is internally inconsistent.
    #[error("Invalid mesh data in '{mesh}': {reason}")]
    InvalidMesh { mesh: String, reason: String },

    /// Texture baking failed.
    #[error("Bake error: {0}")]
    Bake(String),

    /// An external collaborator (tool, viewer) failed.
    #[error("External tool error: {0}")]
    Tool(String),
}

impl ExportError {
    /// Build an [`ExportError::ObjectBuild`] from any displayable cause.
    pub fn object_build(object: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ObjectBuild {
            object: object.into(),
            reason: reason.to_string(),
        }
    }

    /// The public error code this error is reported as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Hierarchy(_) => ErrorCode::MkHierarchy,
            Self::ObjectBuild { .. } => ErrorCode::MkObj,
            _ => ErrorCode::Unexpected,
        }
    }
}

/// Coarse error codes returned by [`write_out`](crate::pipeline::write_out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MkHierarchy,
    MkObj,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MkHierarchy => "ERR_MK_HIERARCHY",
            Self::MkObj => "ERR_MK_OBJ",
            Self::Unexpected => "ERR_UNEXPECTED",
        }
    }

    /// Human-readable explanation shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MkHierarchy => "Error while creating hierarchy. Check parent objects and armatures.",
            Self::MkObj => "Unexpected error while creating object. See log for details.",
            Self::Unexpected => "Unexpected error during export! See log for details.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
