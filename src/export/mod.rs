//! Document export.
//!
//! This module renders the assembled hierarchy, material library and sampled
//! animations as Panda3D EGG text.

pub mod egg;
pub mod format;

pub use egg::{EggSerializer, COORDINATE_SYSTEM};
pub use format::{format_float, EggWriter};
