//! Transform helpers shared by geometry, skinning and animation.
//!
//! Every Euler decomposition goes through [`decompose`], so joints and
//! meshes agree on the rotation order: extrinsic X, then Y, then Z.

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

/// Scale, rotation (degrees) and translation of an affine matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposed {
    pub scale: Vec3,
    /// Rotation about X, Y and Z in degrees.
    pub rotation: Vec3,
    pub translation: Vec3,
}

impl Decomposed {
    /// Heading, pitch, roll in degrees (rotation about Z, X, Y).
    pub fn hpr(&self) -> [f32; 3] {
        [self.rotation.z, self.rotation.x, self.rotation.y]
    }

    /// Values in `ijkprhxyz` order.
    pub fn channels(&self) -> [f32; 9] {
        [
            self.scale.x,
            self.scale.y,
            self.scale.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }
}

/// Split a matrix into scale, Euler rotation and translation.
pub fn decompose(matrix: &Mat4) -> Decomposed {
    let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
    let (z, y, x) = rotation.to_euler(EulerRot::ZYX);
    Decomposed {
        scale,
        rotation: Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees()),
        translation,
    }
}

/// Rotation part of a matrix with scale removed.
pub fn rotation_only(matrix: &Mat4) -> Mat3 {
    let (_, rotation, _) = matrix.to_scale_rotation_translation();
    Mat3::from_quat(rotation)
}

/// Rotation from Euler angles in degrees, same order as [`decompose`].
pub fn rotation_from_degrees(rotation: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::ZYX,
        rotation.z.to_radians(),
        rotation.y.to_radians(),
        rotation.x.to_radians(),
    )
}
