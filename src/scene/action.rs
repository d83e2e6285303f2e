//! Keyframed actions.

use glam::{EulerRot, Mat4, Quat, Vec3};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub frame: f32,
    pub value: f32,
}

/// A scalar animation channel. Keys must be sorted by frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Track {
    pub keys: Vec<Keyframe>,
}

impl Track {
    pub fn new(keys: impl IntoIterator<Item = (f32, f32)>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(frame, value)| Keyframe { frame, value })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Linearly interpolated value at `frame`, constant outside the keyed range.
    pub fn evaluate(&self, frame: f32) -> Option<f32> {
        let first = self.keys.first()?;
        let last = self.keys.last()?;
        if frame <= first.frame {
            return Some(first.value);
        }
        if frame >= last.frame {
            return Some(last.value);
        }
        let next = self.keys.iter().position(|k| k.frame > frame)?;
        let a = self.keys[next - 1];
        let b = self.keys[next];
        let t = (frame - a.frame) / (b.frame - a.frame);
        Some(a.value + (b.value - a.value) * t)
    }
}

/// Per-bone location, Euler rotation (radians, XYZ) and scale channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoneTracks {
    pub location: [Track; 3],
    pub rotation_euler: [Track; 3],
    pub scale: [Track; 3],
}

impl BoneTracks {
    fn channel(tracks: &[Track; 3], frame: f32, rest: f32) -> Vec3 {
        Vec3::new(
            tracks[0].evaluate(frame).unwrap_or(rest),
            tracks[1].evaluate(frame).unwrap_or(rest),
            tracks[2].evaluate(frame).unwrap_or(rest),
        )
    }

    /// Local pose offset applied on top of the rest matrix.
    pub fn basis(&self, frame: f32) -> Mat4 {
        let location = Self::channel(&self.location, frame, 0.0);
        let rotation = Self::channel(&self.rotation_euler, frame, 0.0);
        let scale = Self::channel(&self.scale, frame, 1.0);
        let rotation = Quat::from_euler(EulerRot::ZYX, rotation.z, rotation.y, rotation.x);
        Mat4::from_scale_rotation_translation(scale, rotation, location)
    }
}

/// A named animation clip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub frame_start: i32,
    #[serde(default)]
    pub frame_end: i32,
    #[serde(default)]
    pub bones: IndexMap<String, BoneTracks>,
    #[serde(default)]
    pub shape_keys: IndexMap<String, Track>,
}

impl Action {
    pub fn new(frame_start: i32, frame_end: i32) -> Self {
        Self {
            frame_start,
            frame_end,
            ..Self::default()
        }
    }

    pub fn with_bone(mut self, bone: impl Into<String>, tracks: BoneTracks) -> Self {
        self.bones.insert(bone.into(), tracks);
        self
    }

    pub fn with_shape_key(mut self, key: impl Into<String>, track: Track) -> Self {
        self.shape_keys.insert(key.into(), track);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_interpolation() {
        let track = Track::new([(0.0, 0.0), (10.0, 90.0)]);
        assert_eq!(track.evaluate(-5.0), Some(0.0));
        assert_eq!(track.evaluate(5.0), Some(45.0));
        assert_eq!(track.evaluate(20.0), Some(90.0));
        assert_eq!(Track::default().evaluate(1.0), None);
    }

    #[test]
    fn test_basis_rest_is_identity() {
        let tracks = BoneTracks::default();
        assert!(tracks.basis(3.0).abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn test_basis_location() {
        let mut tracks = BoneTracks::default();
        tracks.location[2] = Track::new([(0.0, 0.0), (4.0, 2.0)]);
        let m = tracks.basis(2.0);
        assert!((m.w_axis.z - 1.0).abs() < 1e-6);
    }
}
