//! NURBS curves.

use serde::{Deserialize, Serialize};

fn default_order() -> u32 {
    4
}

fn default_resolution() -> u32 {
    12
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spline {
    /// Homogeneous control points (x, y, z, w).
    pub points: Vec<[f32; 4]>,
    #[serde(default = "default_order")]
    pub order: u32,
    #[serde(default)]
    pub cyclic: bool,
    /// Clamp the curve to its first and last control points.
    #[serde(default)]
    pub use_endpoint: bool,
    #[serde(default = "default_resolution")]
    pub resolution: u32,
}

impl Spline {
    pub fn new(points: Vec<[f32; 4]>) -> Self {
        Self {
            points,
            order: default_order(),
            cyclic: false,
            use_endpoint: false,
            resolution: default_resolution(),
        }
    }

    /// Order clamped to the number of control points.
    pub fn effective_order(&self) -> u32 {
        self.order.clamp(1, self.points.len().max(1) as u32)
    }

    /// Knot vector with `points + order` entries.
    pub fn knots(&self) -> Vec<f32> {
        if self.points.is_empty() {
            return Vec::new();
        }
        let order = self.effective_order() as usize;
        let count = self.points.len() + order;
        if self.use_endpoint && !self.cyclic {
            let inner = count - 2 * order;
            let mut knots = vec![0.0; order];
            knots.extend((1..=inner).map(|i| i as f32));
            knots.extend(std::iter::repeat((inner + 1) as f32).take(order));
            knots
        } else {
            (0..count).map(|i| i as f32).collect()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveData {
    pub name: String,
    #[serde(default)]
    pub splines: Vec<Spline>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_knots() {
        let spline = Spline::new(vec![[0.0, 0.0, 0.0, 1.0]; 4]);
        assert_eq!(spline.knots(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_clamped_knots() {
        let mut spline = Spline::new(vec![[0.0, 0.0, 0.0, 1.0]; 5]);
        spline.use_endpoint = true;
        assert_eq!(
            spline.knots(),
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0]
        );
    }
}
