//! Obstacle geometry and clearance
//!
//! Two shapes share the [`Clearance`] contract (`clearance >= 0` is safe):
//!
//! - [`Obstacle`]: capsule between two endpoints, clearance is the 3D
//!   point-to-segment distance minus the radius. Coincident endpoints degrade
//!   to the point distance.
//! - [`EllipticCylinder`]: infinite cylinder along a coordinate axis with an
//!   elliptic cross-section, algebraic clearance
//!   `w_a (a - a₀)² + w_b (b - b₀)² - r²`. With unit weights it is the
//!   unbounded-axis limit of a capsule, squared.
//!
//! [`ObstacleField`] reports elliptic cylinders through their scaled
//! clearance `sqrt(w_a (a - a₀)² + w_b (b - b₀)²) - r`: same zero set, but
//! it grows linearly so every field entry is in metres.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Squared segment length below which endpoints are treated as coincident
const DEGENERATE_LENGTH_SQ: f64 = 1e-12;

/// Signed clearance of a point from an obstacle
pub trait Clearance {
    /// Positive outside the obstacle, zero on its surface, negative inside
    fn clearance(&self, point: &Vector3<f64>) -> f64;
}

/// Capsule obstacle (cylinder with hemispherical caps)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// First axis endpoint [m]
    pub start: Vector3<f64>,
    /// Second axis endpoint [m]
    pub end: Vector3<f64>,
    /// Radius [m]
    pub radius: f64,
}

impl Obstacle {
    pub fn new(start: Vector3<f64>, end: Vector3<f64>, radius: f64) -> Self {
        Self { start, end, radius }
    }

    /// Spherical obstacle (coincident endpoints)
    pub fn sphere(center: Vector3<f64>, radius: f64) -> Self {
        Self::new(center, center, radius)
    }

    /// Vertical pillar from the floor to `height`
    pub fn pillar(x: f64, y: f64, height: f64, radius: f64) -> Self {
        Self::new(Vector3::new(x, y, 0.0), Vector3::new(x, y, height), radius)
    }

    /// Axis vector from `start` to `end`
    pub fn axis(&self) -> Vector3<f64> {
        self.end - self.start
    }

    pub fn length(&self) -> f64 {
        self.axis().norm()
    }

    pub fn midpoint(&self) -> Vector3<f64> {
        (self.start + self.end) * 0.5
    }

    /// Closest point on the axis segment
    pub fn closest_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        let axis = self.axis();
        let length_sq = axis.norm_squared();
        if length_sq < DEGENERATE_LENGTH_SQ {
            return self.start;
        }

        let s = ((point - self.start).dot(&axis) / length_sq).clamp(0.0, 1.0);
        self.start + axis * s
    }

    /// Euclidean distance from the axis segment
    pub fn distance(&self, point: &Vector3<f64>) -> f64 {
        (point - self.closest_point(point)).norm()
    }

    /// Endpoints finite and radius non-negative
    pub fn is_valid(&self) -> bool {
        self.start.iter().chain(self.end.iter()).all(|v| v.is_finite())
            && self.radius.is_finite()
            && self.radius >= 0.0
    }
}

impl Clearance for Obstacle {
    fn clearance(&self, point: &Vector3<f64>) -> f64 {
        self.distance(point) - self.radius
    }
}

/// Coordinate axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two remaining axes in cyclic order
    fn cross_section(self) -> (usize, usize) {
        match self {
            Axis::X => (1, 2),
            Axis::Y => (2, 0),
            Axis::Z => (0, 1),
        }
    }
}

/// Infinite cylinder with elliptic cross-section
///
/// [`Clearance::clearance`] is algebraic, not metric: it is cheap and smooth
/// but its magnitude grows quadratically with distance. Use
/// [`EllipticCylinder::scaled_clearance`] when it is compared with other
/// distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipticCylinder {
    /// Cylinder axis direction
    pub axis: Axis,
    /// Any point on the axis [m]
    pub center: Vector3<f64>,
    /// Weights on the two cross-section coordinates, in cyclic order after `axis`
    pub weights: [f64; 2],
    /// Right-hand side radius r (clearance is zero where the weighted sum equals r²)
    pub radius: f64,
}

impl EllipticCylinder {
    pub fn new(axis: Axis, center: Vector3<f64>, weights: [f64; 2], radius: f64) -> Self {
        Self {
            axis,
            center,
            weights,
            radius,
        }
    }

    /// Circular cylinder along `axis`
    pub fn circular(axis: Axis, center: Vector3<f64>, radius: f64) -> Self {
        Self::new(axis, center, [1.0, 1.0], radius)
    }

    /// Equivalent capsule for a circular cylinder, truncated to `half_length`
    ///
    /// Returns `None` for non-circular cross-sections.
    pub fn to_capsule(&self, half_length: f64) -> Option<Obstacle> {
        if (self.weights[0] - 1.0).abs() > 1e-12 || (self.weights[1] - 1.0).abs() > 1e-12 {
            return None;
        }
        let mut direction = Vector3::zeros();
        direction[self.axis.index()] = half_length;
        Some(Obstacle::new(
            self.center - direction,
            self.center + direction,
            self.radius,
        ))
    }

    /// Three staggered cylinders along y crossing the x-z climb corridor
    ///
    /// ```text
    /// (x + 3)² + 2(z - 5)²  >= 16
    /// (x - 3)² + 2(z - 9)²  >= 16
    /// (x + 3)² + 2(z - 15)² >= 16
    /// ```
    pub fn illustrative_set() -> Vec<Self> {
        // Cross-section of an axis-Y cylinder is (z, x) in cyclic order
        let weights = [2.0, 1.0];
        vec![
            Self::new(Axis::Y, Vector3::new(-3.0, 0.0, 5.0), weights, 4.0),
            Self::new(Axis::Y, Vector3::new(3.0, 0.0, 9.0), weights, 4.0),
            Self::new(Axis::Y, Vector3::new(-3.0, 0.0, 15.0), weights, 4.0),
        ]
    }

    /// Weighted radial distance minus `r`; zero exactly where the algebraic
    /// clearance is, Euclidean for unit weights
    pub fn scaled_clearance(&self, point: &Vector3<f64>) -> f64 {
        self.weighted_square(point).sqrt() - self.radius
    }

    fn weighted_square(&self, point: &Vector3<f64>) -> f64 {
        let (a, b) = self.axis.cross_section();
        let d = point - self.center;
        self.weights[0] * d[a] * d[a] + self.weights[1] * d[b] * d[b]
    }

    pub fn is_valid(&self) -> bool {
        self.center.iter().all(|v| v.is_finite())
            && self.weights.iter().all(|w| w.is_finite() && *w >= 0.0)
            && self.radius.is_finite()
            && self.radius >= 0.0
    }
}

impl Clearance for EllipticCylinder {
    fn clearance(&self, point: &Vector3<f64>) -> f64 {
        self.weighted_square(point) - self.radius * self.radius
    }
}

/// Static obstacle field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleField {
    /// Capsules, typically loaded from file
    pub capsules: Vec<Obstacle>,
    /// Axis-aligned elliptic cylinders
    pub elliptic: Vec<EllipticCylinder>,
    /// Extra radius applied to every capsule [m]
    pub safety_margin: f64,
}

impl ObstacleField {
    pub fn new(capsules: Vec<Obstacle>, safety_margin: f64) -> Self {
        Self {
            capsules,
            elliptic: Vec::new(),
            safety_margin,
        }
    }

    pub fn with_elliptic(mut self, elliptic: Vec<EllipticCylinder>) -> Self {
        self.elliptic = elliptic;
        self
    }

    /// Number of inequality constraints per horizon stage
    pub fn len(&self) -> usize {
        self.capsules.len() + self.elliptic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clearance of `point` from each obstacle in metres, capsules first
    ///
    /// Capsules are shrunk by the safety margin, elliptic cylinders use
    /// their scaled clearance.
    pub fn clearances<'a>(&'a self, point: &'a Vector3<f64>) -> impl Iterator<Item = f64> + 'a {
        let margin = self.safety_margin;
        self.capsules
            .iter()
            .map(move |o| o.clearance(point) - margin)
            .chain(self.elliptic.iter().map(move |e| e.scaled_clearance(point)))
    }

    /// Smallest clearance, `f64::INFINITY` for an empty field
    pub fn min_clearance(&self, point: &Vector3<f64>) -> f64 {
        self.clearances(point).fold(f64::INFINITY, f64::min)
    }

    pub fn is_valid(&self) -> bool {
        self.safety_margin.is_finite()
            && self.safety_margin >= 0.0
            && self.capsules.iter().all(Obstacle::is_valid)
            && self.elliptic.iter().all(EllipticCylinder::is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_degenerate_capsule_is_point_distance() {
        let center = Vector3::new(1.0, 2.0, 3.0);
        let obstacle = Obstacle::new(center, center, 0.0);
        let point = Vector3::new(4.0, 6.0, 3.0);

        let clearance = obstacle.clearance(&point);
        assert!(clearance.is_finite());
        assert_relative_eq!(clearance, 5.0, epsilon = 1e-12);
        assert_relative_eq!(obstacle.clearance(&center), 0.0);
    }

    #[test]
    fn test_segment_distance_regions() {
        let obstacle = Obstacle::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 10.0), 1.0);

        // Beside the segment
        assert_relative_eq!(obstacle.clearance(&Vector3::new(3.0, 0.0, 5.0)), 2.0, epsilon = 1e-12);
        // Beyond the end cap
        assert_relative_eq!(obstacle.clearance(&Vector3::new(0.0, 0.0, 13.0)), 2.0, epsilon = 1e-12);
        // Beyond the start cap, diagonally
        assert_relative_eq!(
            obstacle.clearance(&Vector3::new(3.0, 4.0, -12.0)),
            13.0 - 1.0,
            epsilon = 1e-12
        );
        // Inside
        assert!(obstacle.clearance(&Vector3::new(0.5, 0.0, 2.0)) < 0.0);
    }

    #[test]
    fn test_oblique_capsule() {
        let obstacle = Obstacle::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 0.0), 0.5);
        let point = Vector3::new(1.0, 0.0, 0.0);
        // Distance from (1,0,0) to the line x = y is 1/sqrt(2)
        assert_relative_eq!(
            obstacle.clearance(&point),
            std::f64::consts::FRAC_1_SQRT_2 - 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_elliptic_matches_algebraic_form() {
        let cylinders = EllipticCylinder::illustrative_set();
        let p: Vector3<f64> = Vector3::new(0.5, 7.0, 6.0);

        let expected = (p.x + 3.0).powi(2) + 2.0 * (p.z - 5.0).powi(2) - 16.0;
        assert_relative_eq!(cylinders[0].clearance(&p), expected, epsilon = 1e-12);

        let expected = (p.x - 3.0).powi(2) + 2.0 * (p.z - 9.0).powi(2) - 16.0;
        assert_relative_eq!(cylinders[1].clearance(&p), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_clearance_shares_the_surface() {
        let cylinders = EllipticCylinder::illustrative_set();
        let c = &cylinders[0];

        // On the ellipse (x + 3)² + 2(z - 5)² = 16 both forms vanish
        let surface = Vector3::new(1.0, 3.0, 5.0);
        assert_relative_eq!(c.clearance(&surface), 0.0, epsilon = 1e-12);
        assert_relative_eq!(c.scaled_clearance(&surface), 0.0, epsilon = 1e-12);

        // Metres along the unit-weight x direction
        assert_relative_eq!(c.scaled_clearance(&Vector3::new(2.5, 0.0, 5.0)), 1.5, epsilon = 1e-12);
        assert_relative_eq!(c.scaled_clearance(&Vector3::new(-3.0, 0.0, 5.0)), -4.0);

        // Same sign everywhere, far smaller magnitude away from the surface
        for p in [Vector3::new(0.5, 0.0, 6.0), Vector3::new(8.0, 1.0, -2.0), Vector3::new(-2.0, 0.0, 4.0)] {
            let (algebraic, scaled) = (c.clearance(&p), c.scaled_clearance(&p));
            assert_eq!(algebraic > 0.0, scaled > 0.0);
            assert!(scaled.abs() <= algebraic.abs());
        }
    }

    #[test]
    fn test_circular_cylinder_agrees_with_capsule_sign() {
        let cylinder = EllipticCylinder::circular(Axis::Z, Vector3::new(2.0, -1.0, 0.0), 1.5);
        let capsule = cylinder.to_capsule(100.0).unwrap();

        for point in [
            Vector3::new(2.0, -1.0, 3.0),
            Vector3::new(3.0, 0.0, -7.0),
            Vector3::new(5.0, 2.0, 10.0),
            Vector3::new(2.0, 0.6, 1.0),
        ] {
            let algebraic = cylinder.clearance(&point);
            let metric = capsule.clearance(&point);
            assert_eq!(algebraic > 0.0, metric > 0.0);
            // (d - r)(d + r) = d² - r²
            assert_relative_eq!(algebraic, metric * (metric + 2.0 * 1.5), epsilon = 1e-9);
        }

        let elliptic = EllipticCylinder::new(Axis::Z, Vector3::zeros(), [2.0, 1.0], 1.0);
        assert!(elliptic.to_capsule(1.0).is_none());
    }

    #[test]
    fn test_field_applies_margin_to_capsules_only() {
        let field = ObstacleField::new(vec![Obstacle::sphere(Vector3::zeros(), 1.0)], 1.0)
            .with_elliptic(vec![EllipticCylinder::circular(Axis::Z, Vector3::new(10.0, 0.0, 0.0), 1.0)]);
        let point = Vector3::new(5.0, 0.0, 0.0);

        let values: Vec<f64> = field.clearances(&point).collect();
        assert_eq!(values.len(), 2);
        assert_relative_eq!(values[0], 3.0);
        assert_relative_eq!(values[1], 4.0);
        assert_relative_eq!(field.min_clearance(&point), 3.0);
    }

    #[test]
    fn test_empty_field() {
        let field = ObstacleField::default();
        assert!(field.is_empty());
        assert_eq!(field.min_clearance(&Vector3::zeros()), f64::INFINITY);
    }
}
