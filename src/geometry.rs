//! Fundamental planar geometric types for truss modelling.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Position in the plane measured in metres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Distance along the global X axis.
    pub x: f64,
    /// Distance along the global Y axis.
    pub y: f64,
}

impl Point {
    /// Create a [`Point`] with explicit coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert the point into an algebraic vector.
    #[must_use]
    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance_to(self, other: Point) -> f64 {
        (other.to_vector() - self.to_vector()).norm()
    }

    /// Reflect the point about the vertical line `x = axis`.
    #[must_use]
    pub fn mirrored(self, axis: f64) -> Self {
        Self::new(2.0 * axis - self.x, self.y)
    }
}

impl From<Vector2<f64>> for Point {
    fn from(value: Vector2<f64>) -> Self {
        Self::new(value.x, value.y)
    }
}

/// Planar force in newtons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Force {
    /// Force component acting along the global X axis.
    pub x: f64,
    /// Force component acting along the global Y axis.
    pub y: f64,
}

impl Force {
    /// Create a [`Force`] with explicit components.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert the force into an algebraic vector.
    #[must_use]
    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Whether any component is non-zero.
    #[must_use]
    pub fn is_loaded(self) -> bool {
        self.x != 0.0 || self.y != 0.0
    }
}

/// Translation of a node in metres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Displacement {
    /// Displacement component along the global X axis.
    pub x: f64,
    /// Displacement component along the global Y axis.
    pub y: f64,
}

impl Displacement {
    /// Create a [`Displacement`] with explicit components.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert the displacement into an algebraic vector.
    #[must_use]
    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Magnitude of the translation.
    #[must_use]
    pub fn magnitude(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Convenience helper for creating [`Point`] instances.
///
/// # Examples
/// ```
/// use trusstopo::point;
///
/// let origin = point(0.0, 0.0);
/// assert_eq!(origin.x, 0.0);
/// ```
#[must_use]
pub const fn point(x: f64, y: f64) -> Point {
    Point::new(x, y)
}

/// Convenience helper for creating [`Force`] instances.
///
/// # Examples
/// ```
/// use trusstopo::force;
///
/// let load = force(0.0, -5.0);
/// assert_eq!(load.y, -5.0);
/// ```
#[must_use]
pub const fn force(x: f64, y: f64) -> Force {
    Force::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_vector_roundtrip() {
        let origin = Point::new(1.0, 2.0);
        let vector = origin.to_vector();
        assert_eq!(vector, Vector2::new(1.0, 2.0));
        assert_eq!(Point::from(vector), origin);
    }

    #[test]
    fn mirrored_point_reflects_about_axis() {
        let p = point(0.25, 3.0).mirrored(1.0);
        assert_eq!(p, point(1.75, 3.0));
    }

    #[test]
    fn force_defaults_to_unloaded() {
        assert_eq!(Force::default(), Force::new(0.0, 0.0));
        assert!(!Force::default().is_loaded());
        assert!(force(0.0, -1.0).is_loaded());
    }
}
