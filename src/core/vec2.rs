//! 2D Vector
//!
//! Tile-space coordinates for actors, graph nodes and paths.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use serde::{Deserialize, Serialize};

/// 2D vector in tile units.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
}

impl Vector {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared length (prefer for comparisons).
    #[inline]
    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> f64 {
        (other - self).length()
    }

    /// Whether `other` lies within `range` of this point (inclusive).
    #[inline]
    pub fn is_within_distance(self, other: Self, range: f64) -> bool {
        (other - self).length_squared() <= range * range
    }

    /// Angle in radians from this point towards `other`.
    #[inline]
    pub fn angle(self, other: Self) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Normalize to unit length.
    /// Returns ZERO if length is zero.
    #[inline]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len)
    }

    /// Round both components to the nearest tile.
    #[inline]
    pub fn round(self) -> Self {
        Self::new(self.x.round(), self.y.round())
    }
}

impl Add for Vector {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vector {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vector {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector({:.3}, {:.3})", self.x, self.y)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_arithmetic() {
        let a = Vector::new(3.0, 4.0);
        let b = Vector::new(1.0, 2.0);
        assert_eq!(a + b, Vector::new(4.0, 6.0));
        assert_eq!(a - b, Vector::new(2.0, 2.0));
        assert_eq!(b * 2.0, Vector::new(2.0, 4.0));
        assert_eq!(-b, Vector::new(-1.0, -2.0));
    }

    #[test]
    fn test_vector_length_and_distance() {
        let v = Vector::new(3.0, 4.0);
        assert_eq!(v.length_squared(), 25.0);
        assert_eq!(v.length(), 5.0);
        assert_eq!(Vector::ZERO.distance(v), 5.0);
    }

    #[test]
    fn test_is_within_distance_inclusive() {
        let a = Vector::ZERO;
        let b = Vector::new(3.0, 4.0);
        assert!(a.is_within_distance(b, 5.0));
        assert!(!a.is_within_distance(b, 4.99));
    }

    #[test]
    fn test_normalize() {
        let n = Vector::new(3.0, 4.0).normalize();
        assert!((n.length() - 1.0).abs() < 1e-12);
        assert_eq!(Vector::ZERO.normalize(), Vector::ZERO);
    }

    #[test]
    fn test_angle() {
        let a = Vector::ZERO;
        assert_eq!(a.angle(Vector::new(1.0, 0.0)), 0.0);
        assert!((a.angle(Vector::new(0.0, 1.0)) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
