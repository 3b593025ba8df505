use crate::dimension::Dimension;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// A simple 3D vector struct. 2D analyses keep their points in `x`/`y` and ignore `z`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3.
    #[inline(always)]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    /// Creates a point in the xy-plane.
    #[inline(always)]
    pub fn planar(x: f64, y: f64) -> Self {
        Vec3 { x, y, z: 0.0 }
    }

    /// Creates a zero vector.
    #[inline(always)]
    pub fn zero() -> Self {
        Vec3 { x: 0.0, y: 0.0, z: 0.0 }
    }

    /// Component along `axis` (0 = x, 1 = y, anything else = z).
    #[inline(always)]
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Squared distance to another point over the axes active in `dimension`.
    #[inline(always)]
    pub fn distance_squared_in(&self, other: Vec3, dimension: Dimension) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        match dimension {
            Dimension::Two => dx * dx + dy * dy,
            Dimension::Three => {
                let dz = self.z - other.z;
                dx * dx + dy * dy + dz * dz
            }
        }
    }

    #[inline(always)]
    pub fn distance_in(&self, other: Vec3, dimension: Dimension) -> f64 {
        self.distance_squared_in(other, dimension).sqrt()
    }

    /// Component-wise minimum.
    #[inline(always)]
    pub fn min(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum.
    #[inline(always)]
    pub fn max(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Clamps every component into `[lower, upper]`.
    pub fn clamp(&self, lower: Vec3, upper: Vec3) -> Vec3 {
        Vec3::new(
            clamp(self.x, lower.x, upper.x),
            clamp(self.y, lower.y, upper.y),
            clamp(self.z, lower.z, upper.z),
        )
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y, z: self.z + other.z }
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self { x: self.x - other.x, y: self.y - other.y, z: self.z - other.z }
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar, z: self.z * scalar }
    }
}

/// Clamps a value between a minimum and maximum.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
