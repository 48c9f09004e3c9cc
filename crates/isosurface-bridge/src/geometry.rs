//! Host-side geometry types exchanged with the guest.
//!
//! Coordinates are `f64` on the host. They are narrowed to `f32` when they
//! cross into guest memory and widened again on the way back.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// A point in field space.
pub type Point3 = DVec3;

/// Axis-aligned bounding box. `min <= max` componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox3 {
    /// Minimum corner
    pub min: Point3,
    /// Maximum corner
    pub max: Point3,
}

impl BoundingBox3 {
    /// Create a bounding box from two arbitrary corners.
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Size along each axis.
    pub fn size(&self) -> Point3 {
        self.max - self.min
    }

    /// Center point.
    pub fn center(&self) -> Point3 {
        (self.min + self.max) * 0.5
    }

    /// Translate the box.
    pub fn translate(&self, offset: Point3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Overlap of both boxes. Degenerate (zero-size at the closest corner)
    /// when they are disjoint.
    pub fn intersection(&self, other: &Self) -> Self {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        Self::new(min, min.max(max))
    }

    /// Whether `p` lies inside the box, allowing `tolerance` slack per axis.
    pub fn contains(&self, p: Point3, tolerance: f64) -> bool {
        p.cmpge(self.min - tolerance).all() && p.cmple(self.max + tolerance).all()
    }

    /// The six values in wire order: min.x, min.y, min.z, max.x, max.y, max.z.
    pub fn to_f32_array(&self) -> [f32; 6] {
        [
            self.min.x as f32,
            self.min.y as f32,
            self.min.z as f32,
            self.max.x as f32,
            self.max.y as f32,
            self.max.z as f32,
        ]
    }
}

/// One output triangle, vertices in the winding order the guest produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle3 {
    vertices: [Point3; 3],
}

impl Triangle3 {
    /// Create a triangle from three vertices.
    pub fn new(a: Point3, b: Point3, c: Point3) -> Self {
        Self { vertices: [a, b, c] }
    }

    /// The three vertices.
    pub fn vertices(&self) -> &[Point3; 3] {
        &self.vertices
    }

    /// Unit normal following the right-hand rule, or zero for degenerate
    /// triangles.
    pub fn normal(&self) -> Point3 {
        let [a, b, c] = self.vertices;
        (b - a).cross(c - a).normalize_or_zero()
    }
}
