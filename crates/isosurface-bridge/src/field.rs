//! Signed distance fields the bridge can mesh.
//!
//! The bridge only needs the [`DistanceField`] capability. The shapes in this
//! module are a small CSG vocabulary for front ends and tests; any type that
//! can evaluate a point and report its bounds works just as well.

use std::fmt;
use std::sync::Arc;

use crate::geometry::{BoundingBox3, Point3};

/// A signed distance field: negative inside, positive outside.
pub trait DistanceField: Send + Sync {
    /// Signed distance from `p` to the surface.
    fn evaluate(&self, p: Point3) -> f64;

    /// Box that contains the whole surface.
    fn bounding_box(&self) -> BoundingBox3;
}

impl<T: DistanceField + ?Sized> DistanceField for Arc<T> {
    fn evaluate(&self, p: Point3) -> f64 {
        (**self).evaluate(p)
    }

    fn bounding_box(&self) -> BoundingBox3 {
        (**self).bounding_box()
    }
}

impl<T: DistanceField + ?Sized> DistanceField for Box<T> {
    fn evaluate(&self, p: Point3) -> f64 {
        (**self).evaluate(p)
    }

    fn bounding_box(&self) -> BoundingBox3 {
        (**self).bounding_box()
    }
}

/// Sphere around a center point.
#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    center: Point3,
    radius: f64,
}

impl Sphere {
    /// Sphere of `radius` centered at the origin.
    pub fn new(radius: f64) -> Self {
        Self::at(Point3::ZERO, radius)
    }

    /// Sphere of `radius` centered at `center`.
    pub fn at(center: Point3, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl DistanceField for Sphere {
    fn evaluate(&self, p: Point3) -> f64 {
        (p - self.center).length() - self.radius
    }

    fn bounding_box(&self) -> BoundingBox3 {
        BoundingBox3::new(self.center - self.radius, self.center + self.radius)
    }
}

/// Axis-aligned box, exact distance.
#[derive(Debug, Clone, Copy)]
pub struct Cuboid {
    center: Point3,
    half_extents: Point3,
}

impl Cuboid {
    /// Box with the given full size centered at the origin.
    pub fn new(size: Point3) -> Self {
        Self {
            center: Point3::ZERO,
            half_extents: size.abs() * 0.5,
        }
    }

    /// Cube with half-extent `h` on every axis.
    pub fn cube(h: f64) -> Self {
        Self::new(Point3::splat(2.0 * h))
    }
}

impl DistanceField for Cuboid {
    fn evaluate(&self, p: Point3) -> f64 {
        let q = (p - self.center).abs() - self.half_extents;
        q.max(Point3::ZERO).length() + q.max_element().min(0.0)
    }

    fn bounding_box(&self) -> BoundingBox3 {
        BoundingBox3::new(
            self.center - self.half_extents,
            self.center + self.half_extents,
        )
    }
}

/// Torus in the XZ plane around the Y axis.
#[derive(Debug, Clone, Copy)]
pub struct Torus {
    major: f64,
    minor: f64,
}

impl Torus {
    /// Torus with ring radius `major` and tube radius `minor`.
    pub fn new(major: f64, minor: f64) -> Self {
        Self { major, minor }
    }
}

impl DistanceField for Torus {
    fn evaluate(&self, p: Point3) -> f64 {
        let ring = (p.x * p.x + p.z * p.z).sqrt() - self.major;
        (ring * ring + p.y * p.y).sqrt() - self.minor
    }

    fn bounding_box(&self) -> BoundingBox3 {
        let r = self.major + self.minor;
        BoundingBox3::new(
            Point3::new(-r, -self.minor, -r),
            Point3::new(r, self.minor, r),
        )
    }
}

/// Shared handle to any field, used to build CSG trees.
pub type FieldRef = Arc<dyn DistanceField>;

/// Union of two fields.
pub struct Union {
    a: FieldRef,
    b: FieldRef,
}

impl Union {
    /// `a ∪ b`
    pub fn new(a: impl DistanceField + 'static, b: impl DistanceField + 'static) -> Self {
        Self {
            a: Arc::new(a),
            b: Arc::new(b),
        }
    }
}

impl DistanceField for Union {
    fn evaluate(&self, p: Point3) -> f64 {
        self.a.evaluate(p).min(self.b.evaluate(p))
    }

    fn bounding_box(&self) -> BoundingBox3 {
        self.a.bounding_box().union(&self.b.bounding_box())
    }
}

/// Intersection of two fields.
pub struct Intersection {
    a: FieldRef,
    b: FieldRef,
}

impl Intersection {
    /// `a ∩ b`
    pub fn new(a: impl DistanceField + 'static, b: impl DistanceField + 'static) -> Self {
        Self {
            a: Arc::new(a),
            b: Arc::new(b),
        }
    }
}

impl DistanceField for Intersection {
    fn evaluate(&self, p: Point3) -> f64 {
        self.a.evaluate(p).max(self.b.evaluate(p))
    }

    fn bounding_box(&self) -> BoundingBox3 {
        self.a.bounding_box().intersection(&self.b.bounding_box())
    }
}

/// `a` with `b` carved out of it.
pub struct Difference {
    a: FieldRef,
    b: FieldRef,
}

impl Difference {
    /// `a \ b`
    pub fn new(a: impl DistanceField + 'static, b: impl DistanceField + 'static) -> Self {
        Self {
            a: Arc::new(a),
            b: Arc::new(b),
        }
    }
}

impl DistanceField for Difference {
    fn evaluate(&self, p: Point3) -> f64 {
        self.a.evaluate(p).max(-self.b.evaluate(p))
    }

    fn bounding_box(&self) -> BoundingBox3 {
        self.a.bounding_box()
    }
}

/// A field moved by a fixed offset.
pub struct Translate {
    inner: FieldRef,
    offset: Point3,
}

impl Translate {
    /// Move `inner` by `offset`.
    pub fn new(inner: impl DistanceField + 'static, offset: Point3) -> Self {
        Self {
            inner: Arc::new(inner),
            offset,
        }
    }
}

impl DistanceField for Translate {
    fn evaluate(&self, p: Point3) -> f64 {
        self.inner.evaluate(p - self.offset)
    }

    fn bounding_box(&self) -> BoundingBox3 {
        self.inner.bounding_box().translate(self.offset)
    }
}

/// A field backed by a closure and an explicit bounding box.
pub struct FnField<F> {
    f: F,
    bounds: BoundingBox3,
}

impl<F> FnField<F>
where
    F: Fn(Point3) -> f64 + Send + Sync,
{
    /// Wrap `f`, reporting `bounds` as its bounding box.
    pub fn new(bounds: BoundingBox3, f: F) -> Self {
        Self { f, bounds }
    }
}

impl<F> DistanceField for FnField<F>
where
    F: Fn(Point3) -> f64 + Send + Sync,
{
    fn evaluate(&self, p: Point3) -> f64 {
        (self.f)(p)
    }

    fn bounding_box(&self) -> BoundingBox3 {
        self.bounds
    }
}

impl<F> fmt::Debug for FnField<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnField").field("bounds", &self.bounds).finish()
    }
}
