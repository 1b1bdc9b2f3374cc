//! Geometric primitives: triangles and analytic spheres.

use lumen_math::{Aabb, Vec3};

use crate::PrimitiveError;

/// Stable primitive id: the index of the primitive in its store, used by the
/// scene to look up material data.
pub type PrimitiveId = u32;

/// A triangle with ordered vertices `a`, `b`, `c`.
///
/// Barycentric `(u, v)` reported by intersection are the weights of `b` and
/// `c`: `p = (1 - u - v) * a + u * b + v * c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Padded bounding box (axis-aligned triangles get a non-zero thickness).
    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_point_iter([self.a, self.b, self.c]).padded()
    }

    pub fn centroid(&self) -> Vec3 {
        (self.a + self.b + self.c) / 3.0
    }

    /// Unnormalized face normal `(b - a) x (c - a)`; its length is twice the
    /// triangle's area.
    pub fn face_normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a)
    }

    /// Point at barycentric coordinates `(u, v)`.
    pub fn point_at(&self, u: f32, v: f32) -> Vec3 {
        self.a * (1.0 - u - v) + self.b * u + self.c * v
    }

    /// Rejects non-finite vertices and zero-area triangles, which can never
    /// be hit.
    pub fn validate(&self, id: PrimitiveId) -> Result<(), PrimitiveError> {
        if !(self.a.is_finite() && self.b.is_finite() && self.c.is_finite()) {
            return Err(PrimitiveError::NonFinite { id });
        }
        if self.face_normal().length_squared() == 0.0 {
            return Err(PrimitiveError::DegenerateTriangle { id });
        }
        Ok(())
    }
}

/// An analytic sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn bounding_box(&self) -> Aabb {
        let r = Vec3::splat(self.radius.abs());
        Aabb::from_points(self.center - r, self.center + r).padded()
    }

    /// Rejects non-finite centers and radii that are not strictly positive.
    pub fn validate(&self, id: PrimitiveId) -> Result<(), PrimitiveError> {
        if !self.center.is_finite() {
            return Err(PrimitiveError::NonFinite { id });
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(PrimitiveError::InvalidRadius {
                id,
                radius: self.radius,
            });
        }
        Ok(())
    }
}

/// Either kind of primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Triangle(Triangle),
    Sphere(Sphere),
}

impl Primitive {
    pub fn bounding_box(&self) -> Aabb {
        match self {
            Primitive::Triangle(tri) => tri.bounding_box(),
            Primitive::Sphere(sphere) => sphere.bounding_box(),
        }
    }

    pub fn validate(&self, id: PrimitiveId) -> Result<(), PrimitiveError> {
        match self {
            Primitive::Triangle(tri) => tri.validate(id),
            Primitive::Sphere(sphere) => sphere.validate(id),
        }
    }
}

impl From<Triangle> for Primitive {
    fn from(tri: Triangle) -> Self {
        Primitive::Triangle(tri)
    }
}

impl From<Sphere> for Primitive {
    fn from(sphere: Sphere) -> Self {
        Primitive::Sphere(sphere)
    }
}
