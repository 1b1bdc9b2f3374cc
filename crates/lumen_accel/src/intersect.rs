//! Primitive-level intersection routines used at BVH leaves.

use lumen_math::{Interval, Ray};

use crate::{Primitive, Sphere, Triangle};

/// Rays with `|cos(angle between ray and triangle normal)|` at or below this
/// are treated as parallel to the triangle plane.
const PARALLEL_COS_EPSILON: f32 = 1e-7;

/// Surface data reported with an intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceData {
    /// Barycentric weights of the triangle's `b` and `c` vertices.
    Barycentric { u: f32, v: f32 },
    /// Sphere hit; the normal is derived from the hit point on demand
    /// (see `PrimitiveStore::surface_frame`).
    Sphere,
}

/// A ray/primitive intersection at parameter `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub t: f32,
    pub surface: SurfaceData,
}

/// Möller-Trumbore ray-triangle intersection.
///
/// Accepts `t` in `ray_t` (inclusive) and barycentrics on the triangle's
/// edges. Returns `None` when the ray is near-parallel to the plane instead of
/// dividing by a vanishing determinant.
#[inline]
pub fn intersect_triangle(tri: &Triangle, ray: &Ray, ray_t: Interval) -> Option<Intersection> {
    let edge1 = tri.b - tri.a;
    let edge2 = tri.c - tri.a;

    let h = ray.direction.cross(edge2);
    let det = edge1.dot(h);

    // |det| = |d| * |e1 x e2| * |cos|, so compare squared magnitudes
    let scale = edge1.cross(edge2).length_squared() * ray.direction.length_squared();
    if det * det <= PARALLEL_COS_EPSILON * PARALLEL_COS_EPSILON * scale {
        return None;
    }

    let f = 1.0 / det;
    let s = ray.origin - tri.a;
    let u = f * s.dot(h);

    // Check if intersection is outside triangle (u parameter)
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);

    // Check if intersection is outside triangle (v and 1 - u - v)
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if !ray_t.contains(t) {
        return None;
    }

    Some(Intersection {
        t,
        surface: SurfaceData::Barycentric { u, v },
    })
}

/// Ray-sphere intersection.
///
/// Returns the near root when it lies in `ray_t`, otherwise the far root.
/// A ray starting inside the sphere therefore reports the exit point.
#[inline]
pub fn intersect_sphere(sphere: &Sphere, ray: &Ray, ray_t: Interval) -> Option<Intersection> {
    let oc = sphere.center - ray.origin;
    let a = ray.direction.length_squared();
    let h = ray.direction.dot(oc);
    let c = oc.length_squared() - sphere.radius * sphere.radius;

    let discriminant = h * h - a * c;
    if !(discriminant >= 0.0) || a == 0.0 {
        return None;
    }

    let sqrtd = discriminant.sqrt();

    // Find the nearest root in the acceptable range
    let mut root = (h - sqrtd) / a;
    if !ray_t.contains(root) {
        root = (h + sqrtd) / a;
        if !ray_t.contains(root) {
            return None;
        }
    }

    Some(Intersection {
        t: root,
        surface: SurfaceData::Sphere,
    })
}

/// Dispatch to the routine for the primitive's kind.
#[inline]
pub fn intersect_primitive(
    primitive: &Primitive,
    ray: &Ray,
    ray_t: Interval,
) -> Option<Intersection> {
    match primitive {
        Primitive::Triangle(tri) => intersect_triangle(tri, ray, ray_t),
        Primitive::Sphere(sphere) => intersect_sphere(sphere, ray, ray_t),
    }
}
