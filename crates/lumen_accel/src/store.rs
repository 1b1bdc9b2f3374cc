//! Primitive Store: flat geometry arrays addressed by stable primitive id.

use lumen_core::{Scene, ScenePrimitive};
use lumen_math::{Aabb, Interval, Ray, Vec3};

use crate::intersect::{intersect_primitive, intersect_sphere, intersect_triangle, Intersection};
use crate::{Hit, Primitive, PrimitiveError, PrimitiveId, Sphere, Triangle};

/// Read-only view of a primitive set that the BVH can be built over and
/// traversed against.
///
/// Implementations must be `Sync`: traversal runs from many threads at once.
pub trait PrimitiveSet: Sync {
    /// Number of primitives; valid ids are `0..primitive_count()`.
    fn primitive_count(&self) -> usize;

    /// Padded bounding box of a primitive.
    fn bounding_box(&self, id: PrimitiveId) -> Aabb;

    /// Geometry check run before the build. Invalid primitives are left out
    /// of the tree.
    fn validate(&self, id: PrimitiveId) -> Result<(), PrimitiveError>;

    /// Intersect one primitive, accepting hits with `t` in `ray_t`.
    fn intersect(&self, id: PrimitiveId, ray: &Ray, ray_t: Interval) -> Option<Intersection>;
}

/// Hit point, shading-side geometric normal and facing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceFrame {
    pub point: Vec3,
    /// Unit normal, always pointing against the ray.
    pub normal: Vec3,
    /// Whether the ray hit the front face (outside) of the surface.
    pub front_face: bool,
}

impl SurfaceFrame {
    fn new(ray: &Ray, point: Vec3, outward_normal: Vec3) -> Self {
        // If the ray and normal point in the same direction, we're inside
        let front_face = ray.direction.dot(outward_normal) < 0.0;
        let normal = if front_face {
            outward_normal
        } else {
            -outward_normal
        };
        Self {
            point,
            normal,
            front_face,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Triangle(u32),
    Sphere(u32),
}

/// Triangles and spheres in flat arrays.
///
/// Triangle vertices live in `positions`, three consecutive entries per
/// triangle. Primitive ids are assigned in insertion order regardless of
/// kind.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveStore {
    positions: Vec<Vec3>,
    spheres: Vec<Sphere>,
    slots: Vec<Slot>,
}

impl PrimitiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the given triangles as ids `0..n`.
    pub fn from_triangles(triangles: impl IntoIterator<Item = [Vec3; 3]>) -> Self {
        let mut store = Self::new();
        for [a, b, c] in triangles {
            store.push_triangle(a, b, c);
        }
        store
    }

    /// Store mirroring a scene's primitives, with identical ids.
    pub fn from_scene(scene: &Scene) -> Self {
        let mut store = Self::new();
        for primitive in scene.primitives() {
            match *primitive {
                ScenePrimitive::Triangle([a, b, c]) => store.push_triangle(a, b, c),
                ScenePrimitive::Sphere { center, radius } => store.push_sphere(center, radius),
            };
        }
        log::debug!(
            "Primitive store: {} triangles, {} spheres",
            store.triangle_count(),
            store.sphere_count()
        );
        store
    }

    pub fn push_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) -> PrimitiveId {
        let index = (self.positions.len() / 3) as u32;
        self.positions.extend_from_slice(&[a, b, c]);
        self.push_slot(Slot::Triangle(index))
    }

    pub fn push_sphere(&mut self, center: Vec3, radius: f32) -> PrimitiveId {
        let index = self.spheres.len() as u32;
        self.spheres.push(Sphere::new(center, radius));
        self.push_slot(Slot::Sphere(index))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn sphere_count(&self) -> usize {
        self.spheres.len()
    }

    /// Flat triangle vertex array (3 entries per triangle, in triangle
    /// insertion order).
    pub fn triangle_positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn spheres(&self) -> &[Sphere] {
        &self.spheres
    }

    pub fn get(&self, id: PrimitiveId) -> Option<Primitive> {
        match *self.slots.get(id as usize)? {
            Slot::Triangle(index) => Some(Primitive::Triangle(self.triangle_at(index))),
            Slot::Sphere(index) => Some(Primitive::Sphere(self.spheres[index as usize])),
        }
    }

    /// Padded bounding boxes of all primitives, indexed by id.
    pub fn bounding_boxes(&self) -> Vec<Aabb> {
        (0..self.len() as PrimitiveId)
            .map(|id| PrimitiveSet::bounding_box(self, id))
            .collect()
    }

    /// Hit point and geometric normal for a hit reported against this store.
    ///
    /// Triangles use their face normal (`(b - a) x (c - a)`), spheres the
    /// radial direction at the hit point.
    pub fn surface_frame(&self, ray: &Ray, hit: &Hit) -> Option<SurfaceFrame> {
        let outward = match self.get(hit.primitive_id)? {
            Primitive::Triangle(tri) => tri.face_normal().normalize(),
            Primitive::Sphere(sphere) => (ray.at(hit.distance) - sphere.center) / sphere.radius,
        };
        Some(SurfaceFrame::new(ray, ray.at(hit.distance), outward))
    }

    #[inline]
    fn triangle_at(&self, index: u32) -> Triangle {
        let base = index as usize * 3;
        Triangle::new(
            self.positions[base],
            self.positions[base + 1],
            self.positions[base + 2],
        )
    }

    fn push_slot(&mut self, slot: Slot) -> PrimitiveId {
        self.slots.push(slot);
        (self.slots.len() - 1) as PrimitiveId
    }
}

impl PrimitiveSet for PrimitiveStore {
    fn primitive_count(&self) -> usize {
        self.len()
    }

    fn bounding_box(&self, id: PrimitiveId) -> Aabb {
        self.get(id).map_or(Aabb::EMPTY, |p| p.bounding_box())
    }

    fn validate(&self, id: PrimitiveId) -> Result<(), PrimitiveError> {
        match self.get(id) {
            Some(primitive) => primitive.validate(id),
            None => Err(PrimitiveError::NonFinite { id }),
        }
    }

    #[inline]
    fn intersect(&self, id: PrimitiveId, ray: &Ray, ray_t: Interval) -> Option<Intersection> {
        match *self.slots.get(id as usize)? {
            Slot::Triangle(index) => intersect_triangle(&self.triangle_at(index), ray, ray_t),
            Slot::Sphere(index) => intersect_sphere(&self.spheres[index as usize], ray, ray_t),
        }
    }
}

impl PrimitiveSet for [Primitive] {
    fn primitive_count(&self) -> usize {
        self.len()
    }

    fn bounding_box(&self, id: PrimitiveId) -> Aabb {
        self.get(id as usize).map_or(Aabb::EMPTY, Primitive::bounding_box)
    }

    fn validate(&self, id: PrimitiveId) -> Result<(), PrimitiveError> {
        match self.get(id as usize) {
            Some(primitive) => primitive.validate(id),
            None => Err(PrimitiveError::NonFinite { id }),
        }
    }

    fn intersect(&self, id: PrimitiveId, ray: &Ray, ray_t: Interval) -> Option<Intersection> {
        intersect_primitive(self.get(id as usize)?, ray, ray_t)
    }
}
