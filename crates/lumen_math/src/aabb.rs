use crate::{Interval, Ray, Vec3};

/// Relative thickness given to degenerate box axes by [`Aabb::padded`].
pub const PAD_RELATIVE: f32 = 1e-4;

/// Minimum padding, in float ulps of the box's largest coordinate.
const PAD_ULPS: f32 = 4.0;

/// Axis-Aligned Bounding Box for spatial acceleration structures (BVH).
///
/// An AABB is defined by three intervals (one per axis) that bound a 3D volume.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

impl Aabb {
    /// Create a new AABB from three intervals.
    pub const fn new(x: Interval, y: Interval, z: Interval) -> Self {
        Self { x, y, z }
    }

    /// Create an AABB from two corner points, in any order.
    ///
    /// A NaN coordinate in either point gives an all-NaN box.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self::from_min_max(nan_min(a, b), nan_max(a, b))
    }

    /// Create an AABB from its min and max corners.
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            x: Interval::new(min.x, max.x),
            y: Interval::new(min.y, max.y),
            z: Interval::new(min.z, max.z),
        }
    }

    /// Smallest box containing every point of the iterator. Empty input gives
    /// [`Aabb::EMPTY`]; a NaN coordinate anywhere gives an all-NaN box.
    pub fn from_point_iter(points: impl IntoIterator<Item = Vec3>) -> Self {
        points
            .into_iter()
            .fold(Aabb::EMPTY, |acc, p| acc.grow_point(p))
    }

    /// Create an AABB that surrounds two other AABBs.
    pub fn surrounding(box0: &Aabb, box1: &Aabb) -> Self {
        Self {
            x: Interval::surrounding(&box0.x, &box1.x),
            y: Interval::surrounding(&box0.y, &box1.y),
            z: Interval::surrounding(&box0.z, &box1.z),
        }
    }

    /// This box enlarged to include `p`. NaN in either is kept.
    pub fn grow_point(&self, p: Vec3) -> Self {
        Self::from_min_max(nan_min(self.min(), p), nan_max(self.max(), p))
    }

    /// Get the interval for a specific axis (0=X, 1=Y, 2=Z).
    pub fn axis_interval(&self, n: usize) -> Interval {
        match n {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn min(&self) -> Vec3 {
        Vec3::new(self.x.min, self.y.min, self.z.min)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::new(self.x.max, self.y.max, self.z.max)
    }

    /// Per-axis size (max - min).
    pub fn extent(&self) -> Vec3 {
        self.max() - self.min()
    }

    /// True when no bound is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.min().is_finite() && self.max().is_finite()
    }

    /// True when some axis has `min > max` (the box contains nothing).
    pub fn is_empty(&self) -> bool {
        !(self.x.is_ordered() && self.y.is_ordered() && self.z.is_ordered())
    }

    /// True when `other` lies entirely inside this box (boundaries inclusive).
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min().cmple(other.min()).all() && self.max().cmpge(other.max()).all()
    }

    /// Box with every axis thinner than a size-relative epsilon widened to
    /// that epsilon.
    ///
    /// The epsilon is the larger of a fraction of the box's largest extent and
    /// a few float ulps of its largest coordinate, so boxes far from the
    /// origin still get a representable thickness.
    pub fn padded(&self) -> Aabb {
        let magnitude = self
            .x
            .magnitude()
            .max(self.y.magnitude())
            .max(self.z.magnitude());
        let delta = (self.extent().max_element() * PAD_RELATIVE)
            .max(magnitude * PAD_ULPS * f32::EPSILON)
            .max(f32::EPSILON);

        let pad = |axis: Interval| {
            if axis.size() < delta {
                axis.expand(delta)
            } else {
                axis
            }
        };
        Aabb::new(pad(self.x), pad(self.y), pad(self.z))
    }

    /// Surface area, 0 for empty boxes.
    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extent();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Test if a ray intersects this AABB within the ray's own range.
    pub fn hit(&self, r: &Ray) -> bool {
        self.slab_entry(r.origin, r.inv_direction(), r.t).is_some()
    }

    /// Slab test returning the parametric entry distance when the ray
    /// overlaps the box inside `ray_t`.
    ///
    /// `inv_dir` is the reciprocal direction; zero components give `±inf`
    /// and the resulting slab bounds follow IEEE semantics. An origin lying
    /// exactly on a slab plane of a parallel ray gives `0 * inf = NaN`; such
    /// an axis does not constrain the interval (boundaries are inclusive).
    #[inline]
    pub fn slab_entry(&self, origin: Vec3, inv_dir: Vec3, ray_t: Interval) -> Option<f32> {
        let mut t_enter = ray_t.min;
        let mut t_exit = ray_t.max;

        for axis in 0..3 {
            let slab = self.axis_interval(axis);
            let t0 = (slab.min - origin[axis]) * inv_dir[axis];
            let t1 = (slab.max - origin[axis]) * inv_dir[axis];
            if t0.is_nan() || t1.is_nan() {
                continue;
            }
            t_enter = t_enter.max(t0.min(t1));
            t_exit = t_exit.min(t0.max(t1));
        }

        (t_enter <= t_exit).then_some(t_enter)
    }

    /// Returns the index (0=X, 1=Y, 2=Z) of the axis with the longest extent.
    pub fn longest_axis(&self) -> usize {
        let x_size = self.x.size();
        let y_size = self.y.size();
        let z_size = self.z.size();

        if x_size > y_size && x_size > z_size {
            0
        } else if y_size > z_size {
            1
        } else {
            2
        }
    }

    /// Returns the center point of the bounding box.
    pub fn centroid(&self) -> Vec3 {
        (self.min() + self.max()) * 0.5
    }

    pub const EMPTY: Aabb = Aabb {
        x: Interval::EMPTY,
        y: Interval::EMPTY,
        z: Interval::EMPTY,
    };

    pub const UNIVERSE: Aabb = Aabb {
        x: Interval::UNIVERSE,
        y: Interval::UNIVERSE,
        z: Interval::UNIVERSE,
    };
}

// `Vec3::min`/`max` return the non-NaN operand; bounds must not hide NaN input.
#[inline]
fn nan_min(a: Vec3, b: Vec3) -> Vec3 {
    if a.is_nan() || b.is_nan() {
        Vec3::NAN
    } else {
        a.min(b)
    }
}

#[inline]
fn nan_max(a: Vec3, b: Vec3) -> Vec3 {
    if a.is_nan() || b.is_nan() {
        Vec3::NAN
    } else {
        a.max(b)
    }
}
