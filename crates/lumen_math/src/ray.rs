use crate::{Interval, Vec3};

/// A ray with an origin, a direction and the parametric range in which
/// intersections are accepted.
///
/// The direction does not need to be normalized; hit distances are expressed
/// in units of `direction`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Valid range of the ray parameter `t`.
    pub t: Interval,
}

impl Ray {
    /// Create a ray accepting hits in `[0, inf]`.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            t: Interval::FORWARD,
        }
    }

    /// Create a ray accepting hits in `[t_min, t_max]`.
    pub fn with_range(origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> Self {
        Self {
            origin,
            direction,
            t: Interval::new(t_min, t_max),
        }
    }

    /// Ray from `from` towards `to` whose range stops just short of `to`.
    ///
    /// Used for shadow/occlusion rays: `t = 1` lands exactly on `to`.
    pub fn segment(from: Vec3, to: Vec3, epsilon: f32) -> Self {
        Self::with_range(from, to - from, epsilon, 1.0 - epsilon)
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Component-wise reciprocal of the direction. Zero components map to
    /// `±inf` following IEEE semantics.
    #[inline]
    pub fn inv_direction(&self) -> Vec3 {
        self.direction.recip()
    }

    /// True when origin and direction contain no NaN or infinite components.
    pub fn is_finite(&self) -> bool {
        self.origin.is_finite() && self.direction.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_default_range() {
        let ray = Ray::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y);

        assert_eq!(ray.t.min, 0.0);
        assert_eq!(ray.t.max, f32::INFINITY);
    }

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);

        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(1.0), Vec3::X);
        assert_eq!(ray.at(2.0), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.at(-1.0), Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_segment() {
        let from = Vec3::new(0.0, 1.0, 0.0);
        let to = Vec3::new(0.0, 1.0, 4.0);
        let ray = Ray::segment(from, to, 1e-3);

        assert_eq!(ray.at(1.0), to);
        assert!(ray.t.max < 1.0);
        assert!(ray.t.min > 0.0);
    }

    #[test]
    fn test_ray_is_finite() {
        assert!(Ray::new(Vec3::ZERO, Vec3::Z).is_finite());
        assert!(!Ray::new(Vec3::new(f32::NAN, 0.0, 0.0), Vec3::Z).is_finite());
        assert!(!Ray::new(Vec3::ZERO, Vec3::new(0.0, f32::INFINITY, 0.0)).is_finite());
    }
}
