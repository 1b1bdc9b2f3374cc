//! Closest-hit and any-hit traversal.

use lumen_math::{Interval, Ray};

use super::build::is_buildable;
use super::Bvh;
use crate::{PrimitiveId, PrimitiveSet, QueryError, SurfaceData};

/// Capacity of the traversal stack. Tree depth is bounded by
/// [`MAX_TREE_DEPTH`](super::MAX_TREE_DEPTH) and near-to-far traversal keeps
/// at most `depth + 1` entries, so this never fills up.
pub const TRAVERSAL_STACK_SIZE: usize = 128;

/// Relative distance under which two hits are considered tied.
const TIE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryMode {
    /// Nearest intersection in the ray's range.
    #[default]
    ClosestHit,
    /// Any intersection in the ray's range; used for occlusion.
    AnyHit,
}

/// A ray/primitive intersection found by a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub primitive_id: PrimitiveId,
    /// Ray parameter of the hit, in units of the ray's direction.
    pub distance: f32,
    pub surface: SurfaceData,
}

#[inline]
fn tie_tolerance(t: f32) -> f32 {
    TIE_EPSILON * t.abs().max(1.0)
}

/// Hits found so far that lie within the tie tolerance of the nearest one.
///
/// The reported hit is the lowest id in the window, so the result does not
/// depend on the order in which hits are found. The window only shrinks as
/// nearer hits arrive; hits that fall out of it can never come back.
struct TieWindow {
    nearest: f32,
    best: Option<Hit>,
    /// Other hits inside the window. Only allocates on an actual tie.
    tied: Vec<Hit>,
}

impl TieWindow {
    fn new() -> Self {
        Self {
            nearest: f32::INFINITY,
            best: None,
            tied: Vec::new(),
        }
    }

    /// Largest distance a hit may have and still take part in the tie.
    #[inline]
    fn limit(&self) -> f32 {
        self.nearest + tie_tolerance(self.nearest)
    }

    /// Add a hit no farther than the current [`limit`](Self::limit).
    fn insert(&mut self, hit: Hit) {
        self.nearest = self.nearest.min(hit.distance);
        let limit = self.limit();
        self.tied.retain(|h| h.distance <= limit);
        if let Some(prev) = self.best.take().filter(|h| h.distance <= limit) {
            self.tied.push(prev);
        }

        let mut winner = hit;
        for other in &mut self.tied {
            if other.primitive_id < winner.primitive_id {
                std::mem::swap(other, &mut winner);
            }
        }
        self.best = Some(winner);
    }
}

fn check_query(ray: &Ray) -> Result<(), QueryError> {
    let t = ray.t;
    if t.min.is_nan() || t.max.is_nan() || t.min > t.max {
        return Err(QueryError::InvalidRange {
            t_min: t.min,
            t_max: t.max,
        });
    }
    if !ray.is_finite() {
        return Err(QueryError::NonFiniteRay);
    }
    Ok(())
}

/// Fixed-capacity stack of `(node index, entry distance)`.
struct NodeStack {
    entries: [(u32, f32); TRAVERSAL_STACK_SIZE],
    len: usize,
}

impl NodeStack {
    fn new() -> Self {
        Self {
            entries: [(0, 0.0); TRAVERSAL_STACK_SIZE],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, node: usize, entry_t: f32) {
        debug_assert!(self.len < TRAVERSAL_STACK_SIZE, "traversal stack overflow");
        self.entries[self.len] = (node as u32, entry_t);
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> Option<(usize, f32)> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        let (node, entry_t) = self.entries[self.len];
        Some((node as usize, entry_t))
    }
}

impl Bvh {
    /// Intersect a ray with the primitives the tree was built over.
    ///
    /// Only hits with a distance inside `ray.t` (inclusive) are reported.
    /// `primitives` must be the set (or the boxes of the set) the tree was
    /// built from.
    pub fn intersect<P>(
        &self,
        primitives: &P,
        ray: &Ray,
        mode: QueryMode,
    ) -> Result<Option<Hit>, QueryError>
    where
        P: PrimitiveSet + ?Sized,
    {
        check_query(ray)?;

        let Some(root) = self.nodes.first() else {
            return Ok(None);
        };
        let inv_dir = ray.inv_direction();
        let Some(root_t) = root.bounds().slab_entry(ray.origin, inv_dir, ray.t) else {
            return Ok(None);
        };

        let mut window = TieWindow::new();
        let mut limit = ray.t.max;
        let mut stack = NodeStack::new();
        stack.push(0, root_t);

        while let Some((index, entry_t)) = stack.pop() {
            if entry_t > limit {
                continue;
            }
            let node = &self.nodes[index];

            if let Some((left, right)) = node.children() {
                let range = Interval::new(ray.t.min, limit);
                let left_t = self.nodes[left].bounds().slab_entry(ray.origin, inv_dir, range);
                let right_t = self.nodes[right].bounds().slab_entry(ray.origin, inv_dir, range);

                // Far child first so the near one is popped next
                match (left_t, right_t) {
                    (Some(lt), Some(rt)) if rt < lt => {
                        stack.push(left, lt);
                        stack.push(right, rt);
                    }
                    (Some(lt), Some(rt)) => {
                        stack.push(right, rt);
                        stack.push(left, lt);
                    }
                    (Some(lt), None) => stack.push(left, lt),
                    (None, Some(rt)) => stack.push(right, rt),
                    (None, None) => {}
                }
                continue;
            }

            for &id in &self.indices[node.primitive_range()] {
                let range = Interval::new(ray.t.min, limit);
                let Some(isect) = primitives.intersect(id, ray, range) else {
                    continue;
                };
                let hit = Hit {
                    primitive_id: id,
                    distance: isect.t,
                    surface: isect.surface,
                };

                if mode == QueryMode::AnyHit {
                    return Ok(Some(hit));
                }
                window.insert(hit);
                // Keep visiting candidates that could still tie
                limit = window.limit().min(ray.t.max);
            }
        }

        Ok(window.best)
    }

    pub fn intersect_closest<P>(&self, primitives: &P, ray: &Ray) -> Result<Option<Hit>, QueryError>
    where
        P: PrimitiveSet + ?Sized,
    {
        self.intersect(primitives, ray, QueryMode::ClosestHit)
    }

    /// True if anything intersects the ray inside its range.
    pub fn intersect_any<P>(&self, primitives: &P, ray: &Ray) -> Result<bool, QueryError>
    where
        P: PrimitiveSet + ?Sized,
    {
        Ok(self.intersect(primitives, ray, QueryMode::AnyHit)?.is_some())
    }
}

/// Reference query testing every primitive a build would keep, with the same
/// tie-breaking as [`Bvh::intersect`].
pub fn intersect_brute_force<P>(
    primitives: &P,
    ray: &Ray,
    mode: QueryMode,
) -> Result<Option<Hit>, QueryError>
where
    P: PrimitiveSet + ?Sized,
{
    check_query(ray)?;

    let mut window = TieWindow::new();
    for id in 0..primitives.primitive_count() as PrimitiveId {
        if primitives.validate(id).is_err() || !is_buildable(&primitives.bounding_box(id)) {
            continue;
        }
        let Some(isect) = primitives.intersect(id, ray, ray.t) else {
            continue;
        };
        let hit = Hit {
            primitive_id: id,
            distance: isect.t,
            surface: isect.surface,
        };
        if mode == QueryMode::AnyHit {
            return Ok(Some(hit));
        }
        if hit.distance <= window.limit() {
            window.insert(hit);
        }
    }
    Ok(window.best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BvhConfig, PrimitiveStore, SplitHeuristic};
    use lumen_math::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rayon::prelude::*;

    fn random_vec(rng: &mut StdRng, extent: f32) -> Vec3 {
        Vec3::new(
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
        )
    }

    fn random_scene(seed: u64, triangles: usize, spheres: usize) -> PrimitiveStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = PrimitiveStore::new();
        for _ in 0..triangles {
            let center = random_vec(&mut rng, 20.0);
            let size = rng.gen_range(0.2..3.0);
            store.push_triangle(
                center + random_vec(&mut rng, size),
                center + random_vec(&mut rng, size),
                center + random_vec(&mut rng, size),
            );
        }
        for _ in 0..spheres {
            store.push_sphere(random_vec(&mut rng, 20.0), rng.gen_range(0.2..2.0));
        }
        store
    }

    fn random_rays(seed: u64, count: usize) -> Vec<Ray> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let origin = random_vec(&mut rng, 30.0);
                let target = random_vec(&mut rng, 15.0);
                Ray::new(origin, target - origin)
            })
            .collect()
    }

    /// Triangle in the plane `z`, around the z axis.
    fn facing_triangle(z: f32) -> [Vec3; 3] {
        [
            Vec3::new(-1.0, -1.0, z),
            Vec3::new(1.0, -1.0, z),
            Vec3::new(0.0, 1.0, z),
        ]
    }

    fn configs() -> [BvhConfig; 2] {
        let base = BvhConfig::default();
        [base.with_heuristic(SplitHeuristic::Midpoint), base]
    }

    #[test]
    fn test_empty_scene_always_misses() {
        let store = PrimitiveStore::new();
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);

        assert_eq!(bvh.intersect_closest(&store, &ray), Ok(None));
        assert_eq!(bvh.intersect_any(&store, &ray), Ok(false));
    }

    #[test]
    fn test_single_triangle() {
        let store = PrimitiveStore::from_triangles([[Vec3::ZERO, Vec3::X, Vec3::Y]]);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;
        assert_eq!(bvh.nodes().len(), 1);

        let ray = Ray::new(Vec3::new(0.25, 0.5, -1.0), Vec3::Z);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();

        assert_eq!(hit.primitive_id, 0);
        assert!((hit.distance - 1.0).abs() < 1e-6);
        let SurfaceData::Barycentric { u, v } = hit.surface else {
            panic!("expected barycentric surface data");
        };
        assert!((u - 0.25).abs() < 1e-6);
        assert!((v - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_unit_square_diagonal() {
        // Two triangles sharing the diagonal of the unit square; the ray hits
        // the shared edge.
        let store = PrimitiveStore::from_triangles([
            [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0)],
            [Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
        ]);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();

        assert!((hit.distance - 1.0).abs() < 1e-6);
        assert_eq!(hit.primitive_id, 0);
    }

    #[test]
    fn test_sphere_from_inside() {
        let mut store = PrimitiveStore::new();
        store.push_sphere(Vec3::ZERO, 1.0);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();
        assert!((hit.distance - 1.0).abs() < 1e-6);
        assert_eq!(hit.surface, SurfaceData::Sphere);
    }

    #[test]
    fn test_matches_brute_force() {
        let store = random_scene(42, 2000, 50);
        let rays = random_rays(43, 1000);

        for config in configs() {
            let bvh = Bvh::build_from(&store, &config).bvh;
            let mut hits = 0;
            for ray in &rays {
                let expected = intersect_brute_force(&store, ray, QueryMode::ClosestHit).unwrap();
                let actual = bvh.intersect_closest(&store, ray).unwrap();
                assert_eq!(actual, expected);
                hits += usize::from(actual.is_some());
            }
            // The scene is dense enough that the comparison is meaningful
            assert!(hits > 100, "only {hits} hits");
        }
    }

    #[test]
    fn test_any_hit_agrees_with_closest_hit() {
        let store = random_scene(7, 500, 20);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        for ray in random_rays(8, 500) {
            let closest = bvh.intersect_closest(&store, &ray).unwrap();
            let any = bvh.intersect(&store, &ray, QueryMode::AnyHit).unwrap();
            assert_eq!(closest.is_some(), any.is_some());
            if let Some(hit) = any {
                assert!(ray.t.contains(hit.distance));
            }
        }
    }

    #[test]
    fn test_range_limits_hits() {
        let store = PrimitiveStore::from_triangles([facing_triangle(2.0), facing_triangle(4.0)]);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        let ray = Ray::with_range(Vec3::ZERO, Vec3::Z, 3.0, 10.0);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();
        assert_eq!(hit.primitive_id, 1);

        let ray = Ray::with_range(Vec3::ZERO, Vec3::Z, 0.0, 1.5);
        assert_eq!(bvh.intersect_closest(&store, &ray), Ok(None));

        // Shadow ray towards a point just in front of the far triangle
        let ray = Ray::segment(Vec3::ZERO, Vec3::new(0.0, 0.0, 3.0), 1e-3);
        assert_eq!(bvh.intersect_any(&store, &ray), Ok(true));
        let ray = Ray::segment(Vec3::new(0.0, 0.0, 2.5), Vec3::new(0.0, 0.0, 3.5), 1e-3);
        assert_eq!(bvh.intersect_any(&store, &ray), Ok(false));
    }

    #[test]
    fn test_coincident_triangles_pick_lowest_id() {
        let mut store = PrimitiveStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let shared = facing_triangle(5.0);
        let mut duplicates = Vec::new();
        for i in 0..64 {
            if i % 7 == 3 {
                duplicates.push(store.push_triangle(shared[0], shared[1], shared[2]));
            } else {
                let c = random_vec(&mut rng, 10.0) + Vec3::new(0.0, 0.0, 30.0);
                store.push_triangle(c, c + Vec3::X, c + Vec3::Y);
            }
        }
        let config = BvhConfig {
            leaf_threshold: 1,
            ..BvhConfig::default()
        };
        let bvh = Bvh::build_from(&store, &config).bvh;

        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();
        assert_eq!(hit.primitive_id, duplicates[0]);
        assert_eq!(hit.primitive_id, 3);
    }

    #[test]
    fn test_near_ties_resolve_against_the_nearest_hit() {
        // Each layer is within the tie tolerance of the next one, but the
        // farthest (id 0) is out of tolerance of the nearest (id 2). Only
        // ids 1 and 2 tie, whatever order the layers are visited in.
        let store = PrimitiveStore::from_triangles([
            facing_triangle(1.0 + 1.2e-6),
            facing_triangle(1.0 + 0.6e-6),
            facing_triangle(1.0),
        ]);
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);

        let expected = intersect_brute_force(&store, &ray, QueryMode::ClosestHit)
            .unwrap()
            .unwrap();
        assert_eq!(expected.primitive_id, 1);

        for config in configs() {
            for leaf_threshold in 1..=4 {
                let config = BvhConfig {
                    leaf_threshold,
                    ..config
                };
                let bvh = Bvh::build_from(&store, &config).bvh;
                let hit = bvh.intersect_closest(&store, &ray).unwrap();
                assert_eq!(hit, Some(expected), "leaf threshold {leaf_threshold}");
            }
        }
    }

    #[test]
    fn test_malformed_primitives_are_skipped() {
        let mut store = PrimitiveStore::new();
        store.push_triangle(Vec3::new(f32::NAN, 0.0, 0.0), Vec3::X, Vec3::Y);
        store.push_triangle(Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0));
        store.push_triangle(
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(1.0, 0.0, 2.0),
            Vec3::new(0.0, 1.0, 2.0),
        );
        store.push_sphere(Vec3::new(0.0, 0.0, 10.0), 0.0);

        let output = Bvh::build_from(&store, &BvhConfig::default());
        let ids: Vec<_> = output.report.discarded.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![0, 1, 3]);
        assert_eq!(output.bvh.indices(), &[2]);
        assert!(output.bvh.bounds().is_finite());

        let ray = Ray::new(Vec3::new(0.25, 0.25, 0.0), Vec3::Z);
        let hit = output.bvh.intersect_closest(&store, &ray).unwrap().unwrap();
        assert_eq!(hit.primitive_id, 2);
    }

    #[test]
    fn test_axis_aligned_triangle_is_hit() {
        // Triangle in the plane x = 2: its box has no thickness along x
        let store = PrimitiveStore::from_triangles([[
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 1.0, 0.0),
            Vec3::new(2.0, 0.0, 1.0),
        ]]);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        let ray = Ray::new(Vec3::new(0.0, 0.25, 0.25), Vec3::X);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();
        assert!((hit.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_direction_components() {
        let store = random_scene(3, 200, 0);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..200 {
            let origin = random_vec(&mut rng, 20.0) - Vec3::new(0.0, 0.0, 40.0);
            let ray = Ray::new(origin, Vec3::Z);
            let expected = intersect_brute_force(&store, &ray, QueryMode::ClosestHit).unwrap();
            assert_eq!(bvh.intersect_closest(&store, &ray).unwrap(), expected);
        }
    }

    #[test]
    fn test_invalid_queries_are_rejected() {
        let store = random_scene(5, 10, 0);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;

        let ray = Ray::with_range(Vec3::ZERO, Vec3::Z, 2.0, 1.0);
        assert_eq!(
            bvh.intersect_closest(&store, &ray),
            Err(QueryError::InvalidRange { t_min: 2.0, t_max: 1.0 })
        );

        let ray = Ray::with_range(Vec3::ZERO, Vec3::Z, f32::NAN, 1.0);
        assert!(matches!(
            bvh.intersect_any(&store, &ray),
            Err(QueryError::InvalidRange { .. })
        ));

        let ray = Ray::new(Vec3::ZERO, Vec3::new(f32::NAN, 0.0, 1.0));
        assert_eq!(bvh.intersect_closest(&store, &ray), Err(QueryError::NonFiniteRay));

        // Empty trees still validate the query
        let empty = Bvh::build(&[], &BvhConfig::default()).bvh;
        let ray = Ray::with_range(Vec3::ZERO, Vec3::Z, 2.0, 1.0);
        assert!(empty.intersect_closest(&store, &ray).is_err());
    }

    #[test]
    fn test_queries_are_identical_across_threads() {
        let store = random_scene(9, 3000, 30);
        let bvh = Bvh::build_from(&store, &BvhConfig::default()).bvh;
        let rays = random_rays(10, 2000);

        let sequential: Vec<_> = rays
            .iter()
            .map(|ray| bvh.intersect_closest(&store, ray).unwrap())
            .collect();
        let parallel: Vec<_> = rays
            .par_iter()
            .map(|ray| bvh.intersect_closest(&store, ray).unwrap())
            .collect();

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_deep_tree_traversal() {
        // Exponentially spaced spheres give a very unbalanced midpoint tree
        let mut store = PrimitiveStore::new();
        for i in 0..150 {
            store.push_sphere(Vec3::new(1.3f32.powi(i), 0.0, 0.0), 0.25);
        }
        let config = BvhConfig {
            heuristic: SplitHeuristic::Midpoint,
            leaf_threshold: 1,
            ..BvhConfig::default()
        };
        let bvh = Bvh::build_from(&store, &config).bvh;
        assert_eq!(bvh.validate(), Ok(()));

        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
        let hit = bvh.intersect_closest(&store, &ray).unwrap().unwrap();
        assert_eq!(hit.primitive_id, 0);
    }
}
