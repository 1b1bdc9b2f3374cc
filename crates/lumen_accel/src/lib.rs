//! Lumen Accel - BVH acceleration structure and intersection kernel.
//!
//! Builds a flat Bounding Volume Hierarchy over the triangles and spheres of
//! a scene and answers closest-hit and any-hit ray queries against it.
//!
//! - **Primitive Store**: `PrimitiveStore`, triangles and spheres addressed
//!   by stable id
//! - **Builder**: `Bvh::build` / `Bvh::build_from` with midpoint or binned SAH
//!   splits, parallel over large subtrees
//! - **Traverser**: `Bvh::intersect_closest` / `Bvh::intersect_any`
//! - **Cache**: `Bvh::save` / `Bvh::load`, keyed by `GeometryKey`
//!
//! # Example
//!
//! ```ignore
//! use lumen_accel::{BvhConfig, PrimitiveStore, SceneAccel};
//! use lumen_math::{Ray, Vec3};
//!
//! let store = PrimitiveStore::from_triangles([[Vec3::ZERO, Vec3::X, Vec3::Y]]);
//! let accel = SceneAccel::build(store, &BvhConfig::default());
//! let hit = accel.intersect_closest(&Ray::new(Vec3::new(0.2, 0.2, -1.0), Vec3::Z))?;
//! ```

mod accel;
mod bvh;
mod error;
mod intersect;
mod primitive;
mod store;

pub use accel::SceneAccel;
pub use bvh::{
    intersect_brute_force, BuildOutput, BuildReport, BuildStats, Bvh, BvhConfig, BvhNode,
    CacheHeader, GeometryKey, Hit, QueryMode, SplitHeuristic, CACHE_MAGIC, FORMAT_VERSION,
    MAX_SAH_BINS, MAX_SPLIT_DEPTH, MAX_TREE_DEPTH, TRAVERSAL_STACK_SIZE,
};
pub use error::{CacheError, InvalidBvh, PrimitiveError, QueryError};
pub use intersect::{
    intersect_primitive, intersect_sphere, intersect_triangle, Intersection, SurfaceData,
};
pub use primitive::{Primitive, PrimitiveId, Sphere, Triangle};
pub use store::{PrimitiveSet, PrimitiveStore, SurfaceFrame};

/// Re-export the math types used throughout the API
pub use lumen_math::{Aabb, Interval, Ray, Vec3};
