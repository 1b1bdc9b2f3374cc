//! Scene-level facade pairing a primitive store with its BVH.

use std::path::Path;
use std::time::Instant;

use lumen_core::Scene;
use lumen_math::Ray;

use crate::{
    BuildReport, BuildStats, Bvh, BvhConfig, GeometryKey, Hit, PrimitiveStore, QueryError,
    SurfaceFrame,
};

/// Geometry of a scene together with the BVH built over it.
///
/// Immutable after construction and safe to share between render threads.
#[derive(Debug, Clone)]
pub struct SceneAccel {
    store: PrimitiveStore,
    bvh: Bvh,
    report: BuildReport,
}

impl SceneAccel {
    pub fn build(store: PrimitiveStore, config: &BvhConfig) -> Self {
        let output = Bvh::build_from(&store, config);
        Self {
            store,
            bvh: output.bvh,
            report: output.report,
        }
    }

    /// Build over a scene's primitives; hit ids are the scene's primitive ids.
    pub fn from_scene(scene: &Scene, config: &BvhConfig) -> Self {
        Self::build(PrimitiveStore::from_scene(scene), config)
    }

    /// Load the BVH from the cache at `path` if it matches the store and
    /// settings, otherwise build it and refresh the cache.
    ///
    /// Cache problems are logged and never fail the call.
    pub fn load_or_build(
        store: PrimitiveStore,
        config: &BvhConfig,
        path: impl AsRef<Path>,
    ) -> Self {
        let path = path.as_ref();
        let start = Instant::now();
        let geometry = GeometryKey::from_primitives(&store);

        match Bvh::load(path, config, &geometry) {
            Ok(bvh) => {
                let discarded = geometry.discarded;
                let stats = BuildStats::collect(&bvh, discarded.len(), start.elapsed());
                log::info!(
                    "Using cached BVH from {} ({} nodes)",
                    path.display(),
                    stats.node_count
                );
                return Self {
                    store,
                    bvh,
                    report: BuildReport { discarded, stats },
                };
            }
            Err(err) => log::info!(
                "Rebuilding BVH, cache at {} not usable: {}",
                path.display(),
                err
            ),
        }

        let accel = Self::build(store, config);
        if let Err(err) = accel.bvh.save(path) {
            log::warn!("Failed to write BVH cache to {}: {}", path.display(), err);
        }
        accel
    }

    pub fn store(&self) -> &PrimitiveStore {
        &self.store
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn intersect_closest(&self, ray: &Ray) -> Result<Option<Hit>, QueryError> {
        self.bvh.intersect_closest(&self.store, ray)
    }

    pub fn intersect_any(&self, ray: &Ray) -> Result<bool, QueryError> {
        self.bvh.intersect_any(&self.store, ray)
    }

    pub fn surface_frame(&self, ray: &Ray, hit: &Hit) -> Option<SurfaceFrame> {
        self.store.surface_frame(ray, hit)
    }
}
