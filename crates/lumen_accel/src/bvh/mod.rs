//! Bounding Volume Hierarchy (BVH) acceleration structure.
//!
//! The tree is stored as a flat array of 32-byte nodes with the root at index
//! 0. Internal nodes keep their two children next to each other at `first`
//! and `first + 1`; leaves reference a contiguous slice of the primitive index
//! permutation. Once built the structure is immutable and shared read-only by
//! every traversal thread.

mod build;
mod cache;
mod traverse;

use std::ops::Range;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use lumen_math::{Aabb, Vec3};
use serde::{Deserialize, Serialize};

use crate::{InvalidBvh, PrimitiveError, PrimitiveSet};

use build::primitive_boxes;

pub use build::{GeometryKey, MAX_SAH_BINS, MAX_SPLIT_DEPTH, MAX_TREE_DEPTH};
pub use cache::{CacheHeader, CACHE_MAGIC, FORMAT_VERSION};
pub use traverse::{intersect_brute_force, Hit, QueryMode, TRAVERSAL_STACK_SIZE};

/// BVH node - a leaf when `count > 0`, otherwise an internal node whose
/// children sit at `first` and `first + 1`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub min: [f32; 3],
    /// First child (internal) or first slot in the index array (leaf).
    pub first: u32,
    pub max: [f32; 3],
    /// Number of primitives; 0 for internal nodes.
    pub count: u32,
}

impl BvhNode {
    pub fn leaf(bounds: &Aabb, first: u32, count: u32) -> Self {
        debug_assert!(count > 0, "empty leaves are never produced");
        Self {
            min: bounds.min().to_array(),
            first,
            max: bounds.max().to_array(),
            count,
        }
    }

    pub fn internal(bounds: &Aabb, first_child: u32) -> Self {
        Self {
            min: bounds.min().to_array(),
            first: first_child,
            max: bounds.max().to_array(),
            count: 0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_min_max(Vec3::from_array(self.min), Vec3::from_array(self.max))
    }

    /// Indices of both children, `None` for leaves.
    #[inline]
    pub fn children(&self) -> Option<(usize, usize)> {
        if self.is_leaf() {
            None
        } else {
            let first = self.first as usize;
            Some((first, first + 1))
        }
    }

    /// Slots of the index array covered by a leaf, empty for internal nodes.
    #[inline]
    pub fn primitive_range(&self) -> Range<usize> {
        if self.is_leaf() {
            let first = self.first as usize;
            first..first + self.count as usize
        } else {
            0..0
        }
    }

    /// Same node with its child reference shifted by `offset`. Leaves are
    /// returned unchanged, their slots are already absolute.
    pub(crate) fn with_child_offset(mut self, offset: u32) -> Self {
        if !self.is_leaf() {
            self.first += offset;
        }
        self
    }
}

/// Split heuristic used for internal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitHeuristic {
    /// Split the widest centroid axis at its midpoint.
    Midpoint,
    /// Binned surface-area heuristic over all three axes.
    #[default]
    Sah,
}

/// Build settings.
///
/// Deserializes from partial JSON; missing fields keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhConfig {
    pub heuristic: SplitHeuristic,
    /// Ranges with at most this many primitives become leaves (minimum 1).
    pub leaf_threshold: usize,
    /// Bins per axis for [`SplitHeuristic::Sah`], clamped to `2..=64`.
    pub sah_bins: usize,
    /// Ranges with at least this many primitives are split on the rayon pool.
    /// 0 disables parallel building.
    pub parallel_threshold: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            heuristic: SplitHeuristic::Sah,
            leaf_threshold: 4,
            sah_bins: 16,
            parallel_threshold: 4096,
        }
    }
}

impl BvhConfig {
    pub fn with_heuristic(mut self, heuristic: SplitHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn effective_leaf_threshold(&self) -> usize {
        self.leaf_threshold.max(1)
    }

    pub fn effective_sah_bins(&self) -> usize {
        self.sah_bins.clamp(2, MAX_SAH_BINS)
    }

    /// Fingerprint of the settings that change the tree's structure.
    ///
    /// `parallel_threshold` is excluded: parallel and sequential builds
    /// produce identical trees.
    pub fn build_tag(&self) -> u32 {
        let (heuristic, bins) = match self.heuristic {
            SplitHeuristic::Midpoint => (0u32, 0u32),
            SplitHeuristic::Sah => (1, self.effective_sah_bins() as u32),
        };
        let leaf = self.effective_leaf_threshold().min(0xfff) as u32;
        (heuristic << 24) | (leaf << 12) | bins
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    /// Primitives handed to the builder, including discarded ones.
    pub primitive_count: usize,
    pub discarded_count: usize,
    pub node_count: usize,
    pub leaf_count: usize,
    /// Depth of the deepest leaf; the root is depth 0.
    pub max_depth: u32,
    pub max_leaf_size: usize,
    pub build_time: Duration,
}

impl BuildStats {
    pub(crate) fn collect(bvh: &Bvh, discarded_count: usize, build_time: Duration) -> Self {
        let leaves = bvh.nodes.iter().filter(|n| n.is_leaf());
        Self {
            primitive_count: bvh.primitive_count(),
            discarded_count,
            node_count: bvh.nodes.len(),
            leaf_count: leaves.clone().count(),
            max_depth: bvh.max_depth,
            max_leaf_size: leaves.map(|n| n.count as usize).max().unwrap_or(0),
            build_time,
        }
    }
}

/// Everything the builder learned besides the tree itself.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Primitives left out of the tree, sorted by id.
    pub discarded: Vec<PrimitiveError>,
    pub stats: BuildStats,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub bvh: Bvh,
    pub report: BuildReport,
}

/// Immutable flat BVH over a primitive set.
#[derive(Debug, Clone, PartialEq)]
pub struct Bvh {
    pub(crate) nodes: Vec<BvhNode>,
    pub(crate) indices: Vec<u32>,
    pub(crate) primitive_count: u32,
    pub(crate) build_tag: u32,
    pub(crate) geometry_hash: u32,
    pub(crate) max_depth: u32,
}

impl Bvh {
    /// Build over precomputed bounding boxes, where `boxes[id]` bounds
    /// primitive `id`. Non-finite boxes are discarded.
    pub fn build(boxes: &[Aabb], config: &BvhConfig) -> BuildOutput {
        build::build_bvh(boxes, GeometryKey::from_boxes(boxes), config)
    }

    /// Validate every primitive's geometry, then build over the valid ones.
    pub fn build_from<P>(primitives: &P, config: &BvhConfig) -> BuildOutput
    where
        P: PrimitiveSet + ?Sized,
    {
        let (boxes, rejected) = primitive_boxes(primitives);
        let key = GeometryKey::screen(&boxes, rejected);
        build::build_bvh(&boxes, key, config)
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Primitive ids in leaf order.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of primitives the tree was built for, including discarded ones.
    pub fn primitive_count(&self) -> usize {
        self.primitive_count as usize
    }

    pub fn build_tag(&self) -> u32 {
        self.build_tag
    }

    /// [`GeometryKey::hash`] of the input the tree was built from.
    pub fn geometry_hash(&self) -> u32 {
        self.geometry_hash
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// True when no primitive survived the build; every query misses.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bounds of the whole tree ([`Aabb::EMPTY`] for an empty tree).
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::EMPTY, BvhNode::bounds)
    }

    /// Check the structural invariants of the tree.
    ///
    /// Children come after their parent and are referenced exactly once,
    /// leaves are non-empty and cover every index slot once, ids are unique
    /// and in range, boxes are finite and enclose their children, and the
    /// depth fits the traversal stack.
    pub fn validate(&self) -> Result<(), InvalidBvh> {
        let fail = |msg: String| Err(InvalidBvh(msg));

        if self.nodes.is_empty() {
            if !self.indices.is_empty() {
                return fail(format!(
                    "empty tree with {} primitive indices",
                    self.indices.len()
                ));
            }
            return Ok(());
        }

        let node_count = self.nodes.len();
        let mut referenced = vec![false; node_count];
        let mut depth = vec![0u32; node_count];
        let mut covered = vec![false; self.indices.len()];
        let mut seen = vec![false; self.primitive_count as usize];
        let mut max_depth = 0;

        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 && !referenced[i] {
                return fail(format!("node {i} has no parent"));
            }

            let bounds = node.bounds();
            if !bounds.is_finite() || bounds.is_empty() {
                return fail(format!("node {i} has an invalid box"));
            }

            if let Some((left, right)) = node.children() {
                if left <= i || right >= node_count {
                    return fail(format!("node {i} has children {left}/{right} out of order"));
                }
                for child in [left, right] {
                    if referenced[child] {
                        return fail(format!("node {child} has two parents"));
                    }
                    referenced[child] = true;
                    depth[child] = depth[i] + 1;
                    if !bounds.contains(&self.nodes[child].bounds()) {
                        return fail(format!("node {i} does not enclose child {child}"));
                    }
                }
                continue;
            }

            let range = node.primitive_range();
            if range.end > self.indices.len() {
                return fail(format!("leaf {i} points past the index array"));
            }
            for slot in range {
                if covered[slot] {
                    return fail(format!("index slot {slot} is shared by two leaves"));
                }
                covered[slot] = true;

                let id = self.indices[slot] as usize;
                if id >= seen.len() {
                    return fail(format!("primitive id {id} is out of range"));
                }
                if seen[id] {
                    return fail(format!("primitive id {id} appears twice"));
                }
                seen[id] = true;
            }
            max_depth = max_depth.max(depth[i]);
        }

        if let Some(slot) = covered.iter().position(|&c| !c) {
            return fail(format!("index slot {slot} is not covered by any leaf"));
        }
        if max_depth > MAX_TREE_DEPTH {
            return fail(format!("depth {max_depth} exceeds the traversal limit"));
        }
        if max_depth != self.max_depth {
            return fail(format!(
                "recorded depth {} does not match actual depth {max_depth}",
                self.max_depth
            ));
        }
        Ok(())
    }
}
