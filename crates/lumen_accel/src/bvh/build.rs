//! Top-down BVH construction.

use std::time::Instant;

use bytemuck::Zeroable;
use lumen_math::{Aabb, Vec3};

use super::{BuildOutput, BuildReport, BuildStats, Bvh, BvhConfig, BvhNode, SplitHeuristic};
use crate::{PrimitiveError, PrimitiveSet};

/// Deepest level at which the configured heuristic is still used. Below it
/// only median splits are made, which halve the range every level.
pub const MAX_SPLIT_DEPTH: u32 = 48;

/// Upper bound on leaf depth: median splits need at most 32 more levels to
/// get a `u32` range down to a single primitive.
pub const MAX_TREE_DEPTH: u32 = MAX_SPLIT_DEPTH + 32;

pub const MAX_SAH_BINS: usize = 64;

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Bin = Bin {
        bounds: Aabb::EMPTY,
        count: 0,
    };
}

/// Read-only state shared by every (possibly parallel) recursion step.
struct BuildContext {
    boxes: Vec<Aabb>,
    centroids: Vec<Vec3>,
    heuristic: SplitHeuristic,
    leaf_threshold: usize,
    sah_bins: usize,
    parallel_threshold: usize,
}

/// Identity of the geometry a tree is built over.
///
/// Building with equal keys and the same [`BvhConfig`] always yields the same
/// tree, so a cached tree may stand in for a build when the keys match.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryKey {
    pub primitive_count: u32,
    /// FNV-1a hash of the input boxes and of the discarded ids.
    pub hash: u32,
    /// Primitives left out of the tree, sorted by id.
    pub discarded: Vec<PrimitiveError>,
}

impl GeometryKey {
    /// Key for a build over bare boxes, where only non-finite or empty boxes
    /// are discarded.
    pub fn from_boxes(boxes: &[Aabb]) -> Self {
        Self::screen(boxes, Vec::new())
    }

    /// Key for a build over primitives, which also discards those failing
    /// [`PrimitiveSet::validate`].
    pub fn from_primitives<P>(primitives: &P) -> Self
    where
        P: PrimitiveSet + ?Sized,
    {
        let (boxes, rejected) = primitive_boxes(primitives);
        Self::screen(&boxes, rejected)
    }

    pub(super) fn screen(boxes: &[Aabb], mut discarded: Vec<PrimitiveError>) -> Self {
        let rejected = discarded_flags(boxes.len(), &discarded);
        for (id, bbox) in boxes.iter().enumerate() {
            if !rejected[id] && !is_buildable(bbox) {
                discarded.push(PrimitiveError::NonFinite { id: id as u32 });
            }
        }
        discarded.sort_by_key(PrimitiveError::id);

        let mut hash = Fnv1a::new();
        for bbox in boxes {
            for v in bbox.min().to_array().into_iter().chain(bbox.max().to_array()) {
                hash.write_u32(v.to_bits());
            }
        }
        for err in &discarded {
            hash.write_u32(err.id());
        }

        Self {
            primitive_count: boxes.len() as u32,
            hash: hash.finish(),
            discarded,
        }
    }
}

/// 32-bit FNV-1a. The hash ends up on disk, so it must not change between
/// toolchains the way `DefaultHasher` may.
struct Fnv1a(u32);

impl Fnv1a {
    fn new() -> Self {
        Self(0x811c_9dc5)
    }

    fn write_u32(&mut self, value: u32) {
        for byte in value.to_le_bytes() {
            self.0 = (self.0 ^ u32::from(byte)).wrapping_mul(0x0100_0193);
        }
    }

    fn finish(&self) -> u32 {
        self.0
    }
}

/// Box of every primitive; invalid ones get [`Aabb::EMPTY`] and an error.
pub(super) fn primitive_boxes<P>(primitives: &P) -> (Vec<Aabb>, Vec<PrimitiveError>)
where
    P: PrimitiveSet + ?Sized,
{
    let mut rejected = Vec::new();
    let boxes = (0..primitives.primitive_count() as u32)
        .map(|id| match primitives.validate(id) {
            Ok(()) => primitives.bounding_box(id),
            Err(err) => {
                rejected.push(err);
                Aabb::EMPTY
            }
        })
        .collect();
    (boxes, rejected)
}

/// Whether a primitive with this box can be placed in a tree.
pub(super) fn is_buildable(bbox: &Aabb) -> bool {
    let padded = bbox.padded();
    padded.is_finite() && !padded.is_empty()
}

fn discarded_flags(count: usize, discarded: &[PrimitiveError]) -> Vec<bool> {
    let mut flags = vec![false; count];
    for err in discarded {
        if let Some(flag) = flags.get_mut(err.id() as usize) {
            *flag = true;
        }
    }
    flags
}

/// Build over `boxes`, leaving out the primitives `key` discards. `key` must
/// have been screened from the same boxes.
pub(super) fn build_bvh(boxes: &[Aabb], key: GeometryKey, config: &BvhConfig) -> BuildOutput {
    let start = Instant::now();

    let rejected = discarded_flags(boxes.len(), &key.discarded);
    let mut indices: Vec<u32> = (0..boxes.len() as u32)
        .filter(|&id| !rejected[id as usize])
        .collect();
    let padded: Vec<Aabb> = boxes.iter().map(Aabb::padded).collect();
    let GeometryKey {
        hash: geometry_hash,
        discarded,
        ..
    } = key;

    let ctx = BuildContext {
        centroids: padded.iter().map(Aabb::centroid).collect(),
        boxes: padded,
        heuristic: config.heuristic,
        leaf_threshold: config.effective_leaf_threshold(),
        sah_bins: config.effective_sah_bins(),
        parallel_threshold: config.parallel_threshold,
    };

    let (nodes, max_depth) = if indices.is_empty() {
        (Vec::new(), 0)
    } else {
        ctx.build_detached(&mut indices, 0, 0)
    };

    let bvh = Bvh {
        nodes,
        indices,
        primitive_count: boxes.len() as u32,
        build_tag: config.build_tag(),
        geometry_hash,
        max_depth,
    };

    let stats = BuildStats::collect(&bvh, discarded.len(), start.elapsed());

    log::info!(
        "BVH ({:?}): {} primitives, {} nodes, {} leaves, depth {}, max leaf {} in {:.2?}",
        config.heuristic,
        stats.primitive_count - stats.discarded_count,
        stats.node_count,
        stats.leaf_count,
        stats.max_depth,
        stats.max_leaf_size,
        stats.build_time
    );
    if let Some(first) = discarded.first() {
        log::warn!(
            "BVH: discarded {} malformed primitives (first: {})",
            discarded.len(),
            first
        );
    }

    BuildOutput {
        bvh,
        report: BuildReport { discarded, stats },
    }
}

impl BuildContext {
    /// Build the subtree over `indices` into a fresh node array whose root
    /// is element 0. Returns the array and the subtree's deepest leaf depth.
    fn build_detached(
        &self,
        indices: &mut [u32],
        offset: usize,
        depth: u32,
    ) -> (Vec<BvhNode>, u32) {
        let mut nodes = Vec::with_capacity(2 * indices.len());
        nodes.push(BvhNode::zeroed());
        let max_depth = self.build_node(&mut nodes, 0, indices, offset, depth);
        (nodes, max_depth)
    }

    /// Fill `nodes[node_index]` with the node over `indices` and append its
    /// descendants.
    ///
    /// Children of a node always land at the end of the array right after
    /// the node is filled, and the left subtree is appended completely before
    /// the right one. The parallel path reproduces exactly this layout, so
    /// both paths build identical arrays.
    fn build_node(
        &self,
        nodes: &mut Vec<BvhNode>,
        node_index: usize,
        indices: &mut [u32],
        offset: usize,
        depth: u32,
    ) -> u32 {
        let bounds = self.union_bounds(indices);
        let count = indices.len();

        if count <= self.leaf_threshold {
            nodes[node_index] = BvhNode::leaf(&bounds, offset as u32, count as u32);
            return depth;
        }

        let mid = self.partition(indices, depth);
        let (left, right) = indices.split_at_mut(mid);
        let first_child = nodes.len();
        nodes[node_index] = BvhNode::internal(&bounds, first_child as u32);

        if self.parallel_threshold > 0 && count >= self.parallel_threshold {
            let ((left_nodes, left_depth), (right_nodes, right_depth)) = rayon::join(
                || self.build_detached(left, offset, depth + 1),
                || self.build_detached(right, offset + mid, depth + 1),
            );

            // [node, L0, R0, L1.., R1..]: left node i > 0 moves to
            // first_child + 1 + i, right node i > 0 to first_child + |L| + i.
            let left_shift = (first_child + 1) as u32;
            let right_shift = (first_child + left_nodes.len()) as u32;
            nodes.push(left_nodes[0].with_child_offset(left_shift));
            nodes.push(right_nodes[0].with_child_offset(right_shift));
            nodes.extend(left_nodes[1..].iter().map(|n| n.with_child_offset(left_shift)));
            nodes.extend(right_nodes[1..].iter().map(|n| n.with_child_offset(right_shift)));
            return left_depth.max(right_depth);
        }

        nodes.push(BvhNode::zeroed());
        nodes.push(BvhNode::zeroed());
        let left_depth = self.build_node(nodes, first_child, left, offset, depth + 1);
        let right_depth = self.build_node(nodes, first_child + 1, right, offset + mid, depth + 1);
        left_depth.max(right_depth)
    }

    fn union_bounds(&self, indices: &[u32]) -> Aabb {
        indices.iter().fold(Aabb::EMPTY, |acc, &id| {
            Aabb::surrounding(&acc, &self.boxes[id as usize])
        })
    }

    fn centroid_bounds(&self, indices: &[u32]) -> Aabb {
        Aabb::from_point_iter(indices.iter().map(|&id| self.centroids[id as usize]))
    }

    #[inline]
    fn centroid(&self, id: u32, axis: usize) -> f32 {
        self.centroids[id as usize][axis]
    }

    /// Reorder `indices` into a left and right part and return the size of
    /// the left part, always in `1..indices.len()`.
    fn partition(&self, indices: &mut [u32], depth: u32) -> usize {
        let centroid_bounds = self.centroid_bounds(indices);

        if depth < MAX_SPLIT_DEPTH {
            let mid = match self.heuristic {
                SplitHeuristic::Midpoint => {
                    midpoint_split(&centroid_bounds).map(|(axis, position)| {
                        partition_in_place(indices, |id| self.centroid(id, axis) < position)
                    })
                }
                SplitHeuristic::Sah => {
                    let bins = self.sah_bins;
                    self.sah_split(indices, &centroid_bounds).map(|(axis, bin)| {
                        partition_in_place(indices, |id| {
                            bin_index(&centroid_bounds, axis, self.centroid(id, axis), bins) < bin
                        })
                    })
                }
            };
            match mid {
                Some(mid) if mid > 0 && mid < indices.len() => return mid,
                _ => {}
            }
        }

        self.median_split(indices, &centroid_bounds)
    }

    /// Best binned-SAH split as `(axis, first right bin)`, `None` when every
    /// centroid shares one position.
    fn sah_split(&self, indices: &[u32], centroid_bounds: &Aabb) -> Option<(usize, usize)> {
        let bins = self.sah_bins;
        let mut best: Option<(usize, usize)> = None;
        let mut best_cost = f32::INFINITY;

        for axis in 0..3 {
            if centroid_bounds.axis_interval(axis).size() <= 0.0 {
                continue;
            }

            let mut binned = [Bin::EMPTY; MAX_SAH_BINS];
            for &id in indices {
                let index = bin_index(centroid_bounds, axis, self.centroid(id, axis), bins);
                let bin = &mut binned[index];
                bin.bounds = Aabb::surrounding(&bin.bounds, &self.boxes[id as usize]);
                bin.count += 1;
            }

            // Right-hand sweep: area and count of bins k..bins
            let mut right_area = [0.0f32; MAX_SAH_BINS];
            let mut right_count = [0usize; MAX_SAH_BINS];
            let mut acc = Bin::EMPTY;
            for k in (1..bins).rev() {
                acc.bounds = Aabb::surrounding(&acc.bounds, &binned[k].bounds);
                acc.count += binned[k].count;
                right_area[k] = acc.bounds.surface_area();
                right_count[k] = acc.count;
            }

            let mut acc = Bin::EMPTY;
            for k in 1..bins {
                acc.bounds = Aabb::surrounding(&acc.bounds, &binned[k - 1].bounds);
                acc.count += binned[k - 1].count;
                if acc.count == 0 || right_count[k] == 0 {
                    continue;
                }

                let cost = acc.bounds.surface_area() * acc.count as f32
                    + right_area[k] * right_count[k] as f32;
                if cost < best_cost {
                    best_cost = cost;
                    best = Some((axis, k));
                }
            }
        }

        best
    }

    /// Split at the median centroid of the widest centroid axis. Ties are
    /// ordered by primitive id, so the result is fully deterministic.
    fn median_split(&self, indices: &mut [u32], centroid_bounds: &Aabb) -> usize {
        let axis = centroid_bounds.longest_axis();
        let mid = indices.len() / 2;
        indices.select_nth_unstable_by(mid, |&a, &b| {
            self.centroid(a, axis)
                .total_cmp(&self.centroid(b, axis))
                .then(a.cmp(&b))
        });
        mid
    }
}

/// `(axis, position)` at the middle of the widest centroid axis.
fn midpoint_split(centroid_bounds: &Aabb) -> Option<(usize, f32)> {
    let axis = centroid_bounds.longest_axis();
    let interval = centroid_bounds.axis_interval(axis);
    (interval.size() > 0.0).then(|| (axis, (interval.min + interval.max) * 0.5))
}

#[inline]
fn bin_index(centroid_bounds: &Aabb, axis: usize, centroid: f32, bins: usize) -> usize {
    let interval = centroid_bounds.axis_interval(axis);
    let scaled = (centroid - interval.min) / interval.size() * bins as f32;
    // Float-to-int casts saturate; the top edge lands in the last bin
    (scaled as usize).min(bins - 1)
}

/// Stable-for-left partition: ids for which `goes_left` holds are moved to the
/// front. Returns how many there are.
fn partition_in_place(
    indices: &mut [u32],
    mut goes_left: impl FnMut(u32) -> bool,
) -> usize {
    let mut mid = 0;
    for i in 0..indices.len() {
        if goes_left(indices[i]) {
            indices.swap(i, mid);
            mid += 1;
        }
    }
    mid
}
