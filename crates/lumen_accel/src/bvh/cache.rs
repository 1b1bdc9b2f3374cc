//! On-disk BVH cache.
//!
//! Layout: a 32-byte [`CacheHeader`], the node array, then the primitive
//! index array. All values are in native byte order, so caches are only
//! portable between machines of the same endianness.
//!
//! A cache is only accepted for the exact input it was built from: same
//! settings tag, same primitive count, and same [`GeometryKey`] hash.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use super::{Bvh, BvhConfig, BvhNode, GeometryKey};
use crate::{CacheError, InvalidBvh};

pub const CACHE_MAGIC: [u8; 4] = *b"LBVH";

/// Bumped whenever the file layout or the builder's output changes.
pub const FORMAT_VERSION: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CacheHeader {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub build_tag: u32,
    pub primitive_count: u32,
    pub node_count: u32,
    pub index_count: u32,
    pub max_depth: u32,
    pub geometry_hash: u32,
}

impl Bvh {
    pub fn cache_header(&self) -> CacheHeader {
        CacheHeader {
            magic: CACHE_MAGIC,
            format_version: FORMAT_VERSION,
            build_tag: self.build_tag,
            primitive_count: self.primitive_count,
            node_count: self.nodes.len() as u32,
            index_count: self.indices.len() as u32,
            max_depth: self.max_depth,
            geometry_hash: self.geometry_hash,
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), CacheError> {
        writer.write_all(bytemuck::bytes_of(&self.cache_header()))?;
        writer.write_all(bytemuck::cast_slice(&self.nodes))?;
        writer.write_all(bytemuck::cast_slice(&self.indices))?;
        writer.flush()?;
        Ok(())
    }

    /// Read a cached tree, rejecting it unless it was written by this format
    /// version, with the structural settings of `config`, for the geometry
    /// identified by `geometry`.
    pub fn read_from<R: Read>(
        mut reader: R,
        config: &BvhConfig,
        geometry: &GeometryKey,
    ) -> Result<Bvh, CacheError> {
        let mut header = CacheHeader::zeroed();
        reader.read_exact(bytemuck::bytes_of_mut(&mut header))?;

        if header.magic != CACHE_MAGIC {
            return Err(CacheError::BadMagic);
        }
        if header.format_version != FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                found: header.format_version,
                expected: FORMAT_VERSION,
            });
        }
        if header.build_tag != config.build_tag() {
            return Err(CacheError::BuildTagMismatch {
                found: header.build_tag,
                expected: config.build_tag(),
            });
        }
        if header.primitive_count != geometry.primitive_count {
            return Err(CacheError::PrimitiveCountMismatch {
                found: header.primitive_count,
                expected: geometry.primitive_count,
            });
        }
        if header.geometry_hash != geometry.hash {
            return Err(CacheError::GeometryMismatch {
                found: header.geometry_hash,
                expected: geometry.hash,
            });
        }

        // Bound the allocations before trusting the counts
        let primitive_count = geometry.primitive_count as usize;
        let node_count = header.node_count as usize;
        let index_count = header.index_count as usize;
        if node_count > 2 * primitive_count || index_count > primitive_count {
            return Err(InvalidBvh(format!(
                "{node_count} nodes and {index_count} indices for {primitive_count} primitives"
            ))
            .into());
        }

        let mut nodes = vec![BvhNode::zeroed(); node_count];
        reader.read_exact(bytemuck::cast_slice_mut(&mut nodes))?;
        let mut indices = vec![0u32; index_count];
        reader.read_exact(bytemuck::cast_slice_mut(&mut indices))?;

        let bvh = Bvh {
            nodes,
            indices,
            primitive_count: header.primitive_count,
            build_tag: header.build_tag,
            geometry_hash: header.geometry_hash,
            max_depth: header.max_depth,
        };
        bvh.validate()?;
        Ok(bvh)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        self.write_to(BufWriter::new(File::create(path)?))?;
        log::debug!("Saved BVH cache ({} nodes) to {}", self.nodes.len(), path.display());
        Ok(())
    }

    pub fn load(
        path: impl AsRef<Path>,
        config: &BvhConfig,
        geometry: &GeometryKey,
    ) -> Result<Bvh, CacheError> {
        let path = path.as_ref();
        let bvh = Self::read_from(BufReader::new(File::open(path)?), config, geometry)?;
        log::debug!("Loaded BVH cache ({} nodes) from {}", bvh.nodes.len(), path.display());
        Ok(bvh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SplitHeuristic;
    use lumen_math::{Aabb, Vec3};

    fn sample_boxes(n: usize) -> Vec<Aabb> {
        (0..n)
            .map(|i| {
                let p = Vec3::new((i % 10) as f32, (i / 10) as f32, (i % 3) as f32);
                Aabb::from_min_max(p, p + Vec3::splat(0.5))
            })
            .collect()
    }

    fn sample(n: usize) -> (Bvh, GeometryKey) {
        let boxes = sample_boxes(n);
        let bvh = Bvh::build(&boxes, &BvhConfig::default()).bvh;
        (bvh, GeometryKey::from_boxes(&boxes))
    }

    fn cached_bytes(bvh: &Bvh) -> Vec<u8> {
        let mut bytes = Vec::new();
        bvh.write_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_header_is_32_bytes() {
        assert_eq!(std::mem::size_of::<CacheHeader>(), 32);
    }

    #[test]
    fn test_round_trip() {
        let (bvh, key) = sample(137);
        let bytes = cached_bytes(&bvh);
        assert_eq!(bytes.len(), 32 + 32 * bvh.nodes().len() + 4 * bvh.indices().len());

        let loaded = Bvh::read_from(bytes.as_slice(), &BvhConfig::default(), &key).unwrap();
        assert_eq!(loaded, bvh);
        assert_eq!(loaded.geometry_hash(), key.hash);
    }

    #[test]
    fn test_round_trip_empty() {
        let (bvh, key) = sample(0);
        let loaded = Bvh::read_from(cached_bytes(&bvh).as_slice(), &BvhConfig::default(), &key);
        assert!(loaded.unwrap().is_empty());
    }

    #[test]
    fn test_stale_caches_are_rejected() {
        let (bvh, key) = sample(40);
        let bytes = cached_bytes(&bvh);

        let midpoint = BvhConfig::default().with_heuristic(SplitHeuristic::Midpoint);
        assert!(matches!(
            Bvh::read_from(bytes.as_slice(), &midpoint, &key),
            Err(CacheError::BuildTagMismatch { .. })
        ));

        let (_, more) = sample(41);
        assert!(matches!(
            Bvh::read_from(bytes.as_slice(), &BvhConfig::default(), &more),
            Err(CacheError::PrimitiveCountMismatch { found: 40, expected: 41 })
        ));

        let mut old_version = bytes.clone();
        old_version[4..8].copy_from_slice(&(FORMAT_VERSION - 1).to_ne_bytes());
        assert!(matches!(
            Bvh::read_from(old_version.as_slice(), &BvhConfig::default(), &key),
            Err(CacheError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_moved_geometry_is_rejected() {
        let (bvh, key) = sample(40);
        let bytes = cached_bytes(&bvh);

        // Same primitive count, one box shifted
        let mut boxes = sample_boxes(40);
        boxes[17] = Aabb::from_min_max(boxes[17].min() + Vec3::X, boxes[17].max() + Vec3::X);
        let moved = GeometryKey::from_boxes(&boxes);
        assert_ne!(moved.hash, key.hash);
        assert!(matches!(
            Bvh::read_from(bytes.as_slice(), &BvhConfig::default(), &moved),
            Err(CacheError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_damaged_caches_are_rejected() {
        let (bvh, key) = sample(40);
        let bytes = cached_bytes(&bvh);
        let config = BvhConfig::default();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            Bvh::read_from(bad_magic.as_slice(), &config, &key),
            Err(CacheError::BadMagic)
        ));

        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            Bvh::read_from(truncated, &config, &key),
            Err(CacheError::Io(_))
        ));

        // Duplicate the first primitive id over the second
        let mut duplicate = bytes.clone();
        let indices_start = 32 + 32 * bvh.nodes().len();
        let first: [u8; 4] = duplicate[indices_start..indices_start + 4].try_into().unwrap();
        duplicate[indices_start + 4..indices_start + 8].copy_from_slice(&first);
        assert!(matches!(
            Bvh::read_from(duplicate.as_slice(), &config, &key),
            Err(CacheError::Corrupt(_))
        ));

        let mut huge = bytes;
        huge[16..20].copy_from_slice(&u32::MAX.to_ne_bytes());
        assert!(matches!(
            Bvh::read_from(huge.as_slice(), &config, &key),
            Err(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let (bvh, key) = sample(64);
        let path = std::env::temp_dir().join(format!("lumen_bvh_cache_{}.bin", std::process::id()));

        bvh.save(&path).unwrap();
        let loaded = Bvh::load(&path, &BvhConfig::default(), &key);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.unwrap(), bvh);
        assert!(matches!(
            Bvh::load(&path, &BvhConfig::default(), &key),
            Err(CacheError::Io(_))
        ));
    }
}
