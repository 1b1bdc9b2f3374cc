//! Error types of the acceleration core.

use thiserror::Error;

use crate::PrimitiveId;

/// A primitive that was left out of the BVH.
///
/// These are collected during the build and reported once it completes; they
/// never abort construction.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveError {
    #[error("Primitive {id} has non-finite coordinates")]
    NonFinite { id: PrimitiveId },

    #[error("Triangle {id} is degenerate (zero area)")]
    DegenerateTriangle { id: PrimitiveId },

    #[error("Sphere {id} has invalid radius {radius}")]
    InvalidRadius { id: PrimitiveId, radius: f32 },
}

impl PrimitiveError {
    /// Id of the discarded primitive.
    pub fn id(&self) -> PrimitiveId {
        match *self {
            PrimitiveError::NonFinite { id }
            | PrimitiveError::DegenerateTriangle { id }
            | PrimitiveError::InvalidRadius { id, .. } => id,
        }
    }
}

/// Caller contract violation on a traversal query.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum QueryError {
    #[error("Invalid ray range [{t_min}, {t_max}]")]
    InvalidRange { t_min: f32, t_max: f32 },

    #[error("Ray origin or direction is not finite")]
    NonFiniteRay,
}

/// Failure to load a cached BVH.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a BVH cache file")]
    BadMagic,

    #[error("Cache format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Cache built with settings tag {found:#010x}, expected {expected:#010x}")]
    BuildTagMismatch { found: u32, expected: u32 },

    #[error("Cache built for {found} primitives, scene has {expected}")]
    PrimitiveCountMismatch { found: u32, expected: u32 },

    #[error("Cache built for different geometry (hash {found:#010x}, expected {expected:#010x})")]
    GeometryMismatch { found: u32, expected: u32 },

    #[error("Corrupt BVH cache: {0}")]
    Corrupt(#[from] InvalidBvh),
}

/// Structural violation found by [`Bvh::validate`](crate::Bvh::validate).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidBvh(pub String);
