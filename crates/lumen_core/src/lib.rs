//! Lumen Core - scene-side data consumed by the acceleration structure.
//!
//! This crate provides:
//!
//! - **Geometry input**: `Mesh` (indexed triangles) with quad/box helpers
//! - **Materials**: `Material`, the renderer's shading parameters
//! - **Scene**: primitives in stable id order, with the per-primitive
//!   material index and emissive flag the shading stage looks up by id
//!
//! # Example
//!
//! ```ignore
//! use lumen_core::{Material, Mesh, Scene};
//! use lumen_math::Vec3;
//!
//! let mut scene = Scene::new();
//! let white = scene.add_material(Material::diffuse("white", Vec3::splat(0.73)));
//! scene.add_mesh(&Mesh::cuboid(Vec3::ZERO, Vec3::ONE), white)?;
//! scene.add_sphere(Vec3::new(0.5, 2.0, 0.5), 0.5, white)?;
//! ```

pub mod error;
pub mod material;
pub mod mesh;
pub mod scene;

// Re-export commonly used types
pub use error::SceneError;
pub use material::{BrdfKind, Material};
pub use mesh::Mesh;
pub use scene::{Scene, ScenePrimitive};
