//! Scene description handed to the acceleration core.
//!
//! Every primitive receives a stable id equal to its insertion index. The
//! material index and emissive flag of a primitive are stored here, in arrays
//! parallel to the primitive list, and looked up by that id after a hit.

use std::ops::Range;

use lumen_math::Vec3;

use crate::{Material, Mesh, SceneError};

/// A primitive as stored by the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScenePrimitive {
    Triangle([Vec3; 3]),
    Sphere { center: Vec3, radius: f32 },
}

/// Primitives, materials and the id → material mapping.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    materials: Vec<Material>,
    primitives: Vec<ScenePrimitive>,
    material_indices: Vec<u32>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material and return its index.
    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    /// Add every triangle of `mesh` with the given material.
    ///
    /// Returns the id range assigned to the mesh's triangles.
    pub fn add_mesh(&mut self, mesh: &Mesh, material: u32) -> Result<Range<u32>, SceneError> {
        self.check_material(material)?;
        self.check_capacity(mesh.triangle_count())?;

        let first = self.primitives.len() as u32;
        for triangle in mesh.triangles() {
            self.push(ScenePrimitive::Triangle(triangle), material);
        }
        let last = self.primitives.len() as u32;

        log::debug!(
            "Added mesh with {} triangles as primitives {}..{}",
            mesh.triangle_count(),
            first,
            last
        );
        Ok(first..last)
    }

    /// Add a single triangle and return its primitive id.
    pub fn add_triangle(
        &mut self,
        a: Vec3,
        b: Vec3,
        c: Vec3,
        material: u32,
    ) -> Result<u32, SceneError> {
        self.check_material(material)?;
        self.check_capacity(1)?;
        Ok(self.push(ScenePrimitive::Triangle([a, b, c]), material))
    }

    /// Add an analytic sphere and return its primitive id.
    ///
    /// Spheres are typically added after the scene file has been parsed, so
    /// their ids follow the triangles.
    pub fn add_sphere(
        &mut self,
        center: Vec3,
        radius: f32,
        material: u32,
    ) -> Result<u32, SceneError> {
        self.check_material(material)?;
        self.check_capacity(1)?;
        Ok(self.push(ScenePrimitive::Sphere { center, radius }, material))
    }

    /// All primitives, indexed by primitive id.
    pub fn primitives(&self) -> &[ScenePrimitive] {
        &self.primitives
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Material index of a primitive, `None` if the id is unknown.
    pub fn material_index(&self, primitive_id: u32) -> Option<u32> {
        self.material_indices.get(primitive_id as usize).copied()
    }

    /// Material of a primitive, `None` if the id is unknown.
    pub fn material(&self, primitive_id: u32) -> Option<&Material> {
        let index = self.material_index(primitive_id)?;
        self.materials.get(index as usize)
    }

    /// True if the primitive's material emits light.
    pub fn is_emissive(&self, primitive_id: u32) -> bool {
        self.material(primitive_id)
            .is_some_and(Material::is_emissive)
    }

    /// Ids of all light-emitting primitives, in id order.
    pub fn emissive_primitives(&self) -> Vec<u32> {
        (0..self.primitives.len() as u32)
            .filter(|&id| self.is_emissive(id))
            .collect()
    }

    fn push(&mut self, primitive: ScenePrimitive, material: u32) -> u32 {
        self.primitives.push(primitive);
        self.material_indices.push(material);
        (self.primitives.len() - 1) as u32
    }

    fn check_material(&self, index: u32) -> Result<(), SceneError> {
        if (index as usize) < self.materials.len() {
            Ok(())
        } else {
            Err(SceneError::UnknownMaterial {
                index,
                count: self.materials.len(),
            })
        }
    }

    fn check_capacity(&self, additional: usize) -> Result<(), SceneError> {
        if self.primitives.len() + additional > u32::MAX as usize {
            Err(SceneError::TooManyPrimitives)
        } else {
            Ok(())
        }
    }
}
