//! Mesh geometry representation.
//!
//! An indexed triangle list as it comes out of a scene loader. Meshes are
//! flattened into individual triangle primitives when added to a `Scene`.

use lumen_math::{Aabb, Vec3};

use crate::SceneError;

/// A mesh consisting of vertex positions and triangle indices.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Vertex positions (one Vec3 per vertex)
    pub positions: Vec<Vec3>,

    /// Triangle indices (every 3 indices form a triangle)
    pub indices: Vec<u32>,

    /// Axis-aligned bounding box
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a new mesh from positions and indices.
    ///
    /// Fails if the index buffer is not made of whole triangles or references
    /// a vertex that does not exist.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Result<Self, SceneError> {
        if indices.len() % 3 != 0 {
            return Err(SceneError::IndexCountNotTriangles(indices.len()));
        }

        let vertex_count = positions.len();
        if let Some(pos) = indices.iter().position(|&i| i as usize >= vertex_count) {
            return Err(SceneError::IndexOutOfRange {
                triangle: pos / 3,
                index: indices[pos],
                vertex_count,
            });
        }

        let bounds = Aabb::from_point_iter(positions.iter().copied());
        Ok(Self {
            positions,
            indices,
            bounds,
        })
    }

    /// Planar quad `a b c d` (counter-clockwise) as two triangles
    /// `[a, b, c]` and `[a, c, d]`.
    pub fn quad(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> Self {
        Self {
            positions: vec![a, b, c, d],
            indices: vec![0, 1, 2, 0, 2, 3],
            bounds: Aabb::from_point_iter([a, b, c, d]),
        }
    }

    /// Axis-aligned box between `min` and `max`, 12 outward-facing triangles.
    pub fn cuboid(min: Vec3, max: Vec3) -> Self {
        let corner = |x: bool, y: bool, z: bool| {
            Vec3::new(
                if x { max.x } else { min.x },
                if y { max.y } else { min.y },
                if z { max.z } else { min.z },
            )
        };

        let positions = vec![
            corner(false, false, false), // 0
            corner(true, false, false),  // 1
            corner(true, true, false),   // 2
            corner(false, true, false),  // 3
            corner(false, false, true),  // 4
            corner(true, false, true),   // 5
            corner(true, true, true),    // 6
            corner(false, true, true),   // 7
        ];
        let indices = vec![
            0, 3, 2, 0, 2, 1, // -Z
            4, 5, 6, 4, 6, 7, // +Z
            0, 4, 7, 0, 7, 3, // -X
            1, 2, 6, 1, 6, 5, // +X
            0, 1, 5, 0, 5, 4, // -Y
            3, 7, 6, 3, 6, 2, // +Y
        ];

        Self {
            positions,
            indices,
            bounds: Aabb::from_points(min, max),
        }
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Iterate over triangles as `[v0, v1, v2]` position triplets.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            [
                self.positions[tri[0] as usize],
                self.positions[tri[1] as usize],
                self.positions[tri[2] as usize],
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_creation() {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let mesh = Mesh::new(positions, vec![0, 1, 2]).unwrap();

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn test_mesh_rejects_partial_triangle() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let err = Mesh::new(positions, vec![0, 1, 2, 0]).unwrap_err();
        assert_eq!(err, SceneError::IndexCountNotTriangles(4));
    }

    #[test]
    fn test_mesh_rejects_out_of_range_index() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let err = Mesh::new(positions, vec![0, 1, 2, 2, 1, 7]).unwrap_err();
        assert_eq!(
            err,
            SceneError::IndexOutOfRange {
                triangle: 1,
                index: 7,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn test_bounds_computation() {
        let positions = vec![
            Vec3::new(-1.0, -2.0, -3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec3::new(0.0, 0.0, 0.0),
        ];
        let mesh = Mesh::new(positions, vec![0, 1, 2]).unwrap();

        assert_eq!(mesh.bounds.min(), Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(mesh.bounds.max(), Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_triangles() {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0), // v0
            Vec3::new(1.0, 0.0, 0.0), // v1
            Vec3::new(0.0, 1.0, 0.0), // v2
            Vec3::new(1.0, 1.0, 0.0), // v3
        ];
        // Two triangles: [0,1,2] and [1,3,2]
        let mesh = Mesh::new(positions.clone(), vec![0, 1, 2, 1, 3, 2]).unwrap();
        let triangles: Vec<_> = mesh.triangles().collect();

        assert_eq!(triangles.len(), 2);
        assert_eq!(triangles[0], [positions[0], positions[1], positions[2]]);
        assert_eq!(triangles[1], [positions[1], positions[3], positions[2]]);
    }

    #[test]
    fn test_quad_splits_into_two_triangles() {
        let quad = Mesh::quad(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        assert_eq!(quad.triangle_count(), 2);
        assert_eq!(quad.bounds.max(), Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_cuboid_normals_face_outward() {
        let cube = Mesh::cuboid(Vec3::ZERO, Vec3::ONE);
        assert_eq!(cube.triangle_count(), 12);

        let center = Vec3::splat(0.5);
        for [a, b, c] in cube.triangles() {
            let normal = (b - a).cross(c - a);
            let face_center = (a + b + c) / 3.0;
            assert!(normal.dot(face_center - center) > 0.0);
        }
    }
}
