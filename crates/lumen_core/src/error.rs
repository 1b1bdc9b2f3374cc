//! Errors raised while assembling a scene.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Index buffer length {0} is not a multiple of 3")]
    IndexCountNotTriangles(usize),

    #[error("Triangle {triangle} references vertex {index} of {vertex_count}")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Material index {index} out of range ({count} materials)")]
    UnknownMaterial { index: u32, count: usize },

    #[error("Scene exceeds {} primitives", u32::MAX)]
    TooManyPrimitives,
}
