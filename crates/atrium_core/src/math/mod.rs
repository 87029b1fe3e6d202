//! # Geometry Math
//!
//! AABB accumulation and position quantization used by the VBO layers.
//! All matrices are column-major `[f32; 16]`, matching the GPU uniform
//! layout.

mod aabb;
mod quantize;

pub use aabb::Aabb;
pub use quantize::{positions_decode_matrix, quantize_positions, transform_positions};

/// Column-major 4x4 matrix, the layout uploaded to GPU uniforms.
pub type Mat4 = [f32; 16];

/// The column-major identity matrix.
#[must_use]
pub const fn identity_mat4() -> Mat4 {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}
