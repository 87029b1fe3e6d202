//! Position quantization.
//!
//! Batched positions live on the GPU as 3x u16 per vertex plus one 4x4
//! decode matrix per layer. Quantization maps the layer's accumulated
//! local-space AABB onto the full `[0, 65535]` range per axis; the decode
//! matrix inverts that mapping in the vertex stage.

use super::{identity_mat4, Aabb, Mat4};

/// Largest quantized coordinate value.
const QUANT_MAX: f64 = 65535.0;

/// Builds the dequantization matrix for positions quantized against `aabb`.
///
/// Scale per axis is `extent / 65535` (zero-extent axes decode to the min
/// corner), translation is the min corner. Column-major, ready for upload.
#[must_use]
pub fn positions_decode_matrix(aabb: &Aabb) -> Mat4 {
    let extent = aabb.extent();
    let mut matrix = identity_mat4();
    for axis in 0..3 {
        let scale = if extent[axis] > 0.0 {
            extent[axis] / QUANT_MAX
        } else {
            1.0
        };
        // Column-major: scale on the diagonal, translation in column 3.
        matrix[axis * 4 + axis] = scale as f32;
        matrix[12 + axis] = aabb.values[axis] as f32;
    }
    matrix
}

/// Quantizes `positions` (xyz triples) against `aabb` into `out`.
///
/// `out` must hold at least `positions.len()` elements; only that prefix is
/// written (callers lease it from a scratch pool, so trailing contents are
/// stale by contract).
///
/// # Panics
///
/// Panics if `out` is shorter than `positions` or if `positions` is not a
/// whole number of xyz triples.
pub fn quantize_positions(positions: &[f32], aabb: &Aabb, out: &mut [u16]) {
    assert!(
        positions.len() % 3 == 0,
        "positions must be xyz triples, got length {}",
        positions.len()
    );
    assert!(
        out.len() >= positions.len(),
        "quantization output too small: {} < {}",
        out.len(),
        positions.len()
    );
    let extent = aabb.extent();
    let mut multiplier = [0.0_f64; 3];
    for axis in 0..3 {
        multiplier[axis] = if extent[axis] > 0.0 {
            QUANT_MAX / extent[axis]
        } else {
            0.0
        };
    }
    for (i, value) in positions.iter().enumerate() {
        let axis = i % 3;
        let scaled = (f64::from(*value) - aabb.values[axis]) * multiplier[axis];
        out[i] = scaled.clamp(0.0, QUANT_MAX).round() as u16;
    }
}

/// Transforms `positions` (xyz triples) in place by a column-major matrix.
///
/// Used to bake a mesh's local matrix into its positions before they are
/// appended to a batching layer (batched geometry carries no per-object
/// transform).
pub fn transform_positions(positions: &mut [f32], matrix: &Mat4) {
    for xyz in positions.chunks_exact_mut(3) {
        let (x, y, z) = (xyz[0], xyz[1], xyz[2]);
        xyz[0] = matrix[0] * x + matrix[4] * y + matrix[8] * z + matrix[12];
        xyz[1] = matrix[1] * x + matrix[5] * y + matrix[9] * z + matrix[13];
        xyz[2] = matrix[2] * x + matrix[6] * y + matrix[10] * z + matrix[14];
    }
}
