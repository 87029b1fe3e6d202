//! # Layer Staging Buffer
//!
//! Plain growable arrays accumulating everything `create_portion` appends,
//! consumed exactly once by finalize and then dropped. Nothing here
//! touches the GPU.

/// CPU-side staging for one batching layer.
///
/// Exactly one of `positions_raw` / `positions_quantized` fills, decided
/// by the layer's position mode at construction.
#[derive(Debug, Default)]
pub struct LayerStaging {
    /// Local-space f32 positions (auto-compression mode).
    pub positions_raw: Vec<f32>,
    /// Pre-quantized u16 positions (pre-compressed mode).
    pub positions_quantized: Vec<u16>,
    /// Oct-encoded normals, 3x i8 per vertex (empty when unsupplied).
    pub normals: Vec<i8>,
    /// RGBA colors, 4x u8 per vertex.
    pub colors: Vec<u8>,
    /// World-space offsets, 3x f32 per vertex (filled with zeros when the
    /// offsets feature is enabled, absent otherwise).
    pub offsets: Vec<f32>,
    /// Triangle/line indices.
    pub indices: Vec<u32>,
    /// Edge indices (triangle variants only).
    pub edge_indices: Vec<u32>,
}

impl LayerStaging {
    /// Empty staging.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        if self.positions_quantized.is_empty() {
            self.positions_raw.len() / 3
        } else {
            self.positions_quantized.len() / 3
        }
    }

    /// Number of staged position components (either representation).
    #[must_use]
    pub fn position_len(&self) -> usize {
        self.positions_raw.len() + self.positions_quantized.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_count_tracks_active_representation() {
        let mut staging = LayerStaging::new();
        staging.positions_raw.extend_from_slice(&[0.0; 9]);
        assert_eq!(staging.vertex_count(), 3);

        let mut staging = LayerStaging::new();
        staging.positions_quantized.extend_from_slice(&[0; 6]);
        assert_eq!(staging.vertex_count(), 2);
    }
}
