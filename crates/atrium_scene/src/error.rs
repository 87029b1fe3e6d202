//! # Scene Model Error Types
//!
//! Recoverable errors surfaced by the scene model API. Contract
//! violations inside the layers (ingestion after finalize, toggles before
//! finalize, budget overruns, wrong position representation) are
//! programmer errors and panic instead - see the layer docs.

use thiserror::Error;

/// Errors from scene-model ingestion and entity lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Geometry id was never registered with `create_geometry`.
    #[error("unknown geometry id {0}")]
    UnknownGeometry(u64),

    /// Mesh id does not exist in this model.
    #[error("unknown mesh id {0}")]
    UnknownMesh(u64),

    /// Entity id does not exist in this model.
    #[error("unknown entity id {0}")]
    UnknownEntity(u64),

    /// Mesh is already owned by another entity.
    #[error("mesh {mesh} already belongs to entity {owner}")]
    MeshAlreadyOwned {
        /// The contested mesh.
        mesh: u64,
        /// Its current owner.
        owner: u64,
    },

    /// Mesh is too large for even an empty batching layer.
    #[error("mesh with {verts} vertices / {indices} indices exceeds the batch budget")]
    MeshExceedsBudget {
        /// Vertices in the rejected mesh.
        verts: usize,
        /// Indices in the rejected mesh.
        indices: usize,
    },

    /// Ingestion attempted after the model was finalized.
    #[error("model is finalized; no further geometry can be ingested")]
    ModelFinalized,
}
