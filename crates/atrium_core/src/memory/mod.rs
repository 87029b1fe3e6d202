//! # Scratch Memory
//!
//! Reusable typed buffers for per-portion GPU update staging. Toggling
//! visibility on ten thousand objects recomputes ten thousand small flag
//! ranges; leasing scratch slices keeps that loop allocation-free.

mod scratch;

pub use scratch::ScratchPool;
