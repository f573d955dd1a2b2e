//! ampssm: a structured state-space sequence engine for conditioned audio
//! effects.
//!
//! A diagonalized HiPPO-initialized SSM cell is discretized with the bilinear
//! transform and evaluated with an associative scan. Cells sit inside gated
//! blocks, which sit inside FiLM-conditioned residual blocks, which form a
//! stack. Hidden state is an explicit value threaded through every call, so
//! long signals can be streamed in chunks.

// Shared plumbing
pub mod config;
pub mod device;
pub mod error;

// Numerics
pub mod complex;
pub mod discretize;
pub mod hippo;
pub mod parallel_scan;

// Layers
pub mod film;
pub mod mamba_block;
pub mod model;
pub mod residual;
pub mod ssm_cell;
pub mod stack;
pub mod transform;

pub use config::{AmpModelConfig, SsmConfig, StabilityMode, StackConfig, StateLayout};
pub use error::{Result, SsmError};
pub use model::{AmpInput, AmpModel};
pub use residual::{Conditioned, FilmModulation, ResidualBlock};
pub use ssm_cell::{SsmCell, SsmState};
pub use stack::{ChunkTag, Stack, StackState};
pub use transform::{SequenceTransform, forward_chunked};
