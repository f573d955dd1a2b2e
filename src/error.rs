use thiserror::Error;

/// Everything that can go wrong while building or running the sequence engine.
#[derive(Debug, Error)]
pub enum SsmError {
    #[error("state width {d_state} is not divisible by block count {blocks}")]
    StateNotDivisible { d_state: usize, blocks: usize },

    #[error("conjugate symmetry needs an even block size, got {block_size}")]
    OddConjugateBlock { block_size: usize },

    #[error("dimension `{0}` must be non-zero")]
    ZeroDimension(&'static str),

    #[error("invalid timestep range: dt_min={dt_min}, dt_max={dt_max}")]
    InvalidTimestepRange { dt_min: f64, dt_max: f64 },

    #[error("step rescale factor must be positive and finite, got {0}")]
    InvalidRescale(f64),

    #[error("{what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("eigenvalue {index} has real part {real}, not representable in the left half-plane")]
    UnstableEigenvalue { index: usize, real: f32 },

    #[error("carried state has batch {expected}, input has batch {actual}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("input sequence is empty")]
    EmptySequence,

    #[error("non-finite values produced by {stage}")]
    NonFinite { stage: &'static str },

    #[error("chunk for sequence {sequence_id} starts at sample {actual}, expected {expected}")]
    OutOfOrderChunk {
        sequence_id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("state was advanced by untagged calls; reset it before starting sequence {sequence_id}")]
    UntaggedState { sequence_id: u64 },

    #[error("chunk belongs to sequence {actual} while sequence {expected} is in flight")]
    SequenceMismatch { expected: u64, actual: u64 },

    #[error("eigendecomposition failed: {0}")]
    Decomposition(String),

    #[error("could not read tensor data back to the host: {0}")]
    Readback(String),
}

pub type Result<T> = std::result::Result<T, SsmError>;
