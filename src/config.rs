//! Construction-time configuration.
//!
//! Every flag that changes the shape of the state (conjugate symmetry, block
//! count) is resolved once into [`SsmDimensions`]; the rest of the crate only
//! consumes the derived numbers.

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::SsmError;

/// How the real part of the continuous eigenvalues is parameterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityMode {
    /// The stored value is Re(Λ) itself; training may push it to the right half-plane.
    Unconstrained,
    /// The stored value is log(-Re(Λ)), so Re(Λ) = -exp(stored) < 0 always.
    LeftHalfPlane,
}

/// Storage layout of the complex state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateLayout {
    /// Every eigenvalue is stored explicitly.
    Full,
    /// Only one eigenvalue per conjugate pair is stored; outputs are doubled.
    ConjugateSymmetric,
}

impl StateLayout {
    pub fn from_flag(conj_sym: bool) -> Self {
        if conj_sym {
            Self::ConjugateSymmetric
        } else {
            Self::Full
        }
    }

    /// Factor applied to Re(C̃h) when projecting the state to the output.
    pub fn output_scale(self) -> f64 {
        match self {
            Self::Full => 1.0,
            Self::ConjugateSymmetric => 2.0,
        }
    }

    /// Number of eigenvalues kept out of a block of `block_size`.
    pub fn effective_block_size(self, block_size: usize) -> usize {
        match self {
            Self::Full => block_size,
            Self::ConjugateSymmetric => block_size / 2,
        }
    }
}

/// Dimensions derived from an [`SsmConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsmDimensions {
    /// Nominal state width P before any conjugate halving.
    pub d_state: usize,
    /// Channel width H seen by the cell.
    pub d_inner: usize,
    pub blocks: usize,
    /// Size of the structured matrix each block is built from.
    pub block_size: usize,
    /// Eigenvalues kept per block.
    pub effective_block_size: usize,
    /// Number of complex states actually carried: `blocks * effective_block_size`.
    pub state_width: usize,
    pub layout: StateLayout,
}

#[derive(Config, Debug)]
pub struct SsmConfig {
    /// Latent size P.
    pub d_state: usize,
    /// Channel width H.
    pub d_inner: usize,
    /// Number of independent blocks the state matrix is replicated over.
    #[config(default = 1)]
    pub blocks: usize,
    /// Keep only one eigenvalue of each conjugate pair.
    #[config(default = false)]
    pub conj_sym: bool,
    #[config(default = 1e-3)]
    pub dt_min: f64,
    #[config(default = 1e-1)]
    pub dt_max: f64,
    #[config(default = 1e-4)]
    pub dt_init_floor: f64,
    /// Multiplies every step size; changes with the sample rate.
    #[config(default = 1.0)]
    pub step_rescale: f64,
    #[config(default = "StabilityMode::Unconstrained")]
    pub stability: StabilityMode,
    /// Seed of the host RNG used for the structured initialization.
    #[config(default = 0)]
    pub seed: u64,
    /// Fail with `NonFinite` instead of returning NaN/inf outputs.
    #[config(default = true)]
    pub check_finite: bool,
}

impl SsmConfig {
    /// Validates the configuration and resolves the derived dimensions.
    pub fn dimensions(&self) -> crate::error::Result<SsmDimensions> {
        if self.d_state == 0 {
            return Err(SsmError::ZeroDimension("d_state"));
        }
        if self.d_inner == 0 {
            return Err(SsmError::ZeroDimension("d_inner"));
        }
        if self.blocks == 0 {
            return Err(SsmError::ZeroDimension("blocks"));
        }
        if self.d_state % self.blocks != 0 {
            return Err(SsmError::StateNotDivisible {
                d_state: self.d_state,
                blocks: self.blocks,
            });
        }
        let valid_range = self.dt_min > 0.0
            && self.dt_max >= self.dt_min
            && self.dt_max.is_finite()
            && self.dt_init_floor >= 0.0;
        if !valid_range {
            return Err(SsmError::InvalidTimestepRange {
                dt_min: self.dt_min,
                dt_max: self.dt_max,
            });
        }
        check_rescale(self.step_rescale)?;

        let block_size = self.d_state / self.blocks;
        let layout = StateLayout::from_flag(self.conj_sym);
        if layout == StateLayout::ConjugateSymmetric && block_size % 2 != 0 {
            return Err(SsmError::OddConjugateBlock { block_size });
        }
        let effective_block_size = layout.effective_block_size(block_size);

        Ok(SsmDimensions {
            d_state: self.d_state,
            d_inner: self.d_inner,
            blocks: self.blocks,
            block_size,
            effective_block_size,
            state_width: self.blocks * effective_block_size,
            layout,
        })
    }
}

pub(crate) fn check_rescale(step_rescale: f64) -> crate::error::Result<()> {
    if step_rescale > 0.0 && step_rescale.is_finite() {
        Ok(())
    } else {
        Err(SsmError::InvalidRescale(step_rescale))
    }
}

/// Configuration of a stack of conditioned residual blocks.
#[derive(Config, Debug)]
pub struct StackConfig {
    /// Model width (H in the gated block's outer projection).
    pub d_model: usize,
    #[config(default = 32)]
    pub d_state: usize,
    #[config(default = 8)]
    pub n_layers: usize,
    /// Inner width is `expand_factor * d_model`.
    #[config(default = 2)]
    pub expand_factor: usize,
    #[config(default = 4)]
    pub blocks: usize,
    #[config(default = false)]
    pub conj_sym: bool,
    #[config(default = 1e-3)]
    pub dt_min: f64,
    #[config(default = 1e-1)]
    pub dt_max: f64,
    #[config(default = 1e-4)]
    pub dt_init_floor: f64,
    #[config(default = 1.0)]
    pub step_rescale: f64,
    /// Bias on the gated block's input/output projections.
    #[config(default = false)]
    pub bias: bool,
    #[config(default = "StabilityMode::Unconstrained")]
    pub stability: StabilityMode,
    #[config(default = 1e-5)]
    pub norm_eps: f64,
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = true)]
    pub check_finite: bool,
}

impl StackConfig {
    pub fn d_inner(&self) -> usize {
        self.expand_factor * self.d_model
    }

    /// Cell configuration of layer `layer`; each layer gets its own seed.
    pub fn ssm_config(&self, layer: usize) -> SsmConfig {
        SsmConfig::new(self.d_state, self.d_inner())
            .with_blocks(self.blocks)
            .with_conj_sym(self.conj_sym)
            .with_dt_min(self.dt_min)
            .with_dt_max(self.dt_max)
            .with_dt_init_floor(self.dt_init_floor)
            .with_step_rescale(self.step_rescale)
            .with_stability(self.stability)
            .with_seed(self.seed.wrapping_add(layer as u64))
            .with_check_finite(self.check_finite)
    }
}

/// Full model: audio channels in, conditioning vector, audio channels out.
#[derive(Config, Debug)]
pub struct AmpModelConfig {
    pub stack: StackConfig,
    /// Audio channels in (1 for mono).
    #[config(default = 1)]
    pub input_size: usize,
    #[config(default = 1)]
    pub output_size: usize,
    /// Number of continuous control parameters (e.g. gain and tone).
    #[config(default = 2)]
    pub c_dim: usize,
    /// Hidden widths of the FiLM generator.
    #[config(default = "vec![16, 32]")]
    pub film_hidden: Vec<usize>,
}
