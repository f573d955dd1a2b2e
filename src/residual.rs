use burn::nn::{RmsNorm, RmsNormConfig};
use burn::prelude::*;

use crate::config::StackConfig;
use crate::error::{Result, SsmError};
use crate::mamba_block::MambaBlock;
use crate::ssm_cell::SsmState;
use crate::transform::{SequenceTransform, TimeSplit};

/// Per-batch affine modulation (γ, β), broadcast over time and shared by all layers.
#[derive(Clone, Debug)]
pub struct FilmModulation<B: Backend> {
    /// `[batch, d_model]`
    pub gamma: Tensor<B, 2>,
    /// `[batch, d_model]`
    pub beta: Tensor<B, 2>,
}

impl<B: Backend> FilmModulation<B> {
    pub fn new(gamma: Tensor<B, 2>, beta: Tensor<B, 2>) -> Result<Self> {
        let [g_batch, g_width] = gamma.dims();
        let [b_batch, b_width] = beta.dims();
        if g_batch != b_batch {
            return Err(SsmError::ShapeMismatch {
                what: "shift batch",
                expected: g_batch,
                actual: b_batch,
            });
        }
        if g_width != b_width {
            return Err(SsmError::ShapeMismatch {
                what: "shift width",
                expected: g_width,
                actual: b_width,
            });
        }
        Ok(Self { gamma, beta })
    }

    /// γ = 1, β = 0.
    pub fn identity(batch: usize, d_model: usize, device: &B::Device) -> Self {
        Self {
            gamma: Tensor::ones([batch, d_model], device),
            beta: Tensor::zeros([batch, d_model], device),
        }
    }

    pub fn dims(&self) -> [usize; 2] {
        self.gamma.dims()
    }

    /// `γ·x + β` for `x: [batch, time, d_model]`.
    pub fn apply(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.gamma.clone().unsqueeze_dim(1) * x + self.beta.clone().unsqueeze_dim(1)
    }

    pub(crate) fn check_against(&self, x: &Tensor<B, 3>) -> Result<()> {
        let [batch, _, width] = x.dims();
        let [m_batch, m_width] = self.dims();
        if m_batch != batch {
            return Err(SsmError::ShapeMismatch {
                what: "modulation batch",
                expected: batch,
                actual: m_batch,
            });
        }
        if m_width != width {
            return Err(SsmError::ShapeMismatch {
                what: "modulation width",
                expected: width,
                actual: m_width,
            });
        }
        Ok(())
    }
}

/// Features together with the modulation that conditions them.
#[derive(Clone, Debug)]
pub struct Conditioned<B: Backend> {
    /// `[batch, time, d_model]`
    pub features: Tensor<B, 3>,
    pub modulation: FilmModulation<B>,
}

impl<B: Backend> TimeSplit for Conditioned<B> {
    fn time_len(&self) -> usize {
        self.features.time_len()
    }

    fn time_slice(&self, start: usize, end: usize) -> Self {
        Self {
            features: self.features.time_slice(start, end),
            modulation: self.modulation.clone(),
        }
    }
}

/// `x + block(norm(γ·x + β))`
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    mamba: MambaBlock<B>,
    norm: RmsNorm<B>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(config: &StackConfig, layer: usize, device: &B::Device) -> Result<Self> {
        Ok(Self {
            mamba: MambaBlock::new(config, layer, device)?,
            norm: RmsNormConfig::new(config.d_model)
                .with_epsilon(config.norm_eps)
                .init(device),
        })
    }

    pub fn mamba(&self) -> &MambaBlock<B> {
        &self.mamba
    }

    pub fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        self.mamba.change_scale(step_rescale)
    }

    /// # Shapes
    ///   - Input [batch, sequence, d_model]
    ///   - Modulation [batch, d_model] each
    ///   - Output [batch, sequence, d_model]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        modulation: &FilmModulation<B>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 3>, SsmState<B>)> {
        modulation.check_against(&x)?;
        let conditioned = self.norm.forward(modulation.apply(x.clone()));
        let (y, state) = self.mamba.forward(conditioned, state)?;
        Ok((y + x, state))
    }
}

impl<B: Backend> SequenceTransform<B> for ResidualBlock<B> {
    type Input = Conditioned<B>;
    type State = SsmState<B>;

    fn initial_state(&self) -> SsmState<B> {
        SsmState::Cold
    }

    fn transform(
        &self,
        input: Conditioned<B>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 3>, SsmState<B>)> {
        self.forward(input.features, &input.modulation, state)
    }

    fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        ResidualBlock::change_scale(self, step_rescale)
    }
}
