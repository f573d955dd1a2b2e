use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;

use crate::config::StackConfig;
use crate::error::{Result, SsmError};
use crate::ssm_cell::{SsmCell, SsmState};
use crate::transform::SequenceTransform;

/// Gated block: `out_proj(ssm(silu(u)) * silu(res))` where `[u, res] = in_proj(x)`.
#[derive(Module, Debug)]
pub struct MambaBlock<B: Backend> {
    /// Input channel: d_model.
    /// Output channel: 2 * d_inner.
    in_proj: Linear<B>,
    ssm: SsmCell<B>,
    /// Input channel: d_inner.
    /// Output channel: d_model.
    out_proj: Linear<B>,
}

impl<B: Backend> MambaBlock<B> {
    /// Builds layer `layer` of a stack described by `config`.
    pub fn new(config: &StackConfig, layer: usize, device: &B::Device) -> Result<Self> {
        if config.d_model == 0 {
            return Err(SsmError::ZeroDimension("d_model"));
        }
        let d_inner = config.d_inner();
        let ssm = config.ssm_config(layer).init(device)?;

        // follows PyTorch's default initializer
        let uniform_init = |d_input: usize| {
            let bound = 1.0 / (d_input as f64).sqrt();
            Initializer::Uniform {
                min: -bound,
                max: bound,
            }
        };

        Ok(Self {
            in_proj: LinearConfig::new(config.d_model, 2 * d_inner)
                .with_bias(config.bias)
                .with_initializer(uniform_init(config.d_model))
                .init(device),
            ssm,
            out_proj: LinearConfig::new(d_inner, config.d_model)
                .with_bias(config.bias)
                .with_initializer(uniform_init(d_inner))
                .init(device),
        })
    }

    pub fn ssm(&self) -> &SsmCell<B> {
        &self.ssm
    }

    pub fn d_model(&self) -> usize {
        self.in_proj.weight.val().dims()[0]
    }

    pub fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        self.ssm.change_scale(step_rescale)
    }

    /// # Shapes
    ///   - Input [batch, sequence, d_model]
    ///   - Output [batch, sequence, d_model]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 3>, SsmState<B>)> {
        let [batch, len, width] = x.dims();
        if width != self.d_model() {
            return Err(SsmError::ShapeMismatch {
                what: "block input width",
                expected: self.d_model(),
                actual: width,
            });
        }
        let d_inner = self.ssm.d_inner();

        let x_and_res = self.in_proj.forward(x);
        let u = x_and_res.clone().slice([0..batch, 0..len, 0..d_inner]);
        let res = x_and_res.slice([0..batch, 0..len, d_inner..2 * d_inner]);

        let (y, state) = self.ssm.forward(silu(u), state)?;
        let y = y * silu(res);

        Ok((self.out_proj.forward(y), state))
    }
}

impl<B: Backend> SequenceTransform<B> for MambaBlock<B> {
    type Input = Tensor<B, 3>;
    type State = SsmState<B>;

    fn initial_state(&self) -> SsmState<B> {
        SsmState::Cold
    }

    fn transform(
        &self,
        input: Tensor<B, 3>,
        state: SsmState<B>,
    ) -> Result<(Tensor<B, 3>, SsmState<B>)> {
        self.forward(input, state)
    }

    fn change_scale(&mut self, step_rescale: f64) -> Result<()> {
        MambaBlock::change_scale(self, step_rescale)
    }
}
